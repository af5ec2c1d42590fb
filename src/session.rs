//! Session Orchestration
//!
//! [`SessionService`] ties the building blocks together into the flows an
//! HTTP layer calls:
//!
//! | Flow | Rate limit | Result |
//! |------|------------|--------|
//! | [`login`](SessionService::login) | `Login` per IP | access + refresh + CSRF token |
//! | [`refresh`](SessionService::refresh) | none | new access token |
//! | [`logout`](SessionService::logout) | none | both tokens revoked |
//! | [`authenticate`](SessionService::authenticate) | none | access claims |
//! | [`register`](SessionService::register) | `Register` per IP | new active account |
//! | [`change_password`](SessionService::change_password) | `PasswordReset` per IP | re-hashed password |
//! | [`unlock`](SessionService::unlock) | none | lockout cleared |
//!
//! Credential store failures end the flow. Cache failures degrade: the rate
//! limiter fails open, and revocation lookups follow the configured
//! [`RevocationFailurePolicy`](crate::revocation::RevocationFailurePolicy).
//!
//! Refresh tokens are not rotated: a refresh token stays usable until it
//! expires or is revoked by logout.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use portcullis::cache::MemoryCache;
//! use portcullis::clock::SystemClock;
//! use portcullis::config::PortcullisConfig;
//! use portcullis::credentials::MemoryCredentialStore;
//! use portcullis::session::SessionService;
//! use portcullis::signing_secret::generate_secret;
//!
//! let config = PortcullisConfig::builder()
//!     .secrets(generate_secret(64), generate_secret(64))
//!     .bcrypt_cost(4)
//!     .build();
//! let sessions = SessionService::from_config(
//!     &config,
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(MemoryCache::default()),
//!     Arc::new(SystemClock),
//! )?;
//!
//! sessions.register("ada@example.com", "Analytical1!", "student", "Ada", "10.0.0.1")?;
//! let login = sessions.login("ada@example.com", "Analytical1!", "10.0.0.1", None)?;
//! let claims = sessions.authenticate(&login.access_token)?;
//! assert_eq!(claims.sub, login.user.user_id);
//!
//! sessions.logout(&login.access_token, &login.refresh_token)?;
//! assert!(sessions.authenticate(&login.access_token).is_err());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::cache::SharedCache;
use crate::clock::{Clock, SharedClock};
use crate::config::PortcullisConfig;
use crate::credentials::{normalize_email, CredentialRecord, CredentialStore, StoreError, UserSummary};
use crate::crypto;
use crate::error::{AuthError, Result};
use crate::hashing::{BcryptHasher, PasswordHasher};
use crate::lockout::{self, LockoutPolicy, LockoutState};
use crate::observability::SecurityEvent;
use crate::password::PasswordPolicy;
use crate::rate_limit::{CacheCounterStore, RateLimitAction, RateLimiter};
use crate::revocation::{IssuanceMetadata, RevocationCache};
use crate::token::{AccessClaims, IssuedToken, TokenService, TokenType};

/// Tokens and user details returned by a successful login
#[derive(Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Opaque token for double-submit CSRF protection
    pub csrf_token: String,
    pub user: UserSummary,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("csrf_token", &"[REDACTED]")
            .field("user", &self.user)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Plaintext behind the hash checked when a login names an unknown email
const TIMING_PASSWORD: &str = "portcullis-timing-equalizer";

/// Login, refresh, logout and account flows
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    /// Verified against on unknown emails so they cost as much as a bad password
    timing_hash: Option<String>,
    tokens: TokenService,
    limiter: RateLimiter,
    lockout: LockoutPolicy,
    password_policy: PasswordPolicy,
    clock: SharedClock,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("tokens", &self.tokens)
            .field("limiter", &self.limiter)
            .field("lockout", &self.lockout)
            .field("password_policy", &self.password_policy)
            .finish()
    }
}

impl SessionService {
    /// Assemble a service from its parts
    ///
    /// Hashes one throwaway password with `hasher` up front.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: TokenService,
        limiter: RateLimiter,
        lockout: LockoutPolicy,
        password_policy: PasswordPolicy,
        clock: SharedClock,
    ) -> Self {
        let timing_hash = match hasher.hash(TIMING_PASSWORD) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "Could not prepare timing hash, unknown emails will answer faster");
                None
            }
        };
        Self {
            store,
            hasher,
            timing_hash,
            tokens,
            limiter,
            lockout,
            password_policy,
            clock,
        }
    }

    /// Build a service from validated configuration
    ///
    /// Revocation markers, issuance metadata and rate-limit counters all live
    /// in `cache`, so instances sharing a cache share that state. An invalid
    /// configuration fails with [`AuthError::Config`].
    pub fn from_config(
        config: &PortcullisConfig,
        store: Arc<dyn CredentialStore>,
        cache: SharedCache,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;

        let revocations = RevocationCache::new(cache.clone(), config.revocation_failure_policy);
        let tokens = TokenService::new(&config.token, revocations, clock.clone())?;
        let limiter = RateLimiter::new(
            Arc::new(CacheCounterStore::new(cache)),
            config.rate_limits.clone(),
            clock.clone(),
        );

        Ok(Self::new(
            store,
            Arc::new(BcryptHasher::from_config(&config.hashing)),
            tokens,
            limiter,
            config.lockout,
            config.password.clone(),
            clock,
        ))
    }

    /// Token service
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Rate limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Authenticate with email and password and open a session
    pub fn login(
        &self,
        email: &str,
        password: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<LoginResponse> {
        self.limiter.enforce(ip, RateLimitAction::Login)?;

        let email = normalize_email(email);
        let now = self.clock.now();

        let Some(stored) = self.store.find_by_email(&email)? else {
            if let Some(hash) = &self.timing_hash {
                let _ = self.hasher.verify(password, hash);
            }
            crate::security_event!(
                SecurityEvent::AuthenticationFailure,
                email = %email,
                ip_address = %ip,
                reason = "unknown_email",
                "Login failed"
            );
            return Err(AuthError::InvalidCredentials);
        };

        let record = lockout::check_and_maybe_unlock(&stored, now);
        if stored.is_locked && !record.is_locked {
            crate::security_event!(
                SecurityEvent::AccountUnlocked,
                user_id = %record.user_id,
                reason = "expired",
                "Account lock expired"
            );
        }

        if let LockoutState::Locked { remaining, .. } = lockout::state(&record, now) {
            crate::security_event!(
                SecurityEvent::AuthenticationFailure,
                user_id = %record.user_id,
                ip_address = %ip,
                reason = "account_locked",
                remaining_secs = remaining.as_secs(),
                "Login rejected for locked account"
            );
            return Err(AuthError::AccountLocked { remaining });
        }

        if !self.hasher.verify(password, &record.password_hash)? {
            let failed = self.lockout.record_failure(&record, now);
            self.store.save(&failed)?;

            crate::security_event!(
                SecurityEvent::AuthenticationFailure,
                user_id = %failed.user_id,
                ip_address = %ip,
                reason = "bad_password",
                failed_count = failed.failed_login_attempts,
                remaining_attempts = self.lockout.remaining_attempts(&failed),
                "Login failed"
            );
            if failed.is_locked {
                crate::security_event!(
                    SecurityEvent::AccountLocked,
                    user_id = %failed.user_id,
                    ip_address = %ip,
                    failed_count = failed.failed_login_attempts,
                    lockout_duration_secs = self.lockout.lockout_duration.as_secs(),
                    "Account locked due to failed login attempts"
                );
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !record.is_active {
            crate::security_event!(
                SecurityEvent::AuthenticationFailure,
                user_id = %record.user_id,
                ip_address = %ip,
                reason = "inactive",
                "Login rejected for inactive account"
            );
            return Err(AuthError::AccountInactive);
        }

        let record = lockout::record_success(&record);
        self.store.save(&record)?;

        let access = self.tokens.mint_access(&record.user_id, &record.role)?;
        let refresh = self.tokens.mint_refresh(&record.user_id)?;
        let csrf_token = crypto::generate_csrf_token();

        let metadata = IssuanceMetadata {
            user_id: record.user_id.clone(),
            ip: ip.to_string(),
            user_agent: user_agent.map(str::to_string),
            issued_at: now,
        };
        if let Err(e) = self.tokens.revocations().record_issuance(
            &access.token_id,
            &metadata,
            self.tokens.access_ttl(),
        ) {
            warn!(token_id = %access.token_id, error = %e, "Failed to record issuance metadata");
        }

        crate::security_event!(
            SecurityEvent::AuthenticationSuccess,
            user_id = %record.user_id,
            ip_address = %ip,
            "Login successful"
        );
        crate::security_event!(
            SecurityEvent::SessionCreated,
            user_id = %record.user_id,
            access_token_id = %access.token_id,
            refresh_token_id = %refresh.token_id,
            "Session created"
        );

        Ok(LoginResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            csrf_token,
            user: record.summary(),
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        })
    }

    /// Exchange a refresh token for a new access token
    ///
    /// The refresh token itself is returned to no one and stays valid.
    pub fn refresh(&self, refresh_token: &str) -> Result<IssuedToken> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        let record = self
            .store
            .find_by_id(&claims.sub)?
            .ok_or(AuthError::InvalidToken)?;
        if !record.is_active {
            return Err(AuthError::AccountInactive);
        }

        let access = self.tokens.mint_access(&record.user_id, &record.role)?;

        crate::security_event!(
            SecurityEvent::TokenRefreshed,
            user_id = %record.user_id,
            refresh_token_id = %claims.jti,
            access_token_id = %access.token_id,
            "Access token refreshed"
        );
        Ok(access)
    }

    /// Revoke both tokens of a session
    ///
    /// Both revocations are always attempted. Expired or already revoked
    /// tokens are fine. If either token is invalid, or a revocation could not
    /// be stored, the first such error is returned after both were processed.
    pub fn logout(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        let access = self
            .tokens
            .inspect_access(access_token)
            .map(|c| (c.sub, c.jti, c.exp));
        let refresh = self
            .tokens
            .inspect_refresh(refresh_token)
            .map(|c| (c.sub, c.jti, c.exp));

        let mut first_error = None;
        for (token_type, inspected) in [(TokenType::Access, access), (TokenType::Refresh, refresh)] {
            if let Err(e) = inspected.and_then(|(sub, jti, exp)| self.revoke(token_type, &sub, &jti, exp)) {
                first_error.get_or_insert(e);
            }
        }

        crate::security_event!(
            SecurityEvent::Logout,
            complete = first_error.is_none(),
            "Logout"
        );
        first_error.map_or(Ok(()), Err)
    }

    fn revoke(&self, token_type: TokenType, sub: &str, jti: &str, exp: i64) -> Result<()> {
        let ttl = self.tokens.remaining_lifetime(exp);
        if ttl.is_zero() {
            return Ok(());
        }
        self.tokens.revocations().revoke(jti, ttl)?;

        crate::security_event!(
            SecurityEvent::TokenRevoked,
            user_id = %sub,
            token_type = %token_type,
            token_id = %jti,
            ttl_secs = ttl.as_secs(),
            "Token revoked"
        );
        Ok(())
    }

    /// Verify the access token of an incoming request
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims> {
        self.tokens.verify_access(access_token)
    }

    /// Create an active account
    pub fn register(
        &self,
        email: &str,
        password: &str,
        role: &str,
        display_name: &str,
        ip: &str,
    ) -> Result<UserSummary> {
        self.limiter.enforce(ip, RateLimitAction::Register)?;
        self.password_policy
            .validate(password)
            .map_err(AuthError::PasswordTooWeak)?;

        let email = normalize_email(email);
        if self.store.find_by_email(&email)?.is_some() {
            return Err(AuthError::EmailUnavailable);
        }

        let hash = self.hasher.hash(password)?;
        let record = CredentialRecord::new(Uuid::new_v4().to_string(), &email, display_name, role, hash);
        match self.store.create(&record) {
            Ok(()) => {}
            Err(StoreError::Conflict) => return Err(AuthError::EmailUnavailable),
            Err(e) => return Err(e.into()),
        }

        crate::security_event!(
            SecurityEvent::UserRegistered,
            user_id = %record.user_id,
            role = %record.role,
            ip_address = %ip,
            "User registered"
        );
        Ok(record.summary())
    }

    /// Replace a user's password after checking the current one
    pub fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
        ip: &str,
    ) -> Result<()> {
        self.limiter.enforce(ip, RateLimitAction::PasswordReset)?;

        let record = self
            .store
            .find_by_id(user_id)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !self.hasher.verify(current_password, &record.password_hash)? {
            crate::security_event!(
                SecurityEvent::AuthenticationFailure,
                user_id = %user_id,
                ip_address = %ip,
                reason = "bad_current_password",
                "Password change rejected"
            );
            return Err(AuthError::InvalidCredentials);
        }
        self.password_policy
            .validate(new_password)
            .map_err(AuthError::PasswordTooWeak)?;

        let mut updated = record;
        updated.password_hash = self.hasher.hash(new_password)?;
        self.store.save(&updated)?;

        crate::security_event!(
            SecurityEvent::PasswordChanged,
            user_id = %user_id,
            ip_address = %ip,
            "Password changed"
        );
        Ok(())
    }

    /// Clear a lockout by administrative action
    pub fn unlock(&self, user_id: &str) -> Result<()> {
        let record = self
            .store
            .find_by_id(user_id)?
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;

        self.store.save(&lockout::unlock(&record))?;

        crate::security_event!(
            SecurityEvent::AccountUnlocked,
            user_id = %user_id,
            reason = "administrative",
            "Account unlocked"
        );
        Ok(())
    }

    /// Constant-time check of a submitted CSRF token against the session's
    pub fn verify_csrf(&self, expected: &str, submitted: &str) -> bool {
        crypto::verify_csrf(expected, submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::config::ConfigError;
    use crate::credentials::MemoryCredentialStore;
    use crate::password::PasswordRule;
    use crate::signing_secret::SigningSecretError;
    use crate::revocation::tests::UnavailableCache;
    use crate::revocation::RevocationFailurePolicy;
    use crate::token::tests::{ACCESS_SECRET, REFRESH_SECRET};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const EMAIL: &str = "ada@example.com";
    const PASSWORD: &str = "Analytical1!";
    const IP: &str = "10.0.0.1";

    struct Harness {
        sessions: SessionService,
        store: Arc<MemoryCredentialStore>,
        clock: ManualClock,
    }

    fn config() -> PortcullisConfig {
        PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .bcrypt_cost(4)
            .rate_limit(RateLimitAction::Login, 100, Duration::from_secs(15 * 60))
            .build()
    }

    fn harness_with(config: PortcullisConfig, cache: Option<SharedCache>) -> Harness {
        let clock = ManualClock::new();
        let store = Arc::new(MemoryCredentialStore::new());
        let cache: SharedCache = match cache {
            Some(cache) => cache,
            None => Arc::new(MemoryCache::new(Arc::new(clock.clone()))),
        };
        let sessions =
            SessionService::from_config(&config, store.clone(), cache, Arc::new(clock.clone())).unwrap();
        Harness {
            sessions,
            store,
            clock,
        }
    }

    fn harness() -> Harness {
        let h = harness_with(config(), None);
        h.sessions
            .register(EMAIL, PASSWORD, "student", "Ada", IP)
            .unwrap();
        h
    }

    fn user_id(h: &Harness) -> String {
        h.store.find_by_email(EMAIL).unwrap().unwrap().user_id
    }

    #[test]
    fn test_login_issues_distinct_tokens() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, Some("curl/8")).unwrap();

        let access = h.sessions.authenticate(&login.access_token).unwrap();
        let refresh = h.sessions.tokens().verify_refresh(&login.refresh_token).unwrap();
        assert_ne!(access.jti, refresh.jti);
        assert!(login.access_expires_at < login.refresh_expires_at);
        assert_eq!(login.user.email, EMAIL);
        assert_eq!(login.user.role, "student");
        assert_eq!(access.sub, login.user.user_id);
        assert_eq!(login.csrf_token.len(), 43);

        let metadata = h
            .sessions
            .tokens()
            .revocations()
            .issuance(&access.jti)
            .unwrap()
            .unwrap();
        assert_eq!(metadata.ip, IP);
        assert_eq!(metadata.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_login_normalizes_email() {
        let h = harness();
        assert!(h.sessions.login("  ADA@Example.com ", PASSWORD, IP, None).is_ok());
    }

    #[test]
    fn test_login_unknown_email_and_wrong_password_look_alike() {
        let h = harness();
        assert!(matches!(
            h.sessions.login("nobody@example.com", PASSWORD, IP, None),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.sessions.login(EMAIL, "Wrong-pass1", IP, None),
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(h.store.find_by_email(EMAIL).unwrap().unwrap().failed_login_attempts, 1);
    }

    #[test]
    fn test_lockout_after_five_failures() {
        let h = harness();
        for _ in 0..5 {
            assert!(matches!(
                h.sessions.login(EMAIL, "Wrong-pass1", IP, None),
                Err(AuthError::InvalidCredentials)
            ));
        }

        let record = h.store.find_by_email(EMAIL).unwrap().unwrap();
        assert!(record.is_locked);
        assert_eq!(record.failed_login_attempts, 5);

        match h.sessions.login(EMAIL, PASSWORD, IP, None) {
            Err(AuthError::AccountLocked { remaining }) => {
                assert_eq!(remaining, Duration::from_secs(30 * 60));
            }
            other => panic!("expected AccountLocked, got {:?}", other.map(|_| ())),
        }

        h.clock.advance(Duration::from_secs(30 * 60));
        assert!(h.sessions.login(EMAIL, PASSWORD, IP, None).is_ok());

        let record = h.store.find_by_email(EMAIL).unwrap().unwrap();
        assert!(!record.is_locked);
        assert_eq!(record.failed_login_attempts, 0);
        assert_eq!(record.locked_until, None);
    }

    #[test]
    fn test_wrong_password_after_lock_expiry_starts_fresh_count() {
        let h = harness();
        for _ in 0..5 {
            let _ = h.sessions.login(EMAIL, "Wrong-pass1", IP, None);
        }
        h.clock.advance(Duration::from_secs(31 * 60));

        assert!(matches!(
            h.sessions.login(EMAIL, "Wrong-pass1", IP, None),
            Err(AuthError::InvalidCredentials)
        ));
        let record = h.store.find_by_email(EMAIL).unwrap().unwrap();
        assert!(!record.is_locked);
        assert_eq!(record.failed_login_attempts, 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let h = harness();
        let _ = h.sessions.login(EMAIL, "Wrong-pass1", IP, None);
        let _ = h.sessions.login(EMAIL, "Wrong-pass1", IP, None);
        h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        assert_eq!(h.store.find_by_email(EMAIL).unwrap().unwrap().failed_login_attempts, 0);
    }

    #[test]
    fn test_inactive_account() {
        let h = harness();
        let mut record = h.store.find_by_email(EMAIL).unwrap().unwrap();
        record.is_active = false;
        h.store.save(&record).unwrap();

        assert!(matches!(
            h.sessions.login(EMAIL, PASSWORD, IP, None),
            Err(AuthError::AccountInactive)
        ));
    }

    #[test]
    fn test_login_rate_limited_per_ip() {
        let strict = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .bcrypt_cost(4)
            .build();
        let h = harness_with(strict, None);
        h.sessions.register(EMAIL, PASSWORD, "student", "Ada", IP).unwrap();
        for _ in 0..5 {
            h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        }
        match h.sessions.login(EMAIL, PASSWORD, IP, None) {
            Err(AuthError::RateLimitExceeded { retry_after_secs }) => assert!(retry_after_secs > 0),
            other => panic!("expected RateLimitExceeded, got {:?}", other.map(|_| ())),
        }
        // Other clients are unaffected
        assert!(h.sessions.login(EMAIL, PASSWORD, "10.0.0.2", None).is_ok());
    }

    #[test]
    fn test_refresh_mints_new_access_token() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();

        h.clock.advance(Duration::from_secs(20 * 60));
        assert!(matches!(
            h.sessions.authenticate(&login.access_token),
            Err(AuthError::TokenExpired)
        ));

        let renewed = h.sessions.refresh(&login.refresh_token).unwrap();
        let claims = h.sessions.authenticate(&renewed.token).unwrap();
        assert_eq!(claims.sub, login.user.user_id);
        assert_eq!(claims.role, "student");

        // Not rotated
        assert!(h.sessions.refresh(&login.refresh_token).is_ok());
        // Access tokens cannot refresh
        assert!(matches!(
            h.sessions.refresh(&login.access_token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_refresh_requires_active_user() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();

        let mut record = h.store.find_by_email(EMAIL).unwrap().unwrap();
        record.is_active = false;
        h.store.save(&record).unwrap();

        assert!(matches!(
            h.sessions.refresh(&login.refresh_token),
            Err(AuthError::AccountInactive)
        ));
    }

    #[test]
    fn test_logout_revokes_both_tokens() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();

        h.sessions.logout(&login.access_token, &login.refresh_token).unwrap();

        assert!(matches!(
            h.sessions.authenticate(&login.access_token),
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            h.sessions.refresh(&login.refresh_token),
            Err(AuthError::TokenRevoked)
        ));

        // Repeating is harmless
        assert!(h.sessions.logout(&login.access_token, &login.refresh_token).is_ok());
    }

    #[test]
    fn test_logout_with_expired_access_token() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        h.clock.advance(Duration::from_secs(16 * 60));

        h.sessions.logout(&login.access_token, &login.refresh_token).unwrap();
        assert!(matches!(
            h.sessions.refresh(&login.refresh_token),
            Err(AuthError::TokenRevoked)
        ));
    }

    #[test]
    fn test_logout_invalid_access_still_revokes_refresh() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();

        assert!(matches!(
            h.sessions.logout("garbage", &login.refresh_token),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            h.sessions.refresh(&login.refresh_token),
            Err(AuthError::TokenRevoked)
        ));
    }

    #[test]
    fn test_register_rules() {
        let h = harness();
        assert!(matches!(
            h.sessions.register("bob@example.com", "abc12345", "student", "Bob", "10.0.0.9"),
            Err(AuthError::PasswordTooWeak(PasswordRule::MissingUppercase))
        ));
        assert!(matches!(
            h.sessions.register("ADA@example.com", "Abc123!@", "student", "Ada", "10.0.0.9"),
            Err(AuthError::EmailUnavailable)
        ));

        let bob = h
            .sessions
            .register("bob@example.com", "Abc123!@", "instructor", "Bob", "10.0.0.9")
            .unwrap();
        assert_eq!(bob.role, "instructor");
        let stored = h.store.find_by_id(&bob.user_id).unwrap().unwrap();
        assert!(stored.is_active);
        assert_ne!(stored.password_hash, "Abc123!@");
    }

    #[test]
    fn test_register_rate_limited() {
        let h = harness_with(config(), None);
        for i in 0..3 {
            let email = format!("user{}@example.com", i);
            h.sessions.register(&email, PASSWORD, "student", "U", IP).unwrap();
        }
        assert!(matches!(
            h.sessions.register("late@example.com", PASSWORD, "student", "U", IP),
            Err(AuthError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_change_password() {
        let h = harness();
        let id = user_id(&h);

        assert!(matches!(
            h.sessions.change_password(&id, "Not-it-1", "Newer-pass2", IP),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.sessions.change_password(&id, PASSWORD, "short", IP),
            Err(AuthError::PasswordTooWeak(PasswordRule::TooShort { .. }))
        ));

        h.sessions.change_password(&id, PASSWORD, "Newer-pass2", IP).unwrap();
        assert!(matches!(
            h.sessions.login(EMAIL, PASSWORD, IP, None),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(h.sessions.login(EMAIL, "Newer-pass2", IP, None).is_ok());
    }

    #[test]
    fn test_admin_unlock() {
        let h = harness();
        for _ in 0..5 {
            let _ = h.sessions.login(EMAIL, "Wrong-pass1", IP, None);
        }
        h.sessions.unlock(&user_id(&h)).unwrap();
        assert!(h.sessions.login(EMAIL, PASSWORD, IP, None).is_ok());

        assert!(matches!(
            h.sessions.unlock("no-such-user"),
            Err(AuthError::Store(StoreError::NotFound(_)))
        ));
    }

    #[test]
    fn test_verify_csrf() {
        let h = harness();
        let login = h.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        assert!(h.sessions.verify_csrf(&login.csrf_token, &login.csrf_token));
        assert!(!h.sessions.verify_csrf(&login.csrf_token, "forged"));
    }

    #[derive(Default)]
    struct DownStore;

    impl CredentialStore for DownStore {
        fn find_by_email(&self, _: &str) -> Result<Option<CredentialRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn find_by_id(&self, _: &str) -> Result<Option<CredentialRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn save(&self, _: &CredentialRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn create(&self, _: &CredentialRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_store_failure_is_fatal() {
        let clock = ManualClock::new();
        let sessions = SessionService::from_config(
            &config(),
            Arc::new(DownStore),
            Arc::new(MemoryCache::new(Arc::new(clock.clone()))),
            Arc::new(clock),
        )
        .unwrap();

        let err = sessions.login(EMAIL, PASSWORD, IP, None).unwrap_err();
        assert!(matches!(err, AuthError::Store(StoreError::Unavailable(_))));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_cache_outage_follows_revocation_policy() {
        let open = harness_with(config(), Some(Arc::new(UnavailableCache) as SharedCache));
        open.sessions.register(EMAIL, PASSWORD, "student", "Ada", IP).unwrap();
        let login = open.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        assert!(open.sessions.authenticate(&login.access_token).is_ok());

        let mut closed_config = config();
        closed_config.revocation_failure_policy = RevocationFailurePolicy::FailClosed;
        let closed = harness_with(closed_config, Some(Arc::new(UnavailableCache) as SharedCache));
        closed.sessions.register(EMAIL, PASSWORD, "student", "Ada", IP).unwrap();
        let login = closed.sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        assert!(matches!(
            closed.sessions.authenticate(&login.access_token),
            Err(AuthError::Cache(_))
        ));
    }

    #[test]
    fn test_from_config_validates() {
        let clock = ManualClock::new();
        let bad = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, ACCESS_SECRET)
            .build();
        assert!(matches!(
            SessionService::from_config(
                &bad,
                Arc::new(MemoryCredentialStore::new()),
                Arc::new(MemoryCache::default()),
                Arc::new(clock),
            ),
            Err(AuthError::Config(ConfigError::SigningSecret(SigningSecretError::Reused)))
        ));
    }

    #[test]
    fn test_passwords_sharing_a_72_byte_prefix() {
        let h = harness_with(config(), None);
        let prefix = format!("Aa1!{}", "x".repeat(68));

        assert!(matches!(
            h.sessions.register(EMAIL, &format!("{}REAL", prefix), "student", "Ada", IP),
            Err(AuthError::PasswordTooWeak(PasswordRule::TooLong { max: 72 }))
        ));

        h.sessions.register(EMAIL, &prefix, "student", "Ada", IP).unwrap();
        assert!(matches!(
            h.sessions.login(EMAIL, &format!("{}totally-different", prefix), IP, None),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(h.sessions.login(EMAIL, &prefix, IP, None).is_ok());
    }

    #[derive(Debug)]
    struct CountingHasher {
        inner: BcryptHasher,
        verifies: AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, password: &str) -> Result<String> {
            self.inner.hash(password)
        }
        fn verify(&self, password: &str, hash: &str) -> Result<bool> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(password, hash)
        }
    }

    #[test]
    fn test_unknown_email_still_checks_a_hash() {
        let config = config();
        let clock: SharedClock = Arc::new(ManualClock::new());
        let cache: SharedCache = Arc::new(MemoryCache::new(clock.clone()));
        let hasher = Arc::new(CountingHasher {
            inner: BcryptHasher::new(4),
            verifies: AtomicUsize::new(0),
        });
        let tokens = TokenService::new(
            &config.token,
            RevocationCache::new(cache.clone(), config.revocation_failure_policy),
            clock.clone(),
        )
        .unwrap();
        let limiter = RateLimiter::new(
            Arc::new(CacheCounterStore::new(cache)),
            config.rate_limits.clone(),
            clock.clone(),
        );
        let sessions = SessionService::new(
            Arc::new(MemoryCredentialStore::new()),
            hasher.clone(),
            tokens,
            limiter,
            config.lockout,
            config.password.clone(),
            clock,
        );

        assert!(matches!(
            sessions.login("nobody@example.com", PASSWORD, IP, None),
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_does_not_keep_expired_session_state() {
        let clock = ManualClock::new();
        let cache = Arc::new(MemoryCache::new(Arc::new(clock.clone())));
        let sessions = SessionService::from_config(
            &config(),
            Arc::new(MemoryCredentialStore::new()),
            cache.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        sessions.register(EMAIL, PASSWORD, "student", "Ada", IP).unwrap();

        for i in 0..200 {
            let ip = format!("10.1.{}.{}", i / 250, i % 250);
            let login = sessions.login(EMAIL, PASSWORD, &ip, None).unwrap();
            sessions.logout(&login.access_token, &login.refresh_token).unwrap();
        }
        assert!(cache.len() > 200);

        // Past every token lifetime and rate-limit window
        clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
        sessions.login(EMAIL, PASSWORD, IP, None).unwrap();
        assert!(cache.len() < 10, "cache retained {} entries", cache.len());
    }
}
