//! Session Token Issuance and Verification
//!
//! Two kinds of bearer token, both JWTs signed with HS256:
//!
//! | Token | Lifetime | Key | Audience | Purpose |
//! |-------|----------|-----|----------|---------|
//! | Access | 15 minutes | access secret | access audience | authorizes individual requests |
//! | Refresh | 7 days | refresh secret | refresh audience | mints new access tokens |
//!
//! The two use independent keys, distinct audiences, a `typ` claim and
//! distinct claim types, so neither can stand in for the other. Every mint
//! gets a fresh UUIDv4 `jti`, which is what revocation keys on.
//!
//! Expiry is checked against the injected clock rather than the system time,
//! with no leeway.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use portcullis::cache::MemoryCache;
//! use portcullis::clock::SystemClock;
//! use portcullis::revocation::{RevocationCache, RevocationFailurePolicy};
//! use portcullis::signing_secret::generate_secret;
//! use portcullis::token::{TokenConfig, TokenService};
//!
//! let config = TokenConfig::new(generate_secret(64), generate_secret(64));
//! let revocations = RevocationCache::new(Arc::new(MemoryCache::default()), RevocationFailurePolicy::FailOpen);
//! let tokens = TokenService::new(&config, revocations, Arc::new(SystemClock))?;
//!
//! let issued = tokens.mint_access("user-1", "student")?;
//! let claims = tokens.verify_access(&issued.token)?;
//! assert_eq!(claims.sub, "user-1");
//! assert_eq!(claims.role, "student");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{remaining_until, Clock, SharedClock};
use crate::config::ConfigError;
use crate::error::{AuthError, Result};
use crate::observability::SecurityEvent;
use crate::revocation::RevocationCache;
use crate::signing_secret::SigningSecretError;

/// Cookie name conventionally used to carry the access token
pub const ACCESS_TOKEN_COOKIE: &str = "auth_token";

/// Default access token lifetime
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default issuer claim
pub const DEFAULT_ISSUER: &str = "portcullis";

/// Default audience for access tokens
pub const DEFAULT_ACCESS_AUDIENCE: &str = "portcullis:access";

/// Default audience for refresh tokens
pub const DEFAULT_REFRESH_AUDIENCE: &str = "portcullis:refresh";

// ============================================================================
// Claims
// ============================================================================

/// Token type carried in the `typ` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Authorization role
    pub role: String,
    /// Always [`TokenType::Access`]
    pub typ: TokenType,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiration (seconds since epoch)
    pub exp: i64,
    /// Token ID (revocation key)
    pub jti: String,
    pub iss: String,
    pub aud: String,
}

/// Claims of a refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Always [`TokenType::Refresh`]
    pub typ: TokenType,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiration (seconds since epoch)
    pub exp: i64,
    /// Token ID (revocation key)
    pub jti: String,
    pub iss: String,
    pub aud: String,
}

/// Claims common to both token types
trait TokenClaims: DeserializeOwned {
    const TYPE: TokenType;
    fn typ(&self) -> TokenType;
    fn exp(&self) -> i64;
    fn jti(&self) -> &str;
}

impl TokenClaims for AccessClaims {
    const TYPE: TokenType = TokenType::Access;
    fn typ(&self) -> TokenType {
        self.typ
    }
    fn exp(&self) -> i64 {
        self.exp
    }
    fn jti(&self) -> &str {
        &self.jti
    }
}

impl TokenClaims for RefreshClaims {
    const TYPE: TokenType = TokenType::Refresh;
    fn typ(&self) -> TokenType {
        self.typ
    }
    fn exp(&self) -> i64 {
        self.exp
    }
    fn jti(&self) -> &str {
        &self.jti
    }
}

/// A freshly minted token
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Encoded JWT
    pub token: String,
    /// The token's `jti`
    pub token_id: String,
    /// When the token expires
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("token_id", &self.token_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Time left before a token with expiry `exp` (seconds since epoch) expires
pub fn remaining_lifetime(exp: i64, now: DateTime<Utc>) -> Duration {
    match Utc.timestamp_opt(exp, 0).single() {
        Some(expires_at) => remaining_until(expires_at, now),
        None => Duration::ZERO,
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Token signing and lifetime configuration
#[derive(Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,
    /// HMAC secret for refresh tokens (must differ from the access secret)
    pub refresh_secret: String,
    /// `iss` claim for both token types
    pub issuer: String,
    /// `aud` claim for access tokens
    pub access_audience: String,
    /// `aud` claim for refresh tokens
    pub refresh_audience: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
}

impl TokenConfig {
    /// Configuration with the given secrets and default issuer, audiences and lifetimes
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            ..Self::default()
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_audience: DEFAULT_ACCESS_AUDIENCE.to_string(),
            refresh_audience: DEFAULT_REFRESH_AUDIENCE.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("access_audience", &self.access_audience)
            .field("refresh_audience", &self.refresh_audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

// ============================================================================
// Token Service
// ============================================================================

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    audience: String,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        // Expiry is checked against the injected clock
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            audience: audience.to_string(),
            ttl,
        }
    }
}

/// Mints and verifies access and refresh tokens
pub struct TokenService {
    issuer: String,
    access: SigningKeys,
    refresh: SigningKeys,
    revocations: RevocationCache,
    clock: SharedClock,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("access_audience", &self.access.audience)
            .field("refresh_audience", &self.refresh.audience)
            .finish()
    }
}

impl TokenService {
    /// Build the service
    ///
    /// Fails if either secret is empty or both are the same.
    pub fn new(
        config: &TokenConfig,
        revocations: RevocationCache,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        if config.access_secret.is_empty() {
            return Err(SigningSecretError::Missing { name: "access" }.into());
        }
        if config.refresh_secret.is_empty() {
            return Err(SigningSecretError::Missing { name: "refresh" }.into());
        }
        if config.access_secret == config.refresh_secret {
            return Err(SigningSecretError::Reused.into());
        }
        if config.access_audience == config.refresh_audience {
            return Err(ConfigError::invalid(
                "refresh_audience",
                "must differ from the access audience",
            ));
        }

        Ok(Self {
            issuer: config.issuer.clone(),
            access: SigningKeys::new(
                &config.access_secret,
                &config.issuer,
                &config.access_audience,
                config.access_ttl,
            ),
            refresh: SigningKeys::new(
                &config.refresh_secret,
                &config.issuer,
                &config.refresh_audience,
                config.refresh_ttl,
            ),
            revocations,
            clock,
        })
    }

    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    /// Refresh token lifetime
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    /// The revocation cache consulted on verification
    pub fn revocations(&self) -> &RevocationCache {
        &self.revocations
    }

    /// Mint an access token
    pub fn mint_access(&self, user_id: &str, role: &str) -> Result<IssuedToken> {
        let (iat, exp, expires_at) = self.lifetime(self.access.ttl)?;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            typ: TokenType::Access,
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.access.audience.clone(),
        };
        let token = sign(&claims, &self.access)?;

        Ok(IssuedToken {
            token,
            token_id: claims.jti,
            expires_at,
        })
    }

    /// Mint a refresh token
    pub fn mint_refresh(&self, user_id: &str) -> Result<IssuedToken> {
        let (iat, exp, expires_at) = self.lifetime(self.refresh.ttl)?;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            typ: TokenType::Refresh,
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.refresh.audience.clone(),
        };
        let token = sign(&claims, &self.refresh)?;

        Ok(IssuedToken {
            token,
            token_id: claims.jti,
            expires_at,
        })
    }

    /// Verify an access token: signature, issuer, audience, type, expiry, revocation
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        self.verify(token, &self.access)
    }

    /// Verify a refresh token: signature, issuer, audience, type, expiry, revocation
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        self.verify(token, &self.refresh)
    }

    /// Decode an access token checking signature, issuer, audience and type,
    /// but not expiry or revocation
    pub fn inspect_access(&self, token: &str) -> Result<AccessClaims> {
        inspect(token, &self.access)
    }

    /// Decode a refresh token checking signature, issuer, audience and type,
    /// but not expiry or revocation
    pub fn inspect_refresh(&self, token: &str) -> Result<RefreshClaims> {
        inspect(token, &self.refresh)
    }

    /// Whether claims with expiry `exp` have expired
    pub fn is_expired(&self, exp: i64) -> bool {
        exp <= self.clock.now().timestamp()
    }

    /// Time left before claims with expiry `exp` expire
    pub fn remaining_lifetime(&self, exp: i64) -> Duration {
        remaining_lifetime(exp, self.clock.now())
    }

    fn verify<C: TokenClaims>(&self, token: &str, keys: &SigningKeys) -> Result<C> {
        let result = inspect::<C>(token, keys).and_then(|claims| {
            if self.is_expired(claims.exp()) {
                return Err(AuthError::TokenExpired);
            }
            self.revocations.ensure_not_revoked(claims.jti())?;
            Ok(claims)
        });

        if let Err(ref e) = result {
            crate::security_event!(
                SecurityEvent::TokenRejected,
                token_type = %C::TYPE,
                reason = e.code(),
                "Token rejected"
            );
        }
        result
    }

    /// (iat, exp, expires_at) for a token minted now
    fn lifetime(&self, ttl: Duration) -> Result<(i64, i64, DateTime<Utc>)> {
        let iat = self.clock.now().timestamp();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| iat.checked_add(secs))
            .ok_or_else(|| AuthError::Internal("token lifetime out of range".to_string()))?;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| AuthError::Internal("token expiry out of range".to_string()))?;
        Ok((iat, exp, expires_at))
    }
}

fn sign<C: Serialize>(claims: &C, keys: &SigningKeys) -> Result<String> {
    encode(&Header::new(Algorithm::HS256), claims, &keys.encoding)
        .map_err(|e| AuthError::Internal(format!("Token creation failed: {}", e)))
}

fn inspect<C: TokenClaims>(token: &str, keys: &SigningKeys) -> Result<C> {
    let claims = decode::<C>(token, &keys.decoding, &keys.validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

    if claims.typ() != C::TYPE {
        return Err(AuthError::InvalidToken);
    }
    Ok(claims)
}

// ============================================================================
// Tests
// ============================================================================
