//! Subsystem configuration
//!
//! [`PortcullisConfig`] gathers every tunable of the authentication
//! subsystem: token secrets and lifetimes, lockout, per-action rate limits,
//! password policy, bcrypt cost and the revocation failure policy.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use portcullis::config::PortcullisConfig;
//! use portcullis::signing_secret::generate_secret;
//!
//! // Load from environment variables
//! let _ = PortcullisConfig::from_env();
//!
//! // Or build programmatically
//! let config = PortcullisConfig::builder()
//!     .secrets(generate_secret(64), generate_secret(64))
//!     .access_ttl(Duration::from_secs(10 * 60))
//!     .lockout_threshold(3)
//!     .bcrypt_cost(10)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::hashing::{HashingConfig, MAX_COST, MIN_COST};
use crate::lockout::LockoutPolicy;
use crate::parse::{parse_duration, parse_rate_limit};
use crate::password::PasswordPolicy;
use crate::rate_limit::{RateLimitAction, RateLimitPolicies, RateLimitPolicy};
use crate::revocation::RevocationFailurePolicy;
use crate::signing_secret::{SigningSecretError, SigningSecretPolicy};
use crate::token::TokenConfig;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A setting could not be parsed or is out of range
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// A signing secret failed validation
    #[error("signing secret rejected: {0}")]
    SigningSecret(#[from] SigningSecretError),

    /// Settings are individually valid but inconsistent
    #[error("{0}")]
    Constraint(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Complete subsystem configuration
#[derive(Debug, Clone, Default)]
pub struct PortcullisConfig {
    /// Token secrets, issuer, audiences and lifetimes
    pub token: TokenConfig,
    /// Failed-login lockout
    pub lockout: LockoutPolicy,
    /// Per-action rate limits
    pub rate_limits: RateLimitPolicies,
    /// Password acceptance rules
    pub password: PasswordPolicy,
    /// bcrypt cost
    pub hashing: HashingConfig,
    /// Behaviour when the revocation backend is unreachable
    pub revocation_failure_policy: RevocationFailurePolicy,
    /// Requirements applied to the signing secrets by [`validate`](Self::validate)
    pub signing_secret_policy: SigningSecretPolicy,
}

impl PortcullisConfig {
    /// Create a new builder
    pub fn builder() -> PortcullisConfigBuilder {
        PortcullisConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PORTCULLIS_ACCESS_SECRET` / `PORTCULLIS_REFRESH_SECRET`: signing secrets (required, must differ)
    /// - `PORTCULLIS_ISSUER`: `iss` claim (default: "portcullis")
    /// - `PORTCULLIS_ACCESS_AUDIENCE` / `PORTCULLIS_REFRESH_AUDIENCE`: `aud` claims
    /// - `PORTCULLIS_ACCESS_TTL`: e.g. "15m" (default: "15m")
    /// - `PORTCULLIS_REFRESH_TTL`: e.g. "7d" (default: "7d")
    /// - `PORTCULLIS_LOCKOUT_THRESHOLD`: failures before locking (default: 5)
    /// - `PORTCULLIS_LOCKOUT_DURATION`: e.g. "30m" (default: "30m")
    /// - `PORTCULLIS_LOGIN_RATE_LIMIT`: e.g. "5/15m" (default: "5/15m")
    /// - `PORTCULLIS_REGISTER_RATE_LIMIT`: (default: "3/1h")
    /// - `PORTCULLIS_PASSWORD_RESET_RATE_LIMIT`: (default: "3/1h")
    /// - `PORTCULLIS_BCRYPT_COST`: 4-31 (default: 12)
    /// - `PORTCULLIS_PASSWORD_MIN_LENGTH`: (default: 8)
    /// - `PORTCULLIS_REVOCATION_FAILURE_POLICY`: "open" or "closed" (default: "open")
    ///
    /// Unset variables keep their defaults. A set but unparsable variable is
    /// an error. Secrets are not checked here; call [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(secret) = env.get("PORTCULLIS_ACCESS_SECRET") {
            config.token.access_secret = secret;
        }
        if let Some(secret) = env.get("PORTCULLIS_REFRESH_SECRET") {
            config.token.refresh_secret = secret;
        }
        if let Some(issuer) = env.get("PORTCULLIS_ISSUER") {
            config.token.issuer = issuer;
        }
        if let Some(aud) = env.get("PORTCULLIS_ACCESS_AUDIENCE") {
            config.token.access_audience = aud;
        }
        if let Some(aud) = env.get("PORTCULLIS_REFRESH_AUDIENCE") {
            config.token.refresh_audience = aud;
        }
        if let Some(ttl) = env.duration("PORTCULLIS_ACCESS_TTL")? {
            config.token.access_ttl = ttl;
        }
        if let Some(ttl) = env.duration("PORTCULLIS_REFRESH_TTL")? {
            config.token.refresh_ttl = ttl;
        }

        if let Some(threshold) = env.number("PORTCULLIS_LOCKOUT_THRESHOLD")? {
            config.lockout.threshold = threshold;
        }
        if let Some(duration) = env.duration("PORTCULLIS_LOCKOUT_DURATION")? {
            config.lockout.lockout_duration = duration;
        }

        let limits = [
            ("PORTCULLIS_LOGIN_RATE_LIMIT", RateLimitAction::Login),
            ("PORTCULLIS_REGISTER_RATE_LIMIT", RateLimitAction::Register),
            ("PORTCULLIS_PASSWORD_RESET_RATE_LIMIT", RateLimitAction::PasswordReset),
        ];
        for (key, action) in limits {
            if let Some(policy) = env.rate_limit(key)? {
                config.rate_limits = config.rate_limits.with(action, policy);
            }
        }

        if let Some(cost) = env.number("PORTCULLIS_BCRYPT_COST")? {
            config.hashing.cost = cost;
        }
        if let Some(min) = env.number::<usize>("PORTCULLIS_PASSWORD_MIN_LENGTH")? {
            config.password = PasswordPolicy::builder()
                .min_length(min)
                .max_length(config.password.max_length)
                .build();
        }
        if let Some(raw) = env.get("PORTCULLIS_REVOCATION_FAILURE_POLICY") {
            config.revocation_failure_policy = RevocationFailurePolicy::parse(&raw).ok_or_else(|| {
                ConfigError::invalid("PORTCULLIS_REVOCATION_FAILURE_POLICY", "expected 'open' or 'closed'")
            })?;
        }

        Ok(config)
    }

    /// Check the configuration is usable
    ///
    /// - both secrets set, distinct, and accepted by the signing-secret policy
    /// - access and refresh audiences distinct
    /// - lifetimes non-zero, access shorter than refresh
    /// - bcrypt cost within 4..=31
    /// - lockout threshold and every rate limit at least 1
    /// - password minimum length at least 1 and below the maximum
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signing_secret_policy
            .validate_pair(&self.token.access_secret, &self.token.refresh_secret)?;

        if self.token.access_audience == self.token.refresh_audience {
            return Err(ConfigError::Constraint(
                "access and refresh audiences must differ".to_string(),
            ));
        }
        if self.token.access_ttl.is_zero() {
            return Err(ConfigError::invalid("access_ttl", "must be non-zero"));
        }
        if self.token.refresh_ttl.is_zero() {
            return Err(ConfigError::invalid("refresh_ttl", "must be non-zero"));
        }
        if self.token.access_ttl >= self.token.refresh_ttl {
            return Err(ConfigError::Constraint(
                "access token lifetime must be shorter than refresh token lifetime".to_string(),
            ));
        }

        if !(MIN_COST..=MAX_COST).contains(&self.hashing.cost) {
            return Err(ConfigError::invalid(
                "bcrypt_cost",
                format!("must be between {} and {}", MIN_COST, MAX_COST),
            ));
        }

        if self.lockout.threshold == 0 {
            return Err(ConfigError::invalid("lockout_threshold", "must be at least 1"));
        }
        if self.lockout.lockout_duration.is_zero() {
            return Err(ConfigError::invalid("lockout_duration", "must be non-zero"));
        }

        for action in RateLimitAction::ALL {
            let policy = self.rate_limits.for_action(action);
            if policy.max_attempts == 0 || policy.window.is_zero() {
                return Err(ConfigError::invalid(
                    format!("{}_rate_limit", action),
                    "needs at least one attempt per non-zero window",
                ));
            }
        }

        if self.password.min_length == 0 || self.password.min_length > self.password.max_length {
            return Err(ConfigError::invalid(
                "password_min_length",
                format!("must be between 1 and {}", self.password.max_length),
            ));
        }

        Ok(())
    }
}

/// Variable source with typed accessors
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(key)
            .map(|raw| {
                parse_duration(&raw)
                    .ok_or_else(|| ConfigError::invalid(key, format!("'{}' is not a duration", raw)))
            })
            .transpose()
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a number", raw)))
            })
            .transpose()
    }

    fn rate_limit(&self, key: &str) -> Result<Option<RateLimitPolicy>, ConfigError> {
        self.get(key)
            .map(|raw| {
                parse_rate_limit(&raw)
                    .map(|(max, window)| RateLimitPolicy::new(max, window))
                    .ok_or_else(|| {
                        ConfigError::invalid(key, format!("'{}' is not of the form '5/15m'", raw))
                    })
            })
            .transpose()
    }
}

/// Builder for PortcullisConfig
#[derive(Debug, Clone, Default)]
pub struct PortcullisConfigBuilder {
    config: PortcullisConfig,
}

impl PortcullisConfigBuilder {
    /// Set the access and refresh signing secrets
    pub fn secrets(mut self, access: impl Into<String>, refresh: impl Into<String>) -> Self {
        self.config.token.access_secret = access.into();
        self.config.token.refresh_secret = refresh.into();
        self
    }

    /// Set the issuer claim
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.token.issuer = issuer.into();
        self
    }

    /// Set the access and refresh audiences
    pub fn audiences(mut self, access: impl Into<String>, refresh: impl Into<String>) -> Self {
        self.config.token.access_audience = access.into();
        self.config.token.refresh_audience = refresh.into();
        self
    }

    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.config.token.access_ttl = ttl;
        self
    }

    pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.config.token.refresh_ttl = ttl;
        self
    }

    pub fn lockout_threshold(mut self, attempts: u32) -> Self {
        self.config.lockout.threshold = attempts;
        self
    }

    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.config.lockout.lockout_duration = duration;
        self
    }

    /// Set the rate limit for one action
    pub fn rate_limit(mut self, action: RateLimitAction, max_attempts: u32, window: Duration) -> Self {
        self.config.rate_limits = self
            .config
            .rate_limits
            .with(action, RateLimitPolicy::new(max_attempts, window));
        self
    }

    pub fn password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.config.password = policy;
        self
    }

    pub fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.config.hashing.cost = cost;
        self
    }

    pub fn revocation_failure_policy(mut self, policy: RevocationFailurePolicy) -> Self {
        self.config.revocation_failure_policy = policy;
        self
    }

    pub fn signing_secret_policy(mut self, policy: SigningSecretPolicy) -> Self {
        self.config.signing_secret_policy = policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PortcullisConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::{ACCESS_SECRET, REFRESH_SECRET};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid() -> PortcullisConfig {
        PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .build()
    }

    #[test]
    fn test_defaults() {
        let config = PortcullisConfig::default();
        assert_eq!(config.token.access_ttl, Duration::from_secs(15 * 60));
        assert_eq!(config.token.refresh_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.lockout.threshold, 5);
        assert_eq!(config.hashing.cost, 12);
        assert_eq!(config.password.min_length, 8);
        assert_eq!(config.rate_limits.login.max_attempts, 5);
        assert_eq!(config.revocation_failure_policy, RevocationFailurePolicy::FailOpen);
    }

    #[test]
    fn test_defaults_need_secrets() {
        assert_eq!(
            PortcullisConfig::default().validate(),
            Err(ConfigError::SigningSecret(SigningSecretError::Missing { name: "access" }))
        );
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = PortcullisConfig::from_lookup(lookup(&[
            ("PORTCULLIS_ACCESS_SECRET", ACCESS_SECRET),
            ("PORTCULLIS_REFRESH_SECRET", REFRESH_SECRET),
            ("PORTCULLIS_ISSUER", "campus"),
            ("PORTCULLIS_ACCESS_TTL", "10m"),
            ("PORTCULLIS_REFRESH_TTL", "1d"),
            ("PORTCULLIS_LOCKOUT_THRESHOLD", "3"),
            ("PORTCULLIS_LOCKOUT_DURATION", "1h"),
            ("PORTCULLIS_LOGIN_RATE_LIMIT", "10/1m"),
            ("PORTCULLIS_BCRYPT_COST", "10"),
            ("PORTCULLIS_PASSWORD_MIN_LENGTH", "12"),
            ("PORTCULLIS_REVOCATION_FAILURE_POLICY", "closed"),
        ]))
        .unwrap();

        assert_eq!(config.token.issuer, "campus");
        assert_eq!(config.token.access_ttl, Duration::from_secs(600));
        assert_eq!(config.token.refresh_ttl, Duration::from_secs(86400));
        assert_eq!(config.lockout.threshold, 3);
        assert_eq!(config.lockout.lockout_duration, Duration::from_secs(3600));
        assert_eq!(config.rate_limits.login, RateLimitPolicy::new(10, Duration::from_secs(60)));
        assert_eq!(config.rate_limits.register.max_attempts, 3);
        assert_eq!(config.hashing.cost, 10);
        assert_eq!(config.password.min_length, 12);
        assert_eq!(config.revocation_failure_policy, RevocationFailurePolicy::FailClosed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = PortcullisConfig::from_lookup(lookup(&[("PORTCULLIS_ACCESS_TTL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "PORTCULLIS_ACCESS_TTL"));

        assert!(PortcullisConfig::from_lookup(lookup(&[("PORTCULLIS_BCRYPT_COST", "high")])).is_err());
        assert!(PortcullisConfig::from_lookup(lookup(&[("PORTCULLIS_LOGIN_RATE_LIMIT", "5")])).is_err());
        assert!(PortcullisConfig::from_lookup(lookup(&[(
            "PORTCULLIS_REVOCATION_FAILURE_POLICY",
            "maybe"
        )]))
        .is_err());
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = PortcullisConfig::from_lookup(lookup(&[("PORTCULLIS_ACCESS_TTL", "  ")])).unwrap();
        assert_eq!(config.token.access_ttl, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_validate_secrets() {
        let shared = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, ACCESS_SECRET)
            .build();
        assert_eq!(
            shared.validate(),
            Err(ConfigError::SigningSecret(SigningSecretError::Reused))
        );

        let weak = PortcullisConfig::builder()
            .secrets("short", REFRESH_SECRET)
            .build();
        assert!(matches!(
            weak.validate(),
            Err(ConfigError::SigningSecret(SigningSecretError::TooShort { .. }))
        ));
    }

    #[test]
    fn test_validate_lifetimes() {
        let mut config = valid();
        config.token.access_ttl = Duration::from_secs(8 * 24 * 3600);
        assert!(matches!(config.validate(), Err(ConfigError::Constraint(_))));

        let mut config = valid();
        config.token.access_ttl = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_ranges() {
        let config = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .bcrypt_cost(3)
            .build();
        assert!(config.validate().is_err());

        let config = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .lockout_threshold(0)
            .build();
        assert!(config.validate().is_err());

        let config = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .rate_limit(RateLimitAction::Register, 0, Duration::from_secs(60))
            .build();
        assert!(config.validate().is_err());

        let config = PortcullisConfig::builder()
            .secrets(ACCESS_SECRET, REFRESH_SECRET)
            .audiences("same", "same")
            .build();
        assert!(matches!(config.validate(), Err(ConfigError::Constraint(_))));
    }
}
