//! Authentication Error Taxonomy
//!
//! Every flow in this crate fails with an [`AuthError`]. The expected,
//! recoverable outcomes (bad credentials, lockout, rate limiting, token
//! problems, weak passwords) are surfaced directly to the caller and are never
//! retried internally: retrying cannot succeed without new input.
//!
//! Infrastructure failures are kept separate ([`AuthError::Store`],
//! [`AuthError::Cache`], [`AuthError::Internal`]) so the request layer can
//! answer with a generic failure without leaking details.
//!
//! # Mapping to a transport
//!
//! The request-routing layer owns the transport binding. [`AuthError::kind`]
//! and [`AuthError::code`] give it a stable classification:
//!
//! ```
//! use portcullis::{AuthError, ErrorKind};
//!
//! let err = AuthError::InvalidCredentials;
//! assert_eq!(err.kind(), ErrorKind::Unauthorized);
//! assert_eq!(err.kind().status_code(), 401);
//! assert_eq!(err.code(), "invalid_credentials");
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::credentials::StoreError;
use crate::password::PasswordRule;

/// Result alias used throughout the crate, defaulting to [`AuthError`]
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

/// Authentication and session errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password (deliberately indistinguishable)
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Account is locked after repeated failures
    #[error("Account temporarily locked. Try again in {} seconds", .remaining.as_secs())]
    AccountLocked {
        /// Time left until the lock lapses
        remaining: Duration,
    },

    /// Account exists but is disabled
    #[error("Account is inactive")]
    AccountInactive,

    /// Too many attempts for the protected action
    #[error("Too many attempts. Try again in {retry_after_secs} seconds")]
    RateLimitExceeded {
        /// Seconds until the current window resets
        retry_after_secs: u64,
    },

    /// Token is malformed, mis-signed, of the wrong type, or for another audience
    #[error("Invalid token")]
    InvalidToken,

    /// Token lifetime has elapsed
    #[error("Token expired")]
    TokenExpired,

    /// Token was explicitly revoked before its natural expiry
    #[error("Token revoked")]
    TokenRevoked,

    /// Password fails the strength policy
    #[error("Password too weak: {0}")]
    PasswordTooWeak(PasswordRule),

    /// Registration attempted with an email that already has an account
    #[error("Email address is not available")]
    EmailUnavailable,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential store unreachable or failing
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// Cache backend unreachable or failing
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Hashing or signing failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error categories for the external request layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Authentication required or failed (401)
    Unauthorized,
    /// Authenticated identity may not proceed (403)
    Forbidden,
    /// Resource state conflict (409)
    Conflict,
    /// Input rejected by policy (422)
    Validation,
    /// Locked out or rate limited (429)
    TooManyRequests,
    /// Internal failure, hide details (500)
    Internal,
    /// Dependency unavailable (503)
    Unavailable,
}

impl ErrorKind {
    /// HTTP status code conventionally used for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::Conflict => 409,
            Self::Validation => 422,
            Self::TooManyRequests => 429,
            Self::Internal => 500,
            Self::Unavailable => 503,
        }
    }
}

impl AuthError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::TokenRevoked => ErrorKind::Unauthorized,
            Self::AccountInactive => ErrorKind::Forbidden,
            Self::EmailUnavailable => ErrorKind::Conflict,
            Self::PasswordTooWeak(_) => ErrorKind::Validation,
            Self::AccountLocked { .. } | Self::RateLimitExceeded { .. } => {
                ErrorKind::TooManyRequests
            }
            Self::Store(_) | Self::Cache(_) => ErrorKind::Unavailable,
            Self::Config(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::AccountInactive => "account_inactive",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::PasswordTooWeak(_) => "password_too_weak",
            Self::EmailUnavailable => "email_unavailable",
            Self::Config(_) => "configuration_error",
            Self::Store(_) | Self::Cache(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the failure is an expected outcome caused by caller input
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Internal | ErrorKind::Unavailable
        )
    }

    /// Seconds the caller should wait before retrying, when known
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::AccountLocked { remaining } => Some(remaining.as_secs().max(1)),
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Message safe to show to an end user
    ///
    /// Infrastructure details are replaced by a generic message.
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "An internal error occurred".to_string()
        }
    }
}
