//! Security Event Logging
//!
//! Structured logging for the security-relevant transitions of the session
//! lifecycle: sign-in outcomes, token issuance and revocation, lockout and
//! rate limiting.
//!
//! # Usage
//!
//! ```
//! use portcullis::observability::SecurityEvent;
//! use portcullis::security_event;
//!
//! let user_id = "42";
//! let client_ip = "203.0.113.7";
//!
//! security_event!(
//!     SecurityEvent::AuthenticationSuccess,
//!     user_id = %user_id,
//!     ip_address = %client_ip,
//!     "User authenticated successfully"
//! );
//!
//! security_event!(
//!     SecurityEvent::AuthenticationFailure,
//!     ip_address = %client_ip,
//!     reason = "invalid_password",
//!     "Authentication failed"
//! );
//! ```
//!
//! Passwords, secrets and raw tokens are never passed as fields; log the
//! token identifier (`jti`) instead.

use std::fmt;

/// Security event categories for audit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    // Authentication events
    /// Successful user authentication
    AuthenticationSuccess,
    /// Failed authentication attempt
    AuthenticationFailure,
    /// User logout
    Logout,
    /// Access and refresh tokens issued at login
    SessionCreated,

    // Token events
    /// New access token minted from a refresh token
    TokenRefreshed,
    /// Token identifier added to the revocation cache
    TokenRevoked,
    /// Presented token failed verification
    TokenRejected,

    // User management events
    /// New user registered
    UserRegistered,
    /// Password changed
    PasswordChanged,

    // Security events
    /// Rate limit exceeded
    RateLimitExceeded,
    /// Account locked after repeated failures
    AccountLocked,
    /// Account unlocked
    AccountUnlocked,
    /// Revocation lookup failed and the configured failure policy was applied
    RevocationCheckDegraded,
}

impl SecurityEvent {
    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess
            | Self::AuthenticationFailure
            | Self::Logout
            | Self::SessionCreated => "authentication",

            Self::TokenRefreshed
            | Self::TokenRevoked
            | Self::TokenRejected => "token",

            Self::UserRegistered
            | Self::PasswordChanged => "user_management",

            Self::RateLimitExceeded
            | Self::AccountLocked
            | Self::AccountUnlocked
            | Self::RevocationCheckDegraded => "security",
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            // Critical - immediate attention required
            Self::RevocationCheckDegraded => Severity::Critical,

            // High - security-relevant failures
            Self::AuthenticationFailure
            | Self::AccountLocked
            | Self::RateLimitExceeded => Severity::High,

            // Medium - important state changes
            Self::AuthenticationSuccess
            | Self::UserRegistered
            | Self::PasswordChanged
            | Self::AccountUnlocked
            | Self::TokenRevoked
            | Self::TokenRejected => Severity::Medium,

            // Low - routine operations
            Self::Logout
            | Self::SessionCreated
            | Self::TokenRefreshed => Severity::Low,
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authentication_success",
            Self::AuthenticationFailure => "authentication_failure",
            Self::Logout => "logout",
            Self::SessionCreated => "session_created",
            Self::TokenRefreshed => "token_refreshed",
            Self::TokenRevoked => "token_revoked",
            Self::TokenRejected => "token_rejected",
            Self::UserRegistered => "user_registered",
            Self::PasswordChanged => "password_changed",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::AccountLocked => "account_locked",
            Self::AccountUnlocked => "account_unlocked",
            Self::RevocationCheckDegraded => "revocation_check_degraded",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Important state changes
    Medium,
    /// Security-relevant failures
    High,
    /// Immediate attention required
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Log a security event with structured fields.
///
/// The macro automatically includes:
/// - `security_event`: Event type name
/// - `category`: Event category
/// - `severity`: Event severity level
///
/// and picks the tracing level from the severity (critical → error,
/// high → warn, medium → info, low → debug).
///
/// ```
/// use portcullis::observability::SecurityEvent;
///
/// portcullis::security_event!(
///     SecurityEvent::RateLimitExceeded,
///     ip_address = %"198.51.100.4",
///     action = "login",
///     "Rate limit exceeded"
/// );
/// ```
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let severity = event.severity();
        let category = event.category();
        let event_name = event.name();

        match severity {
            $crate::observability::Severity::Critical => {
                ::tracing::error!(
                    security_event = event_name,
                    category = category,
                    severity = "critical",
                    $($field)*
                );
            }
            $crate::observability::Severity::High => {
                ::tracing::warn!(
                    security_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::info!(
                    security_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::debug!(
                    security_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use security_event;
