//! # Portcullis
//!
//! Authentication and session security for Rust services.
//!
//! This crate sits between an HTTP layer and a credential store and decides
//! who gets a session. It issues and verifies tokens, revokes them, and
//! slows down password guessing.
//!
//! ## Features
//!
//! - **Session Tokens**: HS256 access (15 min) and refresh (7 day) tokens with
//!   independent keys, distinct audiences and a `typ` claim
//! - **Revocation**: TTL-bounded `jti` markers in a shared cache, with a
//!   configurable fail-open / fail-closed policy
//! - **Rate Limiting**: Fixed-window counters per action and client, in memory
//!   or in a shared cache
//! - **Account Lockout**: Lock after repeated failures, lazy expiry,
//!   administrative unlock
//! - **Password Policy**: Composition rules and a strength estimate
//! - **Password Hashing**: bcrypt behind a [`PasswordHasher`](hashing::PasswordHasher) trait
//! - **Security Events**: Structured `tracing` events for every transition
//! - **Cryptographic Utilities**: Constant-time comparison, CSRF tokens
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use portcullis::{MemoryCache, MemoryCredentialStore, PortcullisConfig, SessionService, SystemClock};
//! use portcullis::signing_secret::generate_secret;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize logging
//! let _ = portcullis::observability::init(&portcullis::observability::ObservabilityConfig::from_env());
//!
//! // Configure (normally PortcullisConfig::from_env())
//! let config = PortcullisConfig::builder()
//!     .secrets(generate_secret(64), generate_secret(64))
//!     .bcrypt_cost(4)
//!     .build();
//!
//! let sessions = SessionService::from_config(
//!     &config,
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(MemoryCache::default()),
//!     Arc::new(SystemClock),
//! )?;
//!
//! sessions.register("grace@example.com", "C0bol-rocks", "instructor", "Grace", "10.0.0.7")?;
//! let login = sessions.login("grace@example.com", "C0bol-rocks", "10.0.0.7", Some("curl/8"))?;
//!
//! // On every request
//! let claims = sessions.authenticate(&login.access_token)?;
//! assert_eq!(claims.role, "instructor");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod lockout;
pub mod observability;
pub mod parse;
pub mod password;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod signing_secret;
pub mod token;

// Re-exports
pub use cache::{CacheBackend, CacheError, MemoryCache, SharedCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, PortcullisConfig, PortcullisConfigBuilder};
pub use credentials::{CredentialRecord, CredentialStore, MemoryCredentialStore, StoreError, UserSummary};
pub use crypto::{constant_time_eq, constant_time_str_eq};
pub use error::{AuthError, ErrorKind, Result};
pub use hashing::{BcryptHasher, PasswordHasher};
pub use lockout::{LockoutPolicy, LockoutState};
pub use observability::{ObservabilityConfig, SecurityEvent};
pub use password::{PasswordPolicy, PasswordRule, PasswordStrength};
pub use rate_limit::{RateLimitAction, RateLimitDecision, RateLimitPolicies, RateLimitPolicy, RateLimiter};
pub use revocation::{RevocationCache, RevocationFailurePolicy};
pub use session::{LoginResponse, SessionService};
pub use token::{AccessClaims, IssuedToken, RefreshClaims, TokenConfig, TokenService, ACCESS_TOKEN_COOKIE};
