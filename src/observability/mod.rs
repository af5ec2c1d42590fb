//! Observability
//!
//! Library code logs through standard `tracing` macros and the
//! [`security_event!`](crate::security_event) macro; the embedding service
//! decides where the output goes. [`init`] installs a stdout subscriber for
//! services (and the operator binary) that do not bring their own.
//!
//! # Usage
//!
//! ```no_run
//! use portcullis::observability::{init, LogFormat, ObservabilityConfig};
//!
//! // From environment variables
//! init(&ObservabilityConfig::from_env())?;
//!
//! // Or programmatically
//! let config = ObservabilityConfig::builder()
//!     .log_format(LogFormat::Json)
//!     .log_filter("portcullis=debug,info")
//!     .build();
//! # let _ = config;
//! # Ok::<(), portcullis::observability::ObservabilityError>(())
//! ```

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityConfigBuilder};
pub use events::{security_event, SecurityEvent, Severity};

use thiserror::Error;
use tracing::info;

/// Install the global tracing subscriber.
///
/// Call once at startup, before any logging occurs.
///
/// # Errors
///
/// Fails when the filter directive is invalid or a global subscriber is
/// already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;

    info!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Observability initialized"
    );

    Ok(())
}

/// Observability initialization errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("Observability config error: {0}")]
    Config(String),
    /// Subscriber installation failed
    #[error("Provider error: {0}")]
    Provider(String),
}
