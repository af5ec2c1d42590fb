//! Token Revocation Cache
//!
//! Tokens are stateless until something revokes them. Revocation stores a
//! presence marker under `revoked:<jti>` that expires together with the token:
//! the caller passes the token's *remaining* lifetime, so the marker neither
//! outlives the token (wasted space) nor lapses early (a revoked token
//! becoming valid again).
//!
//! The cache also keeps per-token issuance metadata (`issued:<jti>`: who,
//! from where, with which client) for anomaly logging.
//!
//! # Failure policy
//!
//! When the backend cannot answer a revocation lookup the cache applies
//! [`RevocationFailurePolicy`]:
//!
//! - `FailOpen` (default): treat the token as not revoked and emit a
//!   `RevocationCheckDegraded` event. Availability wins; a revoked token may
//!   be accepted until the backend recovers.
//! - `FailClosed`: reject the token with [`AuthError::Cache`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheError, SharedCache};
use crate::error::{AuthError, Result};
use crate::observability::SecurityEvent;

const REVOKED_PREFIX: &str = "revoked:";
const ISSUED_PREFIX: &str = "issued:";

/// What to do when a revocation lookup fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RevocationFailurePolicy {
    /// Treat the token as not revoked
    #[default]
    FailOpen,
    /// Reject the token
    FailClosed,
}

impl RevocationFailurePolicy {
    /// Parse `"open"` / `"closed"` (also `"fail-open"` / `"fail-closed"`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Some(Self::FailOpen),
            "closed" | "fail-closed" | "fail_closed" => Some(Self::FailClosed),
            _ => None,
        }
    }
}

/// Context recorded when a session is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceMetadata {
    pub user_id: String,
    pub ip: String,
    pub user_agent: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Revocation markers and issuance metadata over a cache backend
#[derive(Clone)]
pub struct RevocationCache {
    backend: SharedCache,
    failure_policy: RevocationFailurePolicy,
}

impl RevocationCache {
    pub fn new(backend: SharedCache, failure_policy: RevocationFailurePolicy) -> Self {
        Self {
            backend,
            failure_policy,
        }
    }

    /// Configured failure policy
    pub fn failure_policy(&self) -> RevocationFailurePolicy {
        self.failure_policy
    }

    /// Revoke a token identifier for `ttl`
    ///
    /// A zero `ttl` means the token has already expired and nothing is stored.
    pub fn revoke(&self, token_id: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.backend
            .set_with_ttl(&revoked_key(token_id), "1", ttl)
    }

    /// Whether a token identifier has been revoked
    ///
    /// Returns the raw backend result; [`RevocationCache::ensure_not_revoked`]
    /// applies the failure policy.
    pub fn is_revoked(&self, token_id: &str) -> Result<bool, CacheError> {
        self.backend.exists(&revoked_key(token_id))
    }

    /// Fail with [`AuthError::TokenRevoked`] if the token is revoked,
    /// applying the failure policy when the backend cannot answer
    pub fn ensure_not_revoked(&self, token_id: &str) -> Result<()> {
        match self.is_revoked(token_id) {
            Ok(false) => Ok(()),
            Ok(true) => Err(AuthError::TokenRevoked),
            Err(e) => {
                crate::security_event!(
                    SecurityEvent::RevocationCheckDegraded,
                    token_id = %token_id,
                    policy = ?self.failure_policy,
                    error = %e,
                    "Revocation lookup failed"
                );
                match self.failure_policy {
                    RevocationFailurePolicy::FailOpen => Ok(()),
                    RevocationFailurePolicy::FailClosed => Err(AuthError::Cache(e)),
                }
            }
        }
    }

    /// Store issuance metadata for a token for `ttl`
    pub fn record_issuance(
        &self,
        token_id: &str,
        metadata: &IssuanceMetadata,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_string(metadata).map_err(|e| CacheError::Decode {
            key: issued_key(token_id),
            reason: e.to_string(),
        })?;
        self.backend.set_with_ttl(&issued_key(token_id), &value, ttl)
    }

    /// Issuance metadata for a token, if still retained
    pub fn issuance(&self, token_id: &str) -> Result<Option<IssuanceMetadata>, CacheError> {
        let key = issued_key(token_id);
        match self.backend.get(&key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Decode {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

fn revoked_key(token_id: &str) -> String {
    format!("{}{}", REVOKED_PREFIX, token_id)
}

fn issued_key(token_id: &str) -> String {
    format!("{}{}", ISSUED_PREFIX, token_id)
}
