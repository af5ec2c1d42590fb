//! Fixed-Window Rate Limiting for Authentication Actions
//!
//! Each protected action has its own policy, resolved from a static mapping:
//!
//! | Action | Default Limit |
//! |--------|---------------|
//! | Login | 5 per 15 minutes |
//! | Register | 3 per hour |
//! | Password reset | 3 per hour |
//!
//! Counters are keyed by `(action, identifier)` (usually the client IP). The
//! first attempt opens a window of the policy's length; every attempt
//! increments the counter atomically; once the count exceeds the maximum the
//! attempt is rejected until the window resets wholesale. A window covers
//! `[opened, opened + window)`: at `reset_at` itself a fresh window opens.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use portcullis::clock::ManualClock;
//! use portcullis::rate_limit::{MemoryCounterStore, RateLimitAction, RateLimitPolicies, RateLimiter};
//!
//! let clock = ManualClock::new();
//! let limiter = RateLimiter::new(
//!     Arc::new(MemoryCounterStore::new()),
//!     RateLimitPolicies::default(),
//!     Arc::new(clock.clone()),
//! );
//!
//! for _ in 0..5 {
//!     assert!(limiter.check("203.0.113.7", RateLimitAction::Login)?.allowed);
//! }
//! let denied = limiter.check("203.0.113.7", RateLimitAction::Login)?;
//! assert!(!denied.allowed);
//! assert!(denied.retry_after_secs > 0);
//!
//! clock.advance(Duration::from_secs(15 * 60 + 1));
//! assert!(limiter.check("203.0.113.7", RateLimitAction::Login)?.allowed);
//! # Ok::<(), portcullis::cache::CacheError>(())
//! ```
//!
//! # Storage
//!
//! [`MemoryCounterStore`] serves single-instance deployments. Behind a load
//! balancer, use [`CacheCounterStore`] over a shared
//! [`CacheBackend`](crate::cache::CacheBackend) so every instance sees the
//! same counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use crate::cache::{CacheError, SharedCache};
use crate::clock::{remaining_until, to_chrono, Clock, SharedClock};
use crate::error::{AuthError, Result};
use crate::observability::SecurityEvent;

// ============================================================================
// Actions and Policies
// ============================================================================

/// Action protected by a rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    /// Sign-in attempts
    Login,
    /// Account creation
    Register,
    /// Password reset and change
    PasswordReset,
}

impl RateLimitAction {
    /// All actions
    pub const ALL: [RateLimitAction; 3] = [Self::Login, Self::Register, Self::PasswordReset];

    /// Get the action name for logging and counter keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit for a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }
}

/// Per-action policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub login: RateLimitPolicy,
    pub register: RateLimitPolicy,
    pub password_reset: RateLimitPolicy,
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            login: RateLimitPolicy::new(5, Duration::from_secs(15 * 60)),
            register: RateLimitPolicy::new(3, Duration::from_secs(60 * 60)),
            password_reset: RateLimitPolicy::new(3, Duration::from_secs(60 * 60)),
        }
    }
}

impl RateLimitPolicies {
    /// Policy for an action
    pub fn for_action(&self, action: RateLimitAction) -> RateLimitPolicy {
        match action {
            RateLimitAction::Login => self.login,
            RateLimitAction::Register => self.register,
            RateLimitAction::PasswordReset => self.password_reset,
        }
    }

    /// Replace the policy for an action
    pub fn with(mut self, action: RateLimitAction, policy: RateLimitPolicy) -> Self {
        match action {
            RateLimitAction::Login => self.login = policy,
            RateLimitAction::Register => self.register = policy,
            RateLimitAction::PasswordReset => self.password_reset = policy,
        }
        self
    }
}

// ============================================================================
// Counter Storage
// ============================================================================

/// Counter state after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Attempts in the current window, including this one
    pub count: u64,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

/// Atomic fixed-window counters
pub trait CounterStore: Send + Sync {
    /// Count one attempt against `key`, opening a new window of `window`
    /// length if none is active at `now`
    fn hit(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Result<WindowCount, CacheError>;

    /// Drop the counter for `key`
    fn clear(&self, key: &str) -> Result<(), CacheError>;

    /// Drop counters whose window has ended at `now`. Returns the number removed.
    fn sweep(&self, now: DateTime<Utc>) -> Result<usize, CacheError>;
}

/// In-process counters
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, WindowCount>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked counters
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CounterStore for MemoryCounterStore {
    fn hit(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Result<WindowCount, CacheError> {
        let mut counters = self.counters.lock();
        let fresh = WindowCount {
            count: 0,
            reset_at: now + to_chrono(window),
        };
        let counter = counters.entry(key.to_string()).or_insert(fresh);
        if now >= counter.reset_at {
            *counter = fresh;
        }
        counter.count = counter.count.saturating_add(1);
        Ok(*counter)
    }

    fn clear(&self, key: &str) -> Result<(), CacheError> {
        self.counters.lock().remove(key);
        Ok(())
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, c| now < c.reset_at);
        Ok(before - counters.len())
    }
}

/// Counters kept in a shared cache backend
///
/// Uses increment, then sets the expiry when the counter is new (or lost its
/// expiry), so the key disappears when the window ends.
#[derive(Clone)]
pub struct CacheCounterStore {
    backend: SharedCache,
}

impl CacheCounterStore {
    pub fn new(backend: SharedCache) -> Self {
        Self { backend }
    }
}

impl CounterStore for CacheCounterStore {
    fn hit(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Result<WindowCount, CacheError> {
        let count = self.backend.increment(key)?;
        let remaining = match self.backend.ttl(key)? {
            Some(ttl) if count > 1 => ttl,
            _ => {
                self.backend.expire(key, window)?;
                window
            }
        };
        Ok(WindowCount {
            count,
            reset_at: now + to_chrono(remaining),
        })
    }

    fn clear(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).map(|_| ())
    }

    fn sweep(&self, _now: DateTime<Utc>) -> Result<usize, CacheError> {
        self.backend.purge_expired()
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the attempt may proceed
    pub allowed: bool,
    /// Seconds until the window resets (0 when allowed)
    pub retry_after_secs: u64,
    /// Attempts left in the current window
    pub remaining: u32,
    /// Maximum attempts per window
    pub limit: u32,
}

/// Per-action fixed-window rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policies: RateLimitPolicies,
    clock: SharedClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policies", &self.policies)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policies: RateLimitPolicies, clock: SharedClock) -> Self {
        Self {
            store,
            policies,
            clock,
        }
    }

    /// Configured policies
    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// Count an attempt for `identifier` and decide whether it may proceed
    pub fn check(&self, identifier: &str, action: RateLimitAction) -> Result<RateLimitDecision, CacheError> {
        let policy = self.policies.for_action(action);
        let now = self.clock.now();
        let counted = self
            .store
            .hit(&counter_key(action, identifier), policy.window, now)?;

        let limit = policy.max_attempts;
        if counted.count > u64::from(limit) {
            return Ok(RateLimitDecision {
                allowed: false,
                retry_after_secs: retry_after_secs(counted.reset_at, now),
                remaining: 0,
                limit,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            retry_after_secs: 0,
            remaining: limit - counted.count as u32,
            limit,
        })
    }

    /// Like [`RateLimiter::check`], but a rejection becomes
    /// [`AuthError::RateLimitExceeded`]
    ///
    /// If the counter store cannot be reached the attempt is allowed and a
    /// warning is logged.
    pub fn enforce(&self, identifier: &str, action: RateLimitAction) -> Result<RateLimitDecision> {
        let decision = match self.check(identifier, action) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    action = %action,
                    identifier = %identifier,
                    error = %e,
                    "Rate limit store unavailable, allowing attempt"
                );
                let limit = self.policies.for_action(action).max_attempts;
                return Ok(RateLimitDecision {
                    allowed: true,
                    retry_after_secs: 0,
                    remaining: limit,
                    limit,
                });
            }
        };

        if !decision.allowed {
            crate::security_event!(
                SecurityEvent::RateLimitExceeded,
                action = %action,
                identifier = %identifier,
                limit = decision.limit,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AuthError::RateLimitExceeded {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        Ok(decision)
    }

    /// Clear the counter for `identifier` and `action`
    pub fn reset(&self, identifier: &str, action: RateLimitAction) -> Result<(), CacheError> {
        self.store.clear(&counter_key(action, identifier))
    }

    /// Drop expired counters. Returns the number removed.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        self.store.sweep(self.clock.now())
    }
}

fn counter_key(action: RateLimitAction, identifier: &str) -> String {
    format!("ratelimit:{}:{}", action.as_str(), identifier)
}

/// Whole seconds until `reset_at`, rounded up, at least 1
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let remaining = remaining_until(reset_at, now);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

// ============================================================================
// Tests
// ============================================================================
