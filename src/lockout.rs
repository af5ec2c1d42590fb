//! Account Lockout State Machine
//!
//! Repeated failed logins lock an account for a fixed duration. The lockout
//! fields live on the [`CredentialRecord`]; this module only computes
//! transitions. Every function takes a record and returns a new one, and the
//! caller decides when to persist it.
//!
//! ```text
//!  ┌────────┐  record_failure reaches threshold   ┌────────┐
//!  │ Active │ ──────────────────────────────────► │ Locked │
//!  └────────┘ ◄────────────────────────────────── └────────┘
//!               check_and_maybe_unlock (expired)
//!               unlock (administrative)
//! ```
//!
//! Expiry is lazy: there is no background timer. Login applies
//! [`check_and_maybe_unlock`] before looking at the lock.
//!
//! # Usage
//!
//! ```
//! use portcullis::credentials::CredentialRecord;
//! use portcullis::lockout::{self, LockoutPolicy, LockoutState};
//! use chrono::Utc;
//!
//! let policy = LockoutPolicy::default(); // 5 failures, 30 minute lock
//! let now = Utc::now();
//! let mut record = CredentialRecord::new("u1", "a@example.com", "A", "student", "$2b$...");
//!
//! for _ in 0..5 {
//!     record = policy.record_failure(&record, now);
//! }
//! assert!(matches!(lockout::state(&record, now), LockoutState::Locked { .. }));
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{remaining_until, to_chrono};
use crate::credentials::CredentialRecord;

/// Default number of consecutive failures before locking
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Default lock duration
pub const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(30 * 60);

/// Lockout policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that lock the account
    pub threshold: u32,
    /// How long the lock lasts
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
        }
    }
}

impl LockoutPolicy {
    /// Create a new builder
    pub fn builder() -> LockoutPolicyBuilder {
        LockoutPolicyBuilder::default()
    }

    /// Count a failed login, locking the account once the threshold is reached
    pub fn record_failure(&self, record: &CredentialRecord, now: DateTime<Utc>) -> CredentialRecord {
        let mut next = record.clone();
        next.failed_login_attempts = next.failed_login_attempts.saturating_add(1);
        next.last_failed_login = Some(now);

        if next.failed_login_attempts >= self.threshold {
            next.is_locked = true;
            next.locked_until = Some(now + to_chrono(self.lockout_duration));
        }

        next
    }

    /// Failed attempts left before the account locks
    pub fn remaining_attempts(&self, record: &CredentialRecord) -> u32 {
        self.threshold.saturating_sub(record.failed_login_attempts)
    }
}

/// Builder for LockoutPolicy
#[derive(Debug, Clone, Default)]
pub struct LockoutPolicyBuilder {
    policy: LockoutPolicy,
}

impl LockoutPolicyBuilder {
    /// Set the failure threshold
    pub fn threshold(mut self, attempts: u32) -> Self {
        self.policy.threshold = attempts;
        self
    }

    /// Set the lock duration
    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.policy.lockout_duration = duration;
        self
    }

    /// Build the policy
    pub fn build(self) -> LockoutPolicy {
        self.policy
    }
}

/// Lockout state of an account at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    /// Account may authenticate
    Active,
    /// Account is locked
    Locked {
        /// When the lock lapses
        until: DateTime<Utc>,
        /// Time left until then
        remaining: Duration,
    },
}

/// Clear an expired lock
///
/// A lock whose `locked_until` has passed (or was never set) is cleared along
/// with the failure count. Unlocked records and unexpired locks are returned
/// unchanged.
pub fn check_and_maybe_unlock(record: &CredentialRecord, now: DateTime<Utc>) -> CredentialRecord {
    let expired = record.is_locked && record.locked_until.map_or(true, |until| until <= now);
    if expired {
        unlock(record)
    } else {
        record.clone()
    }
}

/// Reset the failure count after a successful login
pub fn record_success(record: &CredentialRecord) -> CredentialRecord {
    let mut next = record.clone();
    next.failed_login_attempts = 0;
    next.last_failed_login = None;
    next
}

/// Administrative unlock
pub fn unlock(record: &CredentialRecord) -> CredentialRecord {
    let mut next = record.clone();
    next.failed_login_attempts = 0;
    next.last_failed_login = None;
    next.is_locked = false;
    next.locked_until = None;
    next
}

/// Current lockout state
pub fn state(record: &CredentialRecord, now: DateTime<Utc>) -> LockoutState {
    match record.locked_until {
        Some(until) if record.is_locked && until > now => LockoutState::Locked {
            until,
            remaining: remaining_until(until, now),
        },
        _ => LockoutState::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord::new("u1", "alice@example.com", "Alice", "student", "$2b$04$hash")
    }

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    #[test]
    fn test_default_policy() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.threshold, 5);
        assert_eq!(policy.lockout_duration, Duration::from_secs(1800));
    }

    #[test]
    fn test_failures_below_threshold() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let mut rec = record();

        for expected in 1..5 {
            rec = policy.record_failure(&rec, now);
            assert_eq!(rec.failed_login_attempts, expected);
            assert_eq!(rec.last_failed_login, Some(now));
            assert!(!rec.is_locked);
        }
        assert_eq!(policy.remaining_attempts(&rec), 1);
        assert_eq!(state(&rec, now), LockoutState::Active);
    }

    #[test]
    fn test_threshold_locks() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let mut rec = record();
        for _ in 0..5 {
            rec = policy.record_failure(&rec, now);
        }

        assert!(rec.is_locked);
        assert_eq!(rec.locked_until, Some(now + minutes(30)));
        assert_eq!(
            state(&rec, now + minutes(10)),
            LockoutState::Locked {
                until: now + minutes(30),
                remaining: Duration::from_secs(20 * 60),
            }
        );
    }

    #[test]
    fn test_lock_persists_until_expiry() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let mut rec = record();
        for _ in 0..5 {
            rec = policy.record_failure(&rec, now);
        }

        let still_locked = check_and_maybe_unlock(&rec, now + minutes(29));
        assert_eq!(still_locked, rec);

        let unlocked = check_and_maybe_unlock(&rec, now + minutes(30));
        assert!(!unlocked.is_locked);
        assert_eq!(unlocked.locked_until, None);
        assert_eq!(unlocked.failed_login_attempts, 0);
        assert_eq!(unlocked.last_failed_login, None);
        assert_eq!(state(&unlocked, now + minutes(30)), LockoutState::Active);
    }

    #[test]
    fn test_lock_without_deadline_is_cleared() {
        let mut rec = record();
        rec.is_locked = true;
        rec.failed_login_attempts = 7;

        let cleared = check_and_maybe_unlock(&rec, Utc::now());
        assert!(!cleared.is_locked);
        assert_eq!(cleared.failed_login_attempts, 0);
    }

    #[test]
    fn test_success_resets_count() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let rec = policy.record_failure(&policy.record_failure(&record(), now), now);
        assert_eq!(rec.failed_login_attempts, 2);

        let rec = record_success(&rec);
        assert_eq!(rec.failed_login_attempts, 0);
        assert_eq!(rec.last_failed_login, None);
    }

    #[test]
    fn test_admin_unlock() {
        let policy = LockoutPolicy::builder().threshold(1).build();
        let now = Utc::now();
        let rec = policy.record_failure(&record(), now);
        assert!(rec.is_locked);

        let rec = unlock(&rec);
        assert_eq!(state(&rec, now), LockoutState::Active);
        assert_eq!(rec.failed_login_attempts, 0);
    }

    #[test]
    fn test_builder() {
        let policy = LockoutPolicy::builder()
            .threshold(3)
            .lockout_duration(Duration::from_secs(600))
            .build();
        assert_eq!(policy.threshold, 3);
        assert_eq!(policy.lockout_duration, Duration::from_secs(600));
    }
}
