//! Cache Backend
//!
//! Key/value contract shared by the revocation cache and the shared-counter
//! rate limiter. It mirrors the handful of operations a Redis-style store
//! offers: TTL-bounded writes, atomic increments, and TTL inspection.
//!
//! [`MemoryCache`] implements it in-process. Expiry is evaluated against the
//! injected [`Clock`](crate::clock::Clock): a key is gone from the instant its
//! expiry is reached. Expired keys are dropped when touched, and writes sweep
//! the whole map at most once per [`PURGE_INTERVAL`] of clock time, so keys
//! that are never read again (revocation markers, issuance metadata) do not
//! accumulate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::clock::{remaining_until, to_chrono, Clock, SharedClock, SystemClock};

/// Cache backend errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable or failing
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    /// Stored value is not an integer counter
    #[error("value at key {key} is not a counter")]
    NotACounter { key: String },
    /// Stored value could not be decoded
    #[error("value at key {key} could not be decoded: {reason}")]
    Decode { key: String, reason: String },
}

/// Key/value store with per-key expiry
pub trait CacheBackend: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value that expires after `ttl`
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Atomically add one to a counter, creating it at 1 without expiry.
    /// An existing expiry is preserved.
    fn increment(&self, key: &str) -> Result<u64, CacheError>;

    /// Set the expiry of an existing key. Returns `false` if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Whether the key is present
    fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Time left before the key expires; `None` if absent or without expiry
    fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Remove a key. Returns `true` if it was present.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Drop expired keys. Returns the number removed.
    ///
    /// Backends that expire keys on their own have nothing to do here.
    fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Shared cache handle
pub type SharedCache = Arc<dyn CacheBackend>;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Expiry is inclusive: at `expires_at` the key is already gone
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Minimum clock time between sweeps triggered by writes
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// In-process cache backend
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    next_purge: Mutex<DateTime<Utc>>,
    clock: SharedClock,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl MemoryCache {
    /// Create a cache driven by the given clock
    pub fn new(clock: SharedClock) -> Self {
        let next_purge = clock.now() + to_chrono(PURGE_INTERVAL);
        Self {
            entries: Mutex::new(HashMap::new()),
            next_purge: Mutex::new(next_purge),
            clock,
        }
    }

    /// Drop every expired key now. Returns the number removed.
    pub fn purge_now(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        *self.next_purge.lock() = now + to_chrono(PURGE_INTERVAL);
        purge(&mut entries, now)
    }

    /// Sweep on write once the purge interval has elapsed
    fn purge_if_due(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        let mut next_purge = self.next_purge.lock();
        if now < *next_purge {
            return;
        }
        *next_purge = now + to_chrono(PURGE_INTERVAL);
        let removed = purge(entries, now);
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Purged expired cache entries");
        }
    }

    /// Number of stored keys, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on the live entry for `key`, removing it first if expired
    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>, DateTime<Utc>) -> T) -> T {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.get(key).map_or(false, |e| e.is_expired(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key), now)
    }
}

fn purge(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.with_live(key, |entry, _| entry.map(|e| e.value.clone())))
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now();
        let entry = Entry {
            value: value.to_string(),
            expires_at: Some(now + to_chrono(ttl)),
        };
        let mut entries = self.entries.lock();
        self.purge_if_due(&mut entries, now);
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn increment(&self, key: &str) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        self.purge_if_due(&mut entries, now);
        if entries.get(key).map_or(false, |e| e.is_expired(now)) {
            entries.remove(key);
        }

        match entries.get_mut(key) {
            Some(entry) => {
                let current: u64 = entry.value.parse().map_err(|_| CacheError::NotACounter {
                    key: key.to_string(),
                })?;
                let next = current.saturating_add(1);
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        Ok(self.with_live(key, |entry, now| match entry {
            Some(e) => {
                e.expires_at = Some(now + to_chrono(ttl));
                true
            }
            None => false,
        }))
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.with_live(key, |entry, _| entry.is_some()))
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        Ok(self.with_live(key, |entry, now| {
            entry
                .and_then(|e| e.expires_at)
                .map(|at| remaining_until(at, now))
        }))
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        let removed = self.entries.lock().remove(key);
        Ok(removed.map_or(false, |e| !e.is_expired(now)))
    }

    fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.purge_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (MemoryCache, ManualClock) {
        let clock = ManualClock::new();
        (MemoryCache::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_set_and_get() {
        let (cache, _) = cache();
        cache.set_with_ttl("k", "v", Duration::from_secs(10)).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
        assert!(cache.exists("k").unwrap());
        assert_eq!(cache.get("missing").unwrap(), None);
    }

    #[test]
    fn test_entries_expire() {
        let (cache, clock) = cache();
        cache.set_with_ttl("k", "v", Duration::from_secs(10)).unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(cache.exists("k").unwrap());
        assert_eq!(cache.ttl("k").unwrap(), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(1));
        assert!(!cache.exists("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.ttl("k").unwrap(), None);
    }

    #[test]
    fn test_increment_creates_and_counts() {
        let (cache, _) = cache();
        assert_eq!(cache.increment("c").unwrap(), 1);
        assert_eq!(cache.increment("c").unwrap(), 2);
        assert_eq!(cache.ttl("c").unwrap(), None);
    }

    #[test]
    fn test_increment_preserves_expiry() {
        let (cache, clock) = cache();
        cache.increment("c").unwrap();
        assert!(cache.expire("c", Duration::from_secs(60)).unwrap());

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.increment("c").unwrap(), 2);
        assert_eq!(cache.ttl("c").unwrap(), Some(Duration::from_secs(30)));

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.increment("c").unwrap(), 1);
    }

    #[test]
    fn test_increment_non_counter() {
        let (cache, _) = cache();
        cache.set_with_ttl("k", "text", Duration::from_secs(10)).unwrap();
        assert!(matches!(
            cache.increment("k"),
            Err(CacheError::NotACounter { .. })
        ));
    }

    #[test]
    fn test_expire_missing_key() {
        let (cache, _) = cache();
        assert!(!cache.expire("nope", Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_delete() {
        let (cache, _) = cache();
        cache.set_with_ttl("k", "v", Duration::from_secs(10)).unwrap();
        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert!(!cache.exists("k").unwrap());
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache();
        cache.set_with_ttl("short", "v", Duration::from_secs(1)).unwrap();
        cache.set_with_ttl("long", "v", Duration::from_secs(100)).unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_writes_sweep_keys_never_read_again() {
        let (cache, clock) = cache();
        for i in 0..500 {
            cache
                .set_with_ttl(&format!("revoked:{}", i), "1", Duration::from_secs(30))
                .unwrap();
        }
        assert_eq!(cache.len(), 500);

        // Within the interval nothing is swept yet
        clock.advance(Duration::from_secs(31));
        cache.set_with_ttl("fresh", "1", Duration::from_secs(30)).unwrap();
        assert_eq!(cache.len(), 501);

        clock.advance(PURGE_INTERVAL);
        cache.increment("counter").unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.exists("counter").unwrap());
    }

    #[test]
    fn test_key_gone_at_exact_expiry() {
        let (cache, clock) = cache();
        cache.increment("c").unwrap();
        cache.expire("c", Duration::from_secs(60)).unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.ttl("c").unwrap(), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(1));
        assert!(!cache.exists("c").unwrap());
        assert_eq!(cache.increment("c").unwrap(), 1);
    }

    #[test]
    fn test_concurrent_increments_never_undercount() {
        let (cache, _) = cache();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        cache.increment("c").unwrap();
                    }
                });
            }
        });
        assert_eq!(cache.get("c").unwrap().as_deref(), Some("800"));
    }
}
