//! Password Hashing
//!
//! bcrypt with a configurable cost factor. The [`PasswordHasher`] trait is the
//! seam the session orchestrator depends on, so services can swap in another
//! algorithm without touching the login flow.
//!
//! bcrypt ignores everything past the 72nd byte of its input. [`BcryptHasher`]
//! refuses to hash longer passwords and treats them as a mismatch on verify.

use crate::error::{AuthError, Result};
use crate::password::{PasswordRule, MAX_PASSWORD_BYTES};

/// Default bcrypt cost factor (2^12 rounds)
pub const DEFAULT_COST: u32 = 12;

/// Lowest cost bcrypt accepts
pub const MIN_COST: u32 = 4;

/// Highest cost bcrypt accepts
pub const MAX_COST: u32 = 31;

/// Hashing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingConfig {
    /// bcrypt cost factor
    pub cost: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

/// One-way password hashing
pub trait PasswordHasher: Send + Sync + std::fmt::Debug {
    /// Hash a plaintext password
    fn hash(&self, password: &str) -> Result<String>;

    /// Check a plaintext password against a stored hash
    ///
    /// A mismatch is `Ok(false)`. A stored hash that cannot be parsed is an
    /// error.
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// bcrypt hasher
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl BcryptHasher {
    /// Create a hasher with the given cost, clamped to bcrypt's range
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
        }
    }

    /// Create a hasher from configuration
    pub fn from_config(config: &HashingConfig) -> Self {
        Self::new(config.cost)
    }

    /// Configured cost factor
    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::PasswordTooWeak(PasswordRule::TooManyBytes {
                max: MAX_PASSWORD_BYTES,
            }));
        }
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        // No stored hash can come from a longer input
        if password.len() > MAX_PASSWORD_BYTES {
            return Ok(false);
        }
        bcrypt::verify(password, hash)
            .map_err(|e| AuthError::Internal(format!("stored password hash unreadable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = BcryptHasher::new(4);
        let hash = hasher.hash("Correct1!horse").unwrap();

        assert!(hash.starts_with("$2"));
        assert!(hasher.verify("Correct1!horse", &hash).unwrap());
        assert!(!hasher.verify("Wrong1!horse", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = BcryptHasher::new(4);
        let a = hasher.hash("Same1!pass").unwrap();
        let b = hasher.hash("Same1!pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cost_encoded_in_hash() {
        let hash = BcryptHasher::new(5).hash("Abc123!@").unwrap();
        assert_eq!(&hash[4..6], "05");
    }

    #[test]
    fn test_cost_clamped() {
        assert_eq!(BcryptHasher::new(1).cost(), MIN_COST);
        assert_eq!(BcryptHasher::new(99).cost(), MAX_COST);
        assert_eq!(BcryptHasher::default().cost(), DEFAULT_COST);
    }

    #[test]
    fn test_input_past_72_bytes_is_not_truncated() {
        let hasher = BcryptHasher::new(4);
        let prefix = format!("Aa1!{}", "x".repeat(68));
        let hash = hasher.hash(&prefix).unwrap();

        assert!(hasher.verify(&prefix, &hash).unwrap());
        assert!(!hasher
            .verify(&format!("{}totally-different", prefix), &hash)
            .unwrap());
        assert!(matches!(
            hasher.hash(&format!("{}REAL", prefix)),
            Err(AuthError::PasswordTooWeak(PasswordRule::TooManyBytes { max: 72 }))
        ));
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let hasher = BcryptHasher::new(4);
        assert!(matches!(
            hasher.verify("anything", "not-a-bcrypt-hash"),
            Err(AuthError::Internal(_))
        ));
    }
}
