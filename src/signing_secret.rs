//! Token Signing Secret Validation and Generation
//!
//! Access and refresh tokens are HMAC-signed with two independent secrets.
//! A short, guessable or low-entropy secret lets anyone mint valid tokens, and
//! a secret shared between the two token types lets a refresh token pass as an
//! access token. [`SigningSecretPolicy::validate_pair`] rejects both.
//!
//! # Example
//!
//! ```
//! use portcullis::signing_secret::{generate_secret, SigningSecretPolicy};
//!
//! let policy = SigningSecretPolicy::default();
//! assert!(policy.validate("my-secret-key").is_err());
//!
//! let access = generate_secret(64);
//! let refresh = generate_secret(64);
//! assert!(policy.validate_pair(&access, &refresh).is_ok());
//! ```

use std::collections::HashMap;

use rand::Rng;
use thiserror::Error;

/// Signing secret validation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SigningSecretError {
    /// Secret is missing
    #[error("{name} signing secret is not set")]
    Missing { name: &'static str },

    /// Secret is shorter than the policy minimum
    #[error("Secret length ({actual} chars) is below minimum ({minimum} chars)")]
    TooShort { actual: usize, minimum: usize },

    /// Secret contains a weak/common pattern
    #[error("Secret contains weak pattern: '{pattern}'")]
    WeakPattern { pattern: String },

    /// Secret has insufficient entropy
    #[error("Secret entropy ({actual:.1} bits) is below minimum ({minimum:.1} bits)")]
    LowEntropy { actual: f64, minimum: f64 },

    /// Secret lacks required character diversity
    #[error("Secret must contain: {}", .missing.join(", "))]
    InsufficientDiversity { missing: Vec<String> },

    /// Access and refresh tokens would be signed with the same key
    #[error("Access and refresh signing secrets must differ")]
    Reused,
}

/// Requirements for a signing secret
#[derive(Debug, Clone, PartialEq)]
pub struct SigningSecretPolicy {
    /// Minimum secret length in characters
    pub min_length: usize,
    /// Minimum Shannon entropy in bits
    pub min_entropy: f64,
    /// Require upper, lower, digit and special characters
    pub require_diversity: bool,
    /// Reject secrets containing common words
    pub check_weak_patterns: bool,
}

impl Default for SigningSecretPolicy {
    /// 32 characters, 64 bits of entropy, no common words
    fn default() -> Self {
        Self {
            min_length: 32,
            min_entropy: 64.0,
            require_diversity: false,
            check_weak_patterns: true,
        }
    }
}

impl SigningSecretPolicy {
    /// Policy for high-assurance deployments
    ///
    /// 64 characters, 128 bits of entropy, full character diversity.
    pub fn strict() -> Self {
        Self {
            min_length: 64,
            min_entropy: 128.0,
            require_diversity: true,
            check_weak_patterns: true,
        }
    }

    /// Validate a secret against this policy.
    pub fn validate(&self, secret: &str) -> Result<(), SigningSecretError> {
        let length = secret.chars().count();
        if length < self.min_length {
            return Err(SigningSecretError::TooShort {
                actual: length,
                minimum: self.min_length,
            });
        }

        if self.check_weak_patterns {
            if let Some(pattern) = find_weak_pattern(secret) {
                return Err(SigningSecretError::WeakPattern {
                    pattern: pattern.to_string(),
                });
            }
        }

        let entropy = calculate_entropy(secret);
        if entropy < self.min_entropy {
            return Err(SigningSecretError::LowEntropy {
                actual: entropy,
                minimum: self.min_entropy,
            });
        }

        if self.require_diversity {
            let missing = check_diversity(secret);
            if !missing.is_empty() {
                return Err(SigningSecretError::InsufficientDiversity { missing });
            }
        }

        Ok(())
    }

    /// Validate the access and refresh secrets together.
    pub fn validate_pair(&self, access: &str, refresh: &str) -> Result<(), SigningSecretError> {
        if access.is_empty() {
            return Err(SigningSecretError::Missing { name: "access" });
        }
        if refresh.is_empty() {
            return Err(SigningSecretError::Missing { name: "refresh" });
        }
        self.validate(access)?;
        self.validate(refresh)?;
        if crate::crypto::constant_time_str_eq(access, refresh) {
            return Err(SigningSecretError::Reused);
        }
        Ok(())
    }

    /// Generate a secret that passes this policy.
    pub fn generate(&self) -> String {
        let length = self.min_length.max(64);

        for _ in 0..10 {
            let secret = generate_secret(length);
            if self.validate(&secret).is_ok() {
                return secret;
            }
        }

        generate_secret(length + 32)
    }
}

/// Check for weak patterns in the secret.
fn find_weak_pattern(secret: &str) -> Option<&'static str> {
    const WEAK_PATTERNS: &[&str] = &[
        "secret", "password", "admin", "123456", "qwerty", "default",
        "example", "test", "demo", "sample", "temp", "changeme",
        "letmein", "welcome", "monkey", "dragon", "master",
    ];

    let secret_lower = secret.to_lowercase();
    WEAK_PATTERNS
        .iter()
        .find(|pattern| secret_lower.contains(*pattern))
        .copied()
}

/// Check character diversity and return missing categories.
fn check_diversity(secret: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !secret.chars().any(|c| c.is_uppercase()) {
        missing.push("uppercase letters".to_string());
    }
    if !secret.chars().any(|c| c.is_lowercase()) {
        missing.push("lowercase letters".to_string());
    }
    if !secret.chars().any(|c| c.is_ascii_digit()) {
        missing.push("digits".to_string());
    }
    if !secret.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        missing.push("special characters".to_string());
    }

    missing
}

/// Calculate Shannon entropy of a string in bits.
///
/// ```
/// use portcullis::signing_secret::calculate_entropy;
///
/// assert!(calculate_entropy("aaaaaa") < 10.0);
/// assert!(calculate_entropy("aB3$xY9!") > 20.0);
/// ```
pub fn calculate_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut char_counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *char_counts.entry(c).or_insert(0) += 1;
    }

    let total = s.chars().count() as f64;
    let per_char: f64 = char_counts
        .values()
        .map(|&count| {
            let probability = count as f64 / total;
            -probability * probability.log2()
        })
        .sum();

    per_char * total
}

/// Generate a random secret of `length` characters.
///
/// Characters are drawn from A-Z, a-z, 0-9 and punctuation using the
/// thread-local CSPRNG.
pub fn generate_secret(length: usize) -> String {
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_+-=[]{}|;:,.<>?/~";

    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
