//! Password Policy Enforcement
//!
//! Composition policy applied at registration and password change. Rules are
//! checked in a fixed order and the first failing rule is reported, so callers
//! can tell the user exactly what to fix:
//!
//! 1. minimum length (counted in characters, not bytes)
//! 2. at least one uppercase letter
//! 3. at least one lowercase letter
//! 4. at least one digit
//! 5. at least one non-alphanumeric character
//!
//! Maximum lengths are checked last: [`PasswordPolicy::max_length`] in
//! characters, then [`MAX_PASSWORD_BYTES`] in UTF-8 bytes. bcrypt reads only
//! the first 72 bytes of its input, so anything longer would let passwords
//! that share a 72-byte prefix verify against each other.
//!
//! # Usage
//!
//! ```
//! use portcullis::password::{PasswordPolicy, PasswordRule};
//!
//! let policy = PasswordPolicy::default();
//!
//! assert_eq!(policy.validate("abc12345"), Err(PasswordRule::MissingUppercase));
//! assert!(policy.validate("Abc123!@").is_ok());
//!
//! let strict = PasswordPolicy::builder().min_length(12).build();
//! assert_eq!(strict.validate("Abc123!@"), Err(PasswordRule::TooShort { min: 12 }));
//! ```

use std::fmt;

// ============================================================================
// Password Policy Configuration
// ============================================================================

/// Default minimum password length in characters
pub const DEFAULT_MIN_LENGTH: usize = 8;

/// Default maximum password length in characters
pub const DEFAULT_MAX_LENGTH: usize = 72;

/// Hard limit on encoded password length, whatever the policy says
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Password composition policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    /// Minimum password length in characters
    pub min_length: usize,

    /// Maximum password length in characters
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl PasswordPolicy {
    /// Create a new builder for custom policy configuration
    pub fn builder() -> PasswordPolicyBuilder {
        PasswordPolicyBuilder::default()
    }

    /// Validate a password, reporting the first failing rule
    pub fn validate(&self, password: &str) -> Result<(), PasswordRule> {
        let length = password.chars().count();

        if length < self.min_length {
            return Err(PasswordRule::TooShort {
                min: self.min_length,
            });
        }
        if !password.chars().any(char::is_uppercase) {
            return Err(PasswordRule::MissingUppercase);
        }
        if !password.chars().any(char::is_lowercase) {
            return Err(PasswordRule::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordRule::MissingDigit);
        }
        if !password.chars().any(|c| !c.is_alphanumeric()) {
            return Err(PasswordRule::MissingSpecial);
        }
        if length > self.max_length {
            return Err(PasswordRule::TooLong {
                max: self.max_length,
            });
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(PasswordRule::TooManyBytes {
                max: MAX_PASSWORD_BYTES,
            });
        }

        Ok(())
    }

    /// Estimate password strength (informational, not for validation)
    pub fn estimate_strength(&self, password: &str) -> PasswordStrength {
        estimate_strength(password)
    }
}

/// Estimate password strength from length and character variety
pub fn estimate_strength(password: &str) -> PasswordStrength {
    let len = password.chars().count();
    let char_types = [
        password.chars().any(char::is_lowercase),
        password.chars().any(char::is_uppercase),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ]
    .iter()
    .filter(|&&x| x)
    .count();

    if len < 8 {
        PasswordStrength::VeryWeak
    } else if len < 12 && char_types < 2 {
        PasswordStrength::Weak
    } else if len < 12 {
        PasswordStrength::Fair
    } else if len < 16 || char_types < 3 {
        PasswordStrength::Good
    } else {
        PasswordStrength::Strong
    }
}

/// Builder for PasswordPolicy
#[derive(Debug, Clone, Default)]
pub struct PasswordPolicyBuilder {
    policy: PasswordPolicy,
}

impl PasswordPolicyBuilder {
    /// Set minimum password length
    pub fn min_length(mut self, len: usize) -> Self {
        self.policy.min_length = len;
        self
    }

    /// Set maximum password length
    pub fn max_length(mut self, len: usize) -> Self {
        self.policy.max_length = len;
        self
    }

    /// Build the policy
    pub fn build(self) -> PasswordPolicy {
        self.policy
    }
}

// ============================================================================
// Password Rules
// ============================================================================

/// The policy rule a password failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    /// Fewer characters than the minimum
    TooShort { min: usize },
    /// No uppercase letter
    MissingUppercase,
    /// No lowercase letter
    MissingLowercase,
    /// No digit
    MissingDigit,
    /// No character outside letters and digits
    MissingSpecial,
    /// More characters than the maximum
    TooLong { max: usize },
    /// Longer than the hasher can read, in UTF-8 bytes
    TooManyBytes { max: usize },
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { min } => {
                write!(f, "password must be at least {} characters", min)
            }
            Self::MissingUppercase => write!(f, "password must contain an uppercase letter"),
            Self::MissingLowercase => write!(f, "password must contain a lowercase letter"),
            Self::MissingDigit => write!(f, "password must contain a digit"),
            Self::MissingSpecial => write!(f, "password must contain a special character"),
            Self::TooLong { max } => {
                write!(f, "password must be at most {} characters", max)
            }
            Self::TooManyBytes { max } => {
                write!(f, "password must be at most {} bytes when encoded", max)
            }
        }
    }
}

// ============================================================================
// Password Strength (Informational)
// ============================================================================

/// Password strength estimation (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    /// Very weak - easily guessable
    VeryWeak,
    /// Weak - could be cracked quickly
    Weak,
    /// Fair - acceptable but not ideal
    Fair,
    /// Good - reasonably strong
    Good,
    /// Strong - very difficult to crack
    Strong,
}

impl fmt::Display for PasswordStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VeryWeak => write!(f, "very_weak"),
            Self::Weak => write!(f, "weak"),
            Self::Fair => write!(f, "fair"),
            Self::Good => write!(f, "good"),
            Self::Strong => write!(f, "strong"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
