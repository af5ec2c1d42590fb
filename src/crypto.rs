//! Cryptographic utilities for session security
//!
//! - **Constant-Time Comparison**: secret comparisons that do not leak where inputs differ
//! - **CSRF Tokens**: opaque double-submit tokens generated at login

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Number of random bytes in a CSRF token
pub const CSRF_TOKEN_BYTES: usize = 32;

/// Performs constant-time comparison of two byte slices.
///
/// Standard `==` exits on the first mismatching byte, which lets an attacker
/// recover a secret byte by byte from response timing. `subtle` compares the
/// full input regardless of where the inputs differ.
///
/// ```rust
/// use portcullis::crypto::constant_time_eq;
///
/// assert!(constant_time_eq(b"abc123", b"abc123"));
/// assert!(!constant_time_eq(b"abc123", b"abc124"));
/// ```
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Performs constant-time comparison of two strings.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Generate an opaque CSRF token
///
/// 32 bytes from the OS-seeded CSPRNG, base64url encoded without padding.
/// The token is handed to the client at login; the request layer later checks
/// the submitted copy against it with [`verify_csrf`]. No server-side state is
/// kept.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; CSRF_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Check a submitted CSRF token against the expected one
///
/// Empty tokens never match.
pub fn verify_csrf(expected: &str, submitted: &str) -> bool {
    if expected.is_empty() || submitted.is_empty() {
        return false;
    }
    constant_time_str_eq(expected, submitted)
}
