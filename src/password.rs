//! Password hashing and verification.
//!
//! Stored hashes are Argon2id PHC strings. Verification goes through the
//! argon2 crate, which recomputes the hash and compares in constant time.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::password_hash::rand_core::OsRng;
use argon2::Argon2;

/// PHC string for a throwaway password. Verified against when no identity
/// (or no stored hash) matches a login attempt, so that the miss and the
/// wrong-password paths stay in the same timing class.
pub const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$bGF0Y2hrZXktZHVtbXk$kJQEnAp1CJClMgyCDLflXUm9l9pynkjVkAvM5fj4Wos";

/// Errors from password hashing.
#[derive(Debug)]
pub struct HashError(argon2::password_hash::Error);

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to hash password: {}", self.0)
    }
}

impl std::error::Error for HashError {}

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(HashError)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC string.
/// An unparseable hash verifies as false rather than erroring, so corrupt
/// credential material reads as a failed login.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2-but-longer").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter2-but-longer"));
        assert!(!verify_password(&hash, "hunter2-but-wrong"));
    }

    #[test]
    fn test_unique_salts() {
        let h1 = hash_password("same-password").unwrap();
        let h2 = hash_password("same-password").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_garbage_hash_is_false() {
        assert!(!verify_password("not-a-phc-string", "anything"));
        assert!(!verify_password("", "anything"));
    }

    #[test]
    fn test_dummy_hash_parses() {
        // The dummy hash must be a valid PHC string so the timing-equalizing
        // verification actually runs the KDF.
        assert!(PasswordHash::new(DUMMY_HASH).is_ok());
        assert!(!verify_password(DUMMY_HASH, "anything"));
    }
}
