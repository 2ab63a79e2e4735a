//! Password and secret hashing primitives.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    HashFailed(String),
}

pub fn hash_password(plain: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(plain, cost).map_err(|e| PasswordError::HashFailed(e.to_string()))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// Enrollment keys, MFA recovery codes, and API key secrets are all hashed
/// the same way: `sha256(pepper || secret)`. The pepper is an environment
/// secret, rotating it invalidates every previously-issued value — the
/// documented trade-off for never storing them in plaintext.
pub fn peppered_hash(pepper: &str, secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("correct horse battery staple", 4).unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn peppered_hash_is_deterministic_and_pepper_sensitive() {
        let a = peppered_hash("pepper-v1", "secret");
        let b = peppered_hash("pepper-v1", "secret");
        let c = peppered_hash("pepper-v2", "secret");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
