//! Random-token generation for agent bearer tokens, session refresh tokens,
//! and API key secrets. All three follow the same pattern: mint a random
//! value, persist only its hash, return the plaintext exactly once.

use rand::RngCore;

pub fn random_token_hex(byte_len: usize) -> String {
    let mut buf = vec![0u8; byte_len];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Agent bearer tokens and enrollment-issued ids are 32 random bytes,
/// rendered as 64 hex characters.
pub fn generate_agent_id() -> String {
    random_token_hex(32)
}

pub fn generate_bearer_token() -> String {
    random_token_hex(32)
}

pub fn sha256_hex(value: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_hex_has_expected_length_and_is_not_constant() {
        let a = random_token_hex(32);
        let b = random_token_hex(32);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
    }
}
