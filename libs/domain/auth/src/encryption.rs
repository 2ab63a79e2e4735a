//! AES-256-GCM at-rest encryption for secrets that must be readable again
//! (MFA TOTP seeds), as opposed to `password::peppered_hash` which is for
//! secrets that only ever need a constant-time comparison. Ciphertext is
//! tagged `enc:v1:` so a future key-derivation change can be detected
//! instead of silently misread.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("ciphertext is not base64")]
    Encoding,
    #[error("ciphertext is missing the enc:v1: prefix")]
    UnknownFormat,
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("decryption failed: wrong key or tampered ciphertext")]
    Decrypt,
}

/// `MFA_ENCRYPTION_KEY`/`APP_ENCRYPTION_KEY` are operator-supplied strings
/// of unconstrained length; hashing to 32 bytes means any passphrase the
/// operator picks is a valid AES-256 key.
fn derive_key(key_material: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key_material.as_bytes());
    hasher.finalize().into()
}

pub fn encrypt(key_material: &str, plaintext: &str) -> String {
    let key_bytes = derive_key(key_material);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("AES-GCM encryption over a bounded plaintext cannot fail");

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    format!("{PREFIX}{}", BASE64.encode(combined))
}

pub fn decrypt(key_material: &str, encoded: &str) -> Result<String, EncryptionError> {
    let body = encoded.strip_prefix(PREFIX).ok_or(EncryptionError::UnknownFormat)?;
    let combined = BASE64.decode(body).map_err(|_| EncryptionError::Encoding)?;
    if combined.len() < NONCE_LEN {
        return Err(EncryptionError::Truncated);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let key_bytes = derive_key(key_material);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EncryptionError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| EncryptionError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_with_the_right_key() {
        let encrypted = encrypt("correct-key", "JBSWY3DPEHPK3PXP");
        assert!(encrypted.starts_with(PREFIX));
        assert_eq!(decrypt("correct-key", &encrypted).unwrap(), "JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let encrypted = encrypt("correct-key", "secret");
        assert!(matches!(decrypt("wrong-key", &encrypted), Err(EncryptionError::Decrypt)));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(matches!(decrypt("k", "plain-not-enc"), Err(EncryptionError::UnknownFormat)));
    }
}
