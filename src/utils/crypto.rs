// Cryptographic utilities for generating identifiers and sealing data

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Bytes of entropy in discharge ids and one-time codes
pub const TOKEN_ENTROPY_BYTES: usize = 24;

/// Generate an unguessable single-use identifier
///
/// 24 bytes (192 bits) of entropy, base64url encoded to 32 characters so the
/// value travels safely in query strings.
#[must_use]
pub fn generate_token() -> String {
    generate_nonce(TOKEN_ENTROPY_BYTES)
}

/// Generate a cryptographically secure nonce of specified byte length
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Generate 32 random bytes, base64 encoded, for use as a service secret
#[must_use]
pub fn generate_secret() -> String {
    let mut secret = [0u8; ENCRYPTION_KEY_SIZE];
    rand::rng().fill_bytes(&mut secret);
    general_purpose::STANDARD.encode(secret)
}

/// Derive a purpose-bound 32-byte key from the service secret
///
/// Different purposes (caveat sealing, credential signing, mode sealing)
/// get independent keys from the same secret.
///
/// # Errors
///
/// Returns an error if HMAC computation fails
pub fn derive_key(secret: &[u8], purpose: &str) -> Result<[u8; ENCRYPTION_KEY_SIZE]> {
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    key.copy_from_slice(&hmac_sha256(secret, purpose.as_bytes())?);
    Ok(key)
}

/// HMAC-SHA256 of `message` under `key`
///
/// # Errors
///
/// Returns an error if HMAC computation fails
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).context("Invalid HMAC key length")?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time check of an HMAC-SHA256 signature
#[must_use]
pub fn verify_hmac_sha256(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    <HmacSha256 as Mac>::new_from_slice(key).is_ok_and(|mut mac| {
        mac.update(message);
        mac.verify_slice(signature).is_ok()
    })
}

/// Generic encryption function for any serializable data using AES-256-GCM
///
/// Returns a Base64URL-encoded string containing the nonce + ciphertext
///
/// # Errors
///
/// Returns an error if:
/// - Serialization fails
/// - Key length is invalid
/// - AES encryption fails
pub fn encrypt_data<T: Serialize>(data: &T, key: &[u8]) -> Result<String> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let json_data = serde_json::to_vec(data).context("Failed to serialize data")?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, json_data.as_slice())
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Generic decryption function for any deserializable data using AES-256-GCM
///
/// # Errors
///
/// Returns an error if:
/// - Key length is invalid
/// - Base64 decoding fails
/// - Data length is invalid
/// - AES decryption fails
/// - Deserialization fails
pub fn decrypt_data<T: DeserializeOwned>(encrypted_data: &str, key: &[u8]) -> Result<T> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(encrypted_data)
        .context("Failed to decode base64 data")?;

    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

    serde_json::from_slice(&plaintext).context("Failed to deserialize data from decrypted JSON")
}

/// Seals values into opaque URL-safe strings only this service can open
///
/// Identity providers use it to carry the completion mode through their
/// login pages without the user agent being able to alter it.
#[derive(Clone)]
pub struct Codec {
    key: [u8; ENCRYPTION_KEY_SIZE],
}

impl Codec {
    /// # Errors
    ///
    /// Returns an error if key derivation fails
    pub fn new(secret: &[u8]) -> Result<Self> {
        Ok(Self {
            key: derive_key(secret, "codec")?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String> {
        encrypt_data(value, &self.key)
    }

    /// # Errors
    ///
    /// Returns an error if the value was not sealed by this codec or was altered
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Result<T> {
        decrypt_data(sealed, &self.key)
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const TEST_SECRET: &[u8] = b"test_secret_key_for_hmac_testing_32b";

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        discharge_id: String,
    }

    #[test]
    fn test_generate_token_is_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_derive_key_separates_purposes() {
        let a = derive_key(TEST_SECRET, "codec").unwrap();
        let b = derive_key(TEST_SECRET, "oven").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, derive_key(TEST_SECRET, "codec").unwrap());
    }

    #[test]
    fn test_hmac_verify() {
        let signature = hmac_sha256(TEST_SECRET, b"message").unwrap();
        assert_eq!(signature.len(), 32);
        assert!(verify_hmac_sha256(TEST_SECRET, b"message", &signature));
        assert!(!verify_hmac_sha256(TEST_SECRET, b"other", &signature));
        assert!(!verify_hmac_sha256(b"other key", b"message", &signature));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = derive_key(TEST_SECRET, "test").unwrap();
        let sample = Sample {
            discharge_id: "abc123".to_string(),
        };
        let sealed = encrypt_data(&sample, &key).unwrap();
        let opened: Sample = decrypt_data(&sealed, &key).unwrap();
        assert_eq!(opened, sample);
    }

    #[test]
    fn test_decrypt_rejects_wrong_key_and_bad_length() {
        let key = derive_key(TEST_SECRET, "test").unwrap();
        let sealed = encrypt_data(&"value", &key).unwrap();

        let other = derive_key(TEST_SECRET, "other").unwrap();
        assert!(decrypt_data::<String>(&sealed, &other).is_err());
        assert!(decrypt_data::<String>(&sealed, b"short").is_err());
        assert!(decrypt_data::<String>("AAAA", &key).is_err());
    }

    #[test]
    fn test_codec_rejects_tampering() {
        let codec = Codec::new(TEST_SECRET).unwrap();
        let sealed = codec.seal(&"value").unwrap();
        let mut tampered = sealed.clone();
        tampered.push('A');
        assert!(codec.open::<String>(&tampered).is_err());
        assert_eq!(codec.open::<String>(&sealed).unwrap(), "value");
    }
}
