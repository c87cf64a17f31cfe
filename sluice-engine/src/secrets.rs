//! Security primitives for the trigger subsystem
//!
//! API tokens are 256-bit random values compared only by SHA-256 hash.
//! Webhook signatures are HMAC-SHA256 over the raw request body,
//! verified in constant time. Webhook secrets are encrypted at rest
//! with AES-256-GCM under an operator-supplied key.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::EngineError;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the 64-hex-char (256-bit) key used to
/// encrypt webhook secrets at rest.
pub const SECRET_KEY_ENV: &str = "SLUICE_SECRET_KEY";

/// Generates a raw API token: 32 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way hash under which API tokens are stored and looked up.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Generates the public identifier embedded in a webhook URL.
pub fn generate_webhook_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("wh_{}", hex::encode(bytes))
}

/// Verifies an HMAC-SHA256 signature (hex) over the raw request body.
///
/// Comparison is constant-time via `Mac::verify_slice`.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    // HMAC accepts keys of any length, so this cannot fail. Qualified
    // because aes-gcm's KeyInit also offers new_from_slice here.
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Computes the hex HMAC-SHA256 signature for a body. Used by tests
/// and by callers that need to document the expected header format.
pub fn sign_body(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// AES-256-GCM cipher for webhook secrets at rest.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Loads the key from `SLUICE_SECRET_KEY` (64 hex chars).
    ///
    /// Falls back to a fixed development key with a loud warning when
    /// the variable is absent or malformed. The fallback exists so the
    /// server starts in development; it must not ship to production.
    pub fn from_env() -> Self {
        match std::env::var(SECRET_KEY_ENV) {
            Ok(raw) => match parse_key(&raw) {
                Some(key) => Self::new(key),
                None => {
                    warn!(
                        "{} is not 64 hex characters; using the INSECURE development key",
                        SECRET_KEY_ENV
                    );
                    Self::new(dev_fallback_key())
                }
            },
            Err(_) => {
                warn!(
                    "{} is not set; using the INSECURE development key",
                    SECRET_KEY_ENV
                );
                Self::new(dev_fallback_key())
            }
        }
    }

    /// Encrypts a plaintext secret. Output is hex of nonce || ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EngineError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EngineError::InvalidConfig("secret encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, EngineError> {
        let bytes = hex::decode(encoded)
            .map_err(|_| EngineError::InvalidConfig("malformed encrypted secret".to_string()))?;
        if bytes.len() < 12 {
            return Err(EngineError::InvalidConfig(
                "malformed encrypted secret".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(12);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EngineError::InvalidConfig("secret decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| EngineError::InvalidConfig("secret is not valid UTF-8".to_string()))
    }
}

fn parse_key(raw: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(raw.trim()).ok()?;
    bytes.try_into().ok()
}

fn dev_fallback_key() -> [u8; 32] {
    // Deliberately recognizable in hexdumps.
    *b"sluice-dev-only-insecure-key-32b"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_256_bits_of_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(hex::decode(&token).is_ok());
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_hash_is_stable_and_one_way() {
        let token = "deadbeef";
        assert_eq!(hash_token(token), hash_token(token));
        assert_ne!(hash_token(token), token);
        assert_ne!(hash_token(token), hash_token("deadbeee"));
    }

    #[test]
    fn test_signature_verification() {
        let secret = b"shared-secret";
        let body = br#"{"rows": 42}"#;
        let signature = sign_body(secret, body);

        assert!(verify_signature(secret, body, &signature));
        assert!(!verify_signature(secret, b"tampered", &signature));
        assert!(!verify_signature(b"wrong-secret", body, &signature));
        assert!(!verify_signature(secret, body, "not hex"));
    }

    #[test]
    fn test_secret_cipher_round_trip() {
        let cipher = SecretCipher::new([7u8; 32]);
        let encrypted = cipher.encrypt("hunter2").unwrap();
        assert_ne!(encrypted, "hunter2");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "hunter2");

        let other = SecretCipher::new([8u8; 32]);
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let cipher = SecretCipher::new([7u8; 32]);
        assert!(cipher.decrypt("zz").is_err());
        assert!(cipher.decrypt("00ff").is_err());
    }
}
