use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use hmac::Mac;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::core::error::{WatchError, WatchResult};

type HmacSha256 = hmac::Hmac<Sha256>;

const KEY_LABEL: &[u8] = b"finesse-watch-store-v1";
const NONCE_LEN: usize = 12;

/// Symmetric encryption and keyed hashing for persisted secrets.
///
/// Keyed by the process-wide secret from configuration. The AES key is
/// HMAC-SHA256(secret, label); integrity digests are HMAC-SHA256 keyed by the
/// raw secret.
pub struct CryptoService {
    cipher: Aes256Gcm,
    secret: Vec<u8>,
}

fn derive_key(secret: &[u8]) -> WatchResult<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| WatchError::Crypto(format!("key derivation failed: {}", e)))?;
    mac.update(KEY_LABEL);
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

impl CryptoService {
    pub fn new(secret: &str) -> WatchResult<Self> {
        if secret.trim().is_empty() {
            return Err(WatchError::Crypto("encryption secret is not configured".into()));
        }
        let key = derive_key(secret.as_bytes())?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| WatchError::Crypto(format!("invalid key: {}", e)))?;
        Ok(Self {
            cipher,
            secret: secret.as_bytes().to_vec(),
        })
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> WatchResult<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| WatchError::Crypto(format!("encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Any failure means the
    /// record cannot be trusted and is reported as corruption.
    pub fn decrypt(&self, encoded: &str) -> WatchResult<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| WatchError::Corruption(format!("base64 decode failed: {}", e)))?;

        if combined.len() <= NONCE_LEN {
            return Err(WatchError::Corruption("encrypted value too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| WatchError::Corruption(format!("decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| WatchError::Corruption(format!("UTF-8 decode failed: {}", e)))
    }

    fn mac(&self) -> WatchResult<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| WatchError::Crypto(format!("hmac init failed: {}", e)))
    }

    /// Keyed digest of `data`, hex encoded.
    pub fn hash(&self, data: &str) -> WatchResult<String> {
        let mut mac = self.mac()?;
        mac.update(data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn validate_hash(&self, data: &str, digest: &str) -> bool {
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(data.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    pub fn encrypt_object<T: Serialize>(&self, value: &T) -> WatchResult<String> {
        let json = serde_json::to_string(value)
            .map_err(|e| WatchError::Crypto(format!("serialization failed: {}", e)))?;
        self.encrypt(&json)
    }

    pub fn decrypt_object<T: DeserializeOwned>(&self, encoded: &str) -> WatchResult<T> {
        let json = self.decrypt(encoded)?;
        serde_json::from_str(&json)
            .map_err(|e| WatchError::Corruption(format!("unparsable payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn service() -> CryptoService {
        CryptoService::new("unit-test-secret").unwrap()
    }

    #[test]
    fn missing_secret_is_rejected() {
        assert!(matches!(
            CryptoService::new("  "),
            Err(WatchError::Crypto(_))
        ));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let crypto = service();
        let plaintext = "agent-password-1234";
        let encrypted = crypto.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(crypto.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn encrypt_produces_different_ciphertext_each_time() {
        let crypto = service();
        let a = crypto.encrypt("same-input").unwrap();
        let b = crypto.encrypt("same-input").unwrap();
        assert_ne!(a, b, "random nonce should produce different ciphertext");
        assert_eq!(crypto.decrypt(&a).unwrap(), "same-input");
        assert_eq!(crypto.decrypt(&b).unwrap(), "same-input");
    }

    #[test]
    fn decrypt_rejects_short_input_as_corruption() {
        let crypto = service();
        let short = base64::engine::general_purpose::STANDARD.encode(b"short");
        assert!(matches!(
            crypto.decrypt(&short),
            Err(WatchError::Corruption(_))
        ));
    }

    #[test]
    fn decrypt_rejects_invalid_base64() {
        assert!(matches!(
            service().decrypt("not-valid-base64!!!"),
            Err(WatchError::Corruption(_))
        ));
    }

    #[test]
    fn decrypt_with_other_secret_fails() {
        let encrypted = service().encrypt("payload").unwrap();
        let other = CryptoService::new("another-secret").unwrap();
        assert!(matches!(
            other.decrypt(&encrypted),
            Err(WatchError::Corruption(_))
        ));
    }

    #[test]
    fn hash_validates_and_detects_tampering() {
        let crypto = service();
        let digest = crypto.hash("ciphertext-blob").unwrap();
        assert!(crypto.validate_hash("ciphertext-blob", &digest));
        assert!(!crypto.validate_hash("ciphertext-blob!", &digest));
        assert!(!crypto.validate_hash("ciphertext-blob", "zz-not-hex"));
    }

    #[test]
    fn hash_depends_on_secret() {
        let a = service().hash("data").unwrap();
        let b = CryptoService::new("different").unwrap().hash("data").unwrap();
        assert_ne!(a, b);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        codes: Vec<i64>,
        nested: Option<Box<Payload>>,
    }

    #[test]
    fn object_roundtrip_deep_equals() {
        let crypto = service();
        let value = Payload {
            name: "ünïcode 🔑".into(),
            codes: vec![-1, 0, 42],
            nested: Some(Box::new(Payload {
                name: "inner".into(),
                codes: vec![],
                nested: None,
            })),
        };
        let encrypted = crypto.encrypt_object(&value).unwrap();
        let decrypted: Payload = crypto.decrypt_object(&encrypted).unwrap();
        assert_eq!(decrypted, value);
    }

    #[test]
    fn decrypt_object_rejects_wrong_shape() {
        let crypto = service();
        let encrypted = crypto.encrypt("not json at all").unwrap();
        let result: WatchResult<Payload> = crypto.decrypt_object(&encrypted);
        assert!(matches!(result, Err(WatchError::Corruption(_))));
    }
}
