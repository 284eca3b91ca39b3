//! End-to-end decryption of ephemeral payloads
//!
//! The key is derived with PBKDF2-HMAC-SHA256 (30000 rounds) from the user's
//! encryption password, salted with the account iden. Payloads use AES-256-GCM
//! and arrive as base64 of:
//!
//! ```text
//! '1' (0x31) | tag (16) | nonce (12) | ciphertext
//! ```
//!
//! The key only lives in memory. The raw key can be exported as base64 so it
//! can be re-imported on the next process start without the password.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::CryptoError;

/// PBKDF2 iteration count
pub const KDF_ITERATIONS: u32 = 30_000;

/// Version byte of the only supported blob layout (ASCII '1')
pub const VERSION_1: u8 = b'1';

const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + TAG_LEN + NONCE_LEN;

/// Decrypted plaintext, parsed when possible
#[derive(Debug, Clone, PartialEq)]
pub enum Decrypted {
    Json(Value),
    Text(String),
}

/// Session key holder
#[derive(Default)]
pub struct PushCrypto {
    key: Option<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for PushCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCrypto")
            .field("configured", &self.key.is_some())
            .finish()
    }
}

impl PushCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the session key from a password, salted with the account iden
    pub fn initialize(&mut self, password: &str, account_iden: &str) -> Result<(), CryptoError> {
        if password.is_empty() || account_iden.is_empty() {
            return Err(CryptoError::MissingInput);
        }

        self.key = Some(derive_key(password, account_iden));
        Ok(())
    }

    /// Whether a key is loaded
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Base64 of the raw key
    pub fn export_key(&self) -> Result<String, CryptoError> {
        let key = self.key.as_ref().ok_or(CryptoError::NotConfigured)?;
        Ok(STANDARD.encode(key))
    }

    /// Load a key previously produced by [`export_key`](Self::export_key)
    pub fn import_key(&mut self, exported: &str) -> Result<(), CryptoError> {
        let bytes = STANDARD
            .decode(exported.trim())
            .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        self.key = Some(key);
        Ok(())
    }

    /// Drop the key from memory (sign-out)
    pub fn clear(&mut self) {
        self.key = None;
    }

    /// Decrypt a base64 blob
    pub fn decrypt(&self, encoded: &str) -> Result<Decrypted, CryptoError> {
        let key = self.key.as_ref().ok_or(CryptoError::NotConfigured)?;

        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
        if blob.is_empty() {
            return Err(CryptoError::Truncated { len: 0 });
        }
        if blob[0] != VERSION_1 {
            return Err(CryptoError::UnsupportedVersion(blob[0]));
        }
        if blob.len() < HEADER_LEN {
            return Err(CryptoError::Truncated { len: blob.len() });
        }

        let tag = &blob[1..1 + TAG_LEN];
        let nonce = &blob[1 + TAG_LEN..HEADER_LEN];
        let ciphertext = &blob[HEADER_LEN..];

        // aes-gcm expects the tag appended to the ciphertext
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed.as_ref())
            .map_err(|_| CryptoError::Decryption)?;

        let text = String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)?;
        Ok(match serde_json::from_str::<Value>(&text) {
            Ok(value) => Decrypted::Json(value),
            Err(_) => Decrypted::Text(text),
        })
    }

    /// Decrypt an encrypted ephemeral `push` object in place
    ///
    /// On success the decrypted fields are merged over the push, `encrypted`
    /// becomes false, `was_encrypted` true, and `ciphertext` is removed. On
    /// any failure the push is left exactly as it was and the error returned.
    /// Objects that are not encrypted are left alone and `Ok(false)` returned.
    pub fn process_ephemeral(&self, push: &mut Map<String, Value>) -> Result<bool, CryptoError> {
        if !is_encrypted(push) {
            return Ok(false);
        }
        let Some(ciphertext) = push.get("ciphertext").and_then(Value::as_str) else {
            return Ok(false);
        };

        let decrypted = match self.decrypt(ciphertext) {
            Ok(decrypted) => decrypted,
            Err(CryptoError::NotConfigured) => {
                warn!("Received encrypted ephemeral but encryption is not configured");
                return Err(CryptoError::NotConfigured);
            }
            Err(e) => return Err(e),
        };

        match decrypted {
            Decrypted::Json(Value::Object(fields)) => {
                for (k, v) in fields {
                    push.insert(k, v);
                }
            }
            Decrypted::Json(other) => {
                debug!("Decrypted ephemeral is not an object, keeping as body");
                push.insert("body".to_string(), other);
            }
            Decrypted::Text(text) => {
                push.insert("body".to_string(), Value::String(text));
            }
        }
        push.insert("encrypted".to_string(), Value::Bool(false));
        push.insert("was_encrypted".to_string(), Value::Bool(true));
        push.remove("ciphertext");
        Ok(true)
    }
}

/// Whether an ephemeral push carries ciphertext
pub fn is_encrypted(push: &Map<String, Value>) -> bool {
    push.get("encrypted").and_then(Value::as_bool) == Some(true)
        && push
            .get("ciphertext")
            .and_then(Value::as_str)
            .is_some_and(|c| !c.is_empty())
}

fn derive_key(password: &str, salt: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), KDF_ITERATIONS, &mut key);
    key
}

/// Build a blob the way a sending device does
#[cfg(test)]
pub(crate) fn seal(key: &[u8; KEY_LEN], nonce: [u8; NONCE_LEN], plaintext: &str) -> String {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .unwrap();
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut blob = vec![VERSION_1];
    blob.extend_from_slice(tag);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(ciphertext);
    STANDARD.encode(blob)
}

#[cfg(test)]
impl PushCrypto {
    /// Encrypt with the loaded key, as a sending device would
    pub(crate) fn seal(&self, nonce: [u8; NONCE_LEN], plaintext: &str) -> String {
        let key = self.key.as_ref().expect("key not configured");
        seal(key, nonce, plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crypto_for(password: &str, iden: &str) -> PushCrypto {
        let mut crypto = PushCrypto::new();
        crypto.initialize(password, iden).unwrap();
        crypto
    }

    #[test]
    fn test_initialize_requires_inputs() {
        let mut crypto = PushCrypto::new();
        assert_eq!(crypto.initialize("", "ujx"), Err(CryptoError::MissingInput));
        assert_eq!(crypto.initialize("pw", ""), Err(CryptoError::MissingInput));
        assert!(!crypto.is_configured());
    }

    #[test]
    fn test_decrypt_json_payload() {
        let crypto = crypto_for("hunter2", "ujpah72o0");
        let key = derive_key("hunter2", "ujpah72o0");
        let blob = seal(&key, [7u8; NONCE_LEN], r#"{"type":"mirror","title":"Hi"}"#);

        let decrypted = crypto.decrypt(&blob).unwrap();
        assert_eq!(decrypted, Decrypted::Json(json!({"type": "mirror", "title": "Hi"})));
    }

    #[test]
    fn test_decrypt_plain_text_payload() {
        let crypto = crypto_for("hunter2", "ujpah72o0");
        let key = derive_key("hunter2", "ujpah72o0");
        let blob = seal(&key, [1u8; NONCE_LEN], "just words");

        assert_eq!(
            crypto.decrypt(&blob).unwrap(),
            Decrypted::Text("just words".to_string())
        );
    }

    #[test]
    fn test_wrong_key_fails_cleanly() {
        let key = derive_key("right password", "ujpah72o0");
        let blob = seal(&key, [3u8; NONCE_LEN], r#"{"type":"mirror"}"#);

        let wrong = crypto_for("wrong password", "ujpah72o0");
        assert_eq!(wrong.decrypt(&blob), Err(CryptoError::Decryption));

        // Same password, different account salt
        let other_account = crypto_for("right password", "ujother");
        assert_eq!(other_account.decrypt(&blob), Err(CryptoError::Decryption));
    }

    #[test]
    fn test_unsupported_version() {
        let crypto = crypto_for("pw", "iden");
        let mut blob = vec![b'2'];
        blob.extend_from_slice(&[0u8; HEADER_LEN + 4]);

        assert_eq!(
            crypto.decrypt(&STANDARD.encode(blob)),
            Err(CryptoError::UnsupportedVersion(b'2'))
        );
    }

    #[test]
    fn test_truncated_and_garbage_input() {
        let crypto = crypto_for("pw", "iden");

        let short = STANDARD.encode([VERSION_1, 1, 2, 3]);
        assert_eq!(crypto.decrypt(&short), Err(CryptoError::Truncated { len: 4 }));

        assert!(matches!(
            crypto.decrypt("not base64!!"),
            Err(CryptoError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_decrypt_without_key() {
        let crypto = PushCrypto::new();
        assert_eq!(crypto.decrypt("AAAA"), Err(CryptoError::NotConfigured));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let original = crypto_for("hunter2", "ujpah72o0");
        let exported = original.export_key().unwrap();

        let mut restored = PushCrypto::new();
        restored.import_key(&exported).unwrap();

        let key = derive_key("hunter2", "ujpah72o0");
        let blob = seal(&key, [9u8; NONCE_LEN], "restored");
        assert_eq!(
            restored.decrypt(&blob).unwrap(),
            Decrypted::Text("restored".to_string())
        );
    }

    #[test]
    fn test_import_rejects_wrong_length() {
        let mut crypto = PushCrypto::new();
        let err = crypto.import_key(&STANDARD.encode([0u8; 16])).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength(16));
    }

    #[test]
    fn test_clear_forgets_key() {
        let mut crypto = crypto_for("pw", "iden");
        crypto.clear();
        assert!(!crypto.is_configured());
        assert_eq!(crypto.export_key(), Err(CryptoError::NotConfigured));
    }

    #[test]
    fn test_process_ephemeral_merges_fields() {
        let crypto = crypto_for("pw", "iden");
        let key = derive_key("pw", "iden");
        let blob = seal(
            &key,
            [5u8; NONCE_LEN],
            r#"{"type":"mirror","package_name":"com.example","notification_id":"1"}"#,
        );

        let mut push = json!({"encrypted": true, "ciphertext": blob})
            .as_object()
            .cloned()
            .unwrap();
        assert!(crypto.process_ephemeral(&mut push).unwrap());

        assert_eq!(push["type"], "mirror");
        assert_eq!(push["package_name"], "com.example");
        assert_eq!(push["encrypted"], false);
        assert_eq!(push["was_encrypted"], true);
        assert!(!push.contains_key("ciphertext"));
    }

    #[test]
    fn test_process_ephemeral_failure_leaves_push_untouched() {
        let key = derive_key("pw", "iden");
        let blob = seal(&key, [5u8; NONCE_LEN], r#"{"type":"mirror"}"#);
        let mut push = json!({"encrypted": true, "ciphertext": blob})
            .as_object()
            .cloned()
            .unwrap();
        let before = push.clone();

        let wrong = crypto_for("nope", "iden");
        assert_eq!(
            wrong.process_ephemeral(&mut push),
            Err(CryptoError::Decryption)
        );
        assert_eq!(push, before);

        let unconfigured = PushCrypto::new();
        assert_eq!(
            unconfigured.process_ephemeral(&mut push),
            Err(CryptoError::NotConfigured)
        );
        assert_eq!(push, before);
    }

    #[test]
    fn test_process_ephemeral_ignores_plain_push() {
        let crypto = crypto_for("pw", "iden");
        let mut push = json!({"type": "mirror", "title": "plain"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(!crypto.process_ephemeral(&mut push).unwrap());
        assert_eq!(push["title"], "plain");
    }
}
