//! AES-256-GCM envelopes keyed by a device-derived password.
//!
//! No passphrase is ever asked for. The password is a SHA-256 digest over
//! stable-ish attributes of the running environment, and each envelope gets
//! its own PBKDF2 salt and GCM nonce.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use chrono::Utc;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::StoreError;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the PBKDF2 salt in bytes (128 bits)
pub const SALT_SIZE: usize = 16;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// PBKDF2-HMAC-SHA256 rounds per derivation
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Mixed into every fingerprint so passwords are specific to this application.
const APPLICATION_SALT: &str = "runwatch-device-key-v1";

/// Environment attributes the device password is derived from.
///
/// None of these are secret; they only bind stored envelopes to the machine
/// and account that wrote them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub user_agent: String,
    pub locale: String,
    pub display: String,
    pub timezone_offset_minutes: i32,
}

impl DeviceFingerprint {
    /// Collects the fingerprint of the current process environment.
    pub fn detect() -> Self {
        let user_agent = format!(
            "{}/{} ({}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let locale = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_else(|_| "en-US".to_string());
        let display = std::env::var("DISPLAY")
            .or_else(|_| std::env::var("WAYLAND_DISPLAY"))
            .unwrap_or_else(|_| "headless".to_string());
        let timezone_offset_minutes = chrono::Local::now().offset().local_minus_utc() / 60;

        Self {
            user_agent,
            locale,
            display,
            timezone_offset_minutes,
        }
    }

    /// Hex-encoded SHA-256 of the joined attributes. Always 64 characters.
    pub fn password(&self) -> String {
        let material = [
            self.user_agent.as_str(),
            self.locale.as_str(),
            self.display.as_str(),
            &self.timezone_offset_minutes.to_string(),
            APPLICATION_SALT,
        ]
        .join("|");

        hex::encode(Sha256::digest(material.as_bytes()))
    }
}

fn derive_key_bytes(password: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// A derived key that can only encrypt.
pub struct SealingKey(Aes256Gcm);

impl SealingKey {
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self, StoreError> {
        let key = derive_key_bytes(password, salt);
        Aes256Gcm::new_from_slice(&key)
            .map(SealingKey)
            .map_err(|e| StoreError::Encryption(e.to_string()))
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.0
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| StoreError::Encryption(e.to_string()))
    }
}

/// A derived key that can only decrypt.
pub struct OpeningKey(Aes256Gcm);

impl OpeningKey {
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self, StoreError> {
        let key = derive_key_bytes(password, salt);
        Aes256Gcm::new_from_slice(&key)
            .map(OpeningKey)
            .map_err(|_| StoreError::DecryptionFailed)
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.0
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)
    }
}

/// Serialized form of one stored value.
///
/// Byte fields are written as JSON arrays of numbers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    /// Milliseconds since the unix epoch at sealing time
    pub timestamp: i64,
}

impl Envelope {
    /// Encrypts `plaintext` under a fresh salt and nonce.
    pub fn seal(plaintext: &str, password: &str) -> Result<Self, StoreError> {
        let mut salt = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let key = SealingKey::derive(password, &salt)?;
        let ciphertext = key.seal(nonce.as_slice(), plaintext.as_bytes())?;

        Ok(Self {
            ciphertext,
            salt: salt.to_vec(),
            iv: nonce.to_vec(),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Parses a stored envelope, checking that every byte field is usable.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| StoreError::CorruptedData(e.to_string()))?;

        if envelope.ciphertext.is_empty() {
            return Err(StoreError::CorruptedData("empty ciphertext".to_string()));
        }
        if envelope.salt.len() != SALT_SIZE {
            return Err(StoreError::CorruptedData(format!(
                "invalid salt size: expected {}, got {}",
                SALT_SIZE,
                envelope.salt.len()
            )));
        }
        if envelope.iv.len() != NONCE_SIZE {
            return Err(StoreError::CorruptedData(format!(
                "invalid iv size: expected {}, got {}",
                NONCE_SIZE,
                envelope.iv.len()
            )));
        }

        Ok(envelope)
    }

    /// Decrypts with a key re-derived from the stored salt.
    pub fn open(&self, password: &str) -> Result<String, StoreError> {
        let key = OpeningKey::derive(password, &self.salt)?;
        let plaintext = key.open(&self.iv, &self.ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| StoreError::DecryptionFailed)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Encryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> DeviceFingerprint {
        DeviceFingerprint {
            user_agent: "runwatch/test".to_string(),
            locale: "en-US".to_string(),
            display: ":0".to_string(),
            timezone_offset_minutes: 60,
        }
    }

    #[test]
    fn test_password_is_stable_and_fixed_length() {
        let device = fingerprint();
        let first = device.password();
        let second = device.password();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_password_depends_on_every_attribute() {
        let base = fingerprint();

        let mut other_locale = base.clone();
        other_locale.locale = "de-DE".to_string();
        let mut other_tz = base.clone();
        other_tz.timezone_offset_minutes = -300;

        assert_ne!(base.password(), other_locale.password());
        assert_ne!(base.password(), other_tz.password());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let password = fingerprint().password();
        let envelope = Envelope::seal("ghp_secret", &password).unwrap();

        assert_eq!(envelope.salt.len(), SALT_SIZE);
        assert_eq!(envelope.iv.len(), NONCE_SIZE);
        assert_ne!(envelope.ciphertext, b"ghp_secret".to_vec());

        let reparsed = Envelope::parse(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(reparsed.open(&password).unwrap(), "ghp_secret");
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_seal() {
        let password = fingerprint().password();
        let a = Envelope::seal("same", &password).unwrap();
        let b = Envelope::seal("same", &password).unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_other_device_cannot_open() {
        let envelope = Envelope::seal("secret", &fingerprint().password()).unwrap();

        let mut other = fingerprint();
        other.user_agent = "someone-else".to_string();

        assert!(matches!(
            envelope.open(&other.password()),
            Err(StoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let result = Envelope::parse(r#"{"ciphertext":[1,2,3],"timestamp":0}"#);
        assert!(matches!(result, Err(StoreError::CorruptedData(_))));

        let result = Envelope::parse("not json");
        assert!(matches!(result, Err(StoreError::CorruptedData(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_sizes() {
        let raw = serde_json::json!({
            "ciphertext": [1, 2, 3],
            "salt": [0, 1],
            "iv": vec![0u8; NONCE_SIZE],
            "timestamp": 0
        })
        .to_string();

        assert!(matches!(Envelope::parse(&raw), Err(StoreError::CorruptedData(_))));
    }
}
