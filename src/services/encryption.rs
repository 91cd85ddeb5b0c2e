use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::error::Unspecified;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

pub const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const LOWER_ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,

    #[error("Random generator failure")]
    Random,
}

impl From<Unspecified> for EncryptionError {
    fn from(_: Unspecified) -> Self {
        EncryptionError::EncryptionFailed("Cryptographic operation failed".to_string())
    }
}

/// Derives a 32-byte key from a configured secret.
pub fn derive_key(key_string: &str) -> [u8; 32] {
    use ring::digest;

    let hash = digest::digest(&digest::SHA256, key_string.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(hash.as_ref());
    key
}

/// AES-256-GCM with a random nonce per message.
///
/// Format: [nonce (12 bytes)][ciphertext + auth tag]
pub struct Cipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Cipher {
    pub fn new(key: &[u8; 32]) -> Result<Self, EncryptionError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::EncryptionFailed("Failed to generate nonce".to_string()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| EncryptionError::EncryptionFailed("Sealing failed".to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + in_out.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);
        Ok(result)
    }

    pub fn open(&self, encrypted: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if encrypted.len() < NONCE_LEN {
            return Err(EncryptionError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| EncryptionError::InvalidFormat)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| EncryptionError::DecryptionFailed("Opening failed".to_string()))?;
        Ok(plaintext.to_vec())
    }

    pub fn open_string(&self, encrypted: &[u8]) -> Result<String, EncryptionError> {
        String::from_utf8(self.open(encrypted)?)
            .map_err(|_| EncryptionError::DecryptionFailed("Invalid UTF-8".to_string()))
    }
}

/// Hex HMAC-SHA256 of `data`.
pub fn keyed_hash(secret: &[u8], data: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hex::encode(hmac::sign(&key, data.as_bytes()).as_ref())
}

pub fn verify_keyed_hash(secret: &[u8], data: &str, expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, data.as_bytes(), &expected).is_ok()
}

/// Random string drawn uniformly from `alphabet`.
pub fn random_string(len: usize, alphabet: &[u8]) -> Result<String, EncryptionError> {
    let rng = SystemRandom::new();
    // Largest multiple of the alphabet size that fits in a byte; anything
    // above is rejected so every character is equally likely.
    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        rng.fill(&mut buf).map_err(|_| EncryptionError::Random)?;
        for byte in buf {
            if (byte as usize) < limit && out.len() < len {
                out.push(alphabet[byte as usize % alphabet.len()] as char);
            }
        }
    }
    Ok(out)
}

pub fn random_alphanumeric(len: usize) -> Result<String, EncryptionError> {
    random_string(len, ALPHANUMERIC)
}

pub fn random_hex(bytes: usize) -> Result<String, EncryptionError> {
    let mut buf = vec![0u8; bytes];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| EncryptionError::Random)?;
    Ok(hex::encode(buf))
}

/// Seals and indexes email addresses so they are never stored in the clear.
pub struct EmailVault {
    cipher: Cipher,
    hash_key: [u8; 32],
}

impl EmailVault {
    pub fn new(email_secret: &str) -> Result<Self, EncryptionError> {
        Ok(Self {
            cipher: Cipher::new(&derive_key(&format!("encrypt:{}", email_secret)))?,
            hash_key: derive_key(&format!("hash:{}", email_secret)),
        })
    }

    /// Deterministic lookup key for a normalised email.
    pub fn hash(&self, email: &str) -> String {
        keyed_hash(&self.hash_key, email)
    }

    pub fn seal(&self, email: &str) -> Result<Vec<u8>, EncryptionError> {
        self.cipher.seal(email.as_bytes())
    }

    pub fn open(&self, sealed: &[u8]) -> Result<String, EncryptionError> {
        self.cipher.open_string(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = Cipher::new(&derive_key("test-encryption-key-32-bytes-minimum")).unwrap();

        let sealed = cipher.seal(b"Hello, World!").unwrap();
        assert_eq!(cipher.open_string(&sealed).unwrap(), "Hello, World!");
    }

    #[test]
    fn test_encryption_is_non_deterministic() {
        let cipher = Cipher::new(&derive_key("test-encryption-key-32-bytes-minimum")).unwrap();

        let sealed1 = cipher.seal(b"Same text").unwrap();
        let sealed2 = cipher.seal(b"Same text").unwrap();

        assert_ne!(sealed1, sealed2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let one = Cipher::new(&derive_key("key-one")).unwrap();
        let two = Cipher::new(&derive_key("key-two")).unwrap();

        let sealed = one.seal(b"Secret data").unwrap();
        assert!(matches!(
            two.open(&sealed),
            Err(EncryptionError::DecryptionFailed(_))
        ));
        assert!(matches!(one.open(&[1, 2, 3]), Err(EncryptionError::InvalidFormat)));
    }

    #[test]
    fn test_email_hash_is_stable() {
        let vault = EmailVault::new("email-secret").unwrap();
        assert_eq!(vault.hash("user@example.com"), vault.hash("user@example.com"));
        assert_ne!(vault.hash("user@example.com"), vault.hash("other@example.com"));
        assert_eq!(vault.hash("user@example.com").len(), 64);
    }

    #[test]
    fn test_random_strings_use_alphabet() {
        let code = random_string(32, LOWER_ALPHANUMERIC).unwrap();
        assert_eq!(code.len(), 32);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(random_hex(16).unwrap().len(), 32);
    }

    #[test]
    fn test_keyed_hash_verifies() {
        let tag = keyed_hash(b"secret", "payload");
        assert!(verify_keyed_hash(b"secret", "payload", &tag));
        assert!(!verify_keyed_hash(b"secret", "tampered", &tag));
        assert!(!verify_keyed_hash(b"secret", "payload", "zz"));
    }
}
