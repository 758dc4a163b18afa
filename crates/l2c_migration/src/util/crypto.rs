use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::util::errors::{Error, Result, StdError};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// AES-256-GCM cipher for database credentials stored in the project spec.
///
/// Ciphertext layout is `base64(nonce || sealed)` with a 12 byte random nonce.
#[derive(Clone)]
pub struct PasswordCipher {
    key: [u8; KEY_SIZE],
}

impl PasswordCipher {
    /// Keys shorter than 32 bytes are right-padded with `l`, longer keys are truncated.
    pub fn new(key: &str) -> Self {
        let mut padded = [b'l'; KEY_SIZE];
        let bytes = key.as_bytes();
        let len = bytes.len().min(KEY_SIZE);
        padded[..len].copy_from_slice(&bytes[..len]);
        Self { key: padded }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::StdError(StdError::EncodingError(format!("invalid key: {e}"))))
    }

    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|e| Error::StdError(StdError::EncodingError(format!("encryption failed: {e}"))))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| Error::StdError(StdError::EncodingError(format!("invalid base64: {e}"))))?;
        if raw.len() < NONCE_SIZE {
            return Err(Error::StdError(StdError::EncodingError("ciphertext too short".to_string())));
        }
        let (nonce, sealed) = raw.split_at(NONCE_SIZE);

        let plain = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| Error::StdError(StdError::EncodingError(format!("decryption failed: {e}"))))?;
        String::from_utf8(plain)
            .map_err(|e| Error::StdError(StdError::EncodingError(format!("plaintext is not utf-8: {e}"))))
    }

    /// A value counts as encrypted exactly when it decrypts under this key.
    pub fn is_encrypted(&self, value: &str) -> bool {
        self.decrypt(value).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_value_decrypts_with_same_key() {
        let cipher = PasswordCipher::new("secret");
        let sealed = cipher.encrypt("tibero").unwrap();
        assert_ne!(sealed, "tibero");
        assert!(cipher.is_encrypted(&sealed));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "tibero");
    }

    #[test]
    fn plaintext_is_not_encrypted() {
        let cipher = PasswordCipher::new("secret");
        assert!(!cipher.is_encrypted("tibero"));
        assert!(!cipher.is_encrypted(""));
        assert!(!cipher.is_encrypted("c2hvcnQ="));
    }

    #[test]
    fn other_key_cannot_decrypt() {
        let sealed = PasswordCipher::new("first").encrypt("pw").unwrap();
        assert!(!PasswordCipher::new("second").is_encrypted(&sealed));
    }

    #[test]
    fn key_is_padded_and_truncated() {
        assert_eq!(&PasswordCipher::new("ab").key[..4], b"abll");
        let long = "x".repeat(40);
        assert_eq!(PasswordCipher::new(&long).key, [b'x'; KEY_SIZE]);
    }

    #[test]
    fn nonce_makes_ciphertexts_differ() {
        let cipher = PasswordCipher::new("k");
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }
}
