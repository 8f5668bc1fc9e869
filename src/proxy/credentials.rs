//! Proxy credentials at rest
//!
//! Passwords in the configuration may be stored encrypted as
//! `enc:` + base64(IV ‖ ciphertext), using AES-256-CBC with a random IV and a
//! key derived from the site secret. Unprefixed values are plain text.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Marks a stored value as ciphertext
pub const ENCRYPTED_PREFIX: &str = "enc:";

const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Credential payload is malformed")]
    Malformed,

    #[error("Credential could not be decrypted (wrong secret?)")]
    Decryption,
}

/// Encrypts and decrypts stored proxy credentials
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCipher(..)")
    }
}

impl CredentialCipher {
    /// Derives the key as SHA-256 of the site secret
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Encrypts a plaintext credential with a fresh random IV
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len());
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(&ciphertext);

        format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(payload))
    }

    /// Decrypts a stored credential
    ///
    /// Values without the `enc:` prefix are returned unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String, CredentialError> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let payload = STANDARD.decode(encoded.trim())?;
        if payload.len() < IV_LEN + BLOCK_LEN || (payload.len() - IV_LEN) % BLOCK_LEN != 0 {
            return Err(CredentialError::Malformed);
        }

        let (iv, ciphertext) = payload.split_at(IV_LEN);
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| CredentialError::Malformed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CredentialError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CredentialError::Decryption)
    }
}

/// Returns true if the value is stored encrypted
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = CredentialCipher::from_secret("site-secret");
        let stored = cipher.encrypt("hunter2");

        assert!(is_encrypted(&stored));
        assert!(!stored.contains("hunter2"));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "hunter2");
    }

    #[test]
    fn test_random_iv_changes_ciphertext() {
        let cipher = CredentialCipher::from_secret("site-secret");
        assert_ne!(cipher.encrypt("same"), cipher.encrypt("same"));
    }

    #[test]
    fn test_plaintext_passes_through() {
        let cipher = CredentialCipher::from_secret("site-secret");
        assert_eq!(cipher.decrypt("legacy-password").unwrap(), "legacy-password");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let stored = CredentialCipher::from_secret("right").encrypt("password123");
        let result = CredentialCipher::from_secret("wrong").decrypt(&stored);
        // A wrong key almost always breaks the padding; if it happens to
        // unpad, the plaintext still differs.
        match result {
            Err(_) => {}
            Ok(text) => assert_ne!(text, "password123"),
        }
    }

    #[test]
    fn test_malformed_payloads() {
        let cipher = CredentialCipher::from_secret("s");
        assert!(matches!(
            cipher.decrypt("enc:not base64!!"),
            Err(CredentialError::Encoding(_))
        ));
        assert!(matches!(
            cipher.decrypt(&format!("enc:{}", STANDARD.encode([0u8; 20]))),
            Err(CredentialError::Malformed)
        ));
    }
}
