//! Encryption at rest for stored refresh tokens.
//!
//! Tokens are sealed with AES-256-GCM under a random 96-bit nonce and
//! stored as `hex(nonce):hex(ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::AppError;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Symmetric cipher for secrets kept in the credential store.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Builds a cipher from a 64-character hex key.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Crypto`] if the key is not valid hex or is not
    /// 32 bytes long.
    pub fn from_hex_key(key: &str) -> Result<Self, AppError> {
        let bytes = hex::decode(key.trim())
            .map_err(|e| AppError::Crypto(format!("encryption key is not hex: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(AppError::Crypto(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|e| AppError::Crypto(format!("invalid encryption key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Builds a cipher from a freshly generated random key.
    ///
    /// Used when no key is configured; tokens sealed with it do not
    /// survive a restart.
    #[must_use]
    pub fn ephemeral() -> Self {
        let key: [u8; KEY_LEN] = rand::random();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Seals `plaintext` into a `hex(nonce):hex(ciphertext)` token.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Crypto`] if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, AppError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Crypto(format!("encryption failed: {e}")))?;
        Ok(format!(
            "{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(ciphertext)
        ))
    }

    /// Opens a token produced by [`TokenCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Crypto`] on a malformed token, a wrong key or
    /// tampered ciphertext.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, AppError> {
        let (nonce_hex, ct_hex) = token
            .split_once(':')
            .ok_or_else(|| AppError::Crypto("token is missing the nonce separator".into()))?;
        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|e| AppError::Crypto(format!("nonce is not hex: {e}")))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(AppError::Crypto("nonce has the wrong length".into()));
        }
        let ciphertext = hex::decode(ct_hex)
            .map_err(|e| AppError::Crypto(format!("ciphertext is not hex: {e}")))?;
        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|e| AppError::Crypto(format!("decryption failed: {e}")))
    }

    /// Seals a UTF-8 string.
    ///
    /// # Errors
    ///
    /// See [`TokenCipher::encrypt`].
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, AppError> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Opens a token into a UTF-8 string.
    ///
    /// # Errors
    ///
    /// See [`TokenCipher::decrypt`]; also fails on non-UTF-8 plaintext.
    pub fn decrypt_str(&self, token: &str) -> Result<String, AppError> {
        let bytes = self.decrypt(token)?;
        String::from_utf8(bytes).map_err(|e| AppError::Crypto(format!("plaintext is not UTF-8: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        let Ok(cipher) = TokenCipher::from_hex_key(&"11".repeat(32)) else {
            panic!("valid key rejected");
        };
        cipher
    }

    #[test]
    fn roundtrip_arbitrary_bytes() {
        let cipher = cipher();
        for plaintext in [&b""[..], b"5Aep861abc", &[0u8, 255, 7, 42, 0, 0]] {
            let Ok(token) = cipher.encrypt(plaintext) else {
                panic!("encrypt failed");
            };
            let Ok(opened) = cipher.decrypt(&token) else {
                panic!("decrypt failed");
            };
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn nonce_differs_per_call() {
        let cipher = cipher();
        let a = cipher.encrypt_str("refresh-token").ok();
        let b = cipher.encrypt_str("refresh-token").ok();
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn token_format_is_hex_pair() {
        let Ok(token) = cipher().encrypt_str("x") else {
            panic!("encrypt failed");
        };
        let Some((nonce, ct)) = token.split_once(':') else {
            panic!("missing separator");
        };
        assert_eq!(nonce.len(), NONCE_LEN * 2);
        assert!(hex::decode(ct).is_ok());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let cipher = cipher();
        let Ok(token) = cipher.encrypt_str("secret") else {
            panic!("encrypt failed");
        };
        let Some((nonce, ct)) = token.split_once(':') else {
            panic!("missing separator");
        };
        let mut bytes = hex::decode(ct).unwrap_or_default();
        if let Some(first) = bytes.first_mut() {
            *first ^= 0x01;
        }
        let tampered = format!("{nonce}:{}", hex::encode(bytes));
        assert!(matches!(cipher.decrypt(&tampered), Err(AppError::Crypto(_))));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let Ok(token) = cipher().encrypt_str("secret") else {
            panic!("encrypt failed");
        };
        assert!(TokenCipher::ephemeral().decrypt(&token).is_err());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let cipher = cipher();
        assert!(cipher.decrypt("no-separator").is_err());
        assert!(cipher.decrypt("zz:00").is_err());
        assert!(cipher.decrypt("0011:00").is_err());
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!(TokenCipher::from_hex_key("abcd").is_err());
        assert!(TokenCipher::from_hex_key(&"g".repeat(64)).is_err());
    }
}
