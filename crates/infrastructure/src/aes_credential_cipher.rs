//! AES-256-GCM sealing of integration credential sets at rest.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use mirrorline_core::{AppError, AppResult};
use mirrorline_domain::CredentialSet;

const NONCE_LENGTH: usize = 12;

/// Encrypts credential sets before they reach the database.
#[derive(Clone)]
pub struct AesCredentialCipher {
    cipher: Aes256Gcm,
}

impl AesCredentialCipher {
    /// Creates a cipher from a 32-byte key.
    #[must_use]
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(key_bytes.into());
        Self { cipher }
    }

    /// Creates a cipher from a hex-encoded 32-byte key.
    pub fn from_hex(hex_key: &str) -> AppResult<Self> {
        let decoded = hex::decode(hex_key.trim()).map_err(|error| {
            AppError::Validation(format!("invalid CREDENTIAL_ENCRYPTION_KEY hex: {error}"))
        })?;

        let key: [u8; 32] = decoded.try_into().map_err(|_| {
            AppError::Validation(
                "CREDENTIAL_ENCRYPTION_KEY must be exactly 32 bytes (64 hex chars)".to_owned(),
            )
        })?;
        Ok(Self::new(&key))
    }

    /// Serializes and encrypts a credential set. The nonce is prepended.
    pub fn seal(&self, credentials: &CredentialSet) -> AppResult<Vec<u8>> {
        let plaintext = serde_json::to_vec(credentials).map_err(|error| {
            AppError::Internal(format!("failed to serialize credential set: {error}"))
        })?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|error| {
                AppError::Internal(format!("failed to encrypt credential set: {error}"))
            })?;

        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts and deserializes a sealed credential set.
    pub fn open(&self, sealed: &[u8]) -> AppResult<CredentialSet> {
        if sealed.len() < NONCE_LENGTH {
            return Err(AppError::Internal(
                "sealed credential set is shorter than its nonce".to_owned(),
            ));
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_LENGTH);
        let nonce_array: [u8; NONCE_LENGTH] = nonce_bytes
            .try_into()
            .map_err(|_| AppError::Internal("nonce must be exactly 12 bytes".to_owned()))?;
        let nonce = Nonce::from(nonce_array);

        let plaintext = self.cipher.decrypt(&nonce, encrypted).map_err(|error| {
            AppError::Internal(format!("failed to decrypt credential set: {error}"))
        })?;
        serde_json::from_slice(&plaintext).map_err(|error| {
            AppError::Internal(format!("failed to deserialize credential set: {error}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use mirrorline_core::AppResult;
    use mirrorline_domain::CredentialSet;

    use super::AesCredentialCipher;

    fn credentials() -> CredentialSet {
        let mut credentials = CredentialSet::new();
        credentials.insert("backfill_secret", "sk_live_123");
        credentials.insert("webhook_secret", "whsec_abc");
        credentials
    }

    #[test]
    fn sealed_credentials_open_with_the_same_key() -> AppResult<()> {
        let cipher = AesCredentialCipher::new(&[42_u8; 32]);
        let sealed = cipher.seal(&credentials())?;

        assert!(
            !sealed
                .windows(b"sk_live_123".len())
                .any(|window| window == b"sk_live_123")
        );
        assert_eq!(cipher.open(&sealed)?, credentials());
        Ok(())
    }

    #[test]
    fn opening_with_a_different_key_fails() -> AppResult<()> {
        let sealed = AesCredentialCipher::new(&[42_u8; 32]).seal(&credentials())?;
        assert!(AesCredentialCipher::new(&[99_u8; 32]).open(&sealed).is_err());
        Ok(())
    }

    #[test]
    fn hex_keys_must_be_32_bytes() {
        assert!(AesCredentialCipher::from_hex("abcd").is_err());
        assert!(AesCredentialCipher::from_hex("zz").is_err());
        assert!(AesCredentialCipher::from_hex(&"0f".repeat(32)).is_ok());
    }
}
