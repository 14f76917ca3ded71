//! Credential vault: symmetric encryption of destination credentials at rest.
//!
//! AES-256-GCM with a deterministic nonce derived from the key and the
//! plaintext, so the same credential always yields the same ciphertext.
//! Stored form is `nonce || ciphertext`.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::error::VaultError;

const NONCE_LEN: usize = 12;

/// Process-wide encryption key, immutable after construction.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; 32],
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from configured key material.
    ///
    /// 64 hex characters are taken as the raw 256-bit key; anything else is
    /// treated as a passphrase and hashed with SHA-256.
    pub fn from_key_material(material: &str) -> Result<Self, VaultError> {
        let material = material.trim();
        if material.is_empty() {
            return Err(VaultError::MissingKey);
        }
        let mut key = [0u8; 32];
        match hex::decode(material) {
            Ok(bytes) if bytes.len() == 32 => key.copy_from_slice(&bytes),
            _ => key.copy_from_slice(&Sha256::digest(material.as_bytes())),
        }
        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|_| VaultError::Cipher)
    }

    fn nonce_for(&self, plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, VaultError> {
        let nonce = self.nonce_for(plaintext.as_bytes());
        let sealed = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| VaultError::Cipher)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, stored: &[u8]) -> Result<String, VaultError> {
        if stored.len() <= NONCE_LEN {
            return Err(VaultError::Truncated(stored.len()));
        }
        let (nonce, sealed) = stored.split_at(NONCE_LEN);
        let plain = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::Cipher)?;
        Ok(String::from_utf8(plain)?)
    }

    /// Decrypt a stored credential; on failure log and return an empty string
    /// so the surrounding read still succeeds.
    pub fn decrypt_or_empty(&self, field: &str, stored: &[u8]) -> String {
        match self.decrypt(stored) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(field, "could not decrypt stored credential: {}", e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = CredentialVault::from_key_material("correct horse").unwrap();
        let sealed = vault.encrypt("AKIAEXAMPLE").unwrap();
        assert_ne!(sealed, b"AKIAEXAMPLE".to_vec());
        assert_eq!(vault.decrypt(&sealed).unwrap(), "AKIAEXAMPLE");
    }

    #[test]
    fn encryption_is_deterministic() {
        let vault = CredentialVault::from_key_material("k").unwrap();
        assert_eq!(vault.encrypt("token").unwrap(), vault.encrypt("token").unwrap());
        assert_ne!(vault.encrypt("token").unwrap(), vault.encrypt("token2").unwrap());
    }

    #[test]
    fn hex_key_is_used_verbatim() {
        let hex_key = "00".repeat(32);
        let a = CredentialVault::from_key_material(&hex_key).unwrap();
        let b = CredentialVault { key: [0u8; 32] };
        assert_eq!(a.encrypt("x").unwrap(), b.encrypt("x").unwrap());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(
            CredentialVault::from_key_material("  "),
            Err(VaultError::MissingKey)
        ));
    }

    #[test]
    fn wrong_key_decrypts_to_empty() {
        let a = CredentialVault::from_key_material("a").unwrap();
        let b = CredentialVault::from_key_material("b").unwrap();
        let sealed = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&sealed).is_err());
        assert_eq!(b.decrypt_or_empty("secret_key", &sealed), "");
        assert_eq!(a.decrypt_or_empty("secret_key", &[1, 2, 3]), "");
    }
}
