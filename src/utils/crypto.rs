//! XChaCha20-Poly1305 AEAD primitive used by the encryption envelope.

use crate::error::{ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

/// Nonce length for XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Fresh random nonce from the operating system.
    ///
    /// # Errors
    /// Returns `ProtocolError::EncryptionFailure` if the system RNG is unavailable
    pub fn generate_nonce() -> Result<[u8; NONCE_SIZE]> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce).map_err(|_| ProtocolError::EncryptionFailure)?;
        Ok(nonce)
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_tag_size() {
        let crypto = Crypto::new(&[0x42; 32]);
        let nonce = Crypto::generate_nonce().unwrap();
        let ct = crypto.encrypt(b"frame bytes", &nonce).unwrap();
        assert_eq!(ct.len(), 11 + TAG_SIZE);
        assert_eq!(crypto.decrypt(&ct, &nonce).unwrap(), b"frame bytes");
    }

    #[test]
    fn test_wrong_key_fails() {
        let nonce = [7u8; NONCE_SIZE];
        let ct = Crypto::new(&[1; 32]).encrypt(b"x", &nonce).unwrap();
        assert!(matches!(
            Crypto::new(&[2; 32]).decrypt(&ct, &nonce),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_nonces_differ() {
        let a = Crypto::generate_nonce().unwrap();
        let b = Crypto::generate_nonce().unwrap();
        assert_ne!(a, b);
    }
}
