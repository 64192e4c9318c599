//! # Encryption Envelope
//!
//! Once a session key is negotiated every frame travels inside an envelope:
//!
//! ```text
//! [total_size:u32][opcode:u16 = 0x0083][padding:u8][reserved:u8]
//! [nonce:24][XChaCha20-Poly1305 ciphertext of the plain frame][zero padding]
//! ```
//!
//! `total_size` is a multiple of 8 and `padding` counts the trailing zero
//! bytes. A failed authentication is reported as
//! [`ProtocolError::DecryptionFailure`], never as a framing error.

use crate::error::{ProtocolError, Result};
use crate::protocol::codes::{cipher, cmd, rcc};
use crate::utils::crypto::{Crypto, NONCE_SIZE, TAG_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use zeroize::Zeroize;

/// Fixed envelope header preceding the nonce.
pub const ENVELOPE_HEADER_SIZE: usize = 8;

/// Smallest envelope that can hold an authenticated empty plaintext.
pub const MIN_ENVELOPE_SIZE: usize = ENVELOPE_HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// True if the raw frame is an encryption envelope rather than a plain message.
pub fn is_envelope(frame: &[u8]) -> bool {
    frame.len() >= 6 && u16::from_be_bytes([frame[4], frame[5]]) == cmd::ENCRYPTED_MESSAGE
}

/// Negotiated cipher and session key for one connection.
pub struct EncryptionContext {
    cipher_id: u16,
    crypto: Crypto,
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("cipher_id", &self.cipher_id)
            .finish_non_exhaustive()
    }
}

impl EncryptionContext {
    /// Builds a context from a negotiated key. The caller's copy of the key is wiped.
    ///
    /// # Errors
    /// Returns `ProtocolError::Request` with `NO_CIPHERS` for an unknown cipher id
    pub fn new(cipher_id: u16, mut key: [u8; 32]) -> Result<Self> {
        if cipher_id != cipher::XCHACHA20_POLY1305 {
            key.zeroize();
            return Err(ProtocolError::Request {
                rcc: rcc::NO_CIPHERS,
            });
        }
        let crypto = Crypto::new(&key);
        key.zeroize();
        Ok(Self { cipher_id, crypto })
    }

    pub fn cipher_id(&self) -> u16 {
        self.cipher_id
    }

    /// Wraps a plain frame into an envelope.
    pub fn encrypt(&self, frame: &[u8]) -> Result<Bytes> {
        let nonce = Crypto::generate_nonce()?;
        let ciphertext = self.crypto.encrypt(frame, &nonce)?;

        let unpadded = ENVELOPE_HEADER_SIZE + NONCE_SIZE + ciphertext.len();
        let total = (unpadded + 7) & !7;
        let padding = total - unpadded;

        let mut out = BytesMut::with_capacity(total);
        out.put_u32(total as u32);
        out.put_u16(cmd::ENCRYPTED_MESSAGE);
        out.put_u8(padding as u8);
        out.put_u8(0);
        out.put_slice(&nonce);
        out.put_slice(&ciphertext);
        out.put_bytes(0, padding);
        Ok(out.freeze())
    }

    /// Unwraps an envelope into the plain frame it carries.
    ///
    /// # Errors
    /// Returns `ProtocolError::DecryptionFailure` for a malformed envelope or a
    /// ciphertext that does not authenticate under this key
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Bytes> {
        if envelope.len() < MIN_ENVELOPE_SIZE || !is_envelope(envelope) {
            return Err(ProtocolError::DecryptionFailure);
        }

        let total = u32::from_be_bytes([envelope[0], envelope[1], envelope[2], envelope[3]]) as usize;
        let padding = envelope[6] as usize;
        if total > envelope.len() || total < MIN_ENVELOPE_SIZE + padding {
            return Err(ProtocolError::DecryptionFailure);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&envelope[ENVELOPE_HEADER_SIZE..ENVELOPE_HEADER_SIZE + NONCE_SIZE]);
        let ciphertext = &envelope[ENVELOPE_HEADER_SIZE + NONCE_SIZE..total - padding];

        let plain = self.crypto.decrypt(ciphertext, &nonce);
        nonce.zeroize();
        plain.map(Bytes::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::codec;
    use crate::core::message::Message;

    fn context(key: u8) -> EncryptionContext {
        EncryptionContext::new(cipher::XCHACHA20_POLY1305, [key; 32]).unwrap()
    }

    #[test]
    fn test_envelope_roundtrip() {
        let ctx = context(9);
        let frame = codec::encode(&Message::new(0x1D, 4).with(28, 0u32));
        let envelope = ctx.encrypt(&frame).unwrap();

        assert_eq!(envelope.len() % 8, 0);
        assert!(is_envelope(&envelope));
        assert!(!is_envelope(&frame));
        assert_eq!(
            u32::from_be_bytes([envelope[0], envelope[1], envelope[2], envelope[3]]) as usize,
            envelope.len()
        );
        assert_eq!(ctx.decrypt(&envelope).unwrap(), frame);
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let ctx = context(1);
        let frame = codec::encode(&Message::new(1, 1));
        let mut envelope = ctx.encrypt(&frame).unwrap().to_vec();
        envelope[ENVELOPE_HEADER_SIZE + NONCE_SIZE] ^= 0x55;
        assert!(matches!(
            ctx.decrypt(&envelope),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_wrong_key_and_short_input() {
        let frame = codec::encode(&Message::new(1, 1));
        let envelope = context(1).encrypt(&frame).unwrap();
        assert!(context(2).decrypt(&envelope).is_err());
        assert!(context(1).decrypt(&envelope[..20]).is_err());
        assert!(context(1).decrypt(&frame).is_err());
    }

    #[test]
    fn test_unknown_cipher_rejected() {
        let err = EncryptionContext::new(7, [0; 32]).unwrap_err();
        assert_eq!(err.rcc(), rcc::NO_CIPHERS);
    }
}
