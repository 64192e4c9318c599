//! Session key negotiation over X25519.
//!
//! The exchange rides on ordinary NXCP messages:
//!
//! 1. client sends `CMD_REQUEST_ENCRYPTION`
//! 2. server answers `CMD_REQUEST_SESSION_KEY` with its ephemeral public key,
//!    a 16-byte nonce, the mask of ciphers it accepts and an Ed25519
//!    signature over those values made with its long-term identity key
//! 3. client checks the signature against the server key it pinned, derives
//!    the key, installs its context and replies `CMD_SESSION_KEY` (never
//!    encrypted) with its own public key and nonce
//! 4. server derives the same key and completes the request, encrypted
//!
//! Handshake state is per exchange: a `ServerHandshakeState` is created for
//! one peer and consumed when the key is finalized.

use crate::core::message::{Message, MessageFlags};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::codes::{cipher, cmd, rcc, vid};
use crate::protocol::encryption::EncryptionContext;
use rand_core::{OsRng, RngCore};
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zeroize::Zeroize;

use tracing::{debug, instrument, warn};

/// Domain label prefixed to the signed offer transcript.
const OFFER_LABEL: &[u8] = b"nxcp session key offer v1";

/// Length of an Ed25519 public key.
pub const SERVER_KEY_SIZE: usize = 32;

/// Long-term server signing key that authenticates key offers.
pub struct ServerIdentity {
    key_pair: Ed25519KeyPair,
}

impl ServerIdentity {
    /// Creates a fresh random identity.
    pub fn generate() -> Result<Self> {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_IDENTITY_KEY.into()))?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    /// Loads an identity from a PKCS#8 v2 document.
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        let key_pair = Ed25519KeyPair::from_pkcs8(der).map_err(|e| {
            ProtocolError::HandshakeError(format!("{}: {e}", constants::ERR_IDENTITY_KEY))
        })?;
        Ok(Self { key_pair })
    }

    /// The key clients pin with `ConnectOptions::with_server_key`.
    pub fn public_key(&self) -> [u8; SERVER_KEY_SIZE] {
        let mut key = [0u8; SERVER_KEY_SIZE];
        key.copy_from_slice(self.key_pair.public_key().as_ref());
        key
    }

    /// Signs the key material already present in `offer`.
    pub fn sign_offer(&self, offer: &mut Message) {
        if let Some(transcript) = offer_transcript(offer) {
            let sig = self.key_pair.sign(&transcript);
            offer.set(vid::SESSION_KEY_SIGNATURE, sig.as_ref());
        }
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity").finish_non_exhaustive()
    }
}

/// Request id, ephemeral key, nonce and cipher mask in the order they are signed.
fn offer_transcript(offer: &Message) -> Option<Vec<u8>> {
    let public = offer.get_binary(vid::PUBLIC_KEY)?;
    let nonce = offer.get_binary(vid::SESSION_IV)?;
    let mask = offer.get_u32(vid::SUPPORTED_ENCRYPTION)?;

    let mut transcript = Vec::with_capacity(OFFER_LABEL.len() + 8 + public.len() + nonce.len());
    transcript.extend_from_slice(OFFER_LABEL);
    transcript.extend_from_slice(&offer.id().to_be_bytes());
    transcript.extend_from_slice(public);
    transcript.extend_from_slice(nonce);
    transcript.extend_from_slice(&mask.to_be_bytes());
    Some(transcript)
}

fn offer_is_signed_by(offer: &Message, server_key: &[u8; SERVER_KEY_SIZE]) -> bool {
    let (Some(transcript), Some(sig)) = (
        offer_transcript(offer),
        offer.get_binary(vid::SESSION_KEY_SIGNATURE),
    ) else {
        return false;
    };
    UnparsedPublicKey::new(&signature::ED25519, server_key)
        .verify(&transcript, sig)
        .is_ok()
}

/// Length of the nonce each side contributes.
pub const HANDSHAKE_NONCE_SIZE: usize = 16;

/// Server-side state between sending the key request and receiving the reply.
pub struct ServerHandshakeState {
    secret: Option<EphemeralSecret>,
    server_nonce: [u8; HANDSHAKE_NONCE_SIZE],
}

impl ServerHandshakeState {
    /// Get reference to server nonce (for testing)
    #[cfg(test)]
    pub fn server_nonce(&self) -> &[u8; HANDSHAKE_NONCE_SIZE] {
        &self.server_nonce
    }
}

impl Drop for ServerHandshakeState {
    fn drop(&mut self) {
        self.server_nonce.zeroize();
    }
}

/// Outcome of processing a key request on the client side.
pub struct SessionKeyReply {
    /// Context to install; `None` when the request was refused.
    pub context: Option<EncryptionContext>,
    /// `CMD_SESSION_KEY` message to send back.
    pub reply: Message,
}

/// Generate a cryptographically secure random nonce
fn generate_nonce() -> [u8; HANDSHAKE_NONCE_SIZE] {
    let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive a session key from a shared secret and nonces
fn derive_key_from_shared_secret(
    shared_secret: &SharedSecret,
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret.as_bytes());
    // Order matters for domain separation
    hasher.update(b"client_nonce");
    hasher.update(client_nonce);
    hasher.update(b"server_nonce");
    hasher.update(server_nonce);
    hasher.finalize().into()
}

fn fixed<const N: usize>(msg: &Message, id: u32) -> Option<[u8; N]> {
    let raw = msg.get_binary(id)?;
    <[u8; N]>::try_from(raw.as_ref()).ok()
}

fn refusal(request_id: u32, code: u32) -> SessionKeyReply {
    SessionKeyReply {
        context: None,
        reply: Message::new(cmd::SESSION_KEY, request_id)
            .with_flag(MessageFlags::DONT_ENCRYPT)
            .with(vid::RCC, code),
    }
}

/// Builds the signed `CMD_REQUEST_SESSION_KEY` message a server sends in
/// answer to `CMD_REQUEST_ENCRYPTION`.
#[instrument(skip(identity))]
pub fn server_session_key_request(
    request_id: u32,
    identity: &ServerIdentity,
) -> (ServerHandshakeState, Message) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let server_nonce = generate_nonce();

    let mut msg = Message::new(cmd::REQUEST_SESSION_KEY, request_id)
        .with_flag(MessageFlags::DONT_ENCRYPT)
        .with(vid::PUBLIC_KEY, public.as_bytes().as_slice())
        .with(vid::SESSION_IV, server_nonce.as_slice())
        .with(vid::SUPPORTED_ENCRYPTION, cipher::SUPPORTED_MASK)
        .with(vid::KEY_LENGTH, 32u16)
        .with(vid::IV_LENGTH, HANDSHAKE_NONCE_SIZE as u16);
    identity.sign_offer(&mut msg);

    debug!("Server issuing session key request");

    (
        ServerHandshakeState {
            secret: Some(secret),
            server_nonce,
        },
        msg,
    )
}

/// Client side: answers a `CMD_REQUEST_SESSION_KEY`.
///
/// Never fails outright: a request the client cannot satisfy produces a
/// refusal reply carrying the reason and no context. An offer not signed by
/// `server_key`, or any offer when no key is pinned, is refused with
/// `RCC_INVALID_PUBLIC_KEY`.
#[instrument(skip(request, server_key), fields(request_id = request.id()))]
pub fn client_session_key_reply(
    request: &Message,
    server_key: Option<&[u8; SERVER_KEY_SIZE]>,
) -> SessionKeyReply {
    let Some(cipher_id) = request
        .get_u32(vid::SUPPORTED_ENCRYPTION)
        .and_then(cipher::select)
    else {
        warn!("No common cipher with server");
        return refusal(request.id(), rcc::NO_CIPHERS);
    };

    let Some(server_public) = fixed::<32>(request, vid::PUBLIC_KEY) else {
        warn!(error = constants::ERR_MISSING_PUBLIC_KEY, "Refusing session key request");
        return refusal(request.id(), rcc::INVALID_PUBLIC_KEY);
    };

    let Some(mut server_nonce) = fixed::<HANDSHAKE_NONCE_SIZE>(request, vid::SESSION_IV) else {
        warn!(error = constants::ERR_MISSING_NONCE, "Refusing session key request");
        return refusal(request.id(), rcc::INVALID_SESSION_KEY);
    };

    let Some(server_key) = server_key else {
        warn!(error = constants::ERR_NO_SERVER_KEY, "Refusing session key request");
        return refusal(request.id(), rcc::INVALID_PUBLIC_KEY);
    };
    if !offer_is_signed_by(request, server_key) {
        warn!(error = constants::ERR_BAD_KEY_SIGNATURE, "Refusing session key request");
        return refusal(request.id(), rcc::INVALID_PUBLIC_KEY);
    }

    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let mut client_nonce = generate_nonce();

    let shared = secret.diffie_hellman(&PublicKey::from(server_public));
    if !shared.was_contributory() {
        warn!("Server public key is a low-order point");
        return refusal(request.id(), rcc::INVALID_PUBLIC_KEY);
    }
    let key = derive_key_from_shared_secret(&shared, &client_nonce, &server_nonce);

    let reply = Message::new(cmd::SESSION_KEY, request.id())
        .with_flag(MessageFlags::DONT_ENCRYPT)
        .with(vid::PUBLIC_KEY, public.as_bytes().as_slice())
        .with(vid::SESSION_IV, client_nonce.as_slice())
        .with(vid::CIPHER, cipher_id)
        .with(vid::RCC, rcc::SUCCESS);

    client_nonce.zeroize();
    server_nonce.zeroize();

    match EncryptionContext::new(cipher_id, key) {
        Ok(context) => {
            debug!(cipher_id, "Client derived session key");
            SessionKeyReply {
                context: Some(context),
                reply,
            }
        }
        Err(e) => refusal(request.id(), e.rcc()),
    }
}

/// Server side: consumes the client's `CMD_SESSION_KEY` reply and derives the
/// same context.
///
/// # Errors
/// - `ProtocolError::Request` carrying the client's refusal code
/// - `ProtocolError::HandshakeError` if the reply lacks key material or the
///   state was already used
#[instrument(skip(state, reply))]
pub fn server_finalize_session_key(
    mut state: ServerHandshakeState,
    reply: &Message,
) -> Result<EncryptionContext> {
    let code = reply.get_u32(vid::RCC).unwrap_or(rcc::INVALID_REQUEST);
    if code != rcc::SUCCESS {
        return Err(ProtocolError::Request { rcc: code });
    }

    let secret = state
        .secret
        .take()
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_SECRET_CONSUMED.into()))?;
    let client_public = fixed::<32>(reply, vid::PUBLIC_KEY)
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_MISSING_PUBLIC_KEY.into()))?;
    let mut client_nonce = fixed::<HANDSHAKE_NONCE_SIZE>(reply, vid::SESSION_IV)
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_MISSING_NONCE.into()))?;
    let cipher_id = reply
        .get_u16(vid::CIPHER)
        .unwrap_or(cipher::XCHACHA20_POLY1305);

    let shared = secret.diffie_hellman(&PublicKey::from(client_public));
    if !shared.was_contributory() {
        return Err(ProtocolError::Request {
            rcc: rcc::INVALID_PUBLIC_KEY,
        });
    }
    let key = derive_key_from_shared_secret(&shared, &client_nonce, &state.server_nonce);
    client_nonce.zeroize();

    debug!(cipher_id, "Server finalized session key");
    EncryptionContext::new(cipher_id, key)
}
