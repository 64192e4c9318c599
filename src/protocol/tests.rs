// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::core::codec::{decode, encode, FrameHeader};
use crate::core::message::{Message, MessageFlags};
use crate::protocol::codes::{cmd, rcc, vid};
use crate::protocol::encryption::is_envelope;
use crate::protocol::handshake::*;

fn identity() -> (ServerIdentity, [u8; SERVER_KEY_SIZE]) {
    let identity = ServerIdentity::generate().unwrap();
    let key = identity.public_key();
    (identity, key)
}

#[test]
fn test_key_exchange_over_the_wire() {
    let (identity, key) = identity();

    // =================== Step 1: Client requests encryption ===================
    let request = decode(&encode(&Message::new(cmd::REQUEST_ENCRYPTION, 3))).unwrap();

    // =================== Step 2: Server offers its key ===================
    let (server_state, offer) = server_session_key_request(request.id(), &identity);
    let offer_wire = encode(&offer);
    assert!(FrameHeader::parse(&offer_wire)
        .unwrap()
        .flags
        .contains(MessageFlags::DONT_ENCRYPT));
    let offer = decode(&offer_wire).expect("offer should decode");

    // =================== Step 3: Client answers ===================
    let SessionKeyReply { context, reply } = client_session_key_reply(&offer, Some(&key));
    let client_ctx = context.expect("client should install a context");
    let reply = decode(&encode(&reply)).unwrap();
    assert_eq!(reply.id(), 3);

    // =================== Step 4: Server finalizes and completes ===================
    let server_ctx = server_finalize_session_key(server_state, &reply).unwrap();
    let completion = Message::new(cmd::REQUEST_COMPLETED, 3).with(vid::RCC, rcc::SUCCESS);
    let envelope = server_ctx.encrypt(&encode(&completion)).unwrap();
    assert!(is_envelope(&envelope));

    let plain = client_ctx.decrypt(&envelope).unwrap();
    assert_eq!(decode(&plain).unwrap(), completion);
}

#[test]
fn test_tampering_detection() {
    let (identity, key) = identity();
    let (server_state, offer) = server_session_key_request(1, &identity);
    let SessionKeyReply { context, mut reply } = client_session_key_reply(&offer, Some(&key));
    let client_ctx = context.unwrap();

    // Replace the client's nonce in transit: the server ends up with a different key.
    reply.set(vid::SESSION_IV, vec![0xEEu8; HANDSHAKE_NONCE_SIZE]);
    let server_ctx = server_finalize_session_key(server_state, &reply).unwrap();

    let envelope = client_ctx
        .encrypt(&encode(&Message::new(cmd::LOGIN, 2)))
        .unwrap();
    assert!(server_ctx.decrypt(&envelope).is_err());
}

#[test]
fn test_signature_survives_the_wire() {
    let (identity, key) = identity();
    let (_state, offer) = server_session_key_request(9, &identity);
    let offer = decode(&encode(&offer)).unwrap();
    assert!(client_session_key_reply(&offer, Some(&key)).context.is_some());

    // Flipping one bit of the nonce in transit invalidates the offer.
    let mut nonce = offer.get_binary(vid::SESSION_IV).unwrap().to_vec();
    nonce[0] ^= 1;
    let mut forged = offer.clone();
    forged.set(vid::SESSION_IV, nonce);
    let out = client_session_key_reply(&forged, Some(&key));
    assert!(out.context.is_none());
    assert_eq!(out.reply.get_u32(vid::RCC), Some(rcc::INVALID_PUBLIC_KEY));
}

#[test]
fn test_reply_without_key_material_is_rejected() {
    let (identity, _) = identity();
    let (server_state, _offer) = server_session_key_request(1, &identity);
    let reply = Message::new(cmd::SESSION_KEY, 1).with(vid::RCC, rcc::SUCCESS);
    let err = server_finalize_session_key(server_state, &reply).unwrap_err();
    assert!(matches!(err, crate::error::ProtocolError::HandshakeError(_)));
}
