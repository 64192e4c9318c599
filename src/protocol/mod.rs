//! # Protocol Layer
//!
//! Vocabulary, key exchange, encryption envelope and response correlation.
//!
//! ## Components
//! - **Codes**: opcodes, field ids and result codes the engine speaks
//! - **Handshake**: X25519 session key negotiation carried in NXCP messages
//! - **Encryption**: per-connection envelope around plain frames
//! - **Dispatcher**: opcode route table used by the receiver
//! - **Wait Queue**: matches replies to waiting callers by (opcode, id)

pub mod codes;
pub mod dispatcher;
pub mod encryption;
pub mod handshake;
pub mod wait_queue;

#[cfg(test)]
mod tests;
