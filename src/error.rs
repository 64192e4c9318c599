//! # Error Types
//!
//! Error handling for the NXCP engine.
//!
//! ## Error Categories
//! - **Transport**: connect failures, socket errors, idle timeouts. Terminal for the session.
//! - **Framing**: bad declared size, truncated frames or field tables. Terminal for the
//!   connection because the byte stream cannot be resynchronized.
//! - **Decryption**: a single envelope failed to authenticate. Non-fatal per frame.
//! - **Protocol/version**: detected during the handshake only.
//! - **Timeout**: purely local, never retried by the engine.
//!
//! Every error maps to a small stable result code through [`ProtocolError::rcc`],
//! which is what higher layers present to users.
//!
//! ## Example Usage
//! ```rust
//! use nxcp::error::{ProtocolError, Result};
//! use nxcp::protocol::codes::rcc;
//!
//! fn check(code: u32) -> Result<()> {
//!     if code == rcc::SUCCESS {
//!         Ok(())
//!     } else {
//!         Err(ProtocolError::Request { rcc: code })
//!     }
//! }
//!
//! assert_eq!(check(rcc::ACCESS_DENIED).unwrap_err().rcc(), rcc::ACCESS_DENIED);
//! ```

use crate::protocol::codes::rcc;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Wait queue and session errors
    pub const ERR_ALREADY_CONNECTED: &str = "Session has already been used for a connection";

    /// Handshake errors
    pub const ERR_MISSING_PUBLIC_KEY: &str = "Session key request carries no public key";
    pub const ERR_MISSING_NONCE: &str = "Session key message carries no nonce";
    pub const ERR_SECRET_CONSUMED: &str = "Ephemeral secret already consumed";
    pub const ERR_NO_CHALLENGE: &str = "Server did not provide a login challenge";
    pub const ERR_CONTEXT_EXISTS: &str = "Encryption context already established";
    pub const ERR_NO_SERVER_KEY: &str = "Encryption requested without a pinned server key";
    pub const ERR_BAD_KEY_SIGNATURE: &str = "Key offer not signed by the pinned server key";
    pub const ERR_IDENTITY_KEY: &str = "Server identity key could not be created";

    /// File transfer errors
    pub const ERR_TRANSFER_IN_PROGRESS: &str = "File transfer already prepared for this id";

    /// Callback errors
    pub const ERR_NOTIFICATION_PANIC: &str = "Notification handler panicked";
    pub const ERR_EVENT_HANDLER_PANIC: &str = "Connection event handler panicked";

    /// Configuration errors
    pub const ERR_INVALID_ADDRESS: &str = "Invalid server address";
}

/// Reasons a frame cannot be decoded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too small: {0} bytes")]
    FrameTooSmall(usize),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Frame truncated: declared {declared} bytes, {available} available")]
    FrameTruncated { declared: usize, available: usize },

    #[error("Field table truncated at offset {0}")]
    FieldTableTruncated(usize),

    #[error("Unknown field type {type_tag} at offset {offset}")]
    UnknownFieldType { type_tag: u8, offset: usize },

    #[error("Compressed payload could not be inflated")]
    Decompression,
}

/// ProtocolError is the primary error type for all engine operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Connection broken")]
    ConnectionBroken,

    #[error("Connection timed out (no activity)")]
    IdleTimeout,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Server protocol version {server} is not supported (expected {expected})")]
    BadProtocol { server: u32, expected: u32 },

    #[error("Server version {server} does not match client version {client}")]
    VersionMismatch { server: String, client: String },

    #[error("Request failed with result code {rcc}")]
    Request { rcc: u32 },

    #[error("Operation timed out")]
    Timeout,

    #[error("Out of state request: {0}")]
    OutOfState(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Callback failed: {0}")]
    CallbackPanic(&'static str),
}

impl ProtocolError {
    /// Stable result code for this error.
    pub fn rcc(&self) -> u32 {
        match self {
            ProtocolError::Io(_)
            | ProtocolError::ConnectTimeout
            | ProtocolError::ConnectionBroken
            | ProtocolError::IdleTimeout
            | ProtocolError::Frame(_) => rcc::COMM_FAILURE,
            ProtocolError::DecryptionFailure
            | ProtocolError::EncryptionFailure
            | ProtocolError::HandshakeError(_) => rcc::ENCRYPTION_ERROR,
            ProtocolError::DecompressionFailure | ProtocolError::CallbackPanic(_) => {
                rcc::INTERNAL_ERROR
            }
            ProtocolError::BadProtocol { .. } => rcc::BAD_PROTOCOL,
            ProtocolError::VersionMismatch { .. } => rcc::VERSION_MISMATCH,
            ProtocolError::Request { rcc } => *rcc,
            ProtocolError::Timeout => rcc::TIMEOUT,
            ProtocolError::OutOfState(_) => rcc::OUT_OF_STATE_REQUEST,
            ProtocolError::ConfigError(_) => rcc::INVALID_ARGUMENT,
        }
    }

    /// True for errors that mean the connection itself is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ConnectTimeout
                | ProtocolError::ConnectionBroken
                | ProtocolError::IdleTimeout
                | ProtocolError::Frame(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
