//! # NXCP
//!
//! Client-side engine for NXCP, the binary session protocol of a network
//! management platform.
//!
//! ## Layers
//! - **core**: `Message` model and the length-prefixed frame codec
//! - **protocol**: codes, signed key exchange, encryption envelope, response correlation
//! - **transport**: TCP connect and full-buffer writes
//! - **session**: handshake, receiver task, keepalive, notifications, file transfer
//! - **config**: TOML/env configuration with validation
//!
//! ```no_run
//! use nxcp::{ConnectOptions, Credentials, NxcpConfig, Session};
//!
//! # async fn run() -> nxcp::Result<()> {
//! let session = Session::new(NxcpConfig::default());
//! session
//!     .connect(ConnectOptions::new(
//!         "nms.example.org",
//!         4701,
//!         "admin",
//!         Credentials::Password("secret".into()),
//!     ))
//!     .await?;
//!
//! let rcc = session.simple_command(nxcp::protocol::codes::cmd::KEEPALIVE).await;
//! assert_eq!(rcc, nxcp::protocol::codes::rcc::SUCCESS);
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;

pub use crate::config::NxcpConfig;
pub use crate::core::field::{Field, FieldValue};
pub use crate::core::message::{Message, MessageFlags};
pub use crate::error::{FrameError, ProtocolError, Result};
pub use crate::session::{
    ConnectFlags, ConnectOptions, Credentials, FileReceiver, Session, SessionEvent, SessionState,
};
