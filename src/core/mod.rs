//! # Core Protocol Components
//!
//! Message model and the NXCP wire codec.
//!
//! ## Components
//! - **Field**: typed values carried in a message body
//! - **Message**: opcode, request id, flags and an owned body
//! - **Codec**: frame encode/decode plus a Tokio codec for byte streams
//!
//! ## Wire Format
//! ```text
//! [Size(4)] [Opcode(2)] [Flags(2)] [Id(4)] [Count(4)] [Fields(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 4 MiB by default (prevents memory exhaustion)
//! - Declared sizes are validated before any allocation
//! - Decompression output is capped at the frame maximum

pub mod codec;
pub mod field;
pub mod message;
