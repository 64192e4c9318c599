//! # Utility Modules
//!
//! Supporting utilities for cryptography, compression, logging, and timing.
//!
//! ## Components
//! - **Crypto**: XChaCha20-Poly1305 AEAD encryption
//! - **Compression**: LZ4 with a size threshold and a decompression cap
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Default durations and async timeout wrappers
//! - **Metrics**: Per-session observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Decompression bomb protection (capped at the frame maximum)
//! - Memory zeroing for key material (zeroize crate)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
