//! # Transport Layer
//!
//! Byte-stream connections the session runs over.
//!
//! ## Components
//! - **TCP**: connect with timeout, full-buffer writes, orderly shutdown

pub mod tcp;
