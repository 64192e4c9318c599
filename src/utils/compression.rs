//! LZ4 body compression.
//!
//! Compressed bodies use the `lz4_flex` size-prepended block format. The
//! 4-byte little-endian prefix is checked against the caller's limit before
//! anything is allocated.

use crate::error::{ProtocolError, Result};

/// Bodies at or below this size are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 128;

/// Entropy (bits per byte) above which a large body is not worth compressing.
const MAX_ENTROPY: f64 = 7.0;

/// Shannon entropy of `data` in bits per byte.
fn entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / len;
            -p * p.log2()
        })
        .sum()
}

/// Compresses `data` into a size-prepended LZ4 block.
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Inflates a size-prepended LZ4 block, refusing output larger than `limit`.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if the block is malformed or
/// claims more than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(ProtocolError::DecompressionFailure);
    }

    let claimed = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if claimed > limit {
        return Err(ProtocolError::DecompressionFailure);
    }

    let out = lz4_flex::decompress_size_prepended(data)
        .map_err(|_| ProtocolError::DecompressionFailure)?;

    if out.len() != claimed {
        return Err(ProtocolError::DecompressionFailure);
    }
    Ok(out)
}

/// Compresses `data` when it exceeds [`COMPRESSION_THRESHOLD`] and the result
/// is strictly smaller. Returns `None` when the body should go out as is.
pub fn maybe_compress(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() <= COMPRESSION_THRESHOLD {
        return None;
    }

    // Sampling keeps the check cheap on large bodies.
    if data.len() >= 1024 && entropy(&data[..512]) > MAX_ENTROPY {
        return None;
    }

    let compressed = compress(data);
    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_roundtrip() {
        let original = b"status status status status status status status status".repeat(4);
        let compressed = compress(&original);
        let restored = decompress(&compressed, 1 << 20).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_claimed_size_over_limit_is_rejected() {
        // Claims roughly 3 GB of output
        let malicious = vec![0x2b, 0x60, 0xbb, 0xbb, 0x00];
        assert!(decompress(&malicious, 4 * 1024 * 1024).is_err());

        let compressed = compress(&[7u8; 4096]);
        assert!(decompress(&compressed, 4095).is_err());
        assert!(decompress(&compressed, 4096).is_ok());
    }

    #[test]
    fn test_short_and_malformed_input() {
        assert!(decompress(&[0x10, 0x00], 1024).is_err());
        assert!(decompress(&[0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff], 1024).is_err());
    }

    #[test]
    fn test_threshold() {
        assert!(maybe_compress(&[0u8; COMPRESSION_THRESHOLD]).is_none());
        let big = vec![0u8; COMPRESSION_THRESHOLD + 1];
        let out = maybe_compress(&big).unwrap();
        assert!(out.len() < big.len());
    }

    #[test]
    fn test_high_entropy_is_skipped() {
        let mut state = 0x1234_5678u32;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        assert!(entropy(&noise[..512]) > 7.0);
        assert!(maybe_compress(&noise).is_none());
    }

    #[test]
    fn test_entropy_bounds() {
        assert!(entropy(&[0u8; 100]) < 0.1);
        let spread: Vec<u8> = (0..=255).collect();
        assert!((entropy(&spread) - 8.0).abs() < 1e-9);
    }
}
