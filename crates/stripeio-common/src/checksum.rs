//! Checksum utilities for stripeio
//!
//! Blocks carry a CRC32C for cheap verification on read; whole files carry
//! a SHA256 content hash. Both are stored as lowercase hex strings in the
//! metadata record.

use sha2::{Digest, Sha256};

/// CRC32C of a block payload, hex-encoded
#[must_use]
pub fn crc32c_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

/// Verify a block payload against a stored CRC32C hex string
#[must_use]
pub fn verify_crc32c(data: &[u8], expected: &str) -> bool {
    crc32c_hex(data) == expected
}

/// SHA256 of a whole file, hex-encoded
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
