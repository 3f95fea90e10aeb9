//! Gzip payload compression.
//!
//! The server may gzip handshake payloads and message payloads. Compressed
//! data is recognized by the gzip magic bytes and inflated transparently.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip magic header bytes.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check whether `data` starts with the gzip magic bytes.
#[inline]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= GZIP_MAGIC.len() && data[..2] == GZIP_MAGIC
}

/// Inflate gzip-compressed data.
pub fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Gzip-compress data with the default compression level.
pub fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 32),
        Compression::default(),
    );
    encoder.write_all(data)?;
    encoder.finish()
}
