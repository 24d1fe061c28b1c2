//! Compression of serialized values before encryption.
//!
//! Compression is applied per property, to the canonical typed bytes,
//! and only when the serialized length reaches the configured minimum.
//! A single document uses at most one compression algorithm; the chosen
//! algorithm is recorded in the sidecar. Format when encoded inside an
//! encrypted payload is a single byte (see the frame module).

use std::convert::TryFrom;
use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ALGORITHM_NONE: u8 = 0;
pub const ALGORITHM_DEFLATE: u8 = 1;
pub const ALGORITHM_GZIP: u8 = 2;
pub const ALGORITHM_BROTLI: u8 = 3;

/// Serialized values below this length are left uncompressed unless the
/// request says otherwise.
pub const DEFAULT_MINIMUM_COMPRESSION_SIZE: usize = 128;

/// Compression algorithms supported for encrypted values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Deflate,
    Gzip,
    Brotli,
}

impl From<CompressionAlgorithm> for u8 {
    fn from(val: CompressionAlgorithm) -> u8 {
        match val {
            CompressionAlgorithm::None => ALGORITHM_NONE,
            CompressionAlgorithm::Deflate => ALGORITHM_DEFLATE,
            CompressionAlgorithm::Gzip => ALGORITHM_GZIP,
            CompressionAlgorithm::Brotli => ALGORITHM_BROTLI,
        }
    }
}

impl TryFrom<u8> for CompressionAlgorithm {
    type Error = u8;
    fn try_from(val: u8) -> Result<CompressionAlgorithm, u8> {
        match val {
            ALGORITHM_NONE => Ok(CompressionAlgorithm::None),
            ALGORITHM_DEFLATE => Ok(CompressionAlgorithm::Deflate),
            ALGORITHM_GZIP => Ok(CompressionAlgorithm::Gzip),
            ALGORITHM_BROTLI => Ok(CompressionAlgorithm::Brotli),
            _ => Err(val),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Deflate => write!(f, "deflate"),
            CompressionAlgorithm::Gzip => write!(f, "gzip"),
            CompressionAlgorithm::Brotli => write!(f, "brotli"),
        }
    }
}

/// Effort setting passed to the underlying compressor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Fastest,
    #[default]
    Optimal,
    Smallest,
}

impl CompressionLevel {
    fn flate(self) -> flate2::Compression {
        match self {
            CompressionLevel::Fastest => flate2::Compression::fast(),
            CompressionLevel::Optimal => flate2::Compression::default(),
            CompressionLevel::Smallest => flate2::Compression::best(),
        }
    }

    fn brotli_quality(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Optimal => 6,
            CompressionLevel::Smallest => 11,
        }
    }
}

/// Per-request compression settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressionOptions {
    pub algorithm: CompressionAlgorithm,
    pub level: CompressionLevel,
    /// Values whose serialized length is strictly less than this are
    /// not compressed.
    pub minimum_size: usize,
}

impl CompressionOptions {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            level: CompressionLevel::default(),
            minimum_size: DEFAULT_MINIMUM_COMPRESSION_SIZE,
        }
    }

    /// Whether a serialized value of length `len` should be compressed
    /// under these settings.
    pub(crate) fn applies_to(&self, len: usize) -> bool {
        self.algorithm != CompressionAlgorithm::None && len >= self.minimum_size
    }
}

const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

/// Compress `src`, appending the result to `dest`. Compressor failures
/// on the encrypt path are internal errors.
pub(crate) fn compress(
    algorithm: CompressionAlgorithm,
    level: CompressionLevel,
    src: &[u8],
    dest: &mut Vec<u8>,
) -> Result<()> {
    match algorithm {
        CompressionAlgorithm::None => Err(Error::Internal(
            "compress called with algorithm none".to_string(),
        )),
        CompressionAlgorithm::Deflate => {
            let mut enc = flate2::write::DeflateEncoder::new(&mut *dest, level.flate());
            enc.write_all(src)
                .and_then(|_| enc.finish().map(|_| ()))
                .map_err(|e| Error::Internal(format!("deflate compression failed: {}", e)))
        }
        CompressionAlgorithm::Gzip => {
            let mut enc = flate2::write::GzEncoder::new(&mut *dest, level.flate());
            enc.write_all(src)
                .and_then(|_| enc.finish().map(|_| ()))
                .map_err(|e| Error::Internal(format!("gzip compression failed: {}", e)))
        }
        CompressionAlgorithm::Brotli => {
            let mut enc = brotli::CompressorWriter::new(
                &mut *dest,
                BROTLI_BUFFER,
                level.brotli_quality(),
                BROTLI_WINDOW,
            );
            enc.write_all(src)
                .and_then(|_| enc.flush())
                .map_err(|e| Error::Internal(format!("brotli compression failed: {}", e)))
        }
    }
}

/// Decompress `src`, appending exactly `expected_len` bytes to `dest`.
/// Any other outcome is a format violation: the original length was
/// recorded at encryption time and must be reproduced exactly.
pub(crate) fn decompress(
    algorithm: CompressionAlgorithm,
    src: &[u8],
    expected_len: usize,
    dest: &mut Vec<u8>,
) -> Result<()> {
    let start = dest.len();
    let read = match algorithm {
        CompressionAlgorithm::None => {
            return Err(Error::FormatViolation(
                "compressed payload declares algorithm none".to_string(),
            ))
        }
        CompressionAlgorithm::Deflate => flate2::read::DeflateDecoder::new(src)
            .take(expected_len as u64 + 1)
            .read_to_end(dest),
        CompressionAlgorithm::Gzip => flate2::read::GzDecoder::new(src)
            .take(expected_len as u64 + 1)
            .read_to_end(dest),
        CompressionAlgorithm::Brotli => brotli::Decompressor::new(src, BROTLI_BUFFER)
            .take(expected_len as u64 + 1)
            .read_to_end(dest),
    };
    let written = read.map_err(|e| Error::FormatViolation(format!("decompression failed: {}", e)))?;
    if written != expected_len {
        dest.truncate(start);
        return Err(Error::FormatViolation(format!(
            "decompressed length {} does not match recorded original length {}",
            written, expected_len
        )));
    }
    Ok(())
}
