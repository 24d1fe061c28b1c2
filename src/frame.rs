//! Per-value frame layout.
//!
//! This module owns every byte-offset constant of the encrypted value
//! format. No other module reads or writes framing bytes directly.

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};

use crate::compress::CompressionAlgorithm;
use crate::error::{Error, Result};
use crate::marker::TypeMarker;

// Frame format, as stored (base64) in the output document:
//  1. Type marker byte
//  2. Ciphertext
//
// When the marker is Compressed, the decrypted plaintext is itself
// framed:
//  1. Compression algorithm byte
//  2. 4-byte big-endian original (pre-compression) length
//  3. Inner type marker byte
//  4. Compressed bytes

/// Bytes the outer frame adds ahead of the ciphertext.
pub(crate) const FRAME_HEADER_LEN: usize = 1;

/// Bytes the compressed-payload header adds ahead of the compressed
/// data.
pub(crate) const COMPRESSED_HEADER_LEN: usize = 6;

const ORIGINAL_LEN_OFFSET: usize = 1;
const INNER_MARKER_OFFSET: usize = 5;

/// An encrypted value split into marker and ciphertext.
pub(crate) struct Frame<'a> {
    pub marker: TypeMarker,
    pub ciphertext: &'a [u8],
}

impl<'a> Frame<'a> {
    pub(crate) fn split(buf: &'a [u8]) -> Result<Frame<'a>> {
        let (&marker_raw, ciphertext) = buf.split_first().ok_or(Error::LengthTooShort {
            step: "get type marker",
            actual: 0,
            expected: FRAME_HEADER_LEN,
        })?;
        let marker = TypeMarker::from_u8(marker_raw)
            .ok_or_else(|| Error::FormatViolation(format!("unknown type marker {}", marker_raw)))?;
        Ok(Self { marker, ciphertext })
    }
}

/// Start a frame: the marker byte goes first, the ciphertext is written
/// directly behind it by the crypto adapter.
pub(crate) fn write_marker(buf: &mut Vec<u8>, marker: TypeMarker) {
    buf.push(marker.into());
}

/// The decrypted plaintext of a `Compressed` value, split into its
/// header fields and the compressed bytes.
pub(crate) struct CompressedPayload<'a> {
    pub algorithm: CompressionAlgorithm,
    pub original_len: usize,
    pub inner_marker: TypeMarker,
    pub data: &'a [u8],
}

impl<'a> CompressedPayload<'a> {
    pub(crate) fn split(buf: &'a [u8]) -> Result<CompressedPayload<'a>> {
        if buf.len() < COMPRESSED_HEADER_LEN {
            return Err(Error::LengthTooShort {
                step: "get compressed header",
                actual: buf.len(),
                expected: COMPRESSED_HEADER_LEN,
            });
        }
        let algorithm = CompressionAlgorithm::try_from(buf[0])
            .map_err(|b| Error::FormatViolation(format!("unknown compression algorithm {}", b)))?;
        let original_len = BigEndian::read_u32(&buf[ORIGINAL_LEN_OFFSET..]) as usize;
        let inner_raw = buf[INNER_MARKER_OFFSET];
        let inner_marker = TypeMarker::from_u8(inner_raw).ok_or_else(|| {
            Error::FormatViolation(format!("unknown inner type marker {}", inner_raw))
        })?;
        Ok(Self {
            algorithm,
            original_len,
            inner_marker,
            data: &buf[COMPRESSED_HEADER_LEN..],
        })
    }
}

/// Write the compressed-payload header; the compressed bytes follow
/// directly behind it.
pub(crate) fn write_compressed_header(
    buf: &mut Vec<u8>,
    algorithm: CompressionAlgorithm,
    original_len: usize,
    inner_marker: TypeMarker,
) -> Result<()> {
    let original_len = u32::try_from(original_len).map_err(|_| {
        Error::Internal(format!(
            "serialized value of {} bytes exceeds the 4-byte length field",
            original_len
        ))
    })?;
    buf.push(algorithm.into());
    buf.extend_from_slice(&original_len.to_be_bytes());
    buf.push(inner_marker.into());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_split() {
        let buf = [TypeMarker::String.into_u8(), 0xAA, 0xBB];
        let frame = Frame::split(&buf).unwrap();
        assert_eq!(frame.marker, TypeMarker::String);
        assert_eq!(frame.ciphertext, &[0xAA, 0xBB]);
    }

    #[test]
    fn frame_split_empty() {
        assert!(matches!(
            Frame::split(&[]),
            Err(Error::LengthTooShort { .. })
        ));
    }

    #[test]
    fn frame_split_unknown_marker() {
        assert!(matches!(
            Frame::split(&[0x7F, 1, 2]),
            Err(Error::FormatViolation(_))
        ));
    }

    #[test]
    fn compressed_header_round_trip() {
        let mut buf = Vec::new();
        write_compressed_header(
            &mut buf,
            CompressionAlgorithm::Brotli,
            0x0102_0304,
            TypeMarker::Object,
        )
        .unwrap();
        buf.extend_from_slice(&[9, 9, 9]);
        assert_eq!(buf.len(), COMPRESSED_HEADER_LEN + 3);

        let payload = CompressedPayload::split(&buf).unwrap();
        assert_eq!(payload.algorithm, CompressionAlgorithm::Brotli);
        assert_eq!(payload.original_len, 0x0102_0304);
        assert_eq!(payload.inner_marker, TypeMarker::Object);
        assert_eq!(payload.data, &[9, 9, 9]);
    }

    #[test]
    fn compressed_header_too_short() {
        assert!(matches!(
            CompressedPayload::split(&[1, 0, 0]),
            Err(Error::LengthTooShort { .. })
        ));
    }

    #[test]
    fn compressed_header_bad_algorithm() {
        let buf = [42u8, 0, 0, 0, 1, TypeMarker::Long.into_u8()];
        assert!(matches!(
            CompressedPayload::split(&buf),
            Err(Error::FormatViolation(_))
        ));
    }
}
