//! The per-value pipeline shared by the tree and stream processors.
//!
//! Encrypt direction: canonical typed bytes → optional compression
//! (with the secondary header) → AEAD seal behind the outer type
//! marker. Decrypt direction is the exact inverse, with the sidecar's
//! compression claims validated against the header bytes.

use serde_json::Value;

use crate::compress::{self, CompressionOptions};
use crate::error::{Error, Result};
use crate::frame::{self, CompressedPayload, Frame};
use crate::keys::DataEncryptionKey;
use crate::marker::TypeMarker;
use crate::options::EncryptionInfo;
use crate::pool::BufferPool;
use crate::typed;

pub(crate) struct PropertyEncryptor<'a> {
    pub key: &'a dyn DataEncryptionKey,
    pub compression: Option<&'a CompressionOptions>,
    pub pool: &'a BufferPool,
}

impl PropertyEncryptor<'_> {
    /// Run one value through the encrypt pipeline, leaving the framed
    /// bytes in `out`. Returns the pre-compression length when the
    /// value was compressed.
    pub(crate) fn encrypt_value(&self, value: &Value, out: &mut Vec<u8>) -> Result<Option<usize>> {
        let (marker, plain) = typed::serialize_value(value)?;
        match self.compression.filter(|c| c.applies_to(plain.len())) {
            Some(opts) => {
                let mut payload = self
                    .pool
                    .rent_scoped(frame::COMPRESSED_HEADER_LEN + plain.len());
                frame::write_compressed_header(&mut payload, opts.algorithm, plain.len(), marker)?;
                compress::compress(opts.algorithm, opts.level, &plain, &mut payload)?;
                self.seal(TypeMarker::Compressed, &payload, out)?;
                Ok(Some(plain.len()))
            }
            None => {
                self.seal(marker, &plain, out)?;
                Ok(None)
            }
        }
    }

    fn seal(&self, marker: TypeMarker, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        frame::write_marker(out, marker);
        let ciphertext_len = self.key.ciphertext_length(payload.len());
        out.resize(frame::FRAME_HEADER_LEN + ciphertext_len, 0);
        let written = self
            .key
            .encrypt(payload, &mut out[frame::FRAME_HEADER_LEN..])?;
        out.truncate(frame::FRAME_HEADER_LEN + written);
        Ok(())
    }
}

pub(crate) struct PropertyDecryptor<'a> {
    pub key: &'a dyn DataEncryptionKey,
    pub info: &'a EncryptionInfo,
    pub pool: &'a BufferPool,
}

impl PropertyDecryptor<'_> {
    /// Invert the encrypt pipeline for one framed value.
    pub(crate) fn decrypt_value(&self, path: &str, framed: &[u8]) -> Result<Value> {
        let frame = Frame::split(framed)?;
        let declared = self.info.compressed_encrypted_paths.get(path).copied();
        let is_compressed = frame.marker == TypeMarker::Compressed;
        if declared.is_some() != is_compressed {
            return Err(Error::CompressionMismatch(if is_compressed {
                format!(
                    "{} carries a Compressed marker but is not listed in CompressedEncryptedPaths",
                    path
                )
            } else {
                format!(
                    "{} is listed in CompressedEncryptedPaths but carries marker {}",
                    path,
                    frame.marker.name()
                )
            }));
        }

        let plain_len = self.key.plaintext_length(frame.ciphertext.len())?;
        let mut plain = self.pool.rent_scoped(plain_len);
        plain.resize(plain_len, 0);
        let written = self.key.decrypt(frame.ciphertext, plain.as_mut_slice())?;
        let plain = &plain[..written];

        if !is_compressed {
            return typed::deserialize_value(frame.marker, plain);
        }

        let payload = CompressedPayload::split(plain)?;
        if payload.algorithm != self.info.compression_algorithm {
            return Err(Error::CompressionMismatch(format!(
                "{} was compressed with {} but the sidecar records {}",
                path, payload.algorithm, self.info.compression_algorithm
            )));
        }
        if let Some(declared_len) = declared {
            if declared_len != payload.original_len {
                return Err(Error::FormatViolation(format!(
                    "{}: header original length {} disagrees with the sidecar's {}",
                    path, payload.original_len, declared_len
                )));
            }
        }
        let mut raw = self.pool.rent_scoped(payload.original_len);
        compress::decompress(payload.algorithm, payload.data, payload.original_len, &mut raw)?;
        typed::deserialize_value(payload.inner_marker, &raw)
    }
}
