//! The codec: request validation, algorithm and format-version
//! dispatch, and the public encrypt/decrypt entry points.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::keys::KeyProvider;
use crate::options::{
    DecryptionReport, EncryptionAlgorithm, EncryptionInfo, EncryptionRequest,
    FORMAT_VERSION_COMPRESSED, FORMAT_VERSION_LEGACY, FORMAT_VERSION_RANDOMIZED,
};
use crate::pool::BufferPool;
use crate::{legacy, stream, tree, ENCRYPTION_INFO_KEY};

/// Field-level encryption codec for JSON documents.
///
/// The codec holds no per-call state: the key provider and buffer pool
/// are shared across calls and safe for concurrent use, so one codec
/// instance serves a whole process.
pub struct FieldCodec {
    provider: Arc<dyn KeyProvider>,
    pool: Arc<BufferPool>,
}

impl FieldCodec {
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self::with_pool(provider, Arc::new(BufferPool::new()))
    }

    pub fn with_pool(provider: Arc<dyn KeyProvider>, pool: Arc<BufferPool>) -> Self {
        Self { provider, pool }
    }

    /// Encrypt the requested properties of a serialized JSON document.
    ///
    /// With an empty `paths_to_encrypt` the input is returned bitwise
    /// unchanged. The randomized algorithm rewrites the document by
    /// streaming; the legacy algorithm parses it into a tree.
    pub fn encrypt(&self, input: &[u8], req: &EncryptionRequest) -> Result<Vec<u8>> {
        self.encrypt_with_cancel(input, req, &CancelToken::new())
    }

    pub fn encrypt_with_cancel(
        &self,
        input: &[u8],
        req: &EncryptionRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        req.validate()?;
        if req.paths_to_encrypt.is_empty() {
            debug!("no paths to encrypt, input returned unchanged");
            return Ok(input.to_vec());
        }
        cancel.check()?;
        let key = self
            .provider
            .get_key(&req.data_encryption_key_id, req.algorithm)?;
        debug!(algorithm = %req.algorithm, paths = req.paths_to_encrypt.len(), "encrypting");
        match req.algorithm {
            EncryptionAlgorithm::RandomizedAeadCbcHmac => {
                stream::encrypt_stream(input, req, key.as_ref(), &self.pool, cancel)
            }
            // Legacy whole-object mode never streams.
            EncryptionAlgorithm::LegacyAeadCbcHmac => {
                let mut obj = parse_object(input)?;
                legacy::encrypt_object(&mut obj, req, key.as_ref(), &self.pool, cancel)?;
                serde_json::to_vec(&Value::Object(obj)).map_err(Error::from)
            }
        }
    }

    /// Encrypt over an already-parsed document.
    pub fn encrypt_tree(
        &self,
        obj: Map<String, Value>,
        req: &EncryptionRequest,
    ) -> Result<Map<String, Value>> {
        self.encrypt_tree_with_cancel(obj, req, &CancelToken::new())
    }

    pub fn encrypt_tree_with_cancel(
        &self,
        mut obj: Map<String, Value>,
        req: &EncryptionRequest,
        cancel: &CancelToken,
    ) -> Result<Map<String, Value>> {
        req.validate()?;
        if req.paths_to_encrypt.is_empty() {
            return Ok(obj);
        }
        cancel.check()?;
        let key = self
            .provider
            .get_key(&req.data_encryption_key_id, req.algorithm)?;
        match req.algorithm {
            EncryptionAlgorithm::RandomizedAeadCbcHmac => {
                tree::encrypt_object(&mut obj, req, key.as_ref(), &self.pool, cancel)?;
            }
            EncryptionAlgorithm::LegacyAeadCbcHmac => {
                legacy::encrypt_object(&mut obj, req, key.as_ref(), &self.pool, cancel)?;
            }
        }
        Ok(obj)
    }

    /// Decrypt a serialized document. A document without a sidecar is
    /// returned unchanged with no report.
    pub fn decrypt(&self, input: &[u8]) -> Result<(Vec<u8>, Option<DecryptionReport>)> {
        self.decrypt_with_cancel(input, &CancelToken::new())
    }

    pub fn decrypt_with_cancel(
        &self,
        input: &[u8],
        cancel: &CancelToken,
    ) -> Result<(Vec<u8>, Option<DecryptionReport>)> {
        let info = match stream::find_sidecar(input)? {
            Some(info) => info,
            None => {
                debug!("document carries no sidecar, input returned unchanged");
                return Ok((input.to_vec(), None));
            }
        };
        cancel.check()?;
        debug!(version = info.format_version, "decrypting");
        match info.format_version {
            FORMAT_VERSION_LEGACY => {
                let key = self
                    .provider
                    .get_key(&info.data_encryption_key_id, info.algorithm)?;
                let mut obj = parse_object(input)?;
                obj.shift_remove(ENCRYPTION_INFO_KEY);
                let paths =
                    legacy::decrypt_object(&mut obj, &info, key.as_ref(), &self.pool, cancel)?;
                let out = serde_json::to_vec(&Value::Object(obj))?;
                Ok((out, Some(report(paths, info))))
            }
            FORMAT_VERSION_RANDOMIZED | FORMAT_VERSION_COMPRESSED => {
                let key = self
                    .provider
                    .get_key(&info.data_encryption_key_id, info.algorithm)?;
                let (out, paths) =
                    stream::decrypt_stream(input, &info, key.as_ref(), &self.pool, cancel)?;
                Ok((out, Some(report(paths, info))))
            }
            version => Err(Error::UnsupportedFormatVersion(version)),
        }
    }

    /// Decrypt over an already-parsed document.
    pub fn decrypt_tree(
        &self,
        obj: Map<String, Value>,
    ) -> Result<(Map<String, Value>, Option<DecryptionReport>)> {
        self.decrypt_tree_with_cancel(obj, &CancelToken::new())
    }

    pub fn decrypt_tree_with_cancel(
        &self,
        mut obj: Map<String, Value>,
        cancel: &CancelToken,
    ) -> Result<(Map<String, Value>, Option<DecryptionReport>)> {
        let info_value = match obj.shift_remove(ENCRYPTION_INFO_KEY) {
            Some(value) => value,
            None => return Ok((obj, None)),
        };
        let info = EncryptionInfo::from_value(info_value)?;
        cancel.check()?;
        let paths = match info.format_version {
            FORMAT_VERSION_LEGACY => {
                let key = self
                    .provider
                    .get_key(&info.data_encryption_key_id, info.algorithm)?;
                legacy::decrypt_object(&mut obj, &info, key.as_ref(), &self.pool, cancel)?
            }
            FORMAT_VERSION_RANDOMIZED | FORMAT_VERSION_COMPRESSED => {
                let key = self
                    .provider
                    .get_key(&info.data_encryption_key_id, info.algorithm)?;
                tree::decrypt_object(&mut obj, &info, key.as_ref(), &self.pool, cancel)?
            }
            version => return Err(Error::UnsupportedFormatVersion(version)),
        };
        Ok((obj, Some(report(paths, info))))
    }
}

fn report(paths: Vec<String>, info: EncryptionInfo) -> DecryptionReport {
    DecryptionReport {
        paths_decrypted: paths,
        key_id: info.data_encryption_key_id,
    }
}

fn parse_object(input: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice(input)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::FormatViolation(
            "document root must be a JSON object".to_string(),
        )),
    }
}
