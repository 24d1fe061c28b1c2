//! Tree processor: encrypt and decrypt over a parsed JSON object.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::keys::DataEncryptionKey;
use crate::options::{path_name, EncryptionInfo, EncryptionRequest};
use crate::options::{FORMAT_VERSION_COMPRESSED, FORMAT_VERSION_RANDOMIZED};
use crate::pipeline::{PropertyDecryptor, PropertyEncryptor};
use crate::pool::BufferPool;
use crate::ENCRYPTION_INFO_KEY;

/// Encrypt the requested properties of `obj` in place and install the
/// sidecar. Returns the sidecar, or `None` when every requested path
/// was absent or null (the object is then left untouched).
pub(crate) fn encrypt_object(
    obj: &mut Map<String, Value>,
    req: &EncryptionRequest,
    key: &dyn DataEncryptionKey,
    pool: &BufferPool,
    cancel: &CancelToken,
) -> Result<Option<EncryptionInfo>> {
    if obj.contains_key(ENCRYPTION_INFO_KEY) {
        return Err(Error::FormatViolation(format!(
            "document already carries {}",
            ENCRYPTION_INFO_KEY
        )));
    }
    let encryptor = PropertyEncryptor {
        key,
        compression: req.compression.as_ref(),
        pool,
    };
    let mut encrypted_paths = Vec::new();
    let mut compressed_paths = BTreeMap::new();
    let mut framed = pool.rent_scoped(0);
    for path in &req.paths_to_encrypt {
        cancel.check()?;
        let name = path_name(path);
        let value = match obj.get(name) {
            None | Some(Value::Null) => {
                debug!(path = %path, "skipping absent or null property");
                continue;
            }
            Some(value) => value,
        };
        let original_len = encryptor.encrypt_value(value, &mut framed)?;
        obj.insert(name.to_string(), Value::String(STANDARD.encode(&*framed)));
        encrypted_paths.push(path.clone());
        if let Some(len) = original_len {
            compressed_paths.insert(path.clone(), len);
        }
    }
    if encrypted_paths.is_empty() {
        return Ok(None);
    }

    let info = EncryptionInfo {
        format_version: if compressed_paths.is_empty() {
            FORMAT_VERSION_RANDOMIZED
        } else {
            FORMAT_VERSION_COMPRESSED
        },
        algorithm: req.algorithm,
        data_encryption_key_id: req.data_encryption_key_id.clone(),
        encrypted_data: None,
        encrypted_paths,
        compression_algorithm: req
            .compression
            .as_ref()
            .map(|c| c.algorithm)
            .unwrap_or_default(),
        compressed_encrypted_paths: compressed_paths,
    };
    obj.insert(
        ENCRYPTION_INFO_KEY.to_string(),
        serde_json::to_value(&info)?,
    );
    debug!(
        paths = info.encrypted_paths.len(),
        version = info.format_version,
        "installed sidecar"
    );
    Ok(Some(info))
}

/// Decrypt the properties the sidecar lists, in sidecar order. The
/// sidecar has already been removed from `obj` by the caller.
pub(crate) fn decrypt_object(
    obj: &mut Map<String, Value>,
    info: &EncryptionInfo,
    key: &dyn DataEncryptionKey,
    pool: &BufferPool,
    cancel: &CancelToken,
) -> Result<Vec<String>> {
    let decryptor = PropertyDecryptor { key, info, pool };
    let mut decrypted = Vec::new();
    for path in &info.encrypted_paths {
        cancel.check()?;
        let name = path_name(path);
        let encoded = match obj.get(name) {
            None => {
                warn!(path = %path, "sidecar lists a property the document lacks");
                continue;
            }
            Some(Value::String(encoded)) => encoded,
            Some(_) => {
                warn!(path = %path, "sidecar lists a property that is not a string");
                continue;
            }
        };
        let framed = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            Error::FormatViolation(format!("{}: invalid base64 ciphertext: {}", path, e))
        })?;
        let value = decryptor.decrypt_value(path, &framed)?;
        obj.insert(name.to_string(), value);
        decrypted.push(path.clone());
    }
    Ok(decrypted)
}
