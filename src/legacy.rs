//! Legacy whole-object encryption, format version 2.
//!
//! The selected properties are stripped into a sub-object, the
//! sub-object is serialized and encrypted as one blob, and the blob is
//! carried in the sidecar's `EncryptedData` field. This mode predates
//! per-value encryption: no compression, no streaming, and identical
//! documents produce structurally identical output apart from the AEAD
//! randomization.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::keys::DataEncryptionKey;
use crate::options::{path_name, EncryptionInfo, EncryptionRequest, FORMAT_VERSION_LEGACY};
use crate::pool::BufferPool;
use crate::ENCRYPTION_INFO_KEY;

/// Strip and encrypt the requested properties of `obj`, installing the
/// sidecar. Returns `None` (object untouched) when every requested
/// path was absent or null.
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
    let mut stripped = Map::new();
    let mut encrypted_paths = Vec::new();
    for path in &req.paths_to_encrypt {
        cancel.check()?;
        let name = path_name(path);
        match obj.get(name) {
            None | Some(Value::Null) => {
                debug!(path = %path, "skipping absent or null property");
                continue;
            }
            Some(_) => {}
        }
        let value = obj.shift_remove(name).expect("present property");
        stripped.insert(name.to_string(), value);
        encrypted_paths.push(path.clone());
    }
    if encrypted_paths.is_empty() {
        return Ok(None);
    }

    let plain = serde_json::to_vec(&Value::Object(stripped))?;
    let mut sealed = pool.rent_scoped(key.ciphertext_length(plain.len()));
    sealed.resize(key.ciphertext_length(plain.len()), 0);
    let written = key.encrypt(&plain, sealed.as_mut_slice())?;

    let info = EncryptionInfo {
        format_version: FORMAT_VERSION_LEGACY,
        algorithm: req.algorithm,
        data_encryption_key_id: req.data_encryption_key_id.clone(),
        encrypted_data: Some(sealed[..written].to_vec()),
        encrypted_paths,
        compression_algorithm: Default::default(),
        compressed_encrypted_paths: BTreeMap::new(),
    };
    obj.insert(
        ENCRYPTION_INFO_KEY.to_string(),
        serde_json::to_value(&info)?,
    );
    debug!(paths = info.encrypted_paths.len(), "installed legacy sidecar");
    Ok(Some(info))
}

/// Decrypt a version-2 sidecar, restoring the stripped properties at
/// the end of `obj`. Returns the paths restored, in sidecar order.
pub(crate) fn decrypt_object(
    obj: &mut Map<String, Value>,
    info: &EncryptionInfo,
    key: &dyn DataEncryptionKey,
    pool: &BufferPool,
    cancel: &CancelToken,
) -> Result<Vec<String>> {
    cancel.check()?;
    let sealed = info.encrypted_data.as_ref().ok_or_else(|| {
        Error::FormatViolation("version 2 sidecar carries no EncryptedData".to_string())
    })?;
    let plain_len = key.plaintext_length(sealed.len())?;
    let mut plain = pool.rent_scoped(plain_len);
    plain.resize(plain_len, 0);
    let written = key.decrypt(sealed, plain.as_mut_slice())?;

    let mut stripped: Map<String, Value> = serde_json::from_slice(&plain[..written])
        .map_err(|e| Error::FormatViolation(format!("EncryptedData payload: {}", e)))?;

    let mut decrypted = Vec::new();
    for path in &info.encrypted_paths {
        let name = path_name(path);
        match stripped.shift_remove(name) {
            Some(value) => {
                obj.insert(name.to_string(), value);
                decrypted.push(path.clone());
            }
            None => warn!(path = %path, "sidecar lists a property the blob lacks"),
        }
    }
    // Whatever the blob carries beyond the listed paths is restored
    // too, so no decrypted data is ever dropped.
    for (name, value) in stripped {
        obj.insert(name, value);
    }
    Ok(decrypted)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::keys::Aes256GcmKey;
    use crate::options::EncryptionAlgorithm;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    fn request(paths: &[&str]) -> EncryptionRequest {
        EncryptionRequest::new(
            "k1",
            EncryptionAlgorithm::LegacyAeadCbcHmac,
            paths.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[test]
    fn strip_encrypt_restore() {
        let key = Aes256GcmKey::new(&[3u8; 32]);
        let pool = BufferPool::new();
        let cancel = CancelToken::new();
        let mut obj = object(json!({"id": "1", "s": "secret", "n": [1, 2], "open": true}));

        let info = encrypt_object(&mut obj, &request(&["/s", "/n"]), &key, &pool, &cancel)
            .unwrap()
            .unwrap();
        assert_eq!(info.format_version, 2);
        assert!(info.encrypted_data.is_some());
        assert_eq!(info.encrypted_paths, vec!["/s", "/n"]);
        assert!(!obj.contains_key("s"));
        assert!(!obj.contains_key("n"));
        assert_eq!(obj["open"], json!(true));

        obj.shift_remove(ENCRYPTION_INFO_KEY);
        let decrypted = decrypt_object(&mut obj, &info, &key, &pool, &cancel).unwrap();
        assert_eq!(decrypted, vec!["/s", "/n"]);
        assert_eq!(obj["s"], json!("secret"));
        assert_eq!(obj["n"], json!([1, 2]));
    }

    #[test]
    fn null_and_absent_paths_leave_object_untouched() {
        let key = Aes256GcmKey::new(&[3u8; 32]);
        let pool = BufferPool::new();
        let cancel = CancelToken::new();
        let mut obj = object(json!({"id": "1", "x": null}));
        let before = obj.clone();

        let info =
            encrypt_object(&mut obj, &request(&["/x", "/gone"]), &key, &pool, &cancel).unwrap();
        assert!(info.is_none());
        assert_eq!(obj, before);
    }

    #[test]
    fn missing_encrypted_data_is_a_format_violation() {
        let key = Aes256GcmKey::new(&[3u8; 32]);
        let pool = BufferPool::new();
        let cancel = CancelToken::new();
        let mut obj = object(json!({"id": "1"}));
        let info = EncryptionInfo {
            format_version: 2,
            algorithm: EncryptionAlgorithm::LegacyAeadCbcHmac,
            data_encryption_key_id: "k1".to_string(),
            encrypted_data: None,
            encrypted_paths: vec!["/s".to_string()],
            compression_algorithm: Default::default(),
            compressed_encrypted_paths: BTreeMap::new(),
        };
        assert!(matches!(
            decrypt_object(&mut obj, &info, &key, &pool, &cancel),
            Err(Error::FormatViolation(_))
        ));
    }

    #[test]
    fn tampered_blob_fails_auth() {
        let key = Aes256GcmKey::new(&[3u8; 32]);
        let pool = BufferPool::new();
        let cancel = CancelToken::new();
        let mut obj = object(json!({"id": "1", "s": "secret"}));
        let mut info = encrypt_object(&mut obj, &request(&["/s"]), &key, &pool, &cancel)
            .unwrap()
            .unwrap();
        if let Some(data) = info.encrypted_data.as_mut() {
            *data.last_mut().unwrap() ^= 0xFF;
        }
        obj.shift_remove(ENCRYPTION_INFO_KEY);
        assert!(matches!(
            decrypt_object(&mut obj, &info, &key, &pool, &cancel),
            Err(Error::AuthFailed)
        ));
    }
}
