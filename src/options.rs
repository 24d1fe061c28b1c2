//! Encryption request parameters and the sidecar metadata object.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compress::{CompressionAlgorithm, CompressionOptions};
use crate::error::{Error, Result};
use crate::{ENCRYPTION_INFO_KEY, RESERVED_ID_PATH};

/// Format version for legacy whole-object encryption.
pub(crate) const FORMAT_VERSION_LEGACY: u8 = 2;
/// Format version for per-value encryption without compression.
pub(crate) const FORMAT_VERSION_RANDOMIZED: u8 = 3;
/// Format version for per-value encryption where at least one property
/// was compressed.
pub(crate) const FORMAT_VERSION_COMPRESSED: u8 = 4;

/// Encryption algorithms a request may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// Whole-object mode: the selected properties are stripped into a
    /// sub-object, serialized, and encrypted as one blob held in the
    /// sidecar. No per-field encryption, no compression, no streaming.
    #[serde(rename = "legacy_aead_cbc_hmac")]
    LegacyAeadCbcHmac,
    /// Per-value mode producing distinct ciphertexts for identical
    /// plaintexts across invocations. The only algorithm that supports
    /// compression and stream processing.
    #[serde(rename = "randomized_aead_cbc_hmac")]
    RandomizedAeadCbcHmac,
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EncryptionAlgorithm::LegacyAeadCbcHmac => write!(f, "legacy_aead_cbc_hmac"),
            EncryptionAlgorithm::RandomizedAeadCbcHmac => write!(f, "randomized_aead_cbc_hmac"),
        }
    }
}

/// Parameters of one encryption call. Immutable for the duration of
/// the call.
#[derive(Clone, Debug)]
pub struct EncryptionRequest {
    /// Identifier resolved by the key provider. Must be non-empty.
    pub data_encryption_key_id: String,
    pub algorithm: EncryptionAlgorithm,
    /// Paths of the form `/<name>` selecting top-level properties.
    /// Distinct, and never the reserved identifier path.
    pub paths_to_encrypt: Vec<String>,
    pub compression: Option<CompressionOptions>,
}

impl EncryptionRequest {
    pub fn new(
        data_encryption_key_id: impl Into<String>,
        algorithm: EncryptionAlgorithm,
        paths_to_encrypt: Vec<String>,
    ) -> Self {
        Self {
            data_encryption_key_id: data_encryption_key_id.into(),
            algorithm,
            paths_to_encrypt,
            compression: None,
        }
    }

    pub fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Validate the request. Path syntax is checked before duplicates;
    /// both are hard errors.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.data_encryption_key_id.is_empty() {
            return Err(Error::InvalidArgument(
                "data-encryption key id must not be empty".to_string(),
            ));
        }
        for path in &self.paths_to_encrypt {
            validate_path(path)?;
        }
        let mut seen = HashSet::with_capacity(self.paths_to_encrypt.len());
        for path in &self.paths_to_encrypt {
            if !seen.insert(path.as_str()) {
                return Err(Error::InvalidPath(format!("duplicate path {}", path)));
            }
        }
        if self.compression.is_some()
            && self.algorithm == EncryptionAlgorithm::LegacyAeadCbcHmac
        {
            return Err(Error::InvalidArgument(
                "compression requires the randomized algorithm".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<()> {
    let name = match path.strip_prefix('/') {
        Some(name) => name,
        None => {
            return Err(Error::InvalidPath(format!(
                "path {:?} must start with '/'",
                path
            )))
        }
    };
    if name.is_empty() {
        return Err(Error::InvalidPath("path names no property".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidPath(format!(
            "path {:?} selects a nested property; only top-level properties can be encrypted",
            path
        )));
    }
    if path == RESERVED_ID_PATH {
        return Err(Error::InvalidPath(format!(
            "the identifier path {} is never encrypted",
            RESERVED_ID_PATH
        )));
    }
    Ok(())
}

/// Strip the leading `/` from a validated path.
pub(crate) fn path_name(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// The sidecar metadata object, stored in the output document under
/// [`ENCRYPTION_INFO_KEY`] and removed again on decryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptionInfo {
    #[serde(rename = "EncryptionFormatVersion")]
    pub format_version: u8,
    #[serde(rename = "EncryptionAlgorithm")]
    pub algorithm: EncryptionAlgorithm,
    #[serde(rename = "DataEncryptionKeyId")]
    pub data_encryption_key_id: String,
    /// Whole-object ciphertext. Populated only by format version 2.
    #[serde(rename = "EncryptedData", with = "base64_bytes", default)]
    pub encrypted_data: Option<Vec<u8>>,
    /// Paths actually encrypted, in request order.
    #[serde(rename = "EncryptedPaths")]
    pub encrypted_paths: Vec<String>,
    #[serde(rename = "CompressionAlgorithm", default)]
    pub compression_algorithm: CompressionAlgorithm,
    /// Encrypted-and-compressed path → pre-compression length in bytes.
    #[serde(rename = "CompressedEncryptedPaths", default)]
    pub compressed_encrypted_paths: BTreeMap<String, usize>,
}

impl EncryptionInfo {
    /// Parse the sidecar out of a document's `_ei` property.
    pub(crate) fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            Error::FormatViolation(format!("{} metadata: {}", ENCRYPTION_INFO_KEY, e))
        })
    }
}

/// What a decryption call recovered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionReport {
    /// Paths restored to plaintext, in sidecar order.
    pub paths_decrypted: Vec<String>,
    /// The data-encryption key the document was protected with.
    pub key_id: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD
                .decode(text.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
