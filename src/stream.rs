//! Stream processor: rewrite a JSON document without materializing it.
//!
//! The encrypt pass drives the token reader over the input and mirrors
//! every token into the writer. Only properties of the root object are
//! candidates; anything deeper — and any value that isn't selected —
//! copies through as a raw byte span, preserving its original
//! formatting. A selected value is buffered, run through the per-value
//! pipeline, and written back as a base64 string under the same name.
//! The sidecar is injected just before the root object closes.
//!
//! The decrypt pass needs the sidecar before it can process the first
//! property, so it runs a pre-pass over the same bytes to locate and
//! parse the sidecar, then a single rewrite pass that restores each
//! listed property and drops the sidecar.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::keys::DataEncryptionKey;
use crate::options::{path_name, EncryptionInfo, EncryptionRequest};
use crate::options::{FORMAT_VERSION_COMPRESSED, FORMAT_VERSION_RANDOMIZED};
use crate::pipeline::{PropertyDecryptor, PropertyEncryptor};
use crate::pool::BufferPool;
use crate::token::{unescape, Token, TokenReader, TokenWriter};
use crate::ENCRYPTION_INFO_KEY;

/// Headroom for base64 growth and the sidecar when sizing the output.
const OUTPUT_HEADROOM: usize = 256;

/// Encrypt `input` by streaming rewrite.
pub(crate) fn encrypt_stream(
    input: &[u8],
    req: &EncryptionRequest,
    key: &dyn DataEncryptionKey,
    pool: &BufferPool,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    // path set keyed by property name
    let selected: HashMap<&str, &str> = req
        .paths_to_encrypt
        .iter()
        .map(|p| (path_name(p), p.as_str()))
        .collect();
    let encryptor = PropertyEncryptor {
        key,
        compression: req.compression.as_ref(),
        pool,
    };

    let mut reader = TokenReader::new(input);
    let mut out = pool.rent_scoped(input.len() + input.len() / 2 + OUTPUT_HEADROOM);
    let mut framed = pool.rent_scoped(0);
    let mut encrypted: HashMap<String, Option<usize>> = HashMap::new();
    {
        let mut writer = TokenWriter::new(&mut out);
        match reader.next()? {
            Some(Token::StartObject) => writer.start_object(),
            _ => {
                return Err(Error::FormatViolation(
                    "document root must be a JSON object".to_string(),
                ))
            }
        }
        loop {
            match reader.next()? {
                Some(Token::PropertyName(raw)) => {
                    let name = unescape(raw)?;
                    if name.as_ref() == ENCRYPTION_INFO_KEY {
                        return Err(Error::FormatViolation(format!(
                            "document already carries {}",
                            ENCRYPTION_INFO_KEY
                        )));
                    }
                    let span = reader.value_span()?;
                    match selected.get(name.as_ref()) {
                        Some(&path) if span != b"null" => {
                            cancel.check()?;
                            let value: Value = serde_json::from_slice(span)?;
                            let original_len = encryptor.encrypt_value(&value, &mut framed)?;
                            writer.property_name_raw(raw);
                            writer.base64_string(&framed);
                            encrypted.insert(path.to_string(), original_len);
                        }
                        _ => {
                            writer.property_name_raw(raw);
                            writer.raw_value(span);
                            cancel.check()?;
                        }
                    }
                }
                Some(Token::EndObject) => {
                    if !encrypted.is_empty() {
                        let info = build_sidecar(req, &encrypted);
                        writer.property_name(ENCRYPTION_INFO_KEY);
                        writer.json_value(&serde_json::to_value(&info)?)?;
                        debug!(
                            paths = info.encrypted_paths.len(),
                            version = info.format_version,
                            "installed sidecar"
                        );
                    }
                    writer.end_object()?;
                    break;
                }
                Some(_) => {
                    return Err(Error::Internal(
                        "unexpected token among root properties".to_string(),
                    ))
                }
                None => {
                    return Err(Error::FormatViolation(
                        "input ended inside the document".to_string(),
                    ))
                }
            }
        }
    }
    if reader.next()?.is_some() {
        return Err(Error::FormatViolation(
            "trailing characters after the document".to_string(),
        ));
    }
    Ok(out.detach())
}

/// Build the sidecar from the set of paths actually encrypted.
/// `EncryptedPaths` keeps request order regardless of document order.
fn build_sidecar(req: &EncryptionRequest, encrypted: &HashMap<String, Option<usize>>) -> EncryptionInfo {
    let encrypted_paths: Vec<String> = req
        .paths_to_encrypt
        .iter()
        .filter(|p| encrypted.contains_key(p.as_str()))
        .cloned()
        .collect();
    let compressed_encrypted_paths = encrypted
        .iter()
        .filter_map(|(path, original)| original.map(|len| (path.clone(), len)))
        .collect();
    EncryptionInfo {
        format_version: if encrypted.values().all(|o| o.is_none()) {
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
        compressed_encrypted_paths,
    }
}

/// Pre-pass: locate and parse the sidecar of an encrypted document.
/// Returns `None` when the document carries no sidecar (including when
/// the root isn't an object at all).
pub(crate) fn find_sidecar(input: &[u8]) -> Result<Option<EncryptionInfo>> {
    let mut reader = TokenReader::new(input);
    match reader.next()? {
        Some(Token::StartObject) => {}
        _ => return Ok(None),
    }
    loop {
        match reader.next()? {
            Some(Token::PropertyName(raw)) => {
                let name = unescape(raw)?;
                let span = reader.value_span()?;
                if name.as_ref() == ENCRYPTION_INFO_KEY {
                    let value: Value = serde_json::from_slice(span).map_err(|e| {
                        Error::FormatViolation(format!("{} metadata: {}", ENCRYPTION_INFO_KEY, e))
                    })?;
                    return EncryptionInfo::from_value(value).map(Some);
                }
            }
            Some(Token::EndObject) => return Ok(None),
            Some(_) => {
                return Err(Error::Internal(
                    "unexpected token among root properties".to_string(),
                ))
            }
            None => {
                return Err(Error::FormatViolation(
                    "input ended inside the document".to_string(),
                ))
            }
        }
    }
}

/// Decrypt pass for per-value format versions: copy tokens through,
/// restoring every sidecar-listed property and dropping the sidecar.
/// Returns the rewritten bytes and the paths actually decrypted, in
/// sidecar order.
pub(crate) fn decrypt_stream(
    input: &[u8],
    info: &EncryptionInfo,
    key: &dyn DataEncryptionKey,
    pool: &BufferPool,
    cancel: &CancelToken,
) -> Result<(Vec<u8>, Vec<String>)> {
    let listed: HashMap<&str, &str> = info
        .encrypted_paths
        .iter()
        .map(|p| (path_name(p), p.as_str()))
        .collect();
    let decryptor = PropertyDecryptor { key, info, pool };

    let mut reader = TokenReader::new(input);
    let mut out = pool.rent_scoped(input.len());
    let mut decrypted: Vec<&str> = Vec::new();
    {
        let mut writer = TokenWriter::new(&mut out);
        match reader.next()? {
            Some(Token::StartObject) => writer.start_object(),
            _ => {
                return Err(Error::FormatViolation(
                    "document root must be a JSON object".to_string(),
                ))
            }
        }
        loop {
            match reader.next()? {
                Some(Token::PropertyName(raw)) => {
                    let name = unescape(raw)?;
                    let span = reader.value_span()?;
                    if name.as_ref() == ENCRYPTION_INFO_KEY {
                        continue;
                    }
                    match listed.get(name.as_ref()) {
                        Some(&path) => {
                            cancel.check()?;
                            if !(span.len() >= 2 && span[0] == b'"') {
                                warn!(
                                    path = %path,
                                    "sidecar lists a property that is not a string"
                                );
                                writer.property_name_raw(raw);
                                writer.raw_value(span);
                                continue;
                            }
                            let contents =
                                std::str::from_utf8(&span[1..span.len() - 1]).map_err(|e| {
                                    Error::FormatViolation(format!(
                                        "{}: ciphertext string is not UTF-8: {}",
                                        path, e
                                    ))
                                })?;
                            let encoded = unescape(contents)?;
                            let framed =
                                STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                                    Error::FormatViolation(format!(
                                        "{}: invalid base64 ciphertext: {}",
                                        path, e
                                    ))
                                })?;
                            let value = decryptor.decrypt_value(path, &framed)?;
                            writer.property_name_raw(raw);
                            writer.json_value(&value)?;
                            decrypted.push(path);
                        }
                        None => {
                            writer.property_name_raw(raw);
                            writer.raw_value(span);
                        }
                    }
                }
                Some(Token::EndObject) => {
                    writer.end_object()?;
                    break;
                }
                Some(_) => {
                    return Err(Error::Internal(
                        "unexpected token among root properties".to_string(),
                    ))
                }
                None => {
                    return Err(Error::FormatViolation(
                        "input ended inside the document".to_string(),
                    ))
                }
            }
        }
    }
    if reader.next()?.is_some() {
        return Err(Error::FormatViolation(
            "trailing characters after the document".to_string(),
        ));
    }

    // Report in sidecar order, not document order.
    let paths = info
        .encrypted_paths
        .iter()
        .filter(|p| decrypted.contains(&p.as_str()))
        .cloned()
        .collect();
    Ok((out.detach(), paths))
}
