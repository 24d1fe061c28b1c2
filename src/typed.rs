//! Lossless conversion between a JSON value and its canonical typed
//! byte form.
//!
//! Every encryptable value serializes to a byte buffer annotated with a
//! [`TypeMarker`], chosen so the original JSON type round-trips
//! exactly:
//!
//! - booleans are a single byte
//! - numbers that parse exactly as a signed 64-bit integer become
//!   8 big-endian bytes under `Long`; everything else becomes IEEE-754
//!   double bits under `Double`
//! - strings are their UTF-8 bytes
//! - arrays and objects are the compact JSON text of the sub-tree
//!
//! JSON `null` is never serialized; callers skip null properties before
//! reaching this module.

use byteorder::{BigEndian, ByteOrder};
use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::marker::TypeMarker;

/// Serialize a JSON value into `(marker, canonical bytes)`.
pub(crate) fn serialize_value(value: &Value) -> Result<(TypeMarker, Vec<u8>)> {
    match value {
        Value::Null => Err(Error::Internal(
            "null values are skipped, never serialized".to_string(),
        )),
        Value::Bool(v) => Ok((TypeMarker::Boolean, vec![u8::from(*v)])),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                let mut buf = [0u8; 8];
                BigEndian::write_i64(&mut buf, v);
                Ok((TypeMarker::Long, buf.to_vec()))
            } else if let Some(v) = n.as_f64() {
                let mut buf = [0u8; 8];
                BigEndian::write_u64(&mut buf, v.to_bits());
                Ok((TypeMarker::Double, buf.to_vec()))
            } else {
                Err(Error::Internal(format!(
                    "number {} fits neither i64 nor f64",
                    n
                )))
            }
        }
        Value::String(v) => Ok((TypeMarker::String, v.as_bytes().to_vec())),
        Value::Array(_) => Ok((TypeMarker::Array, serde_json::to_vec(value)?)),
        Value::Object(_) => Ok((TypeMarker::Object, serde_json::to_vec(value)?)),
    }
}

/// Deserialize canonical bytes back into a JSON value, choosing the
/// decoder by marker. Surplus or missing bytes are format violations.
pub(crate) fn deserialize_value(marker: TypeMarker, buf: &[u8]) -> Result<Value> {
    match marker {
        TypeMarker::Null => {
            if buf.is_empty() {
                Ok(Value::Null)
            } else {
                Err(Error::FormatViolation(
                    "Null marker carries payload bytes".to_string(),
                ))
            }
        }
        TypeMarker::Boolean => {
            expect_len("read boolean", buf, 1)?;
            match buf[0] {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                b => Err(Error::FormatViolation(format!(
                    "boolean byte must be 0 or 1, got {}",
                    b
                ))),
            }
        }
        TypeMarker::Long => {
            expect_len("read long", buf, 8)?;
            Ok(Value::Number(Number::from(BigEndian::read_i64(buf))))
        }
        TypeMarker::Double => {
            expect_len("read double", buf, 8)?;
            let v = f64::from_bits(BigEndian::read_u64(buf));
            Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| Error::FormatViolation(format!("double {} is not a JSON number", v)))
        }
        TypeMarker::String => {
            let s = std::str::from_utf8(buf)
                .map_err(|e| Error::FormatViolation(format!("string is not UTF-8: {}", e)))?;
            Ok(Value::String(s.to_string()))
        }
        TypeMarker::Array => {
            let value: Value = serde_json::from_slice(buf)
                .map_err(|e| Error::FormatViolation(format!("array payload: {}", e)))?;
            if value.is_array() {
                Ok(value)
            } else {
                Err(Error::FormatViolation(
                    "Array marker over a non-array payload".to_string(),
                ))
            }
        }
        TypeMarker::Object => {
            let value: Value = serde_json::from_slice(buf)
                .map_err(|e| Error::FormatViolation(format!("object payload: {}", e)))?;
            if value.is_object() {
                Ok(value)
            } else {
                Err(Error::FormatViolation(
                    "Object marker over a non-object payload".to_string(),
                ))
            }
        }
        TypeMarker::Compressed => Err(Error::FormatViolation(
            "Compressed marker inside a compressed payload".to_string(),
        )),
    }
}

fn expect_len(step: &'static str, buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        Err(Error::LengthTooShort {
            step,
            actual: buf.len(),
            expected,
        })
    } else if buf.len() > expected {
        Err(Error::FormatViolation(format!(
            "surplus bytes on step [{}]: expected {}, got {}",
            step,
            expected,
            buf.len()
        )))
    } else {
        Ok(())
    }
}
