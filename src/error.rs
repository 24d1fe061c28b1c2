//! Library error types.
//!
use std::fmt;

/// A fieldlock Result, normally returning a fieldlock [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A fieldlock error. Encompasses any issue that can happen while
/// validating an encryption request, encrypting a document, or
/// decrypting one.
#[derive(Debug)]
pub enum Error {
    /// Occurs when a request carries an unusable parameter: an empty
    /// data-encryption key id, or compression requested together with
    /// the legacy algorithm.
    InvalidArgument(String),
    /// Occurs when a path in `paths_to_encrypt` is malformed, names the
    /// reserved identifier path, or appears more than once.
    InvalidPath(String),
    /// Occurs when the requested algorithm cannot perform the requested
    /// operation.
    UnsupportedAlgorithm(String),
    /// Occurs when a document's sidecar carries a format version this
    /// codec does not know how to decrypt.
    UnsupportedFormatVersion(u8),
    /// Occurs when encrypted bytes don't parse: bad base64, an unknown
    /// type marker, or inconsistent header bytes. The offending
    /// property is left in the document.
    FormatViolation(String),
    /// Encrypted data ended before the expected number of bytes.
    LengthTooShort {
        /// What step of the decoding we were on when it failed.
        step: &'static str,
        /// The actual length available
        actual: usize,
        /// The length we were expecting
        expected: usize,
    },
    /// Authenticated decryption failed. Either the key is wrong or the
    /// ciphertext was tampered with.
    AuthFailed,
    /// The key provider does not know the requested key id.
    KeyUnknown(String),
    /// The sidecar's compression claims disagree with the per-value
    /// header bytes.
    CompressionMismatch(String),
    /// Cancellation was observed at a yield point. All pooled buffers
    /// have been released.
    Cancelled,
    /// An unexpected internal failure: a compressor error on encrypt,
    /// or a writer in an impossible state.
    Internal(String),
    /// The document itself failed to parse or serialize as JSON.
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidArgument(ref err) => write!(f, "Invalid argument: {}", err),
            Error::InvalidPath(ref err) => write!(f, "Invalid path: {}", err),
            Error::UnsupportedAlgorithm(ref err) => write!(f, "Unsupported algorithm: {}", err),
            Error::UnsupportedFormatVersion(version) => write!(
                f,
                "Unsupported encryption format version {}: upgrade this codec to read the document",
                version
            ),
            Error::FormatViolation(ref err) => {
                write!(f, "Encrypted data format violation: {}", err)
            }
            Error::LengthTooShort {
                step,
                actual,
                expected,
            } => write!(
                f,
                "Expected data length {}, but got {} on step [{}]",
                expected, actual, step
            ),
            Error::AuthFailed => write!(f, "Decryption failed authentication"),
            Error::KeyUnknown(ref id) => write!(f, "Unknown data-encryption key id: {}", id),
            Error::CompressionMismatch(ref err) => write!(f, "Compression mismatch: {}", err),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Internal(ref err) => write!(f, "Internal error: {}", err),
            Error::Json(ref err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Json(ref err) => Some(err),
            _ => None,
        }
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
