//! Field-level encryption for JSON documents.
//!
//! Given a document, a list of top-level property paths, and a key
//! provider, [`FieldCodec`] replaces each selected value with a
//! self-describing ciphertext blob and installs a sidecar under the
//! reserved key [`ENCRYPTION_INFO_KEY`] with everything a compatible
//! reader needs to restore the original document. Decryption is the
//! inverse and reports which paths were recovered.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fieldlock::{EncryptionAlgorithm, EncryptionRequest, FieldCodec, MemoryKeyProvider};
//!
//! # fn main() -> fieldlock::Result<()> {
//! let provider = MemoryKeyProvider::new();
//! provider.generate_key("k1");
//! let codec = FieldCodec::new(Arc::new(provider));
//!
//! let req = EncryptionRequest::new(
//!     "k1",
//!     EncryptionAlgorithm::RandomizedAeadCbcHmac,
//!     vec!["/ssn".to_string()],
//! );
//! let sealed = codec.encrypt(br#"{"id":"1","ssn":"000-00-0000"}"#, &req)?;
//! let (restored, report) = codec.decrypt(&sealed)?;
//! # let _ = (restored, report);
//! # Ok(())
//! # }
//! ```

mod cancel;
mod codec;
mod compress;
mod error;
mod frame;
mod keys;
mod legacy;
mod marker;
mod options;
mod pipeline;
mod pool;
mod stream;
mod token;
mod tree;
mod typed;

pub use cancel::CancelToken;
pub use codec::FieldCodec;
pub use compress::{
    CompressionAlgorithm, CompressionLevel, CompressionOptions,
    DEFAULT_MINIMUM_COMPRESSION_SIZE,
};
pub use error::{Error, Result};
pub use keys::{Aes256GcmKey, DataEncryptionKey, KeyProvider, MemoryKeyProvider, KEY_LEN};
pub use marker::TypeMarker;
pub use options::{DecryptionReport, EncryptionAlgorithm, EncryptionInfo, EncryptionRequest};
pub use pool::BufferPool;

/// The reserved document key the sidecar metadata is stored under.
pub const ENCRYPTION_INFO_KEY: &str = "_ei";

/// The reserved identifier path. Never encryptable.
pub const RESERVED_ID_PATH: &str = "/id";

/// The maximum JSON nesting depth the stream processor will follow.
pub const MAX_DEPTH: usize = 100;
