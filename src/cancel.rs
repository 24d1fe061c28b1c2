//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A cancellation flag plumbed through encrypt/decrypt calls.
///
/// The codec checks the token at its yield points — key-provider
/// fetches, per-property boundaries, and stream copy steps — and
/// surfaces [`Error::Cancelled`] once it is raised. Pooled buffers are
/// released on the way out; partial writes to the output are permitted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A new, unraised token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token. All in-flight calls observing it will stop at
    /// their next yield point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
