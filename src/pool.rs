//! Reusable byte buffers for the per-value pipeline.
//!
//! Every transient buffer a processor needs — serialized plaintext,
//! compressed payloads, ciphertext under construction — is rented from
//! a shared [`BufferPool`] and returned when the request finishes. The
//! [`ScopedBuffer`] guard ties a rented buffer to one request and
//! returns it on every exit path, including errors and cancellation.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Buffers kept in the pool at most. Returns beyond this are dropped.
const MAX_POOLED: usize = 32;

/// Buffers that grew beyond this capacity are dropped instead of
/// retained, so one oversized document doesn't pin memory forever.
const MAX_RETAINED_CAPACITY: usize = 1 << 20;

/// Thread-safe pool of reusable byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    bufs: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rent a cleared buffer with at least `min_size` capacity.
    pub fn rent(&self, min_size: usize) -> Vec<u8> {
        let mut bufs = self.bufs.lock().expect("buffer pool lock poisoned");
        match bufs.iter().position(|b| b.capacity() >= min_size) {
            Some(i) => bufs.swap_remove(i),
            None => match bufs.pop() {
                Some(mut buf) => {
                    buf.reserve(min_size);
                    buf
                }
                None => Vec::with_capacity(min_size),
            },
        }
    }

    /// Return a rented buffer. The buffer is cleared before reuse.
    pub fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut bufs = self.bufs.lock().expect("buffer pool lock poisoned");
        if bufs.len() < MAX_POOLED {
            bufs.push(buf);
        }
    }

    /// Rent a buffer on a guard that gives it back when dropped.
    pub(crate) fn rent_scoped(&self, min_size: usize) -> ScopedBuffer {
        ScopedBuffer {
            pool: self,
            buf: Some(self.rent(min_size)),
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.bufs.lock().unwrap().len()
    }
}

/// A rented buffer scoped to one request.
pub(crate) struct ScopedBuffer<'p> {
    pool: &'p BufferPool,
    buf: Option<Vec<u8>>,
}

impl ScopedBuffer<'_> {
    /// Detach the buffer from the pool; the caller takes ownership.
    /// Used for output buffers handed back to the API caller.
    pub(crate) fn detach(mut self) -> Vec<u8> {
        self.buf.take().expect("buffer already detached")
    }
}

impl Deref for ScopedBuffer<'_> {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer already detached")
    }
}

impl DerefMut for ScopedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer already detached")
    }
}

impl Drop for ScopedBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}
