//! Owned fixed-size byte buffers for small and control messages.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// A heap byte sequence whose length is fixed at construction.
///
/// Buffers are moved into an async write and out of an async read; they
/// are never resized. A read that ends early hands back a new, shorter
/// buffer holding only the bytes that arrived.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    /// Zero-filled buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
        }
    }

    /// Empty buffer (no allocation)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy `bytes` into a new buffer
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self {
            data: Box::from(bytes),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Keep the first `len` bytes.
    ///
    /// Returns `self` untouched when `len` covers the whole buffer,
    /// otherwise a fresh buffer with a copy of the prefix.
    pub fn truncated(self, len: usize) -> Self {
        if len >= self.data.len() {
            self
        } else {
            Self::copy_from(&self.data[..len])
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Self {
            data: v.into_boxed_slice(),
        }
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from(bytes)
    }
}

impl From<&str> for Buffer {
    fn from(s: &str) -> Self {
        Self::copy_from(s.as_bytes())
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads can be megabytes; show a short prefix only.
        let shown = self.data.len().min(16);
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("head", &&self.data[..shown])
            .finish()
    }
}
