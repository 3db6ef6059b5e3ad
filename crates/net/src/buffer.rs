//! Growable append-only byte store with slice views and string extraction.
//!
//! Message codecs use a [`Buffer`] as their single owning cache: builders
//! append wire bytes as setters are called, parsers advance over the cache
//! without copying. Capacity grows by doubling so repeated appends are
//! amortized O(1). Not thread-safe; the owning container serializes access.

use std::cmp;
use std::ops::Index;

use bytes::BytesMut;

const MIN_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: BytesMut::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: BytesMut::with_capacity(capacity) }
    }

    /// Logical length, independent of capacity.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a byte span.
    pub fn append(&mut self, bytes: &[u8]) {
        self.grow(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Appends a string slice, UTF-8 encoded.
    pub fn append_str(&mut self, text: &str) {
        self.append(text.as_bytes());
    }

    /// Appends a single byte.
    pub fn append_u8(&mut self, byte: u8) {
        self.grow(1);
        self.data.extend_from_slice(&[byte]);
    }

    /// Resizes the logical length to `size`.
    ///
    /// Growing guarantees `[0..size]` is addressable; the new region is
    /// zero-filled, callers overwrite it. Shrinking keeps capacity.
    pub fn resize(&mut self, size: usize) {
        if size > self.data.len() {
            self.grow(size - self.data.len());
        }
        self.data.resize(size, 0);
    }

    /// Drops everything after `size`. No-op when `size >= self.size()`.
    pub fn truncate(&mut self, size: usize) {
        self.data.truncate(size);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Zero-allocation read-only view of the whole buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// View of `[offset, offset + size)`. Panics when out of bounds,
    /// matching slice indexing.
    #[inline]
    pub fn slice(&self, offset: usize, size: usize) -> &[u8] {
        &self.data[offset..offset + size]
    }

    /// Extracts `[offset, offset + size)` as an owned string, replacing
    /// invalid UTF-8 sequences.
    pub fn extract_string(&self, offset: usize, size: usize) -> String {
        String::from_utf8_lossy(self.slice(offset, size)).into_owned()
    }

    /// Ensures room for `additional` more bytes, doubling capacity.
    fn grow(&mut self, additional: usize) {
        let required = self.data.len() + additional;
        if required <= self.data.capacity() {
            return;
        }
        let mut capacity = cmp::max(self.data.capacity(), MIN_CAPACITY);
        while capacity < required {
            capacity *= 2;
        }
        self.data.reserve(capacity - self.data.len());
    }
}

impl Index<usize> for Buffer {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.data[index]
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_views() {
        let mut buffer = Buffer::new();
        buffer.append(b"hello");
        buffer.append_u8(b' ');
        buffer.append_str("world");

        assert_eq!(buffer.size(), 11);
        assert_eq!(buffer.as_slice(), b"hello world");
        assert_eq!(buffer.slice(6, 5), b"world");
        assert_eq!(buffer.extract_string(0, 5), "hello");
        assert_eq!(buffer[4], b'o');
    }

    #[test]
    fn capacity_doubles() {
        let mut buffer = Buffer::new();
        buffer.append(&[0u8; 1]);
        let first = buffer.capacity();
        assert!(first >= MIN_CAPACITY);

        buffer.append(&vec![0u8; first]);
        assert!(buffer.capacity() >= first * 2);
    }

    #[test]
    fn resize_is_addressable() {
        let mut buffer = Buffer::new();
        buffer.append(b"abc");
        buffer.resize(8);
        assert_eq!(buffer.size(), 8);
        buffer.as_mut_slice()[7] = b'z';
        assert_eq!(buffer[7], b'z');

        buffer.resize(2);
        assert_eq!(buffer.as_slice(), b"ab");
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut buffer = Buffer::with_capacity(256);
        buffer.append(&[1u8; 100]);
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.capacity() >= 100);
    }
}
