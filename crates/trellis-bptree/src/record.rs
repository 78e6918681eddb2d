//! Fixed-length records ordered by their key prefix.

use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use trellis_common::{Result, TrellisError};

/// An immutable fixed-length key with an optional fixed-length value.
///
/// Records order and compare for tree purposes by key bytes only. Equality
/// (`==`) compares the whole record, value included; use `key_eq` for
/// key-equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    bytes: Bytes,
    key_len: usize,
}

impl Record {
    /// Wraps `bytes`, treating the first `key_len` bytes as the key.
    ///
    /// # Panics
    ///
    /// Panics if `key_len` exceeds the record length.
    pub fn new(bytes: impl Into<Bytes>, key_len: usize) -> Self {
        let bytes = bytes.into();
        assert!(
            key_len <= bytes.len(),
            "key length {} exceeds record length {}",
            key_len,
            bytes.len()
        );
        Self { bytes, key_len }
    }

    /// Builds a key-only record.
    pub fn from_key(key: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(key),
            key_len: key.len(),
        }
    }

    /// Copies a record out of a page region.
    pub(crate) fn from_slice(slice: &[u8], key_len: usize) -> Self {
        Self::new(Bytes::copy_from_slice(slice), key_len)
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.bytes[..self.key_len]
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.bytes[self.key_len..]
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn has_value(&self) -> bool {
        self.bytes.len() > self.key_len
    }

    /// Returns a record holding just this record's key.
    pub fn key_only(&self) -> Record {
        if !self.has_value() {
            return self.clone();
        }
        Self {
            bytes: self.bytes.slice(..self.key_len),
            key_len: self.key_len,
        }
    }

    /// Byte-wise comparison of the key regions.
    #[inline]
    pub fn compare_by_key(a: &Record, b: &Record) -> Ordering {
        a.key().cmp(b.key())
    }

    #[inline]
    pub fn key_eq(a: &Record, b: &Record) -> bool {
        Self::compare_by_key(a, b) == Ordering::Equal
    }

    #[inline]
    pub fn key_le(a: &Record, b: &Record) -> bool {
        Self::compare_by_key(a, b) != Ordering::Greater
    }

    #[inline]
    pub fn key_lt(a: &Record, b: &Record) -> bool {
        Self::compare_by_key(a, b) == Ordering::Less
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.key() {
            write!(f, "{:02x}", b)?;
        }
        if self.has_value() {
            write!(f, "/")?;
            for b in self.value() {
                write!(f, "{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// Builds records of one fixed shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFactory {
    key_len: usize,
    value_len: usize,
}

impl RecordFactory {
    pub fn new(key_len: usize, value_len: usize) -> Self {
        Self { key_len, value_len }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Length of a full record.
    pub fn record_len(&self) -> usize {
        self.key_len + self.value_len
    }

    /// Builds a record from its full byte form.
    pub fn create(&self, bytes: &[u8]) -> Result<Record> {
        if bytes.len() != self.record_len() {
            return Err(TrellisError::RecordLength {
                expected: self.record_len(),
                actual: bytes.len(),
            });
        }
        Ok(Record::new(Bytes::copy_from_slice(bytes), self.key_len))
    }

    /// Builds a record from separate key and value parts.
    pub fn create_kv(&self, key: &[u8], value: &[u8]) -> Result<Record> {
        if key.len() != self.key_len {
            return Err(TrellisError::RecordLength {
                expected: self.key_len,
                actual: key.len(),
            });
        }
        if value.len() != self.value_len {
            return Err(TrellisError::RecordLength {
                expected: self.value_len,
                actual: value.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(self.record_len());
        buf.put_slice(key);
        buf.put_slice(value);
        Ok(Record::new(buf.freeze(), self.key_len))
    }

    /// Builds a key-only record for lookups.
    pub fn create_key(&self, key: &[u8]) -> Result<Record> {
        if key.len() != self.key_len {
            return Err(TrellisError::RecordLength {
                expected: self.key_len,
                actual: key.len(),
            });
        }
        Ok(Record::from_key(key))
    }
}
