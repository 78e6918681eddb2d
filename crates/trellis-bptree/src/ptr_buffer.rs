//! Bounded array of child block ids.

use crate::constants::PTR_SIZE;
use trellis_common::block::{read_u32, write_u32};
use trellis_common::BlockId;

/// Child pointers of an internal node, at most `max_size` of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtrBuffer {
    ptrs: Vec<BlockId>,
    max_size: usize,
}

impl PtrBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            ptrs: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Decodes `count` little-endian ids from `region`.
    pub(crate) fn from_region(region: &[u8], count: usize, max_size: usize) -> Self {
        let ptrs = (0..count)
            .map(|i| BlockId(read_u32(region, i * PTR_SIZE)))
            .collect();
        Self { ptrs, max_size }
    }

    /// Encodes the ids into `region`, zeroing unused slots.
    pub(crate) fn write_region(&self, region: &mut [u8]) {
        region.fill(0);
        for (i, ptr) in self.ptrs.iter().enumerate() {
            write_u32(region, i * PTR_SIZE, ptr.0);
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.ptrs.len()
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn get(&self, idx: usize) -> BlockId {
        self.ptrs[idx]
    }

    pub fn first(&self) -> Option<BlockId> {
        self.ptrs.first().copied()
    }

    pub fn insert(&mut self, idx: usize, id: BlockId) {
        assert!(self.ptrs.len() < self.max_size, "pointer buffer full");
        self.ptrs.insert(idx, id);
    }

    pub fn push(&mut self, id: BlockId) {
        self.insert(self.ptrs.len(), id);
    }

    pub fn remove(&mut self, idx: usize) -> BlockId {
        self.ptrs.remove(idx)
    }

    /// Splits off the ids from `at` upward.
    pub fn split_off(&mut self, at: usize) -> PtrBuffer {
        PtrBuffer {
            ptrs: self.ptrs.split_off(at),
            max_size: self.max_size,
        }
    }

    /// Appends every id of `other`.
    pub fn merge(&mut self, other: &PtrBuffer) {
        assert!(
            self.count() + other.count() <= self.max_size,
            "pointer buffer full"
        );
        self.ptrs.extend_from_slice(&other.ptrs);
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.ptrs.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptrs(ids: &[u32], max: usize) -> PtrBuffer {
        let mut buf = PtrBuffer::new(max);
        for &id in ids {
            buf.push(BlockId(id));
        }
        buf
    }

    fn ids(buf: &PtrBuffer) -> Vec<u32> {
        buf.iter().map(|b| b.0).collect()
    }

    #[test]
    fn test_insert_remove() {
        let mut buf = ptrs(&[1, 3], 4);
        buf.insert(1, BlockId(2));
        assert_eq!(ids(&buf), vec![1, 2, 3]);
        assert_eq!(buf.remove(0), BlockId(1));
    }

    #[test]
    #[should_panic(expected = "pointer buffer full")]
    fn test_insert_full_panics() {
        let mut buf = ptrs(&[1, 2], 2);
        buf.push(BlockId(3));
    }

    #[test]
    fn test_split_off_and_merge() {
        let mut left = ptrs(&[1, 2, 3, 4], 4);
        let right = left.split_off(2);
        assert_eq!(ids(&left), vec![1, 2]);
        assert_eq!(ids(&right), vec![3, 4]);
        assert_eq!(right.max_size(), 4);

        left.merge(&right);
        assert_eq!(ids(&left), vec![1, 2, 3, 4]);
        assert_eq!(left.first(), Some(BlockId(1)));
    }

    #[test]
    fn test_region_encoding() {
        let buf = ptrs(&[5, 0x0102_0304], 3);
        let mut region = [0xFFu8; 12];
        buf.write_region(&mut region);
        assert_eq!(&region[4..8], &[4, 3, 2, 1]);
        assert_eq!(&region[8..12], &[0, 0, 0, 0]);

        let decoded = PtrBuffer::from_region(&region, 2, 3);
        assert_eq!(decoded, buf);
    }
}
