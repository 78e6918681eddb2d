//! Leaf pages: one sorted record buffer plus the next-leaf link.

use crate::constants::{LEAF_HEADER_SIZE, LEAF_LINK_OFFSET};
use crate::page::{BPTreePage, PageCodec};
use crate::params::BPlusTreeParams;
use crate::record::Record;
use crate::record_buffer::RecordBuffer;
use log::trace;
use trellis_common::block::{read_u32, write_u32};
use trellis_common::{BlockHeader, BlockId, BlockType, Result, TrellisError};

/// A leaf page of the tree.
///
/// Block layout:
/// ```text
/// +----------------------------+ 0
/// | header: type | count       | 4
/// | link: next leaf id         | 8 (LEAF_HEADER_SIZE)
/// +----------------------------+
/// | record_0 .. record_{max-1} |
/// +----------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BPTreeRecords {
    id: BlockId,
    buffer: RecordBuffer,
    link: BlockId,
    min_size: usize,
}

impl BPTreeRecords {
    /// Creates an empty, unlinked leaf.
    pub fn new(id: BlockId, params: &BPlusTreeParams) -> Self {
        Self {
            id,
            buffer: RecordBuffer::new(
                params.leaf_max_records(),
                params.record_len(),
                params.key_len,
            ),
            link: BlockId::NONE,
            min_size: params.leaf_min_records(),
        }
    }

    /// Next leaf in key order, or `BlockId::NONE` for the last leaf.
    pub fn link(&self) -> BlockId {
        self.link
    }

    pub fn set_link(&mut self, link: BlockId) {
        self.link = link;
    }

    pub fn buffer(&self) -> &RecordBuffer {
        &self.buffer
    }

    pub fn get(&self, idx: usize) -> Record {
        self.buffer.get(idx)
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.buffer.iter()
    }

    /// Finds the record with `key`'s key in this leaf.
    pub fn internal_search(&self, key: &Record) -> Option<Record> {
        self.buffer.find(key.key()).ok().map(|idx| self.buffer.get(idx))
    }

    /// Inserts `record`, replacing and returning a key-equal record if present.
    ///
    /// # Panics
    ///
    /// Panics if the key is new and the leaf is full.
    pub fn internal_insert(&mut self, record: &Record) -> Option<Record> {
        match self.buffer.find(record.key()) {
            Ok(idx) => {
                let old = self.buffer.get(idx);
                self.buffer.set(idx, record);
                Some(old)
            }
            Err(idx) => {
                self.buffer.insert_at(idx, record);
                None
            }
        }
    }

    /// Removes the record with `key`'s key, if present.
    pub fn internal_delete(&mut self, key: &Record) -> Option<Record> {
        match self.buffer.find(key.key()) {
            Ok(idx) => Some(self.buffer.remove(idx)),
            Err(_) => None,
        }
    }
}

impl PageCodec for BPTreeRecords {
    fn id(&self) -> BlockId {
        self.id
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        BlockHeader::new(BlockType::Records, self.buffer.count()).write_to(buf);
        write_u32(buf, LEAF_LINK_OFFSET, self.link.0);
        let region = self.buffer.as_bytes();
        buf[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + region.len()].copy_from_slice(region);
    }

    fn decode(id: BlockId, buf: &[u8], params: &BPlusTreeParams) -> Result<Self> {
        let header = BlockHeader::read_from(buf).ok_or_else(|| TrellisError::BlockCorrupted {
            block_id: id,
            reason: "unknown block type".to_string(),
        })?;
        if header.block_type != BlockType::Records {
            return Err(TrellisError::BlockCorrupted {
                block_id: id,
                reason: format!("expected records block, found {:?}", header.block_type),
            });
        }
        let count = header.count as usize;
        let max = params.leaf_max_records();
        if count > max {
            return Err(TrellisError::BlockCorrupted {
                block_id: id,
                reason: format!("record count {} exceeds capacity {}", count, max),
            });
        }

        let buffer = RecordBuffer::from_region(
            &buf[LEAF_HEADER_SIZE..],
            count,
            max,
            params.record_len(),
            params.key_len,
        );
        Ok(Self {
            id,
            buffer,
            link: BlockId(read_u32(buf, LEAF_LINK_OFFSET)),
            min_size: params.leaf_min_records(),
        })
    }
}

impl BPTreePage for BPTreeRecords {
    fn count(&self) -> usize {
        self.buffer.count()
    }

    fn max_size(&self) -> usize {
        self.buffer.max_size()
    }

    fn min_size(&self) -> usize {
        self.min_size
    }

    fn low_record(&self) -> Option<Record> {
        self.buffer.low()
    }

    fn high_record(&self) -> Option<Record> {
        self.buffer.high()
    }

    fn split(&mut self, new_id: BlockId) -> (Record, Self) {
        assert!(self.is_full(), "split of non-full leaf {}", self.id);
        let upper = self.buffer.split();
        let right = Self {
            id: new_id,
            buffer: upper,
            link: self.link,
            min_size: self.min_size,
        };
        self.link = new_id;
        trace!(
            "split leaf {} -> {} ({} + {})",
            self.id,
            new_id,
            self.count(),
            right.count()
        );

        let separator = right.buffer.get(0).key_only();
        (separator, right)
    }

    fn shift_right(
        &mut self,
        right: &mut Self,
        _separator: Option<&Record>,
    ) -> Result<Option<Record>> {
        self.buffer.shift_right(1, &mut right.buffer);
        trace!("shift leaf {} -> {}", self.id, right.id);
        Ok(right.buffer.low().map(|r| r.key_only()))
    }

    fn shift_left(
        &mut self,
        right: &mut Self,
        _separator: Option<&Record>,
    ) -> Result<Option<Record>> {
        right.buffer.shift_left(1, &mut self.buffer);
        trace!("shift leaf {} <- {}", self.id, right.id);
        Ok(right.buffer.low().map(|r| r.key_only()))
    }

    fn merge(&mut self, right: Self, _separator: Option<&Record>) -> Result<()> {
        self.buffer.merge(&right.buffer);
        self.link = right.link;
        trace!("merge leaf {} <- {}", self.id, right.id);
        Ok(())
    }
}

impl std::fmt::Display for BPTreeRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{} ({}/{}) [", self.id, self.count(), self.max_size())?;
        for (i, record) in self.records().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", record)?;
        }
        write!(f, "] -> {}", self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BPlusTreeParams {
        // 4-byte keys, 32-byte blocks: 6 records per leaf
        BPlusTreeParams::new(2, 4, 0, 32).unwrap()
    }

    fn rec(k: u32) -> Record {
        Record::from_key(&k.to_be_bytes())
    }

    fn leaf_of(id: u32, keys: &[u32]) -> BPTreeRecords {
        let mut leaf = BPTreeRecords::new(BlockId(id), &params());
        for &k in keys {
            leaf.internal_insert(&rec(k));
        }
        leaf
    }

    fn keys(leaf: &BPTreeRecords) -> Vec<u32> {
        leaf.records()
            .map(|r| u32::from_be_bytes(r.key().try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_insert_search_delete() {
        let mut leaf = leaf_of(0, &[20, 10, 30]);
        assert_eq!(keys(&leaf), vec![10, 20, 30]);
        assert_eq!(leaf.internal_search(&rec(20)), Some(rec(20)));
        assert_eq!(leaf.internal_search(&rec(25)), None);

        assert_eq!(leaf.internal_delete(&rec(20)), Some(rec(20)));
        assert_eq!(leaf.internal_delete(&rec(20)), None);
        assert_eq!(keys(&leaf), vec![10, 30]);
    }

    #[test]
    fn test_insert_replaces_value() {
        let params = BPlusTreeParams::new(2, 2, 2, 32).unwrap();
        let mut leaf = BPTreeRecords::new(BlockId(0), &params);
        let first = Record::new(vec![0u8, 1, 0xA, 0xA], 2);
        let second = Record::new(vec![0u8, 1, 0xB, 0xB], 2);

        assert_eq!(leaf.internal_insert(&first), None);
        assert_eq!(leaf.internal_insert(&second), Some(first));
        assert_eq!(leaf.count(), 1);
        assert_eq!(leaf.internal_search(&Record::from_key(&[0, 1])), Some(second));
    }

    #[test]
    fn test_split_full_leaf() {
        let mut leaf = BPTreeRecords::new(BlockId(0), &params());
        for k in 0x30..=0x35u8 {
            leaf.internal_insert(&Record::from_key(&[k, k, k, k]));
        }
        assert!(leaf.is_full());
        assert_eq!(leaf.max_size(), 6);

        let (separator, right) = leaf.split(BlockId(1));
        assert_eq!(leaf.count(), 3);
        assert_eq!(right.count(), 3);
        assert_eq!(leaf.count() + right.count(), 6);
        assert_eq!(separator.key(), &[0x33; 4]);
        assert!(leaf.high_record().unwrap().key() < right.low_record().unwrap().key());

        assert_eq!(leaf.link(), BlockId(1));
        assert_eq!(right.link(), BlockId::NONE);
        assert_eq!(right.id(), BlockId(1));
    }

    #[test]
    #[should_panic(expected = "split of non-full leaf")]
    fn test_split_non_full_panics() {
        let mut leaf = leaf_of(0, &[1, 2]);
        leaf.split(BlockId(1));
    }

    #[test]
    fn test_shift_right_single() {
        let mut bpr1 = leaf_of(0, &[10]);
        let mut bpr2 = leaf_of(1, &[]);
        let separator = bpr1.shift_right(&mut bpr2, None).unwrap();

        assert_eq!(bpr1.count(), 0);
        assert_eq!(keys(&bpr2), vec![10]);
        assert_eq!(separator, Some(rec(10)));
    }

    #[test]
    fn test_shift_left() {
        let mut left = leaf_of(0, &[1, 2]);
        let mut right = leaf_of(1, &[5, 6, 7]);
        let separator = left.shift_left(&mut right, None).unwrap();

        assert_eq!(keys(&left), vec![1, 2, 5]);
        assert_eq!(keys(&right), vec![6, 7]);
        assert_eq!(separator, Some(rec(6)));
    }

    #[test]
    fn test_merge_keeps_left_identity() {
        let mut bpr1 = leaf_of(0, &[10, 20]);
        let mut bpr2 = leaf_of(1, &[99]);
        bpr2.set_link(BlockId(7));

        bpr1.merge(bpr2, None).unwrap();
        assert_eq!(bpr1.id(), BlockId(0));
        assert_eq!(keys(&bpr1), vec![10, 20, 99]);
        assert_eq!(bpr1.link(), BlockId(7));
    }

    #[test]
    fn test_encode_decode() {
        let params = params();
        let mut leaf = leaf_of(3, &[5, 1, 9]);
        leaf.set_link(BlockId(4));

        let mut block = vec![0xEEu8; params.block_size];
        leaf.encode(&mut block);
        assert_eq!(&block[0..4], &[3, 0, 0, BlockType::Records as u8]);

        let decoded = BPTreeRecords::decode(BlockId(3), &block, &params).unwrap();
        assert_eq!(decoded, leaf);
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let params = params();
        let mut block = vec![0u8; params.block_size];
        BlockHeader::new(BlockType::NodeOverRecords, 1).write_to(&mut block);
        assert!(matches!(
            BPTreeRecords::decode(BlockId(0), &block, &params),
            Err(TrellisError::BlockCorrupted { .. })
        ));

        // Free (all-zero) block
        let block = vec![0u8; params.block_size];
        assert!(BPTreeRecords::decode(BlockId(0), &block, &params).is_err());
    }

    #[test]
    fn test_display() {
        let leaf = leaf_of(2, &[1]);
        assert_eq!(leaf.to_string(), "R2 (1/6) [00000001] -> -");
    }
}
