//! Internal pages: separator keys and child block ids.

use crate::constants::{NODE_HEADER_SIZE, PTR_SIZE, ROOT_PARENT};
use crate::page::{BPTreePage, PageCodec};
use crate::params::BPlusTreeParams;
use crate::ptr_buffer::PtrBuffer;
use crate::record::Record;
use crate::record_buffer::RecordBuffer;
use log::trace;
use trellis_common::{BlockHeader, BlockId, BlockType, Result, TrellisError};

/// An internal page of the tree.
///
/// Holds `count` separator keys and `count + 1` children. Every key under
/// `child(i)` is below `key(i)`, and every key under `child(i + 1)` is at or
/// above it. `is_leaf` marks nodes whose children are leaf pages.
///
/// Block layout:
/// ```text
/// +------------------------------+ 0
/// | header: type | count         | 4 (NODE_HEADER_SIZE)
/// +------------------------------+
/// | key_0 .. key_{2N-2}          |
/// +------------------------------+
/// | ptr_0 .. ptr_{2N-1}          |
/// +------------------------------+
/// ```
///
/// The parent id is not stored; it is supplied each time the node is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BPTreeNode {
    id: BlockId,
    parent: BlockId,
    is_leaf: bool,
    keys: RecordBuffer,
    ptrs: PtrBuffer,
    min_keys: usize,
}

impl BPTreeNode {
    /// Creates a node with no keys and no children.
    pub fn new(id: BlockId, parent: BlockId, is_leaf: bool, params: &BPlusTreeParams) -> Self {
        Self {
            id,
            parent,
            is_leaf,
            keys: RecordBuffer::new(params.max_keys(), params.key_len, params.key_len),
            ptrs: PtrBuffer::new(params.max_ptrs()),
            min_keys: params.min_keys(),
        }
    }

    /// Parent id from the descent that fetched this node.
    pub fn parent(&self) -> BlockId {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent == ROOT_PARENT
    }

    /// True if the children are leaf pages.
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn key(&self, idx: usize) -> Record {
        self.keys.get(idx)
    }

    pub fn set_key(&mut self, idx: usize, key: &Record) {
        self.keys.set(idx, key);
    }

    pub fn keys(&self) -> impl Iterator<Item = Record> + '_ {
        self.keys.iter()
    }

    pub fn child(&self, idx: usize) -> BlockId {
        self.ptrs.get(idx)
    }

    pub fn child_count(&self) -> usize {
        self.ptrs.count()
    }

    pub fn children(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.ptrs.iter()
    }

    /// Appends a child pointer. Used to seed a fresh root.
    pub fn push_child(&mut self, child: BlockId) {
        self.ptrs.push(child);
    }

    /// Index of the child whose subtree holds `key`.
    pub fn find_child_index(&self, key: &[u8]) -> usize {
        match self.keys.find(key) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Inserts `key` at `idx` with `right_child` immediately after it.
    pub fn insert_separator(&mut self, idx: usize, key: &Record, right_child: BlockId) {
        self.keys.insert_at(idx, key);
        self.ptrs.insert(idx + 1, right_child);
    }

    /// Removes key `idx` and the child to its right.
    pub fn remove_separator(&mut self, idx: usize) -> (Record, BlockId) {
        let key = self.keys.remove(idx);
        let child = self.ptrs.remove(idx + 1);
        (key, child)
    }

    fn block_type(&self) -> BlockType {
        if self.is_leaf {
            BlockType::NodeOverRecords
        } else {
            BlockType::NodeOverNodes
        }
    }

    fn separator_required(&self, separator: Option<&Record>) -> Result<Record> {
        separator.cloned().ok_or_else(|| {
            TrellisError::TreeCorrupted(format!(
                "node {} rebalanced without a parent separator",
                self.id
            ))
        })
    }
}

impl PageCodec for BPTreeNode {
    fn id(&self) -> BlockId {
        self.id
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        BlockHeader::new(self.block_type(), self.keys.count()).write_to(buf);

        let keys = self.keys.as_bytes();
        let ptr_start = NODE_HEADER_SIZE + keys.len();
        buf[NODE_HEADER_SIZE..ptr_start].copy_from_slice(keys);
        self.ptrs
            .write_region(&mut buf[ptr_start..ptr_start + self.ptrs.max_size() * PTR_SIZE]);
    }

    fn decode(id: BlockId, buf: &[u8], params: &BPlusTreeParams) -> Result<Self> {
        let header = BlockHeader::read_from(buf).ok_or_else(|| TrellisError::BlockCorrupted {
            block_id: id,
            reason: "unknown block type".to_string(),
        })?;
        let is_leaf = match header.block_type {
            BlockType::NodeOverRecords => true,
            BlockType::NodeOverNodes => false,
            other => {
                return Err(TrellisError::BlockCorrupted {
                    block_id: id,
                    reason: format!("expected node block, found {:?}", other),
                })
            }
        };
        let count = header.count as usize;
        if count > params.max_keys() {
            return Err(TrellisError::BlockCorrupted {
                block_id: id,
                reason: format!("key count {} exceeds capacity {}", count, params.max_keys()),
            });
        }

        let ptr_start = NODE_HEADER_SIZE + params.max_keys() * params.key_len;
        let keys = RecordBuffer::from_region(
            &buf[NODE_HEADER_SIZE..ptr_start],
            count,
            params.max_keys(),
            params.key_len,
            params.key_len,
        );
        let ptrs = PtrBuffer::from_region(&buf[ptr_start..], count + 1, params.max_ptrs());

        Ok(Self {
            id,
            parent: BlockId::NONE,
            is_leaf,
            keys,
            ptrs,
            min_keys: params.min_keys(),
        })
    }

    fn set_parent(&mut self, parent: BlockId) {
        self.parent = parent;
    }
}

impl BPTreePage for BPTreeNode {
    fn count(&self) -> usize {
        self.keys.count()
    }

    fn max_size(&self) -> usize {
        self.keys.max_size()
    }

    fn min_size(&self) -> usize {
        self.min_keys
    }

    fn low_record(&self) -> Option<Record> {
        self.keys.low()
    }

    fn high_record(&self) -> Option<Record> {
        self.keys.high()
    }

    fn split(&mut self, new_id: BlockId) -> (Record, Self) {
        assert!(self.is_full(), "split of non-full node {}", self.id);
        let mid = self.count() / 2;

        // Left keeps keys[..mid] and mid + 1 children; keys[mid] moves up.
        let mut upper_keys = self.keys.split_off(mid);
        let promoted = upper_keys.remove(0);
        let upper_ptrs = self.ptrs.split_off(mid + 1);

        let right = Self {
            id: new_id,
            parent: self.parent,
            is_leaf: self.is_leaf,
            keys: upper_keys,
            ptrs: upper_ptrs,
            min_keys: self.min_keys,
        };
        trace!(
            "split node {} -> {} ({} + {}), promoting {}",
            self.id,
            new_id,
            self.count(),
            right.count(),
            promoted
        );
        (promoted, right)
    }

    fn shift_right(
        &mut self,
        right: &mut Self,
        separator: Option<&Record>,
    ) -> Result<Option<Record>> {
        let separator = self.separator_required(separator)?;
        let last = self.count() - 1;

        // Parent key comes down in front of right; our last key goes up.
        right.keys.insert_at(0, &separator);
        let child = self.ptrs.remove(last + 1);
        right.ptrs.insert(0, child);
        let new_separator = self.keys.remove(last);

        trace!("shift node {} -> {}", self.id, right.id);
        Ok(Some(new_separator))
    }

    fn shift_left(
        &mut self,
        right: &mut Self,
        separator: Option<&Record>,
    ) -> Result<Option<Record>> {
        let separator = self.separator_required(separator)?;

        let end = self.count();
        self.keys.insert_at(end, &separator);
        let child = right.ptrs.remove(0);
        self.ptrs.push(child);
        let new_separator = right.keys.remove(0);

        trace!("shift node {} <- {}", self.id, right.id);
        Ok(Some(new_separator))
    }

    fn merge(&mut self, right: Self, separator: Option<&Record>) -> Result<()> {
        let separator = self.separator_required(separator)?;

        let end = self.count();
        self.keys.insert_at(end, &separator);
        self.keys.merge(&right.keys);
        self.ptrs.merge(&right.ptrs);

        trace!("merge node {} <- {}", self.id, right.id);
        Ok(())
    }
}

impl std::fmt::Display for BPTreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_leaf { "leaf" } else { "node" };
        let first = self.ptrs.first().unwrap_or(BlockId::NONE);
        write!(
            f,
            "N{} [{}] ({}/{}) {}",
            self.id,
            kind,
            self.count(),
            self.max_size(),
            first
        )?;
        for i in 0..self.count() {
            write!(f, " <{}> {}", self.keys.get(i), self.ptrs.get(i + 1))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BPlusTreeParams {
        // 3 keys, 4 children per node
        BPlusTreeParams::new(2, 1, 0, 32).unwrap()
    }

    fn key(k: u8) -> Record {
        Record::from_key(&[k])
    }

    /// Node with children 100, 101, ... between the given keys.
    fn node_of(id: u32, keys: &[u8]) -> BPTreeNode {
        let mut node = BPTreeNode::new(BlockId(id), ROOT_PARENT, true, &params());
        node.push_child(BlockId(100 * (id + 1)));
        for (i, &k) in keys.iter().enumerate() {
            node.insert_separator(i, &key(k), BlockId(100 * (id + 1) + i as u32 + 1));
        }
        node
    }

    fn key_bytes(node: &BPTreeNode) -> Vec<u8> {
        node.keys().map(|k| k.key()[0]).collect()
    }

    fn child_ids(node: &BPTreeNode) -> Vec<u32> {
        node.children().map(|c| c.0).collect()
    }

    #[test]
    fn test_find_child_index() {
        let node = node_of(0, &[10, 20, 30]);
        assert_eq!(node.find_child_index(&[5]), 0);
        assert_eq!(node.find_child_index(&[10]), 1);
        assert_eq!(node.find_child_index(&[15]), 1);
        assert_eq!(node.find_child_index(&[20]), 2);
        assert_eq!(node.find_child_index(&[30]), 3);
        assert_eq!(node.find_child_index(&[99]), 3);

        let empty = node_of(0, &[]);
        assert_eq!(empty.find_child_index(&[42]), 0);
    }

    #[test]
    fn test_insert_remove_separator() {
        let mut node = node_of(0, &[10, 30]);
        node.insert_separator(1, &key(20), BlockId(7));
        assert_eq!(key_bytes(&node), vec![10, 20, 30]);
        assert_eq!(child_ids(&node), vec![100, 101, 7, 102]);

        let (k, child) = node.remove_separator(0);
        assert_eq!(k, key(10));
        assert_eq!(child, BlockId(101));
        assert_eq!(child_ids(&node), vec![100, 7, 102]);
    }

    #[test]
    fn test_split_promotes_median() {
        let mut node = node_of(0, &[10, 20, 30]);
        assert!(node.is_full());

        let (promoted, right) = node.split(BlockId(9));
        assert_eq!(promoted, key(20));
        assert_eq!(key_bytes(&node), vec![10]);
        assert_eq!(child_ids(&node), vec![100, 101]);
        assert_eq!(key_bytes(&right), vec![30]);
        assert_eq!(child_ids(&right), vec![102, 103]);
        assert!(right.is_leaf());
    }

    #[test]
    fn test_shift_right_rotates_through_parent() {
        let mut left = node_of(0, &[10, 20]);
        let mut right = node_of(1, &[50]);
        let new_sep = left.shift_right(&mut right, Some(&key(40))).unwrap();

        assert_eq!(new_sep, Some(key(20)));
        assert_eq!(key_bytes(&left), vec![10]);
        assert_eq!(child_ids(&left), vec![100, 101]);
        assert_eq!(key_bytes(&right), vec![40, 50]);
        assert_eq!(child_ids(&right), vec![102, 200, 201]);
    }

    #[test]
    fn test_shift_left_rotates_through_parent() {
        let mut left = node_of(0, &[10]);
        let mut right = node_of(1, &[50, 60]);
        let new_sep = left.shift_left(&mut right, Some(&key(40))).unwrap();

        assert_eq!(new_sep, Some(key(50)));
        assert_eq!(key_bytes(&left), vec![10, 40]);
        assert_eq!(child_ids(&left), vec![100, 101, 200]);
        assert_eq!(key_bytes(&right), vec![60]);
        assert_eq!(child_ids(&right), vec![201, 202]);
    }

    #[test]
    fn test_merge_pulls_separator_down() {
        let mut left = node_of(0, &[10]);
        let right = node_of(1, &[50]);
        left.merge(right, Some(&key(40))).unwrap();

        assert_eq!(key_bytes(&left), vec![10, 40, 50]);
        assert_eq!(child_ids(&left), vec![100, 101, 200, 201]);
    }

    #[test]
    fn test_shift_without_separator_fails() {
        let mut left = node_of(0, &[10, 20]);
        let mut right = node_of(1, &[50]);
        assert!(matches!(
            left.shift_right(&mut right, None),
            Err(TrellisError::TreeCorrupted(_))
        ));
    }

    #[test]
    fn test_encode_decode() {
        let params = params();
        let node = node_of(0, &[10, 20]);
        let mut block = vec![0u8; params.block_size];
        node.encode(&mut block);

        let mut decoded = BPTreeNode::decode(BlockId(0), &block, &params).unwrap();
        assert_eq!(decoded.parent(), BlockId::NONE);
        decoded.set_parent(ROOT_PARENT);
        assert_eq!(decoded, node);
        assert!(decoded.is_root());
    }

    #[test]
    fn test_decode_over_nodes() {
        let params = params();
        let mut node = BPTreeNode::new(BlockId(4), ROOT_PARENT, false, &params);
        node.push_child(BlockId(1));
        node.insert_separator(0, &key(5), BlockId(2));

        let mut block = vec![0u8; params.block_size];
        node.encode(&mut block);
        assert_eq!(block[3], BlockType::NodeOverNodes as u8);

        let decoded = BPTreeNode::decode(BlockId(4), &block, &params).unwrap();
        assert!(!decoded.is_leaf());
        assert_eq!(child_ids(&decoded), vec![1, 2]);
    }

    #[test]
    fn test_display() {
        let node = node_of(0, &[0x10]);
        assert_eq!(node.to_string(), "N0 [leaf] (1/3) 100 <10> 101");
    }
}
