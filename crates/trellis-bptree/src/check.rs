//! Structural validation of pages and whole trees.
//!
//! Used by tests and by trees with checking enabled; not on the normal
//! operation path.

use crate::constants::{MAX_HEIGHT, ROOT_PARENT};
use crate::node::BPTreeNode;
use crate::page::{BPTreePage, PageCodec};
use crate::page_mgr::{BPTreeNodeMgr, BPTreeRecordsMgr};
use crate::record::Record;
use crate::records::BPTreeRecords;
use std::collections::HashSet;
use trellis_common::{BlockId, Result, TrellisError};

fn corrupted(msg: String) -> TrellisError {
    TrellisError::TreeCorrupted(msg)
}

/// Checks one leaf: strict key order and capacity. Occupancy is skipped for
/// the only leaf of the tree.
pub fn check_records_page(leaf: &BPTreeRecords, only_leaf: bool) -> Result<()> {
    if leaf.count() > leaf.max_size() {
        return Err(corrupted(format!(
            "R{} holds {} records, capacity {}",
            leaf.id(),
            leaf.count(),
            leaf.max_size()
        )));
    }
    if !only_leaf && leaf.count() < leaf.min_size() {
        return Err(corrupted(format!(
            "R{} holds {} records, minimum {}",
            leaf.id(),
            leaf.count(),
            leaf.min_size()
        )));
    }
    let buffer = leaf.buffer();
    for i in 1..buffer.count() {
        if buffer.key_at(i - 1) >= buffer.key_at(i) {
            return Err(corrupted(format!(
                "R{} out of order at slot {}: {} >= {}",
                leaf.id(),
                i,
                buffer.get(i - 1),
                buffer.get(i)
            )));
        }
    }
    Ok(())
}

/// Checks one node: strict key order, child count and occupancy.
pub fn check_node_page(node: &BPTreeNode) -> Result<()> {
    if node.child_count() != node.count() + 1 {
        return Err(corrupted(format!(
            "N{} has {} keys but {} children",
            node.id(),
            node.count(),
            node.child_count()
        )));
    }
    if node.count() > node.max_size() {
        return Err(corrupted(format!(
            "N{} holds {} keys, capacity {}",
            node.id(),
            node.count(),
            node.max_size()
        )));
    }
    if node.is_root() {
        if !node.is_leaf() && node.count() == 0 {
            return Err(corrupted(format!(
                "root N{} has a single node child",
                node.id()
            )));
        }
    } else if node.count() < node.min_size() {
        return Err(corrupted(format!(
            "N{} holds {} keys, minimum {}",
            node.id(),
            node.count(),
            node.min_size()
        )));
    }
    for i in 1..node.count() {
        if node.key(i - 1).key() >= node.key(i).key() {
            return Err(corrupted(format!(
                "N{} keys out of order at {}",
                node.id(),
                i
            )));
        }
    }
    Ok(())
}

#[derive(Default)]
struct TreeWalk {
    nodes: HashSet<BlockId>,
    leaves: HashSet<BlockId>,
    /// (leaf, link) in left-to-right order.
    chain: Vec<(BlockId, BlockId)>,
    leaf_depth: Option<usize>,
}

/// Key range a subtree must stay within: `lo <= key < hi`.
#[derive(Clone)]
struct Bounds {
    lo: Option<Record>,
    hi: Option<Record>,
}

impl Bounds {
    fn admits(&self, key: &[u8]) -> bool {
        self.lo.as_ref().is_none_or(|lo| lo.key() <= key)
            && self.hi.as_ref().is_none_or(|hi| key < hi.key())
    }

    fn child(&self, node: &BPTreeNode, idx: usize) -> Bounds {
        Bounds {
            lo: if idx == 0 {
                self.lo.clone()
            } else {
                Some(node.key(idx - 1))
            },
            hi: if idx == node.count() {
                self.hi.clone()
            } else {
                Some(node.key(idx))
            },
        }
    }
}

/// Walks the tree under `root` and checks every page, the key bounds each
/// separator imposes, uniform leaf depth, the leaf chain, and that every
/// allocated page is reachable exactly once.
pub fn check_tree(nodes: &BPTreeNodeMgr, records: &BPTreeRecordsMgr, root: BlockId) -> Result<()> {
    let mut walk = TreeWalk::default();
    let root_node = nodes.get_read(root, ROOT_PARENT)?;
    let bounds = Bounds { lo: None, hi: None };
    walk_node(nodes, records, root_node, &bounds, 0, &mut walk)?;

    for pair in walk.chain.windows(2) {
        let ((left, link), (right, _)) = (pair[0], pair[1]);
        if link != right {
            return Err(corrupted(format!(
                "R{left} links to {link}, next leaf is R{right}"
            )));
        }
    }
    if let Some(&(last, link)) = walk.chain.last() {
        if link.is_some() {
            return Err(corrupted(format!(
                "last leaf R{last} links to {link}"
            )));
        }
    }

    let allocated_nodes = nodes.allocated().len();
    let allocated_leaves = records.allocated().len();
    if walk.nodes.len() != allocated_nodes || walk.leaves.len() != allocated_leaves {
        return Err(corrupted(format!(
            "reached {} of {} nodes and {} of {} leaves",
            walk.nodes.len(),
            allocated_nodes,
            walk.leaves.len(),
            allocated_leaves
        )));
    }
    Ok(())
}

fn walk_node(
    nodes: &BPTreeNodeMgr,
    records: &BPTreeRecordsMgr,
    node: BPTreeNode,
    bounds: &Bounds,
    depth: usize,
    walk: &mut TreeWalk,
) -> Result<()> {
    if depth >= MAX_HEIGHT {
        return Err(corrupted(format!("N{} below {} levels", node.id(), MAX_HEIGHT)));
    }
    if !walk.nodes.insert(node.id()) {
        return Err(corrupted(format!("N{} reached twice", node.id())));
    }
    check_node_page(&node)?;
    for key in node.keys() {
        if !bounds.admits(key.key()) {
            return Err(corrupted(format!(
                "N{} key {} outside its parent range",
                node.id(),
                key
            )));
        }
    }

    let only_leaf = node.is_root() && node.count() == 0;
    for (idx, child) in node.children().enumerate() {
        let child_bounds = bounds.child(&node, idx);
        if !node.is_leaf() {
            let child_node = nodes.get_read(child, node.id())?;
            walk_node(nodes, records, child_node, &child_bounds, depth + 1, walk)?;
            continue;
        }

        if !walk.leaves.insert(child) {
            return Err(corrupted(format!("R{child} reached twice")));
        }
        let leaf = records.get_read(child, node.id())?;
        check_records_page(&leaf, only_leaf)?;
        for record in leaf.records() {
            if !child_bounds.admits(record.key()) {
                return Err(corrupted(format!(
                    "R{} record {} outside the range of N{} slot {}",
                    leaf.id(),
                    record,
                    node.id(),
                    idx
                )));
            }
        }
        match walk.leaf_depth {
            None => walk.leaf_depth = Some(depth),
            Some(d) if d != depth => {
                return Err(corrupted(format!(
                    "R{} at depth {}, other leaves at {}",
                    leaf.id(),
                    depth,
                    d
                )));
            }
            Some(_) => {}
        }
        walk.chain.push((leaf.id(), leaf.link()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_mgr::PageMgr;
    use crate::params::BPlusTreeParams;
    use trellis_block::BlockMgrMem;

    fn params() -> BPlusTreeParams {
        // leaf capacity (32 - 8) / 4 = 6, minimum 3
        BPlusTreeParams::new(2, 4, 0, 32).unwrap()
    }

    fn rec(k: u32) -> Record {
        Record::from_key(&k.to_be_bytes())
    }

    fn managers() -> (BPTreeNodeMgr, BPTreeRecordsMgr) {
        let p = params();
        (
            PageMgr::new(Box::new(BlockMgrMem::new("n", p.block_size)), p, 16).unwrap(),
            PageMgr::new(Box::new(BlockMgrMem::new("r", p.block_size)), p, 16).unwrap(),
        )
    }

    fn leaf(mgr: &BPTreeRecordsMgr, keys: &[u32]) -> BPTreeRecords {
        let mut leaf = mgr.create().unwrap();
        for &k in keys {
            leaf.internal_insert(&rec(k));
        }
        leaf
    }

    /// Root over two leaves split at `sep`.
    fn two_leaf_tree(
        left_keys: &[u32],
        right_keys: &[u32],
        sep: u32,
    ) -> (BPTreeNodeMgr, BPTreeRecordsMgr, BlockId) {
        let (nodes, records) = managers();
        let mut left = leaf(&records, left_keys);
        let right = leaf(&records, right_keys);
        left.set_link(right.id());
        records.put(&left).unwrap();
        records.put(&right).unwrap();

        let mut root = nodes.create_node(ROOT_PARENT, true).unwrap();
        root.push_child(left.id());
        root.insert_separator(0, &rec(sep), right.id());
        nodes.put(&root).unwrap();
        (nodes, records, root.id())
    }

    #[test]
    fn test_valid_tree() {
        let (nodes, records, root) = two_leaf_tree(&[1, 2, 3], &[5, 6, 7, 8], 5);
        check_tree(&nodes, &records, root).unwrap();
    }

    #[test]
    fn test_record_outside_separator_range() {
        let (nodes, records, root) = two_leaf_tree(&[1, 2, 6], &[5, 7, 8], 5);
        let err = check_tree(&nodes, &records, root).unwrap_err();
        assert!(err.to_string().contains("outside the range"));
    }

    #[test]
    fn test_underfull_leaf() {
        let (nodes, records, root) = two_leaf_tree(&[1], &[5, 6, 7], 5);
        let err = check_tree(&nodes, &records, root).unwrap_err();
        assert!(err.to_string().contains("minimum 3"));
    }

    #[test]
    fn test_broken_leaf_chain() {
        let (nodes, records, root) = two_leaf_tree(&[1, 2, 3], &[5, 6, 7], 5);
        let mut first = records.get(BlockId(0), root).unwrap();
        first.set_link(BlockId::NONE);
        records.put(&first).unwrap();

        let err = check_tree(&nodes, &records, root).unwrap_err();
        assert!(err.to_string().contains("links to"));
    }

    #[test]
    fn test_unreachable_page() {
        let (nodes, records, root) = two_leaf_tree(&[1, 2, 3], &[5, 6, 7], 5);
        let orphan = leaf(&records, &[9, 10, 11]);
        records.put(&orphan).unwrap();

        let err = check_tree(&nodes, &records, root).unwrap_err();
        assert!(err
            .to_string()
            .contains("reached 1 of 1 nodes and 2 of 3 leaves"));
    }

    #[test]
    fn test_lone_leaf_may_be_underfull() {
        let (nodes, records) = managers();
        let only = leaf(&records, &[]);
        records.put(&only).unwrap();
        let mut root = nodes.create_node(ROOT_PARENT, true).unwrap();
        root.push_child(only.id());
        nodes.put(&root).unwrap();

        check_tree(&nodes, &records, root.id()).unwrap();
    }

    #[test]
    fn test_unordered_leaf() {
        let (_, records) = managers();
        let page = leaf(&records, &[1, 2, 3]);
        assert!(check_records_page(&page, false).is_ok());

        // Raise the first key above the second in the encoded block
        let params = params();
        let mut block = vec![0u8; params.block_size];
        page.encode(&mut block);
        block[8] = 0xFF;
        let bad = BPTreeRecords::decode(page.id(), &block, &params).unwrap();
        let err = check_records_page(&bad, false).unwrap_err();
        assert!(err.to_string().contains("out of order at slot 1"));
    }

    #[test]
    fn test_root_over_single_node() {
        let p = params();
        let mut root = BPTreeNode::new(BlockId(0), ROOT_PARENT, false, &p);
        root.push_child(BlockId(1));
        assert!(check_node_page(&root).is_err());

        let mut root = BPTreeNode::new(BlockId(0), ROOT_PARENT, true, &p);
        root.push_child(BlockId(1));
        assert!(check_node_page(&root).is_ok());
    }

    #[test]
    fn test_underfull_inner_node() {
        let p = params();
        let mut node = BPTreeNode::new(BlockId(3), BlockId(0), true, &p);
        node.push_child(BlockId(1));
        let err = check_node_page(&node).unwrap_err();
        assert!(err.to_string().contains("N3 holds 0 keys, minimum 1"));
    }
}
