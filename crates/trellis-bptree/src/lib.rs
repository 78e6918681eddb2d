//! Disk-page B+Tree for Trellis.
//!
//! This crate provides:
//! - Fixed-length records and the sorted buffers that hold them
//! - Leaf pages (`BPTreeRecords`) chained left to right
//! - Internal pages (`BPTreeNode`) of separator keys and child ids
//! - Page managers that cache decoded pages over a `BlockMgr`
//! - `BPlusTree`: search, upsert, delete with rebalancing, range scans
//! - A structural checker for pages and whole trees
//!
//! Nodes and leaves are kept in two block managers sharing one block size.
//! A fresh tree is one root node over one empty leaf:
//!
//! ```text
//!           N0 [leaf]
//!              |
//!           R0 ( ) -> -
//! ```
//!
//! After growth, every leaf sits at the same depth and the leaves form a
//! singly linked chain in key order:
//!
//! ```text
//!                 N2 [node] <k2>
//!                /              \
//!      N0 [leaf] <k1>        N1 [leaf] <k3>
//!       /        \            /        \
//!     R0   ->   R1    ->    R2   ->    R3 -> -
//! ```

mod check;
mod constants;
mod iter;
mod node;
mod page;
mod page_mgr;
mod params;
mod ptr_buffer;
mod record;
mod record_buffer;
mod records;
mod tree;

pub use check::{check_node_page, check_records_page, check_tree};
pub use constants::{
    LEAF_HEADER_SIZE, NODE_FILE_EXT, NODE_HEADER_SIZE, PTR_SIZE, RECORDS_FILE_EXT, ROOT_PARENT,
};
pub use iter::RecordRangeIter;
pub use node::BPTreeNode;
pub use page::{BPTreePage, PageCodec};
pub use page_mgr::{BPTreeNodeMgr, BPTreeRecordsMgr, PageMgr};
pub use params::BPlusTreeParams;
pub use ptr_buffer::PtrBuffer;
pub use record::{Record, RecordFactory};
pub use record_buffer::RecordBuffer;
pub use records::BPTreeRecords;
pub use tree::{create_empty_bpt, BPlusTree};
