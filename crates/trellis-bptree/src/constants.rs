//! B+Tree layout constants.

use trellis_common::{BlockHeader, BlockId};

/// Leaf header: header word plus the next-leaf link (8 bytes).
pub const LEAF_HEADER_SIZE: usize = BlockHeader::SIZE + 4;

/// Offset of the next-leaf link within a leaf block.
pub(crate) const LEAF_LINK_OFFSET: usize = BlockHeader::SIZE;

/// Node header: the header word only (4 bytes).
pub const NODE_HEADER_SIZE: usize = BlockHeader::SIZE;

/// Child pointer size (4 bytes, a block id).
pub const PTR_SIZE: usize = 4;

/// Parent sentinel given to the root node when it is fetched.
pub const ROOT_PARENT: BlockId = BlockId(u32::MAX - 1);

/// Depth past which a descent is treated as a cycle in the tree.
pub(crate) const MAX_HEIGHT: usize = 64;

/// File extension of the internal-node block file.
pub const NODE_FILE_EXT: &str = "idn";

/// File extension of the leaf block file.
pub const RECORDS_FILE_EXT: &str = "dat";
