//! Block identifiers and the header word shared by every tree page.

use serde::{Deserialize, Serialize};

/// Identifier of a fixed-size block within one block manager.
///
/// Ids are dense slot indices: block `n` lives at byte offset `n * block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Sentinel for "no block", used as the end of a leaf chain.
    pub const NONE: BlockId = BlockId(u32::MAX);

    /// Returns true unless this is the `NONE` sentinel.
    #[inline]
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }

    /// Returns the id as a slot index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::NONE {
            write!(f, "-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Kind of content held in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    /// Unallocated/free block.
    Free = 0,
    /// Leaf page holding records.
    Records = 1,
    /// Internal node whose children are leaf pages.
    NodeOverRecords = 2,
    /// Internal node whose children are internal nodes.
    NodeOverNodes = 3,
}

impl BlockType {
    /// Decodes a type tag, returning None for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BlockType::Free),
            1 => Some(BlockType::Records),
            2 => Some(BlockType::NodeOverRecords),
            3 => Some(BlockType::NodeOverNodes),
            _ => None,
        }
    }
}

/// Header word at the start of every tree block.
///
/// Layout (4 bytes, little-endian u32):
/// - bits 24..32: block type
/// - bits 0..24: entry count
///
/// A free block is all zeroes, so its header word is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: BlockType,
    pub count: u32,
}

impl BlockHeader {
    /// Size of the header word in bytes.
    pub const SIZE: usize = 4;

    /// Largest count the header can encode.
    pub const MAX_COUNT: u32 = (1 << 24) - 1;

    pub fn new(block_type: BlockType, count: usize) -> Self {
        debug_assert!(count <= Self::MAX_COUNT as usize);
        Self {
            block_type,
            count: count as u32,
        }
    }

    /// Packs type and count into one word.
    pub fn to_word(&self) -> u32 {
        ((self.block_type as u32) << 24) | (self.count & Self::MAX_COUNT)
    }

    /// Unpacks a header word. Returns None if the type tag is unknown.
    pub fn from_word(word: u32) -> Option<Self> {
        let block_type = BlockType::from_u8((word >> 24) as u8)?;
        Some(Self {
            block_type,
            count: word & Self::MAX_COUNT,
        })
    }

    /// Writes the header into the first four bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.to_word().to_le_bytes());
    }

    /// Reads the header from the first four bytes of `buf`.
    pub fn read_from(buf: &[u8]) -> Option<Self> {
        Self::from_word(read_u32(buf, 0))
    }
}

/// Reads a little-endian u32 at `offset`.
#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Writes a little-endian u32 at `offset`.
#[inline]
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
