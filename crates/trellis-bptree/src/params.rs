//! Construction parameters of a B+Tree and the capacities derived from them.

use crate::constants::{LEAF_HEADER_SIZE, NODE_HEADER_SIZE, PTR_SIZE};
use crate::record::RecordFactory;
use serde::{Deserialize, Serialize};
use trellis_common::{BlockHeader, Result, TrellisError};

/// Shape of a B+Tree: branching order, record layout and block size.
///
/// An internal node holds between `order - 1` and `2 * order - 1` separator
/// keys (the root may hold fewer). A leaf holds as many records as fit in a
/// block after its 8-byte header, and at least half of that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BPlusTreeParams {
    /// Branching order N.
    pub order: usize,
    /// Key length in bytes.
    pub key_len: usize,
    /// Value length in bytes (0 for key-only indexes).
    pub value_len: usize,
    /// Block size in bytes shared by nodes and leaves.
    pub block_size: usize,
}

impl BPlusTreeParams {
    /// Validates and builds parameters.
    pub fn new(order: usize, key_len: usize, value_len: usize, block_size: usize) -> Result<Self> {
        let params = Self {
            order,
            key_len,
            value_len,
            block_size,
        };
        params.validate()?;
        Ok(params)
    }

    /// Builds parameters with the smallest block that fits a full node and
    /// at least two leaf records.
    pub fn for_order(order: usize, key_len: usize, value_len: usize) -> Result<Self> {
        if order < 2 {
            return Err(TrellisError::invalid_parameter("order", order));
        }
        let block_size = Self::calc_node_block_size(order, key_len)
            .max(LEAF_HEADER_SIZE + 2 * (key_len + value_len));
        Self::new(order, key_len, value_len, block_size)
    }

    /// Block size needed by a full internal node.
    pub fn calc_node_block_size(order: usize, key_len: usize) -> usize {
        NODE_HEADER_SIZE + (2 * order - 1) * key_len + 2 * order * PTR_SIZE
    }

    pub fn validate(&self) -> Result<()> {
        if self.order < 2 {
            return Err(TrellisError::invalid_parameter("order", self.order));
        }
        if self.key_len == 0 {
            return Err(TrellisError::invalid_parameter("key_len", self.key_len));
        }
        let node_size = Self::calc_node_block_size(self.order, self.key_len);
        if node_size > self.block_size {
            return Err(TrellisError::invalid_parameter(
                "block_size",
                format!(
                    "{} (order {} needs {})",
                    self.block_size, self.order, node_size
                ),
            ));
        }
        if self.block_size < LEAF_HEADER_SIZE || self.leaf_max_records() < 2 {
            return Err(TrellisError::invalid_parameter(
                "block_size",
                format!(
                    "{} (fits fewer than 2 records of {} bytes)",
                    self.block_size,
                    self.record_len()
                ),
            ));
        }
        if self.leaf_max_records() > BlockHeader::MAX_COUNT as usize {
            return Err(TrellisError::invalid_parameter(
                "block_size",
                format!("{} (record count overflows header)", self.block_size),
            ));
        }
        Ok(())
    }

    /// Full record length.
    #[inline]
    pub fn record_len(&self) -> usize {
        self.key_len + self.value_len
    }

    /// Maximum separators per node (2N - 1).
    #[inline]
    pub fn max_keys(&self) -> usize {
        2 * self.order - 1
    }

    /// Minimum separators per non-root node (N - 1).
    #[inline]
    pub fn min_keys(&self) -> usize {
        self.order - 1
    }

    /// Maximum children per node (2N).
    #[inline]
    pub fn max_ptrs(&self) -> usize {
        2 * self.order
    }

    /// Maximum records per leaf.
    #[inline]
    pub fn leaf_max_records(&self) -> usize {
        self.block_size.saturating_sub(LEAF_HEADER_SIZE) / self.record_len()
    }

    /// Minimum records per non-root leaf, `ceil(max / 2)`.
    #[inline]
    pub fn leaf_min_records(&self) -> usize {
        self.leaf_max_records().div_ceil(2)
    }

    pub fn record_factory(&self) -> RecordFactory {
        RecordFactory::new(self.key_len, self.value_len)
    }

    pub fn key_factory(&self) -> RecordFactory {
        RecordFactory::new(self.key_len, 0)
    }
}

impl std::fmt::Display for BPlusTreeParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "N={} key={} value={} block={} node=[{}..{}] leaf=[{}..{}]",
            self.order,
            self.key_len,
            self.value_len,
            self.block_size,
            self.min_keys(),
            self.max_keys(),
            self.leaf_min_records(),
            self.leaf_max_records()
        )
    }
}
