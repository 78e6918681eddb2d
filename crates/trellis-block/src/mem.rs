//! In-memory block storage.

use crate::block_mgr::BlockMgr;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use trellis_common::{BlockId, Result, TrellisError};

/// Block manager that keeps every block in RAM.
///
/// Block ids map directly to Vec indices. A freed slot keeps its index and
/// is reused by the next allocation.
pub struct BlockMgrMem {
    label: String,
    block_size: usize,
    inner: Mutex<MemState>,
}

struct MemState {
    /// Blocks by id. None marks a freed slot.
    blocks: Vec<Option<Box<[u8]>>>,
    /// Freed ids, reused lowest first.
    free: BTreeSet<u32>,
    closed: bool,
}

impl BlockMgrMem {
    /// Creates an empty in-memory store.
    pub fn new(label: impl Into<String>, block_size: usize) -> Self {
        Self {
            label: label.into(),
            block_size,
            inner: Mutex::new(MemState {
                blocks: Vec::new(),
                free: BTreeSet::new(),
                closed: false,
            }),
        }
    }

    fn closed_err(&self) -> TrellisError {
        TrellisError::Closed(self.label.clone())
    }
}

impl BlockMgr for BlockMgrMem {
    fn label(&self) -> &str {
        &self.label
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate(&self) -> Result<BlockId> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(self.closed_err());
        }
        let block = vec![0u8; self.block_size].into_boxed_slice();
        if let Some(id) = state.free.pop_first() {
            state.blocks[id as usize] = Some(block);
            return Ok(BlockId(id));
        }
        let id = state.blocks.len() as u32;
        state.blocks.push(Some(block));
        Ok(BlockId(id))
    }

    fn read(&self, id: BlockId) -> Result<Bytes> {
        let state = self.inner.lock();
        if state.closed {
            return Err(self.closed_err());
        }
        match state.blocks.get(id.as_usize()) {
            Some(Some(block)) => Ok(Bytes::copy_from_slice(block)),
            _ => Err(TrellisError::BlockNotFound { block_id: id }),
        }
    }

    fn write(&self, id: BlockId, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            return Err(TrellisError::BlockSizeMismatch {
                expected: self.block_size,
                actual: data.len(),
            });
        }
        let mut state = self.inner.lock();
        if state.closed {
            return Err(self.closed_err());
        }
        match state.blocks.get_mut(id.as_usize()) {
            Some(Some(block)) => {
                block.copy_from_slice(data);
                Ok(())
            }
            _ => Err(TrellisError::BlockNotFound { block_id: id }),
        }
    }

    fn free(&self, id: BlockId) -> Result<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(self.closed_err());
        }
        if !matches!(state.blocks.get(id.as_usize()), Some(Some(_))) {
            return Err(TrellisError::BlockNotFound { block_id: id });
        }
        state.blocks[id.as_usize()] = None;
        state.free.insert(id.0);
        Ok(())
    }

    fn is_valid(&self, id: BlockId) -> bool {
        let state = self.inner.lock();
        matches!(state.blocks.get(id.as_usize()), Some(Some(_)))
    }

    fn allocated(&self) -> Vec<BlockId> {
        let state = self.inner.lock();
        state
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_some())
            .map(|(i, _)| BlockId(i as u32))
            .collect()
    }

    fn sync(&self) -> Result<()> {
        if self.inner.lock().closed {
            return Err(self.closed_err());
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.closed = true;
        state.blocks.clear();
        state.free.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let mgr = BlockMgrMem::new("mem", 32);
        assert_eq!(mgr.allocate().unwrap(), BlockId(0));
        assert_eq!(mgr.allocate().unwrap(), BlockId(1));
        assert_eq!(mgr.allocate().unwrap(), BlockId(2));
        assert_eq!(mgr.allocated(), vec![BlockId(0), BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_write_read() {
        let mgr = BlockMgrMem::new("mem", 32);
        let id = mgr.allocate().unwrap();

        let mut data = [0u8; 32];
        data[0] = 0xAB;
        data[31] = 0xEF;
        mgr.write(id, &data).unwrap();

        let read = mgr.read(id).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[31], 0xEF);
    }

    #[test]
    fn test_free_reuses_lowest_id() {
        let mgr = BlockMgrMem::new("mem", 16);
        for _ in 0..4 {
            mgr.allocate().unwrap();
        }
        mgr.free(BlockId(2)).unwrap();
        mgr.free(BlockId(1)).unwrap();
        assert!(!mgr.is_valid(BlockId(1)));
        assert_eq!(mgr.allocated(), vec![BlockId(0), BlockId(3)]);

        assert_eq!(mgr.allocate().unwrap(), BlockId(1));
        assert_eq!(mgr.allocate().unwrap(), BlockId(2));
        assert_eq!(mgr.allocate().unwrap(), BlockId(4));
    }

    #[test]
    fn test_reused_block_is_zeroed() {
        let mgr = BlockMgrMem::new("mem", 8);
        let id = mgr.allocate().unwrap();
        mgr.write(id, &[7u8; 8]).unwrap();
        mgr.free(id).unwrap();

        let id = mgr.allocate().unwrap();
        assert_eq!(&mgr.read(id).unwrap()[..], &[0u8; 8]);
    }

    #[test]
    fn test_access_freed_block_fails() {
        let mgr = BlockMgrMem::new("mem", 8);
        let id = mgr.allocate().unwrap();
        mgr.free(id).unwrap();

        assert!(matches!(
            mgr.read(id),
            Err(TrellisError::BlockNotFound { .. })
        ));
        assert!(mgr.write(id, &[0u8; 8]).is_err());
        assert!(mgr.free(id).is_err());
        assert!(mgr.read(BlockId(99)).is_err());
    }

    #[test]
    fn test_write_wrong_size() {
        let mgr = BlockMgrMem::new("mem", 8);
        let id = mgr.allocate().unwrap();
        let err = mgr.write(id, &[0u8; 4]).unwrap_err();
        assert!(matches!(
            err,
            TrellisError::BlockSizeMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_closed() {
        let mgr = BlockMgrMem::new("mem", 8);
        mgr.allocate().unwrap();
        mgr.close().unwrap();
        assert!(matches!(mgr.allocate(), Err(TrellisError::Closed(_))));
        assert!(mgr.read(BlockId(0)).is_err());
        assert!(mgr.sync().is_err());
    }
}
