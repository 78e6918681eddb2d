//! The block storage contract the tree pages are persisted through.

use bytes::Bytes;
use trellis_common::{BlockId, Result};

/// Allocates, reads, writes and frees fixed-size blocks addressed by id.
///
/// Implementations use interior locking so a manager can be shared by
/// reference. Freed ids are handed out again by `allocate`, lowest first.
pub trait BlockMgr: Send + Sync {
    /// Short name used in log lines and errors.
    fn label(&self) -> &str;

    /// Size in bytes of every block.
    fn block_size(&self) -> usize;

    /// Allocates a zeroed block and returns its id.
    fn allocate(&self) -> Result<BlockId>;

    /// Reads the full contents of a block.
    fn read(&self, id: BlockId) -> Result<Bytes>;

    /// Overwrites a block. `data` must be exactly `block_size` bytes.
    fn write(&self, id: BlockId, data: &[u8]) -> Result<()>;

    /// Returns a block to the free list.
    fn free(&self, id: BlockId) -> Result<()>;

    /// Returns true if `id` refers to an allocated block.
    fn is_valid(&self, id: BlockId) -> bool;

    /// Ids of all allocated blocks, ascending.
    fn allocated(&self) -> Vec<BlockId>;

    /// Forces written blocks to stable storage.
    fn sync(&self) -> Result<()>;

    /// Syncs and releases the storage. Later calls fail with `Closed`.
    fn close(&self) -> Result<()>;

    /// Marks the start of a batch of read accesses.
    fn start_read(&self) -> Result<()> {
        Ok(())
    }

    /// Marks the end of a batch of read accesses.
    fn finish_read(&self) -> Result<()> {
        Ok(())
    }

    /// Marks the start of a batch of accesses that may modify blocks.
    fn start_update(&self) -> Result<()> {
        Ok(())
    }

    /// Marks the end of a batch of modifying accesses.
    fn finish_update(&self) -> Result<()> {
        Ok(())
    }
}

impl<M: BlockMgr + ?Sized> BlockMgr for Box<M> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn allocate(&self) -> Result<BlockId> {
        (**self).allocate()
    }

    fn read(&self, id: BlockId) -> Result<Bytes> {
        (**self).read(id)
    }

    fn write(&self, id: BlockId, data: &[u8]) -> Result<()> {
        (**self).write(id, data)
    }

    fn free(&self, id: BlockId) -> Result<()> {
        (**self).free(id)
    }

    fn is_valid(&self, id: BlockId) -> bool {
        (**self).is_valid(id)
    }

    fn allocated(&self) -> Vec<BlockId> {
        (**self).allocated()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn start_read(&self) -> Result<()> {
        (**self).start_read()
    }

    fn finish_read(&self) -> Result<()> {
        (**self).finish_read()
    }

    fn start_update(&self) -> Result<()> {
        (**self).start_update()
    }

    fn finish_update(&self) -> Result<()> {
        (**self).finish_update()
    }
}
