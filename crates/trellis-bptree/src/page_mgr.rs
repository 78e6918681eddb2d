//! Page managers: decoded-page caches over a block manager.

use crate::node::BPTreeNode;
use crate::page::PageCodec;
use crate::params::BPlusTreeParams;
use crate::records::BPTreeRecords;
use log::trace;
use parking_lot::Mutex;
use trellis_block::{BlockMgr, PageCache};
use trellis_common::{BlockId, Result, TrellisError};

/// Allocates, fetches and persists one kind of tree page.
///
/// Fetched pages are copies. A caller that changes a page hands it back with
/// `put`; the change stays in the cache until `flush`, `finish_update` or
/// eviction writes it to the block manager.
pub struct PageMgr<P: PageCodec> {
    blocks: Box<dyn BlockMgr>,
    params: BPlusTreeParams,
    cache: Mutex<PageCache<P>>,
}

/// Manager of internal node pages.
pub type BPTreeNodeMgr = PageMgr<BPTreeNode>;

/// Manager of leaf pages.
pub type BPTreeRecordsMgr = PageMgr<BPTreeRecords>;

impl<P: PageCodec> PageMgr<P> {
    /// Wraps a block manager whose block size matches `params`.
    pub fn new(
        blocks: Box<dyn BlockMgr>,
        params: BPlusTreeParams,
        cache_pages: usize,
    ) -> Result<Self> {
        if blocks.block_size() != params.block_size {
            return Err(TrellisError::BlockSizeMismatch {
                expected: params.block_size,
                actual: blocks.block_size(),
            });
        }
        Ok(Self {
            blocks,
            params,
            cache: Mutex::new(PageCache::new(cache_pages)),
        })
    }

    pub fn params(&self) -> &BPlusTreeParams {
        &self.params
    }

    pub fn block_mgr(&self) -> &dyn BlockMgr {
        self.blocks.as_ref()
    }

    /// Fetches page `id`, recording `parent` on it.
    pub fn get(&self, id: BlockId, parent: BlockId) -> Result<P> {
        let cached = self.cache.lock().get(id);
        if let Some(mut page) = cached {
            page.set_parent(parent);
            return Ok(page);
        }

        let bytes = self.blocks.read(id)?;
        let mut page = P::decode(id, &bytes, &self.params)?;
        page.set_parent(parent);

        let evicted = self.cache.lock().put(id, page.clone(), false);
        if let Some((evicted_id, evicted_page)) = evicted {
            self.write_back(evicted_id, &evicted_page)?;
        }
        Ok(page)
    }

    /// Fetches a page for reading.
    pub fn get_read(&self, id: BlockId, parent: BlockId) -> Result<P> {
        self.get(id, parent)
    }

    /// Fetches a page to modify. Changes take effect once passed to `put`.
    pub fn get_write(&self, id: BlockId, parent: BlockId) -> Result<P> {
        self.get(id, parent)
    }

    /// Stores a changed page.
    pub fn put(&self, page: &P) -> Result<()> {
        let evicted = self.cache.lock().put(page.id(), page.clone(), true);
        if let Some((evicted_id, evicted_page)) = evicted {
            self.write_back(evicted_id, &evicted_page)?;
        }
        Ok(())
    }

    /// Allocates a block for a new page.
    pub fn allocate(&self) -> Result<BlockId> {
        self.blocks.allocate()
    }

    /// Drops a page and releases its block.
    pub fn free(&self, id: BlockId) -> Result<()> {
        self.cache.lock().remove(id);
        self.blocks.free(id)
    }

    pub fn is_valid(&self, id: BlockId) -> bool {
        self.blocks.is_valid(id)
    }

    /// Ids of all allocated pages, ascending.
    pub fn allocated(&self) -> Vec<BlockId> {
        self.blocks.allocated()
    }

    /// Writes every changed page to the block manager.
    pub fn flush(&self) -> Result<()> {
        let dirty = self.cache.lock().take_dirty();
        for (id, page) in &dirty {
            self.write_back(*id, page)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.flush()?;
        self.blocks.sync()
    }

    /// Flushes, closes the block manager and empties the cache.
    pub fn close(&self) -> Result<()> {
        let flushed = self.flush();
        self.cache.lock().clear();
        let closed = self.blocks.close();
        flushed.and(closed)
    }

    pub fn start_read(&self) -> Result<()> {
        self.blocks.start_read()
    }

    pub fn finish_read(&self) -> Result<()> {
        self.blocks.finish_read()
    }

    pub fn start_update(&self) -> Result<()> {
        self.blocks.start_update()
    }

    /// Writes every changed page, then ends the update bracket.
    pub fn finish_update(&self) -> Result<()> {
        let flushed = self.flush();
        let finished = self.blocks.finish_update();
        flushed.and(finished)
    }

    fn write_back(&self, id: BlockId, page: &P) -> Result<()> {
        let mut buf = vec![0u8; self.params.block_size];
        page.encode(&mut buf);
        trace!("{}: write back {}", self.blocks.label(), id);
        self.blocks.write(id, &buf)
    }
}

impl PageMgr<BPTreeNode> {
    /// Allocates an empty node with no children.
    pub fn create_node(&self, parent: BlockId, is_leaf: bool) -> Result<BPTreeNode> {
        let id = self.allocate()?;
        Ok(BPTreeNode::new(id, parent, is_leaf, &self.params))
    }
}

impl PageMgr<BPTreeRecords> {
    /// Allocates an empty, unlinked leaf.
    pub fn create(&self) -> Result<BPTreeRecords> {
        let id = self.allocate()?;
        Ok(BPTreeRecords::new(id, &self.params))
    }
}
