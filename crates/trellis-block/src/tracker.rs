//! Bracket checking wrapper for block managers.

use crate::block_mgr::BlockMgr;
use bytes::Bytes;
use log::warn;
use parking_lot::Mutex;
use trellis_common::{BlockId, Result, TrellisError};

/// Wraps a block manager and checks that every access happens inside a
/// matching `start_*`/`finish_*` bracket.
///
/// Reads need an open read or update bracket. Allocation, writes and frees
/// need an open update bracket. Update brackets do not nest and cannot be
/// opened while reads are in progress.
pub struct BlockMgrTracker<M: BlockMgr> {
    inner: M,
    state: Mutex<BracketState>,
}

#[derive(Debug, Default)]
struct BracketState {
    readers: usize,
    updating: bool,
}

impl<M: BlockMgr> BlockMgrTracker<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            state: Mutex::new(BracketState::default()),
        }
    }

    /// Returns the wrapped manager.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn violation(&self, what: String) -> TrellisError {
        warn!("{}: {}", self.inner.label(), what);
        TrellisError::BracketViolation(format!("{}: {}", self.inner.label(), what))
    }

    fn check_read(&self, op: &str, id: BlockId) -> Result<()> {
        let state = self.state.lock();
        if state.readers == 0 && !state.updating {
            return Err(self.violation(format!("{op}({id}) outside any bracket")));
        }
        Ok(())
    }

    fn check_update(&self, op: &str, id: Option<BlockId>) -> Result<()> {
        let state = self.state.lock();
        if !state.updating {
            let target = id.map(|id| format!("({id})")).unwrap_or_default();
            return Err(self.violation(format!("{op}{target} outside an update bracket")));
        }
        Ok(())
    }
}

impl<M: BlockMgr> BlockMgr for BlockMgrTracker<M> {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn allocate(&self) -> Result<BlockId> {
        self.check_update("allocate", None)?;
        self.inner.allocate()
    }

    fn read(&self, id: BlockId) -> Result<Bytes> {
        self.check_read("read", id)?;
        self.inner.read(id)
    }

    fn write(&self, id: BlockId, data: &[u8]) -> Result<()> {
        self.check_update("write", Some(id))?;
        self.inner.write(id, data)
    }

    fn free(&self, id: BlockId) -> Result<()> {
        self.check_update("free", Some(id))?;
        self.inner.free(id)
    }

    fn is_valid(&self, id: BlockId) -> bool {
        self.inner.is_valid(id)
    }

    fn allocated(&self) -> Vec<BlockId> {
        self.inner.allocated()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn close(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if state.readers > 0 || state.updating {
                warn!(
                    "{}: closed with open brackets ({:?})",
                    self.inner.label(),
                    *state
                );
            }
        }
        self.inner.close()
    }

    fn start_read(&self) -> Result<()> {
        self.state.lock().readers += 1;
        self.inner.start_read()
    }

    fn finish_read(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.readers == 0 {
                drop(state);
                return Err(self.violation("finish_read without start_read".to_string()));
            }
            state.readers -= 1;
        }
        self.inner.finish_read()
    }

    fn start_update(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.updating {
                drop(state);
                return Err(self.violation("nested start_update".to_string()));
            }
            if state.readers > 0 {
                let readers = state.readers;
                drop(state);
                return Err(self.violation(format!(
                    "start_update with {readers} open read bracket(s)"
                )));
            }
            state.updating = true;
        }
        self.inner.start_update()
    }

    fn finish_update(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.updating {
                drop(state);
                return Err(self.violation("finish_update without start_update".to_string()));
            }
            state.updating = false;
        }
        self.inner.finish_update()
    }
}
