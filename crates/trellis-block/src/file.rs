//! File-backed block storage.

use crate::block_mgr::BlockMgr;
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use trellis_common::block::read_u32;
use trellis_common::{BlockId, Result, TrellisError};

/// Block manager over a single file.
///
/// Block `n` lives at byte offset `n * block_size`. Freed blocks are zeroed
/// on disk; a block whose header word is zero is treated as free when the
/// file is reopened, so the free list needs no separate persistence.
pub struct BlockMgrFile {
    label: String,
    path: PathBuf,
    block_size: usize,
    fsync_enabled: bool,
    inner: Mutex<FileState>,
}

struct FileState {
    /// None once closed.
    file: Option<File>,
    /// Number of blocks in the file, free ones included.
    num_blocks: u32,
    free: BTreeSet<u32>,
}

impl BlockMgrFile {
    /// Opens or creates the block file at `path`.
    pub fn open(path: impl AsRef<Path>, block_size: usize, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size % block_size as u64 != 0 {
            return Err(TrellisError::BlockCorrupted {
                block_id: BlockId((file_size / block_size as u64) as u32),
                reason: format!(
                    "file size {} is not a multiple of block size {}",
                    file_size, block_size
                ),
            });
        }
        let num_blocks = (file_size / block_size as u64) as u32;

        // Rebuild the free list from zeroed header words.
        let mut free = BTreeSet::new();
        let mut buffer = vec![0u8; block_size];
        file.seek(SeekFrom::Start(0))?;
        for n in 0..num_blocks {
            file.read_exact(&mut buffer)?;
            if read_u32(&buffer, 0) == 0 {
                free.insert(n);
            }
        }
        if !free.is_empty() {
            debug!(
                "{}: rebuilt free list with {} of {} blocks",
                path.display(),
                free.len(),
                num_blocks
            );
        }

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!("opened block file {} ({} blocks)", path.display(), num_blocks);

        Ok(Self {
            label,
            path,
            block_size,
            fsync_enabled,
            inner: Mutex::new(FileState {
                file: Some(file),
                num_blocks,
                free,
            }),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of blocks in the file, free ones included.
    pub fn num_blocks(&self) -> u32 {
        self.inner.lock().num_blocks
    }

    fn offset(&self, id: BlockId) -> u64 {
        id.0 as u64 * self.block_size as u64
    }

    fn closed_err(&self) -> TrellisError {
        TrellisError::Closed(self.label.clone())
    }
}

impl FileState {
    fn is_live(&self, id: BlockId) -> bool {
        id.0 < self.num_blocks && !self.free.contains(&id.0)
    }
}

impl BlockMgr for BlockMgrFile {
    fn label(&self) -> &str {
        &self.label
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate(&self) -> Result<BlockId> {
        let mut state = self.inner.lock();
        if state.file.is_none() {
            return Err(self.closed_err());
        }
        if let Some(n) = state.free.pop_first() {
            return Ok(BlockId(n));
        }

        let id = BlockId(state.num_blocks);
        let offset = self.offset(id);
        let block_size = self.block_size;
        let file = state.file.as_mut().ok_or_else(|| self.closed_err())?;

        // Write an empty block to extend the file
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&vec![0u8; block_size])?;

        state.num_blocks += 1;
        Ok(id)
    }

    fn read(&self, id: BlockId) -> Result<Bytes> {
        let mut state = self.inner.lock();
        if state.file.is_none() {
            return Err(self.closed_err());
        }
        if !state.is_live(id) {
            return Err(TrellisError::BlockNotFound { block_id: id });
        }

        let offset = self.offset(id);
        let file = state.file.as_mut().ok_or_else(|| self.closed_err())?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = BytesMut::zeroed(self.block_size);
        file.read_exact(&mut buffer)?;
        Ok(buffer.freeze())
    }

    fn write(&self, id: BlockId, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            return Err(TrellisError::BlockSizeMismatch {
                expected: self.block_size,
                actual: data.len(),
            });
        }
        let mut state = self.inner.lock();
        if state.file.is_none() {
            return Err(self.closed_err());
        }
        if !state.is_live(id) {
            return Err(TrellisError::BlockNotFound { block_id: id });
        }

        let offset = self.offset(id);
        let file = state.file.as_mut().ok_or_else(|| self.closed_err())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn free(&self, id: BlockId) -> Result<()> {
        let mut state = self.inner.lock();
        if state.file.is_none() {
            return Err(self.closed_err());
        }
        if !state.is_live(id) {
            return Err(TrellisError::BlockNotFound { block_id: id });
        }

        let offset = self.offset(id);
        let block_size = self.block_size;
        let file = state.file.as_mut().ok_or_else(|| self.closed_err())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&vec![0u8; block_size])?;

        state.free.insert(id.0);
        Ok(())
    }

    fn is_valid(&self, id: BlockId) -> bool {
        let state = self.inner.lock();
        state.file.is_some() && state.is_live(id)
    }

    fn allocated(&self) -> Vec<BlockId> {
        let state = self.inner.lock();
        (0..state.num_blocks)
            .filter(|n| !state.free.contains(n))
            .map(BlockId)
            .collect()
    }

    fn sync(&self) -> Result<()> {
        let mut state = self.inner.lock();
        let file = state.file.as_mut().ok_or_else(|| self.closed_err())?;
        file.flush()?;
        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(mut file) = state.file.take() {
            file.flush()?;
            if self.fsync_enabled {
                file.sync_all()?;
            }
            debug!("closed block file {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for BlockMgrFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
