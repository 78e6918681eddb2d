//! Block storage for Trellis.
//!
//! This crate provides:
//! - The `BlockMgr` contract for fixed-size block storage
//! - In-memory and file-backed block managers
//! - A tracker that enforces read/update brackets
//! - A clock-evicting cache for decoded pages

mod block_mgr;
mod cache;
mod file;
mod mem;
mod replacer;
mod tracker;

pub use block_mgr::BlockMgr;
pub use cache::PageCache;
pub use file::BlockMgrFile;
pub use mem::BlockMgrMem;
pub use replacer::{ClockReplacer, Replacer, SlotId};
pub use tracker::BlockMgrTracker;

use trellis_common::{Result, StorageConfig};

/// Opens the block manager for `<name>.<ext>` as described by `config`.
///
/// Returns a file-backed manager under `data_dir`, or an in-memory one when
/// `in_memory` is set, wrapped in a `BlockMgrTracker` when `track_brackets`
/// is set.
pub fn open_block_mgr(
    config: &StorageConfig,
    name: &str,
    ext: &str,
    block_size: usize,
) -> Result<Box<dyn BlockMgr>> {
    config.validate()?;

    let mgr: Box<dyn BlockMgr> = if config.in_memory {
        Box::new(BlockMgrMem::new(format!("{name}.{ext}"), block_size))
    } else {
        let path = config.block_file_path(name, ext);
        Box::new(BlockMgrFile::open(path, block_size, config.fsync_enabled)?)
    };

    if config.track_brackets {
        Ok(Box::new(BlockMgrTracker::new(mgr)))
    } else {
        Ok(mgr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use trellis_common::{BlockId, TrellisError};

    #[test]
    fn test_open_in_memory() {
        let mgr = open_block_mgr(&StorageConfig::in_memory(), "idx", "dat", 64).unwrap();
        assert_eq!(mgr.label(), "idx.dat");
        assert_eq!(mgr.block_size(), 64);
        assert_eq!(mgr.allocate().unwrap(), BlockId(0));
    }

    #[test]
    fn test_open_file() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            fsync_enabled: false,
            ..StorageConfig::with_data_dir(dir.path())
        };
        let mgr = open_block_mgr(&config, "idx", "idn", 32).unwrap();
        mgr.allocate().unwrap();
        mgr.sync().unwrap();
        assert!(dir.path().join("idx.idn").exists());
    }

    #[test]
    fn test_open_tracked() {
        let config = StorageConfig {
            track_brackets: true,
            ..StorageConfig::in_memory()
        };
        let mgr = open_block_mgr(&config, "idx", "dat", 32).unwrap();
        assert!(matches!(
            mgr.allocate(),
            Err(TrellisError::BracketViolation(_))
        ));
        mgr.start_update().unwrap();
        assert!(mgr.allocate().is_ok());
        mgr.finish_update().unwrap();
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = StorageConfig {
            cache_pages: 0,
            ..StorageConfig::in_memory()
        };
        assert!(open_block_mgr(&config, "idx", "dat", 32).is_err());
    }
}
