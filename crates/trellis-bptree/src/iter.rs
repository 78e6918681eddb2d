//! Forward range scans along the leaf chain.

use crate::page::{BPTreePage, PageCodec};
use crate::page_mgr::BPTreeRecordsMgr;
use crate::record::Record;
use crate::records::BPTreeRecords;
use trellis_common::{BlockId, Result, TrellisError};

/// Lazy scan over records in key order, ending before an optional upper key.
///
/// The scan holds a copy of the current leaf and fetches the next one, inside
/// its own read bracket, only when the copy is exhausted. It reflects the
/// tree as each leaf is reached and is not stable across concurrent changes.
/// A leaf chain that loops or yields keys out of order ends the scan with
/// `TreeCorrupted`.
pub struct RecordRangeIter<'a> {
    records: &'a BPTreeRecordsMgr,
    leaf: Option<BPTreeRecords>,
    pos: usize,
    to: Option<Record>,
    last: Option<Record>,
    hops: usize,
    max_hops: usize,
}

impl<'a> RecordRangeIter<'a> {
    pub(crate) fn new(
        records: &'a BPTreeRecordsMgr,
        leaf: BPTreeRecords,
        pos: usize,
        to: Option<Record>,
    ) -> Self {
        Self {
            records,
            leaf: Some(leaf),
            pos,
            to,
            last: None,
            hops: 0,
            max_hops: records.allocated().len(),
        }
    }

    fn corrupted(&mut self, msg: String) -> Option<Result<Record>> {
        self.leaf = None;
        Some(Err(TrellisError::TreeCorrupted(msg)))
    }

    fn fetch(&self, id: BlockId) -> Result<BPTreeRecords> {
        self.records.start_read()?;
        let leaf = self.records.get_read(id, BlockId::NONE);
        let finished = self.records.finish_read();
        let leaf = leaf?;
        finished?;
        Ok(leaf)
    }
}

impl Iterator for RecordRangeIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;
            if self.pos < leaf.count() {
                let record = leaf.get(self.pos);
                self.pos += 1;
                if let Some(to) = &self.to {
                    if record.key() >= to.key() {
                        self.leaf = None;
                        return None;
                    }
                }
                if self.last.as_ref().is_some_and(|last| record.key() <= last.key()) {
                    let msg = format!("leaf R{} breaks key order at {}", leaf.id(), record);
                    return self.corrupted(msg);
                }
                self.last = Some(record.key_only());
                return Some(Ok(record));
            }

            let next = leaf.link();
            if !next.is_some() {
                self.leaf = None;
                return None;
            }
            self.hops += 1;
            if self.hops > self.max_hops {
                return self.corrupted("leaf chain does not terminate".to_string());
            }
            match self.fetch(next) {
                Ok(leaf) => {
                    self.leaf = Some(leaf);
                    self.pos = 0;
                }
                Err(e) => {
                    self.leaf = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
