//! Capabilities shared by leaf and internal pages.

use crate::params::BPlusTreeParams;
use crate::record::Record;
use trellis_common::{BlockId, Result};

/// Conversion between a decoded page and its block image.
pub trait PageCodec: Clone + Send {
    /// Block id the page is stored under.
    fn id(&self) -> BlockId;

    /// Writes the full block image into `buf`, which is `block_size` bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a block image.
    fn decode(id: BlockId, buf: &[u8], params: &BPlusTreeParams) -> Result<Self>;

    /// Records the page's parent as seen by the current descent.
    fn set_parent(&mut self, _parent: BlockId) {}
}

/// Structural operations the tree applies uniformly to leaves and nodes.
///
/// Sibling operations are always invoked on the lower-keyed page with its
/// right-hand sibling as argument. `separator` is the parent key that
/// divides the two pages; nodes rotate it through, leaves ignore it. The
/// returned record, when present, replaces that parent key.
pub trait BPTreePage: PageCodec {
    /// Entries held: records for leaves, separator keys for nodes.
    fn count(&self) -> usize;

    /// Capacity in entries.
    fn max_size(&self) -> usize;

    /// Minimum entries for a page that is not the root.
    fn min_size(&self) -> usize;

    fn is_full(&self) -> bool {
        self.count() >= self.max_size()
    }

    /// True if the page can give up an entry and stay at minimum occupancy.
    fn can_lend(&self) -> bool {
        self.count() > self.min_size()
    }

    fn low_record(&self) -> Option<Record>;

    fn high_record(&self) -> Option<Record>;

    /// Splits a full page, moving its upper part to a new page `new_id`.
    ///
    /// Returns the separator to insert into the parent and the new page.
    ///
    /// # Panics
    ///
    /// Panics if the page is not full.
    fn split(&mut self, new_id: BlockId) -> (Record, Self);

    /// Moves one boundary entry from this page into `right`.
    fn shift_right(&mut self, right: &mut Self, separator: Option<&Record>)
        -> Result<Option<Record>>;

    /// Moves one boundary entry from `right` into this page.
    fn shift_left(&mut self, right: &mut Self, separator: Option<&Record>)
        -> Result<Option<Record>>;

    /// Absorbs every entry of `right`. The caller frees `right`'s block and
    /// drops `separator` from the parent.
    fn merge(&mut self, right: Self, separator: Option<&Record>) -> Result<()>;
}
