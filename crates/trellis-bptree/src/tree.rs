//! The B+Tree: search, insert, delete and range scans over paged storage.

use crate::check::check_tree;
use crate::constants::{MAX_HEIGHT, NODE_FILE_EXT, RECORDS_FILE_EXT, ROOT_PARENT};
use crate::iter::RecordRangeIter;
use crate::node::BPTreeNode;
use crate::page::{BPTreePage, PageCodec};
use crate::page_mgr::{BPTreeNodeMgr, BPTreeRecordsMgr, PageMgr};
use crate::params::BPlusTreeParams;
use crate::record::Record;
use crate::records::BPTreeRecords;
use log::{debug, info, trace};
use parking_lot::Mutex;
use trellis_block::open_block_mgr;
use trellis_common::{BlockId, Result, StorageConfig, TrellisError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bracket {
    Read,
    Update,
}

impl std::fmt::Display for Bracket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bracket::Read => write!(f, "read"),
            Bracket::Update => write!(f, "update"),
        }
    }
}

/// Bracket open on both managers and how many callers share it.
#[derive(Debug, Default)]
struct BracketState {
    open: Option<Bracket>,
    depth: usize,
}

/// One step of a root-to-leaf descent: the node visited and the child taken.
struct PathStep {
    node: BPTreeNode,
    idx: usize,
}

/// A B+Tree of fixed-length records.
///
/// Internal nodes and leaves live in separate page managers. The tree owns
/// the current root id, which moves when the root splits or collapses.
/// Every public operation runs inside a read or update bracket on both
/// managers. It opens its own bracket unless the caller already holds one,
/// in which case it joins it. Structural changes are written back when the
/// outermost update bracket closes.
pub struct BPlusTree {
    params: BPlusTreeParams,
    nodes: BPTreeNodeMgr,
    records: BPTreeRecordsMgr,
    root: BlockId,
    checking: bool,
    brackets: Mutex<BracketState>,
}

/// Initializes an empty tree: leaf page 0 under a root node with one child.
///
/// Both managers must be empty and inside an update bracket. Returns the
/// root node id.
pub fn create_empty_bpt(nodes: &BPTreeNodeMgr, records: &BPTreeRecordsMgr) -> Result<BlockId> {
    let leaf = records.create()?;
    records.put(&leaf)?;

    let mut root = nodes.create_node(ROOT_PARENT, true)?;
    root.push_child(leaf.id());
    nodes.put(&root)?;
    Ok(root.id())
}

impl BPlusTree {
    /// Wraps existing managers whose tree is rooted at `root`.
    pub fn new(
        params: BPlusTreeParams,
        nodes: BPTreeNodeMgr,
        records: BPTreeRecordsMgr,
        root: BlockId,
    ) -> Self {
        Self {
            params,
            nodes,
            records,
            root,
            checking: false,
            brackets: Mutex::new(BracketState::default()),
        }
    }

    /// Creates an empty tree held entirely in memory.
    pub fn create_in_memory(params: BPlusTreeParams) -> Result<Self> {
        Self::create(params, &StorageConfig::in_memory(), "bpt")
    }

    /// Creates an empty tree in the block files `<name>.idn` and `<name>.dat`.
    ///
    /// Fails if either file already holds blocks.
    pub fn create(params: BPlusTreeParams, config: &StorageConfig, name: &str) -> Result<Self> {
        let (nodes, records) = Self::open_managers(&params, config, name)?;
        if !nodes.allocated().is_empty() || !records.allocated().is_empty() {
            return Err(TrellisError::ConfigError(format!(
                "index {name} already exists, attach to it instead"
            )));
        }

        let mut tree = Self::new(params, nodes, records, BlockId::NONE);
        tree.checking = config.check_structure;
        tree.update_op(|t| {
            t.root = create_empty_bpt(&t.nodes, &t.records)?;
            Ok(())
        })?;
        info!("created B+Tree {name} ({params}), root N{}", tree.root);
        Ok(tree)
    }

    /// Opens an existing tree rooted at node `root`.
    pub fn attach(
        params: BPlusTreeParams,
        config: &StorageConfig,
        name: &str,
        root: BlockId,
    ) -> Result<Self> {
        let (nodes, records) = Self::open_managers(&params, config, name)?;
        if !nodes.is_valid(root) {
            return Err(TrellisError::BlockNotFound { block_id: root });
        }

        let mut tree = Self::new(params, nodes, records, root);
        tree.checking = config.check_structure;
        tree.read_op(|t| t.nodes.get_read(t.root, ROOT_PARENT).map(|_| ()))?;
        if tree.checking {
            tree.check()?;
        }
        info!("attached B+Tree {name} ({params}), root N{root}");
        Ok(tree)
    }

    fn open_managers(
        params: &BPlusTreeParams,
        config: &StorageConfig,
        name: &str,
    ) -> Result<(BPTreeNodeMgr, BPTreeRecordsMgr)> {
        params.validate()?;
        let node_blocks = open_block_mgr(config, name, NODE_FILE_EXT, params.block_size)?;
        let record_blocks = open_block_mgr(config, name, RECORDS_FILE_EXT, params.block_size)?;
        Ok((
            PageMgr::new(node_blocks, *params, config.cache_pages)?,
            PageMgr::new(record_blocks, *params, config.cache_pages)?,
        ))
    }

    pub fn params(&self) -> &BPlusTreeParams {
        &self.params
    }

    /// Current root node id.
    pub fn root_id(&self) -> BlockId {
        self.root
    }

    pub fn node_mgr(&self) -> &BPTreeNodeMgr {
        &self.nodes
    }

    pub fn records_mgr(&self) -> &BPTreeRecordsMgr {
        &self.records
    }

    /// Runs the full structural check after every mutation when enabled.
    pub fn set_checking(&mut self, checking: bool) {
        self.checking = checking;
    }

    /// Opens a read bracket, or joins the bracket already open on the tree.
    pub fn start_read(&self) -> Result<()> {
        self.open_bracket(Bracket::Read)
    }

    pub fn finish_read(&self) -> Result<()> {
        self.close_bracket(Bracket::Read)
    }

    /// Opens an update bracket. Operations run until the matching
    /// `finish_update` join it, and their pages are written back only when
    /// the outermost bracket closes.
    pub fn start_update(&self) -> Result<()> {
        self.open_bracket(Bracket::Update)
    }

    pub fn finish_update(&self) -> Result<()> {
        self.close_bracket(Bracket::Update)
    }

    fn open_bracket(&self, kind: Bracket) -> Result<()> {
        let mut state = self.brackets.lock();
        match state.open {
            Some(Bracket::Read) if kind == Bracket::Update => {
                return Err(TrellisError::BracketViolation(
                    "start_update inside a read bracket".to_string(),
                ));
            }
            Some(_) => {
                state.depth += 1;
                return Ok(());
            }
            None => {}
        }

        match kind {
            Bracket::Read => {
                self.nodes.start_read()?;
                if let Err(e) = self.records.start_read() {
                    let _ = self.nodes.finish_read();
                    return Err(e);
                }
            }
            Bracket::Update => {
                self.nodes.start_update()?;
                if let Err(e) = self.records.start_update() {
                    let _ = self.nodes.finish_update();
                    return Err(e);
                }
            }
        }
        state.open = Some(kind);
        state.depth = 1;
        Ok(())
    }

    fn close_bracket(&self, kind: Bracket) -> Result<()> {
        let mut state = self.brackets.lock();
        let Some(open) = state.open else {
            return Err(TrellisError::BracketViolation(format!(
                "finish_{kind} without start_{kind}"
            )));
        };
        if open == Bracket::Read && kind == Bracket::Update {
            return Err(TrellisError::BracketViolation(
                "finish_update inside a read bracket".to_string(),
            ));
        }

        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }
        state.open = None;
        match open {
            Bracket::Read => {
                let nodes = self.nodes.finish_read();
                let records = self.records.finish_read();
                nodes.and(records)
            }
            Bracket::Update => {
                let nodes = self.nodes.finish_update();
                let records = self.records.finish_update();
                nodes.and(records)
            }
        }
    }

    fn read_op<T>(&self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.start_read()?;
        let result = op(self);
        let finished = self.finish_read();
        let value = result?;
        finished?;
        Ok(value)
    }

    fn update_op<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.start_update()?;
        let result = op(self);
        let finished = self.finish_update();
        let value = result?;
        finished?;
        if self.checking {
            self.check()?;
        }
        Ok(value)
    }

    fn check_key(&self, key: &Record) -> Result<()> {
        if key.key_len() != self.params.key_len {
            return Err(TrellisError::RecordLength {
                expected: self.params.key_len,
                actual: key.key_len(),
            });
        }
        Ok(())
    }

    fn check_record(&self, record: &Record) -> Result<()> {
        self.check_key(record)?;
        if record.len() != self.params.record_len() {
            return Err(TrellisError::RecordLength {
                expected: self.params.record_len(),
                actual: record.len(),
            });
        }
        Ok(())
    }

    /// Descends from the root to the leaf that covers `key`, fetching pages
    /// for reading or for modification as `access` says.
    fn descend(&self, key: &[u8], access: Bracket) -> Result<(Vec<PathStep>, BPTreeRecords)> {
        let mut path = Vec::new();
        let mut node = fetch(&self.nodes, self.root, ROOT_PARENT, access)?;
        loop {
            if path.len() >= MAX_HEIGHT {
                return Err(TrellisError::TreeCorrupted(format!(
                    "descent from N{} exceeded {} levels",
                    self.root, MAX_HEIGHT
                )));
            }
            let idx = node.find_child_index(key);
            let child = node.child(idx);
            let parent = node.id();
            let is_leaf = node.is_leaf();
            path.push(PathStep { node, idx });

            if is_leaf {
                let leaf = fetch(&self.records, child, parent, access)?;
                return Ok((path, leaf));
            }
            node = fetch(&self.nodes, child, parent, access)?;
        }
    }

    /// Leftmost or rightmost leaf, and the number of node levels above it.
    fn edge_leaf(&self, rightmost: bool) -> Result<(BPTreeRecords, usize)> {
        let mut node = self.nodes.get_read(self.root, ROOT_PARENT)?;
        let mut levels = 1;
        loop {
            let idx = if rightmost { node.child_count() - 1 } else { 0 };
            let child = node.child(idx);
            if node.is_leaf() {
                return Ok((self.records.get_read(child, node.id())?, levels));
            }
            if levels >= MAX_HEIGHT {
                return Err(TrellisError::TreeCorrupted(format!(
                    "descent from N{} exceeded {} levels",
                    self.root, MAX_HEIGHT
                )));
            }
            node = self.nodes.get_read(child, node.id())?;
            levels += 1;
        }
    }

    /// Finds the record with `key`'s key.
    pub fn search(&self, key: &Record) -> Result<Option<Record>> {
        self.check_key(key)?;
        self.read_op(|t| {
            let (_, leaf) = t.descend(key.key(), Bracket::Read)?;
            Ok(leaf.internal_search(key))
        })
    }

    pub fn contains(&self, key: &Record) -> Result<bool> {
        Ok(self.search(key)?.is_some())
    }

    /// Inserts `record`. A key-equal record already present is replaced and
    /// returned.
    pub fn insert(&mut self, record: Record) -> Result<Option<Record>> {
        self.check_record(&record)?;
        self.update_op(|t| t.insert_inner(&record))
    }

    fn insert_inner(&mut self, record: &Record) -> Result<Option<Record>> {
        let (path, mut leaf) = self.descend(record.key(), Bracket::Update)?;

        if !leaf.is_full() || leaf.internal_search(record).is_some() {
            let old = leaf.internal_insert(record);
            self.records.put(&leaf)?;
            return Ok(old);
        }

        let new_id = self.records.allocate()?;
        let (mut separator, mut right) = leaf.split(new_id);
        if record.key() < separator.key() {
            leaf.internal_insert(record);
        } else {
            right.internal_insert(record);
        }
        // With an odd capacity the upper half starts one short of minimum.
        if right.count() < right.min_size() {
            if let Some(moved) = leaf.shift_right(&mut right, None)? {
                separator = moved;
            }
        }

        self.records.put(&leaf)?;
        self.records.put(&right)?;
        self.insert_into_parent(path, separator, new_id)?;
        Ok(None)
    }

    /// Adds `separator` and its right child to the parents on `path`,
    /// splitting full nodes upward and growing a new root if needed.
    fn insert_into_parent(
        &mut self,
        mut path: Vec<PathStep>,
        mut separator: Record,
        mut right_id: BlockId,
    ) -> Result<()> {
        while let Some(PathStep { mut node, idx }) = path.pop() {
            if !node.is_full() {
                node.insert_separator(idx, &separator, right_id);
                return self.nodes.put(&node);
            }

            let new_id = self.nodes.allocate()?;
            let (promoted, mut right) = node.split(new_id);
            let left_children = node.child_count();
            if idx < left_children {
                node.insert_separator(idx, &separator, right_id);
            } else {
                right.insert_separator(idx - left_children, &separator, right_id);
            }
            self.nodes.put(&node)?;
            self.nodes.put(&right)?;

            if path.is_empty() {
                let mut root = self.nodes.create_node(ROOT_PARENT, false)?;
                root.push_child(node.id());
                root.insert_separator(0, &promoted, new_id);
                self.nodes.put(&root)?;
                debug!(
                    "root N{} split, new root N{} over N{} and N{}",
                    node.id(),
                    root.id(),
                    node.id(),
                    new_id
                );
                self.root = root.id();
                return Ok(());
            }
            separator = promoted;
            right_id = new_id;
        }
        Ok(())
    }

    /// Deletes the record with `key`'s key, returning it if it was present.
    pub fn delete(&mut self, key: &Record) -> Result<Option<Record>> {
        self.check_key(key)?;
        self.update_op(|t| t.delete_inner(key))
    }

    fn delete_inner(&mut self, key: &Record) -> Result<Option<Record>> {
        let (mut path, mut leaf) = self.descend(key.key(), Bracket::Update)?;
        let Some(removed) = leaf.internal_delete(key) else {
            return Ok(None);
        };

        let Some(PathStep {
            node: mut parent,
            idx,
        }) = path.pop()
        else {
            return Err(TrellisError::TreeCorrupted(
                "leaf reached without a parent".to_string(),
            ));
        };

        // A lone leaf under the root may drop below minimum.
        if leaf.count() >= leaf.min_size() || parent.count() == 0 {
            self.records.put(&leaf)?;
            return Ok(Some(removed));
        }

        if rebalance(&self.records, &mut parent, idx, leaf)? {
            self.fix_node_underflow(path, parent)?;
        } else {
            self.nodes.put(&parent)?;
        }
        Ok(Some(removed))
    }

    /// Restores occupancy of `node`, which lost a separator to a merge
    /// below it, walking up `path` while merges keep cascading.
    fn fix_node_underflow(&mut self, mut path: Vec<PathStep>, mut node: BPTreeNode) -> Result<()> {
        loop {
            let Some(PathStep {
                node: mut parent,
                idx,
            }) = path.pop()
            else {
                return self.settle_root(node);
            };

            if node.count() >= node.min_size() {
                return self.nodes.put(&node);
            }
            if !rebalance(&self.nodes, &mut parent, idx, node)? {
                return self.nodes.put(&parent);
            }
            node = parent;
        }
    }

    /// Stores the root, or drops it when it is left with a single node child.
    fn settle_root(&mut self, root: BPTreeNode) -> Result<()> {
        if root.count() > 0 || root.is_leaf() {
            return self.nodes.put(&root);
        }
        let child = root.child(0);
        self.nodes.free(root.id())?;
        debug!("root N{} collapsed, new root N{}", root.id(), child);
        self.root = child;
        Ok(())
    }

    /// Lazily yields records with `from <= key < to` in key order.
    ///
    /// Either bound may be None. Each call starts a fresh scan of the
    /// current tree; leaves are fetched as the scan reaches them.
    pub fn iterate(&self, from: Option<&Record>, to: Option<&Record>) -> Result<RecordRangeIter<'_>> {
        if let Some(from) = from {
            self.check_key(from)?;
        }
        if let Some(to) = to {
            self.check_key(to)?;
        }

        let (leaf, pos) = self.read_op(|t| match from {
            Some(from) => {
                let (_, leaf) = t.descend(from.key(), Bracket::Read)?;
                let pos = match leaf.buffer().find(from.key()) {
                    Ok(pos) | Err(pos) => pos,
                };
                Ok((leaf, pos))
            }
            None => Ok((t.edge_leaf(false)?.0, 0)),
        })?;
        trace!("scan starts at R{} slot {}", leaf.id(), pos);
        Ok(RecordRangeIter::new(
            &self.records,
            leaf,
            pos,
            to.map(Record::key_only),
        ))
    }

    /// Iterates every record in key order.
    pub fn iter(&self) -> Result<RecordRangeIter<'_>> {
        self.iterate(None, None)
    }

    /// Record with the smallest key.
    pub fn min_key(&self) -> Result<Option<Record>> {
        self.read_op(|t| Ok(t.edge_leaf(false)?.0.low_record()))
    }

    /// Record with the largest key.
    pub fn max_key(&self) -> Result<Option<Record>> {
        self.read_op(|t| Ok(t.edge_leaf(true)?.0.high_record()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.read_op(|t| Ok(t.edge_leaf(false)?.0.count() == 0))
    }

    /// Number of records, counted along the leaf chain.
    pub fn size(&self) -> Result<usize> {
        self.read_op(|t| {
            let (mut leaf, _) = t.edge_leaf(false)?;
            let mut total = leaf.count();
            let mut hops = 0;
            let max_hops = t.records.allocated().len();
            while leaf.link().is_some() {
                hops += 1;
                if hops > max_hops {
                    return Err(TrellisError::TreeCorrupted(
                        "leaf chain does not terminate".to_string(),
                    ));
                }
                leaf = t.records.get_read(leaf.link(), BlockId::NONE)?;
                total += leaf.count();
            }
            Ok(total)
        })
    }

    /// Levels from root to leaves, leaves included.
    pub fn height(&self) -> Result<usize> {
        self.read_op(|t| Ok(t.edge_leaf(false)?.1 + 1))
    }

    /// Renders every node, then every leaf, in allocation order.
    pub fn dump(&self) -> Result<String> {
        self.read_op(|t| {
            let mut out = format!("BPlusTree root=N{} {}\n", t.root, t.params);
            for id in t.nodes.allocated() {
                let node = t.nodes.get_read(id, BlockId::NONE)?;
                out.push_str(&node.to_string());
                out.push('\n');
            }
            for id in t.records.allocated() {
                let leaf = t.records.get_read(id, BlockId::NONE)?;
                out.push_str(&leaf.to_string());
                out.push('\n');
            }
            Ok(out)
        })
    }

    /// Walks the whole tree and verifies every structural invariant.
    pub fn check(&self) -> Result<()> {
        self.read_op(|t| check_tree(&t.nodes, &t.records, t.root))
    }

    /// Writes cached changes and syncs both block managers.
    pub fn sync(&self) -> Result<()> {
        self.nodes.sync()?;
        self.records.sync()
    }

    /// Flushes and closes both block managers.
    pub fn close(self) -> Result<()> {
        let nodes = self.nodes.close();
        let records = self.records.close();
        nodes.and(records)
    }
}

/// Fetches a page for reading or for modification.
fn fetch<P: PageCodec>(
    mgr: &PageMgr<P>,
    id: BlockId,
    parent: BlockId,
    access: Bracket,
) -> Result<P> {
    match access {
        Bracket::Read => mgr.get_read(id, parent),
        Bracket::Update => mgr.get_write(id, parent),
    }
}

/// Fixes an underfull child `page` at `idx` of `parent`.
///
/// Borrows one entry from the left sibling, else from the right sibling,
/// else merges into the left sibling, else merges the right sibling in.
/// Returns true if a merge removed a separator from `parent`; the caller
/// then owns storing `parent`.
fn rebalance<P: BPTreePage>(
    mgr: &PageMgr<P>,
    parent: &mut BPTreeNode,
    idx: usize,
    mut page: P,
) -> Result<bool> {
    let pid = parent.id();

    let mut left = if idx > 0 {
        Some(mgr.get_write(parent.child(idx - 1), pid)?)
    } else {
        None
    };
    if let Some(left) = left.as_mut().filter(|l| l.can_lend()) {
        let separator = parent.key(idx - 1);
        if let Some(new_separator) = left.shift_right(&mut page, Some(&separator))? {
            parent.set_key(idx - 1, &new_separator);
        }
        mgr.put(left)?;
        mgr.put(&page)?;
        return Ok(false);
    }

    let mut right = if idx + 1 < parent.child_count() {
        Some(mgr.get_write(parent.child(idx + 1), pid)?)
    } else {
        None
    };
    if let Some(right) = right.as_mut().filter(|r| r.can_lend()) {
        let separator = parent.key(idx);
        if let Some(new_separator) = page.shift_left(right, Some(&separator))? {
            parent.set_key(idx, &new_separator);
        }
        mgr.put(right)?;
        mgr.put(&page)?;
        return Ok(false);
    }

    if let Some(mut left) = left {
        let separator = parent.key(idx - 1);
        let page_id = page.id();
        left.merge(page, Some(&separator))?;
        parent.remove_separator(idx - 1);
        mgr.put(&left)?;
        mgr.free(page_id)?;
        return Ok(true);
    }

    if let Some(right) = right {
        let separator = parent.key(idx);
        let right_id = right.id();
        page.merge(right, Some(&separator))?;
        parent.remove_separator(idx);
        mgr.put(&page)?;
        mgr.free(right_id)?;
        return Ok(true);
    }

    Err(TrellisError::TreeCorrupted(format!(
        "page {} under N{} has no sibling",
        page.id(),
        pid
    )))
}
