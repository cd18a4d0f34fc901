//! Immutable Merkle Search Tree operations

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;
use tokio::sync::OnceCell;

use super::cursor::{Direction, KeyRange, MstCursor};
use super::node::{NodeData, NodeEntry};
use super::util;
use crate::error::{RepoError, Result};
use crate::storage::BlockStore;

/// Boxed future returned by the recursive tree operations
pub type MstFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Immutable Merkle Search Tree
///
/// MST operations return new tree instances, leaving the original unchanged.
/// Old roots stay readable for as long as their blocks are in storage, which
/// is what lets readers walk a snapshot while a writer builds the next one.
///
/// # Architecture
///
/// The tree uses a flat `Vec<NodeEntry>` representation in memory, where
/// `NodeEntry` is an enum of `Tree` (subtree) and `Leaf` (key-value pair).
/// Entries are interleaved: `[Tree, Leaf, Tree, Leaf, Leaf, Tree]` etc.
///
/// The wire format (CBOR) uses prefix compression and pointers (left/tree).
/// See `NodeData` and `TreeEntry` in node.rs for serialization format.
///
/// # Layer-based structure
///
/// Keys are hashed (SHA-256) and leading zero bits determine layer:
/// - More leading zeros = higher layer
/// - Layer = floor(leading_zeros / 2) for ~4 fanout
/// - Every key lives in a node at its own layer, so the shape (and the root
///   CID) depends only on the set of key/value pairs
pub struct Mst<S> {
    /// Block storage for loading/saving nodes (shared via Arc)
    storage: Arc<S>,

    /// Flat list of entries, loaded from storage on first access
    entries: Arc<OnceCell<Vec<NodeEntry<S>>>>,

    /// CID of this node, computed from entries on first access
    pointer: Arc<OnceCell<IpldCid>>,

    /// Layer hint for this node
    ///
    /// `None` means layer unknown (will be computed from entries).
    layer: Option<usize>,
}

impl<S> Clone for Mst<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            entries: self.entries.clone(),
            pointer: self.pointer.clone(),
            layer: self.layer,
        }
    }
}

impl<S> fmt::Debug for Mst<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mst")
            .field("pointer", &self.pointer.get())
            .field("loaded", &self.entries.initialized())
            .field("layer", &self.layer)
            .finish()
    }
}

impl<S: BlockStore + Send + Sync + 'static> Mst<S> {
    /// Create empty MST
    pub fn new(storage: Arc<S>) -> Self {
        Self::create(storage, Vec::new(), Some(0))
    }

    /// Create MST with existing entries
    ///
    /// The CID is computed lazily; nothing is written to storage.
    pub(crate) fn create(storage: Arc<S>, entries: Vec<NodeEntry<S>>, layer: Option<usize>) -> Self {
        Self {
            storage,
            entries: Arc::new(OnceCell::new_with(Some(entries))),
            pointer: Arc::new(OnceCell::new()),
            layer,
        }
    }

    /// Load MST from CID (lazy)
    ///
    /// Doesn't actually load from storage until entries are accessed.
    pub fn load(storage: Arc<S>, cid: IpldCid, layer: Option<usize>) -> Self {
        Self {
            storage,
            entries: Arc::new(OnceCell::new()),
            pointer: Arc::new(OnceCell::new_with(Some(cid))),
            layer,
        }
    }

    /// Sibling tree with different entries at the same layer
    fn new_tree(&self, entries: Vec<NodeEntry<S>>) -> Self {
        Self::create(self.storage.clone(), entries, self.layer)
    }

    /// Get entries (lazy load if needed)
    pub(crate) async fn get_entries(&self) -> Result<&[NodeEntry<S>]> {
        let entries = self
            .entries
            .get_or_try_init(|| async {
                let pointer = *self.pointer.get().ok_or_else(|| {
                    RepoError::invalid_mst("node has neither entries nor a pointer")
                })?;
                let node_bytes = self
                    .storage
                    .get(&pointer)
                    .await?
                    .ok_or_else(|| RepoError::not_found("MST node", pointer))?;

                let node_data: NodeData =
                    serde_ipld_dagcbor::from_slice(&node_bytes).map_err(RepoError::encoding)?;

                util::deserialize_node_data(self.storage.clone(), &node_data, self.layer)
            })
            .await?;
        Ok(entries.as_slice())
    }

    /// Get CID pointer, computing it from entries if needed
    ///
    /// Doesn't persist to storage. Use `collect_blocks()` to gather blocks for persistence.
    pub async fn get_pointer(&self) -> Result<IpldCid> {
        let cid = self
            .pointer
            .get_or_try_init(|| async {
                let entries = self.get_entries().await?;
                let node_data = util::serialize_node_data(entries).await?;
                Ok::<_, RepoError>(util::node_to_cid(&node_data)?.0)
            })
            .await?;
        Ok(*cid)
    }

    /// Get root CID (alias for get_pointer)
    pub async fn root(&self) -> Result<IpldCid> {
        self.get_pointer().await
    }

    /// Get shared reference to the block storage
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Whether this node holds no entries
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.get_entries().await?.is_empty())
    }

    /// Get the layer of this node
    ///
    /// Layer is the layer of any leaf key in this node. For nodes with no
    /// leaves, one above the first subtree.
    fn get_layer(&self) -> MstFuture<'_, usize> {
        Box::pin(async move {
            if let Some(layer) = self.layer {
                return Ok(layer);
            }

            let entries = self.get_entries().await?;

            if let Some(key) = entries.iter().find_map(NodeEntry::leaf_key) {
                return Ok(util::layer_for_key(key));
            }

            for entry in entries {
                if let NodeEntry::Tree(subtree) = entry {
                    let child_layer = subtree.get_layer().await?;
                    return Ok(child_layer + 1);
                }
            }

            Ok(0)
        })
    }

    /// Find index of first leaf >= key
    ///
    /// Returns `entries.len()` if all leaves are < key.
    pub(crate) fn find_gt_or_equal_leaf_index_in(entries: &[NodeEntry<S>], key: &str) -> usize {
        entries
            .iter()
            .position(|entry| matches!(entry.leaf_key(), Some(leaf_key) if leaf_key >= key))
            .unwrap_or(entries.len())
    }

    /// Get a value by key
    pub fn get<'a>(&'a self, key: &'a str) -> MstFuture<'a, Option<IpldCid>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(entries, key);

            if let Some(NodeEntry::Leaf {
                key: leaf_key,
                value,
            }) = entries.get(index)
            {
                if leaf_key.as_str() == key {
                    return Ok(Some(*value));
                }
            }

            // Not found at this level - check subtree before this index
            if index > 0 {
                if let NodeEntry::Tree(subtree) = &entries[index - 1] {
                    return subtree.get(key).await;
                }
            }

            Ok(None)
        })
    }

    /// Add or replace a key-value pair (returns new tree)
    pub fn add<'a>(&'a self, key: &'a str, cid: IpldCid) -> MstFuture<'a, Mst<S>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let key_layer = util::layer_for_key(key);
            let node_layer = self.get_layer().await?;
            let entries = self.get_entries().await?;
            let leaf = NodeEntry::Leaf {
                key: SmolStr::new(key),
                value: cid,
            };

            if key_layer == node_layer {
                let index = Self::find_gt_or_equal_leaf_index_in(entries, key);

                if let Some(NodeEntry::Leaf { key: leaf_key, .. }) = entries.get(index) {
                    if leaf_key.as_str() == key {
                        let mut new_entries = entries.to_vec();
                        new_entries[index] = leaf;
                        return Ok(self.new_tree(new_entries));
                    }
                }

                match index.checked_sub(1).map(|i| &entries[i]) {
                    Some(NodeEntry::Tree(subtree)) => {
                        // Prev is Tree - split it around key
                        let (left, right) = subtree.split_around(key).await?;
                        Ok(self.replace_with_split(entries, index - 1, left, leaf, right))
                    }
                    _ => Ok(self.splice_in(entries, leaf, index)),
                }
            } else if key_layer < node_layer {
                // Key belongs on lower layer - recurse into subtree
                let index = Self::find_gt_or_equal_leaf_index_in(entries, key);

                if index > 0 {
                    if let NodeEntry::Tree(prev_tree) = &entries[index - 1] {
                        let new_subtree = prev_tree.add(key, cid).await?;
                        return Ok(self.update_entry(entries, index - 1, NodeEntry::Tree(new_subtree)));
                    }
                }

                let child = self.create_child().await?;
                let new_subtree = child.add(key, cid).await?;
                Ok(self.splice_in(entries, NodeEntry::Tree(new_subtree), index))
            } else {
                // Key belongs on higher layer - create parent layers
                let extra_layers = key_layer - node_layer;

                let (mut left, mut right) = self.split_around(key).await?;

                for _ in 1..extra_layers {
                    if let Some(l) = left {
                        left = Some(l.create_parent().await?);
                    }
                    if let Some(r) = right {
                        right = Some(r.create_parent().await?);
                    }
                }

                let mut new_entries = Vec::with_capacity(3);
                if let Some(l) = left {
                    new_entries.push(NodeEntry::Tree(l));
                }
                new_entries.push(leaf);
                if let Some(r) = right {
                    new_entries.push(NodeEntry::Tree(r));
                }

                Ok(Mst::create(self.storage.clone(), new_entries, Some(key_layer)))
            }
        })
    }

    /// Update an existing key (returns new tree)
    pub async fn update(&self, key: &str, cid: IpldCid) -> Result<Mst<S>> {
        util::validate_key(key)?;

        if self.get(key).await?.is_none() {
            return Err(RepoError::not_found("key", key));
        }

        self.add(key, cid).await
    }

    /// Delete a key (returns new tree)
    ///
    /// Fails with `NotFound` if the key is absent.
    pub fn delete<'a>(&'a self, key: &'a str) -> MstFuture<'a, Mst<S>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let altered = self.delete_recurse(key).await?;
            let trimmed = altered.trim_top().await?;
            if trimmed.is_empty().await? {
                return Ok(Mst::new(self.storage.clone()));
            }
            Ok(trimmed)
        })
    }

    fn delete_recurse<'a>(&'a self, key: &'a str) -> MstFuture<'a, Mst<S>> {
        Box::pin(async move {
            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(entries, key);

            if let Some(NodeEntry::Leaf { key: leaf_key, .. }) = entries.get(index) {
                if leaf_key.as_str() == key {
                    let prev = index.checked_sub(1).map(|i| &entries[i]);
                    let next = entries.get(index + 1);

                    // Removing the leaf leaves two subtrees side by side: merge them
                    if let (Some(NodeEntry::Tree(prev_tree)), Some(NodeEntry::Tree(next_tree))) =
                        (prev, next)
                    {
                        let merged = prev_tree.append_merge(next_tree).await?;

                        let mut new_entries = entries[..index - 1].to_vec();
                        new_entries.push(NodeEntry::Tree(merged));
                        new_entries.extend_from_slice(&entries[index + 2..]);

                        return Ok(self.new_tree(new_entries));
                    }

                    return Ok(self.remove_entry(entries, index));
                }
            }

            if index > 0 {
                if let NodeEntry::Tree(prev_tree) = &entries[index - 1] {
                    let subtree = prev_tree.delete_recurse(key).await?;

                    if subtree.is_empty().await? {
                        return Ok(self.remove_entry(entries, index - 1));
                    } else {
                        return Ok(self.update_entry(entries, index - 1, NodeEntry::Tree(subtree)));
                    }
                }
            }

            Err(RepoError::not_found("key", key))
        })
    }

    fn update_entry(&self, entries: &[NodeEntry<S>], index: usize, entry: NodeEntry<S>) -> Mst<S> {
        let mut entries = entries.to_vec();
        entries[index] = entry;
        self.new_tree(entries)
    }

    fn remove_entry(&self, entries: &[NodeEntry<S>], index: usize) -> Mst<S> {
        let mut entries = entries.to_vec();
        entries.remove(index);
        self.new_tree(entries)
    }

    fn splice_in(&self, entries: &[NodeEntry<S>], entry: NodeEntry<S>, index: usize) -> Mst<S> {
        let mut entries = entries.to_vec();
        entries.insert(index, entry);
        self.new_tree(entries)
    }

    /// Replace entry at index with [left?, leaf, right?]
    fn replace_with_split(
        &self,
        entries: &[NodeEntry<S>],
        index: usize,
        left: Option<Mst<S>>,
        leaf: NodeEntry<S>,
        right: Option<Mst<S>>,
    ) -> Mst<S> {
        let mut new_entries = entries[..index].to_vec();
        if let Some(l) = left {
            new_entries.push(NodeEntry::Tree(l));
        }
        new_entries.push(leaf);
        if let Some(r) = right {
            new_entries.push(NodeEntry::Tree(r));
        }
        new_entries.extend_from_slice(&entries[index + 1..]);
        self.new_tree(new_entries)
    }

    /// Trim top node if it only contains one subtree
    fn trim_top(self) -> MstFuture<'static, Mst<S>> {
        Box::pin(async move {
            let entries = self.get_entries().await?;

            if let [NodeEntry::Tree(subtree)] = entries {
                return subtree.clone().trim_top().await;
            }

            Ok(self)
        })
    }

    /// Split tree around a key into left and right subtrees
    ///
    /// Left holds every entry < key, right every entry >= key.
    /// Either side is `None` if empty.
    pub fn split_around<'a>(
        &'a self,
        key: &'a str,
    ) -> MstFuture<'a, (Option<Mst<S>>, Option<Mst<S>>)> {
        Box::pin(async move {
            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(entries, key);

            let mut left_data = entries[..index].to_vec();
            let mut right_data = entries[index..].to_vec();

            // A subtree straddling the split point is split recursively
            if let Some(NodeEntry::Tree(last_tree)) = left_data.last().cloned() {
                left_data.pop();

                let (split_left, split_right) = last_tree.split_around(key).await?;
                if let Some(sl) = split_left {
                    left_data.push(NodeEntry::Tree(sl));
                }
                if let Some(sr) = split_right {
                    right_data.insert(0, NodeEntry::Tree(sr));
                }
            }

            let left = (!left_data.is_empty()).then(|| self.new_tree(left_data));
            let right = (!right_data.is_empty()).then(|| self.new_tree(right_data));
            Ok((left, right))
        })
    }

    /// Merge two adjacent subtrees
    ///
    /// All keys in `to_merge` must be > all keys in `self`.
    pub fn append_merge<'a>(&'a self, to_merge: &'a Mst<S>) -> MstFuture<'a, Mst<S>> {
        Box::pin(async move {
            let self_layer = self.get_layer().await?;
            let merge_layer = to_merge.get_layer().await?;

            if self_layer != merge_layer {
                return Err(RepoError::invalid_mst(format!(
                    "cannot merge MST nodes from different layers ({} and {})",
                    self_layer, merge_layer
                )));
            }

            let self_entries = self.get_entries().await?;
            let merge_entries = to_merge.get_entries().await?;

            if let (Some(NodeEntry::Tree(left_tree)), Some(NodeEntry::Tree(right_tree))) =
                (self_entries.last(), merge_entries.first())
            {
                let merged = left_tree.append_merge(right_tree).await?;

                let mut new_entries = self_entries[..self_entries.len() - 1].to_vec();
                new_entries.push(NodeEntry::Tree(merged));
                new_entries.extend_from_slice(&merge_entries[1..]);

                return Ok(self.new_tree(new_entries));
            }

            let mut new_entries = self_entries.to_vec();
            new_entries.extend_from_slice(merge_entries);
            Ok(self.new_tree(new_entries))
        })
    }

    /// Create empty child tree at layer-1
    pub async fn create_child(&self) -> Result<Mst<S>> {
        let layer = self.get_layer().await?;
        Ok(Mst::create(
            self.storage.clone(),
            Vec::new(),
            Some(layer.saturating_sub(1)),
        ))
    }

    /// Create parent tree at layer+1 containing self
    pub async fn create_parent(self) -> Result<Mst<S>> {
        let layer = self.get_layer().await?;
        Ok(Mst::create(
            self.storage.clone(),
            vec![NodeEntry::Tree(self)],
            Some(layer + 1),
        ))
    }

    /// Get all leaf entries (key-CID pairs) in lexicographic order
    pub fn leaves(&self) -> MstFuture<'_, Vec<(SmolStr, IpldCid)>> {
        Box::pin(async move {
            let mut result = Vec::new();
            self.collect_leaves(&mut result).await?;
            Ok(result)
        })
    }

    fn collect_leaves<'a>(&'a self, result: &'a mut Vec<(SmolStr, IpldCid)>) -> MstFuture<'a, ()> {
        Box::pin(async move {
            for entry in self.get_entries().await? {
                match entry {
                    NodeEntry::Tree(subtree) => subtree.collect_leaves(result).await?,
                    NodeEntry::Leaf { key, value } => result.push((key.clone(), *value)),
                }
            }
            Ok(())
        })
    }

    /// Lazy cursor over a key range
    pub fn cursor(&self, range: KeyRange, direction: Direction) -> MstCursor<S> {
        MstCursor::new(self.clone(), range, direction)
    }

    /// Collect up to `limit` pairs from a key range
    pub async fn list_range(
        &self,
        range: KeyRange,
        direction: Direction,
        limit: Option<usize>,
    ) -> Result<Vec<(SmolStr, IpldCid)>> {
        let mut cursor = self.cursor(range, direction);
        let mut out = Vec::new();
        while limit.is_none_or(|l| out.len() < l) {
            match cursor.next().await? {
                Some(item) => out.push(item),
                None => break,
            }
        }
        Ok(out)
    }

    /// Collect all blocks that need persisting
    ///
    /// Recursively walks the tree, serializing nodes and collecting blocks
    /// that aren't already in storage. Skips nodes that are already persisted,
    /// along with everything below them.
    ///
    /// Returns (root_cid, blocks) where blocks is a map of CID → bytes.
    pub fn collect_blocks(&self) -> MstFuture<'_, (IpldCid, BTreeMap<IpldCid, Bytes>)> {
        Box::pin(async move {
            let mut blocks = BTreeMap::new();
            let pointer = self.get_pointer().await?;

            if self.storage.has(&pointer).await? {
                return Ok((pointer, blocks));
            }

            let entries = self.get_entries().await?;
            let node_data = util::serialize_node_data(entries).await?;
            let (_, bytes) = util::node_to_cid(&node_data)?;
            blocks.insert(pointer, bytes);

            for entry in entries {
                if let NodeEntry::Tree(subtree) = entry {
                    let (_, subtree_blocks) = subtree.collect_blocks().await?;
                    blocks.extend(subtree_blocks);
                }
            }

            Ok((pointer, blocks))
        })
    }

    /// Persist all unstored blocks to storage
    ///
    /// Returns the root CID after persisting.
    pub async fn persist(&self) -> Result<IpldCid> {
        let (root_cid, blocks) = self.collect_blocks().await?;

        if !blocks.is_empty() {
            self.storage.put_many(blocks).await?;
        }

        Ok(root_cid)
    }

    /// Gather every node block and leaf CID reachable from this node
    ///
    /// Nodes already present in `nodes` are not walked again, so calling this
    /// for several roots that share subtrees visits each subtree once.
    pub fn walk_blocks<'a>(
        &'a self,
        nodes: &'a mut BTreeMap<IpldCid, Bytes>,
        leaves: &'a mut Vec<IpldCid>,
    ) -> MstFuture<'a, ()> {
        Box::pin(async move {
            let pointer = self.get_pointer().await?;
            if nodes.contains_key(&pointer) {
                return Ok(());
            }

            let entries = self.get_entries().await?;
            let node_data = util::serialize_node_data(entries).await?;
            let (_, bytes) = util::node_to_cid(&node_data)?;
            nodes.insert(pointer, bytes);

            for entry in entries {
                match entry {
                    NodeEntry::Leaf { value, .. } => leaves.push(*value),
                    NodeEntry::Tree(subtree) => subtree.walk_blocks(nodes, leaves).await?,
                }
            }

            Ok(())
        })
    }
}
