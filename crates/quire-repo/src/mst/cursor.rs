//! Ordered, range-bounded traversal of an MST

use std::ops::Bound;

use cid::Cid as IpldCid;
use smol_str::{SmolStr, format_smolstr};

use super::node::NodeEntry;
use super::tree::Mst;
use crate::error::Result;
use crate::storage::BlockStore;

/// Traversal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order
    #[default]
    Forward,
    /// Descending key order
    Reverse,
}

/// Key range with independent bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound
    pub start: Bound<SmolStr>,
    /// Upper bound
    pub end: Bound<SmolStr>,
}

impl KeyRange {
    /// Every key
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Range from explicit bounds
    pub fn new(start: Bound<SmolStr>, end: Bound<SmolStr>) -> Self {
        Self { start, end }
    }

    /// Every key starting with `prefix`
    ///
    /// Keys are ASCII, so the exclusive upper bound is the prefix with its
    /// last byte bumped by one.
    pub fn prefix(prefix: &str) -> Self {
        let mut upper = prefix.to_string();
        let end = match upper.pop() {
            Some(last) => match char::from_u32(last as u32 + 1) {
                Some(next) => {
                    upper.push(next);
                    Bound::Excluded(SmolStr::new(upper))
                }
                None => Bound::Unbounded,
            },
            None => Bound::Unbounded,
        };
        Self {
            start: Bound::Included(SmolStr::new(prefix)),
            end,
        }
    }

    /// Whether `key` satisfies the lower bound
    pub fn above_lower(&self, key: &str) -> bool {
        match &self.start {
            Bound::Unbounded => true,
            Bound::Included(s) => key >= s.as_str(),
            Bound::Excluded(s) => key > s.as_str(),
        }
    }

    /// Whether `key` satisfies the upper bound
    pub fn below_upper(&self, key: &str) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(e) => key <= e.as_str(),
            Bound::Excluded(e) => key < e.as_str(),
        }
    }

    /// Whether `key` lies inside the range
    pub fn contains(&self, key: &str) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }
}

struct Frame<S> {
    entries: Vec<NodeEntry<S>>,
    /// Forward: next index to visit. Reverse: one past the next index.
    pos: usize,
}

/// Lazy cursor over the leaves of one tree version
///
/// Nodes are loaded only as the cursor reaches them. The first call to
/// [`MstCursor::next`] seeks straight to the near end of the range instead of
/// scanning from the first key.
pub struct MstCursor<S> {
    root: Option<Mst<S>>,
    range: KeyRange,
    direction: Direction,
    stack: Vec<Frame<S>>,
    done: bool,
}

impl<S: BlockStore + Send + Sync + 'static> MstCursor<S> {
    pub(crate) fn new(root: Mst<S>, range: KeyRange, direction: Direction) -> Self {
        Self {
            root: Some(root),
            range,
            direction,
            stack: Vec::new(),
            done: false,
        }
    }

    async fn seek(&mut self, root: Mst<S>) -> Result<()> {
        let mut node = root;
        loop {
            let entries = node.get_entries().await?.to_vec();
            let (pos, descend) = match self.direction {
                Direction::Forward => {
                    let idx = match &self.range.start {
                        Bound::Unbounded => 0,
                        Bound::Included(s) | Bound::Excluded(s) => {
                            Mst::find_gt_or_equal_leaf_index_in(&entries, s)
                        }
                    };
                    let descend = match idx.checked_sub(1).map(|i| &entries[i]) {
                        Some(NodeEntry::Tree(t)) => Some(t.clone()),
                        _ => None,
                    };
                    (idx, descend)
                }
                Direction::Reverse => {
                    let idx = match &self.range.end {
                        Bound::Unbounded => entries.len(),
                        Bound::Excluded(e) => Mst::find_gt_or_equal_leaf_index_in(&entries, e),
                        Bound::Included(e) => {
                            let idx = Mst::find_gt_or_equal_leaf_index_in(&entries, e);
                            match entries.get(idx).and_then(NodeEntry::leaf_key) {
                                Some(k) if k == e.as_str() => idx + 1,
                                _ => idx,
                            }
                        }
                    };
                    match idx.checked_sub(1).map(|i| &entries[i]) {
                        Some(NodeEntry::Tree(t)) => {
                            let t = t.clone();
                            (idx - 1, Some(t))
                        }
                        _ => (idx, None),
                    }
                }
            };

            self.stack.push(Frame { entries, pos });
            match descend {
                Some(child) => node = child,
                None => return Ok(()),
            }
        }
    }

    /// Next key/value pair in range, or `None` once exhausted
    pub async fn next(&mut self) -> Result<Option<(SmolStr, IpldCid)>> {
        if self.done {
            return Ok(None);
        }
        if let Some(root) = self.root.take() {
            self.seek(root).await?;
        }

        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                return Ok(None);
            };

            let entry = match self.direction {
                Direction::Forward => {
                    if frame.pos >= frame.entries.len() {
                        self.stack.pop();
                        continue;
                    }
                    frame.pos += 1;
                    frame.entries[frame.pos - 1].clone()
                }
                Direction::Reverse => {
                    if frame.pos == 0 {
                        self.stack.pop();
                        continue;
                    }
                    frame.pos -= 1;
                    frame.entries[frame.pos].clone()
                }
            };

            match entry {
                NodeEntry::Tree(subtree) => {
                    let entries = subtree.get_entries().await?.to_vec();
                    let pos = match self.direction {
                        Direction::Forward => 0,
                        Direction::Reverse => entries.len(),
                    };
                    self.stack.push(Frame { entries, pos });
                }
                NodeEntry::Leaf { key, value } => {
                    let (inside, past_far_end) = match self.direction {
                        Direction::Forward => (
                            self.range.above_lower(&key),
                            !self.range.below_upper(&key),
                        ),
                        Direction::Reverse => (
                            self.range.below_upper(&key),
                            !self.range.above_lower(&key),
                        ),
                    };
                    if past_far_end {
                        self.done = true;
                        self.stack.clear();
                        return Ok(None);
                    }
                    if inside {
                        return Ok(Some((key, value)));
                    }
                }
            }
        }
    }
}

impl<S: BlockStore + Send + Sync + 'static> Mst<S> {
    /// Distinct collection names, in order
    ///
    /// Keys are `collection/rkey`. After each collection is found the cursor
    /// re-seeks past it, so the cost is per collection rather than per key.
    pub async fn collections(&self) -> Result<Vec<SmolStr>> {
        let mut out = Vec::new();
        let mut range = KeyRange::all();
        loop {
            let mut cursor = self.cursor(range, Direction::Forward);
            let Some((key, _)) = cursor.next().await? else {
                break;
            };
            let collection = match key.split_once('/') {
                Some((collection, _)) => SmolStr::new(collection),
                None => key.clone(),
            };
            // '0' sorts immediately after '/'
            range = KeyRange::new(
                Bound::Included(format_smolstr!("{}0", collection)),
                Bound::Unbounded,
            );
            out.push(collection);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dag_cbor_cid;
    use crate::storage::memory::MemoryBlockStore;
    use std::sync::Arc;

    async fn tree_with(keys: &[&str]) -> Mst<MemoryBlockStore> {
        let cid = dag_cbor_cid(b"\xa0").unwrap();
        let mut mst = Mst::new(Arc::new(MemoryBlockStore::new()));
        for key in keys {
            mst = mst.add(key, cid).await.unwrap();
        }
        mst
    }

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c/{:04}", i)).collect()
    }

    async fn keys_of(
        mst: &Mst<MemoryBlockStore>,
        range: KeyRange,
        direction: Direction,
    ) -> Vec<String> {
        mst.list_range(range, direction, None)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_full_scan_both_directions() {
        let keys = numbered(250);
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mst = tree_with(&refs).await;

        let forward = keys_of(&mst, KeyRange::all(), Direction::Forward).await;
        assert_eq!(forward, keys);

        let mut reverse = keys_of(&mst, KeyRange::all(), Direction::Reverse).await;
        reverse.reverse();
        assert_eq!(reverse, keys);
    }

    #[tokio::test]
    async fn test_bounded_ranges_match_filter() {
        let keys = numbered(250);
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mst = tree_with(&refs).await;

        let bounds = [
            (Bound::Included("c/0010"), Bound::Excluded("c/0100")),
            (Bound::Excluded("c/0010"), Bound::Included("c/0100")),
            (Bound::Included("c/00105"), Bound::Unbounded),
            (Bound::Unbounded, Bound::Excluded("c/0003")),
            (Bound::Included("c/0200"), Bound::Included("c/0200")),
            (Bound::Included("c/0300"), Bound::Unbounded),
            (Bound::Included("c/0050"), Bound::Excluded("c/0050")),
        ];

        for (start, end) in bounds {
            let range = KeyRange::new(start.map(SmolStr::new), end.map(SmolStr::new));
            let expected: Vec<String> = keys
                .iter()
                .filter(|k| range.contains(k))
                .cloned()
                .collect();

            assert_eq!(
                keys_of(&mst, range.clone(), Direction::Forward).await,
                expected,
                "forward {:?}",
                range
            );
            let mut reverse = keys_of(&mst, range.clone(), Direction::Reverse).await;
            reverse.reverse();
            assert_eq!(reverse, expected, "reverse {:?}", range);
        }
    }

    #[tokio::test]
    async fn test_limit_stops_early() {
        let keys = numbered(50);
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mst = tree_with(&refs).await;

        let page = mst
            .list_range(KeyRange::prefix("c/"), Direction::Reverse, Some(3))
            .await
            .unwrap();
        let page: Vec<&str> = page.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(page, vec!["c/0049", "c/0048", "c/0047"]);
    }

    #[tokio::test]
    async fn test_prefix_range() {
        let mst = tree_with(&["a/1", "ab/1", "b/1", "b/2", "b0", "c/1"]).await;
        assert_eq!(
            keys_of(&mst, KeyRange::prefix("b/"), Direction::Forward).await,
            vec!["b/1", "b/2"]
        );
        assert_eq!(
            keys_of(&mst, KeyRange::prefix("a"), Direction::Forward).await,
            vec!["a/1", "ab/1"]
        );
    }

    #[tokio::test]
    async fn test_collections() {
        let mut keys = numbered(40);
        keys.extend(["a.b/1", "a.b/2", "z/9", "c0/x"].map(String::from));
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mst = tree_with(&refs).await;

        assert_eq!(
            mst.collections().await.unwrap(),
            vec!["a.b", "c", "c0", "z"]
        );
        let empty = tree_with(&[]).await;
        assert!(empty.collections().await.unwrap().is_empty());
    }
}
