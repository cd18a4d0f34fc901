//! In-memory block storage implementation

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use cid::Cid as IpldCid;

use crate::codec;
use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use crate::storage::BlockStore;

/// In-memory block storage using BTreeMap
///
/// Useful for tests, temporary repositories, and as the staging area when
/// importing an export. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
    head: Arc<RwLock<Option<IpldCid>>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
            head: Arc::default(),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<IpldCid, Bytes>>> {
        self.blocks
            .read()
            .map_err(|_| RepoError::storage_msg("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<IpldCid, Bytes>>> {
        self.blocks
            .write()
            .map_err(|_| RepoError::storage_msg("memory store lock poisoned"))
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit CID recorded by the last `apply_commit`
    pub fn head(&self) -> Option<IpldCid> {
        self.head.read().ok().and_then(|h| *h)
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.read()?.get(cid).cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = codec::dag_cbor_cid(data)?;
        self.write()?.insert(cid, Bytes::copy_from_slice(data));
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.read()?.contains_key(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let mut store = self.write()?;
        for (cid, data) in blocks {
            store.insert(cid, data);
        }
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let store = self.read()?;
        Ok(cids.iter().map(|cid| store.get(cid).cloned()).collect())
    }

    async fn apply_commit(&self, commit: CommitData) -> Result<()> {
        {
            let mut store = self.write()?;
            store.extend(commit.blocks);
        }
        *self
            .head
            .write()
            .map_err(|_| RepoError::storage_msg("memory store lock poisoned"))? = Some(commit.cid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tid::Tid;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryBlockStore::new();
        let data = b"\xa1\x61a\x01";

        let cid = store.put(data).await.unwrap();
        let retrieved = store.get(&cid).await.unwrap();

        assert_eq!(retrieved.as_deref(), Some(&data[..]));
        assert!(codec::verify_block(&cid, data).unwrap());
    }

    #[tokio::test]
    async fn test_has() {
        let store = MemoryBlockStore::new();
        let cid = store.put(b"\x01").await.unwrap();
        assert!(store.has(&cid).await.unwrap());

        let other = codec::dag_cbor_cid(b"\x02").unwrap();
        assert!(!store.has(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_many() {
        let store = MemoryBlockStore::new();
        let cid1 = store.put(b"\x01").await.unwrap();
        let cid2 = store.put(b"\x02").await.unwrap();
        let missing = codec::dag_cbor_cid(b"\x03").unwrap();

        let results = store.get_many(&[cid1, missing, cid2]).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_deref(), Some(&b"\x01"[..]));
        assert_eq!(results[1], None);
        assert_eq!(results[2].as_deref(), Some(&b"\x02"[..]));
    }

    #[tokio::test]
    async fn test_apply_commit_records_head() {
        let store = MemoryBlockStore::new();
        let block = Bytes::from_static(b"\xa0");
        let cid = codec::dag_cbor_cid(&block).unwrap();

        store
            .apply_commit(CommitData {
                cid,
                rev: Tid::from_parts(1, 0),
                prev: None,
                data: cid,
                blocks: BTreeMap::from([(cid, block)]),
            })
            .await
            .unwrap();

        assert_eq!(store.head(), Some(cid));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let store1 = MemoryBlockStore::new();
        let store2 = store1.clone();

        let cid = store1.put(b"\x01").await.unwrap();
        assert!(store2.has(&cid).await.unwrap());
    }
}
