//! CAR file-backed block storage

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use cid::Cid as IpldCid;

use crate::codec;
use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use crate::storage::BlockStore;

/// CAR file-backed block storage
///
/// Loads the entire CAR file into memory on open and rewrites it on every
/// applied commit. The CAR header roots hold the head commit, so a store
/// reopened from the same path knows where the chain ends.
///
/// Primarily useful for the command line and for tests.
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    path: PathBuf,
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
    roots: Arc<RwLock<Vec<IpldCid>>>,
    dirty: Arc<RwLock<bool>>,
}

fn poisoned<T>(_: T) -> RepoError {
    RepoError::storage_msg("file store lock poisoned")
}

impl FileBlockStore {
    /// Load from existing CAR file
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let roots = crate::car::read_car_header(&path).await?;
        let blocks = crate::car::read_car(&path).await?;
        tracing::debug!(path = %path.display(), blocks = blocks.len(), "loaded CAR store");

        Ok(Self {
            path,
            blocks: Arc::new(RwLock::new(blocks)),
            roots: Arc::new(RwLock::new(roots)),
            dirty: Arc::new(RwLock::new(false)),
        })
    }

    /// Create new CAR file storage (empty)
    ///
    /// The file is not created until the first flush.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            blocks: Arc::default(),
            roots: Arc::default(),
            dirty: Arc::default(),
        }
    }

    /// Load `path` if it exists, otherwise start empty
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if tokio::fs::try_exists(&path).await.map_err(RepoError::io)? {
            Self::load(path).await
        } else {
            Ok(Self::new(path))
        }
    }

    /// Get the CAR file roots
    ///
    /// For a repository file this is the head commit CID.
    pub fn roots(&self) -> Result<Vec<IpldCid>> {
        Ok(self.roots.read().map_err(poisoned)?.clone())
    }

    /// Set the CAR file roots
    ///
    /// This marks the storage as dirty. Call `flush()` to persist the change.
    pub fn set_roots(&self, new_roots: Vec<IpldCid>) -> Result<()> {
        *self.roots.write().map_err(poisoned)? = new_roots;
        *self.dirty.write().map_err(poisoned)? = true;
        Ok(())
    }

    /// Write blocks back to the CAR file if dirty
    pub async fn flush(&self) -> Result<()> {
        if !self.is_dirty()? {
            return Ok(());
        }

        let roots = self.roots()?;
        self.write_file(roots).await?;

        *self.dirty.write().map_err(poisoned)? = false;
        Ok(())
    }

    /// Write the whole store under `roots`
    ///
    /// Writes a sibling temp file and renames it over the target, so a crash
    /// mid-write leaves the previous file intact.
    async fn write_file(&self, roots: Vec<IpldCid>) -> Result<()> {
        let blocks = self.blocks.read().map_err(poisoned)?.clone();
        let tmp = self.path.with_extension("car.tmp");
        crate::car::write_car(&tmp, roots, blocks).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(RepoError::io)?;
        Ok(())
    }

    /// Check if store has unflushed changes
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(*self.dirty.read().map_err(poisoned)?)
    }

    /// Get the path to the CAR file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockStore for FileBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().map_err(poisoned)?.get(cid).cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = codec::dag_cbor_cid(data)?;
        self.blocks
            .write()
            .map_err(poisoned)?
            .insert(cid, Bytes::copy_from_slice(data));
        *self.dirty.write().map_err(poisoned)? = true;
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.blocks.read().map_err(poisoned)?.contains_key(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        {
            let mut store = self.blocks.write().map_err(poisoned)?;
            for (cid, data) in blocks {
                store.insert(cid, data);
            }
        }
        *self.dirty.write().map_err(poisoned)? = true;
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let store = self.blocks.read().map_err(poisoned)?;
        Ok(cids.iter().map(|cid| store.get(cid).cloned()).collect())
    }

    async fn apply_commit(&self, commit: CommitData) -> Result<()> {
        {
            let mut store = self.blocks.write().map_err(poisoned)?;
            store.extend(commit.blocks);
        }

        // Roots only move once the file holding them is on disk
        self.write_file(vec![commit.cid]).await?;
        *self.roots.write().map_err(poisoned)? = vec![commit.cid];
        *self.dirty.write().map_err(poisoned)? = false;
        tracing::debug!(commit = %commit.cid, rev = %commit.rev, "flushed CAR store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tid::Tid;
    use tempfile::TempDir;

    fn block(n: u8) -> (IpldCid, Bytes) {
        let data = Bytes::from(vec![0x18, n]);
        (codec::dag_cbor_cid(&data).unwrap(), data)
    }

    #[tokio::test]
    async fn test_new_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.car");
        let storage = FileBlockStore::new(&path);

        assert!(storage.roots().unwrap().is_empty());
        assert!(!storage.is_dirty().unwrap());
        assert_eq!(storage.path(), path);
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.car");

        let storage = FileBlockStore::new(&path);
        let cid1 = storage.put(b"\x18\x01").await.unwrap();
        let cid2 = storage.put(b"\x18\x02").await.unwrap();

        storage.set_roots(vec![cid1]).unwrap();
        assert!(storage.is_dirty().unwrap());

        storage.flush().await.unwrap();
        assert!(!storage.is_dirty().unwrap());

        let storage2 = FileBlockStore::load(&path).await.unwrap();
        assert_eq!(storage2.roots().unwrap(), vec![cid1]);
        assert_eq!(storage2.get(&cid1).await.unwrap().unwrap().as_ref(), b"\x18\x01");
        assert_eq!(storage2.get(&cid2).await.unwrap().unwrap().as_ref(), b"\x18\x02");
        assert!(!storage2.is_dirty().unwrap());
    }

    #[tokio::test]
    async fn test_apply_commit_is_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.car");
        let storage = FileBlockStore::open(&path).await.unwrap();

        let (cid1, data1) = block(1);
        let (cid2, data2) = block(2);
        storage
            .apply_commit(CommitData {
                cid: cid2,
                rev: Tid::from_parts(5, 1),
                prev: None,
                data: cid1,
                blocks: BTreeMap::from([(cid1, data1), (cid2, data2.clone())]),
            })
            .await
            .unwrap();

        assert!(!storage.is_dirty().unwrap());
        assert!(!path.with_extension("car.tmp").exists());

        let reopened = FileBlockStore::open(&path).await.unwrap();
        assert_eq!(reopened.roots().unwrap(), vec![cid2]);
        assert_eq!(reopened.get(&cid2).await.unwrap(), Some(data2));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_roots() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("repo.car");
        let storage = FileBlockStore::new(&path);

        let (cid, data) = block(3);
        let err = storage
            .apply_commit(CommitData {
                cid,
                rev: Tid::from_parts(5, 1),
                prev: None,
                data: cid,
                blocks: BTreeMap::from([(cid, data)]),
            })
            .await
            .unwrap_err();

        assert!(err.is(crate::RepoErrorKind::Io));
        assert!(storage.roots().unwrap().is_empty());
    }
}
