#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use cid::Cid;
use quire_repo::commit::SigningKey;
use quire_repo::error::CommitError;
use quire_repo::repo::{CommitData, PutRecordRequest};
use quire_repo::{BlockStore, MemoryBlockStore, PublicKey, RepoError, RepoService, Value};

pub const DID: &str = "did:example:alice";

pub fn signing_key(seed: u8) -> k256::ecdsa::SigningKey {
    k256::ecdsa::SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub type MemRepo = RepoService<MemoryBlockStore, k256::ecdsa::SigningKey>;

pub async fn memory_repo() -> MemRepo {
    let repo = RepoService::new(Arc::new(MemoryBlockStore::new()), signing_key(1), DID);
    repo.initialize().await.unwrap();
    repo
}

pub fn text(s: &str) -> Value {
    Value::map_from_entries([("text", Value::from(s))]).unwrap()
}

pub async fn put<S, K>(repo: &RepoService<S, K>, collection: &str, rkey: &str, value: Value) -> Cid
where
    S: BlockStore + Send + Sync + 'static,
    K: SigningKey + Send + Sync,
{
    repo.put_record(
        PutRecordRequest::new()
            .collection(collection)
            .rkey(rkey)
            .record(value)
            .build(),
    )
    .await
    .unwrap()
    .cid
}

/// Memory store whose `apply_commit` can be made to fail
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryBlockStore,
    pub fail: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

impl BlockStore for FlakyStore {
    async fn get(&self, cid: &Cid) -> quire_repo::Result<Option<Bytes>> {
        self.inner.get(cid).await
    }

    async fn put(&self, data: &[u8]) -> quire_repo::Result<Cid> {
        self.inner.put(data).await
    }

    async fn has(&self, cid: &Cid) -> quire_repo::Result<bool> {
        self.inner.has(cid).await
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (Cid, Bytes)> + Send,
    ) -> quire_repo::Result<()> {
        self.inner.put_many(blocks).await
    }

    async fn get_many(&self, cids: &[Cid]) -> quire_repo::Result<Vec<Option<Bytes>>> {
        self.inner.get_many(cids).await
    }

    async fn apply_commit(&self, commit: CommitData) -> quire_repo::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::storage_msg("disk full"));
        }
        self.inner.apply_commit(commit).await
    }
}

/// Signer that can be switched off
#[derive(Clone)]
pub struct FlakySigner {
    pub key: k256::ecdsa::SigningKey,
    pub offline: Arc<AtomicBool>,
}

impl FlakySigner {
    pub fn new(seed: u8) -> Self {
        Self {
            key: signing_key(seed),
            offline: Arc::default(),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl SigningKey for FlakySigner {
    fn sign_bytes(&self, data: &[u8]) -> quire_repo::Result<Bytes> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CommitError::Signer("signer offline".into()).into());
        }
        self.key.sign_bytes(data)
    }

    fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }
}
