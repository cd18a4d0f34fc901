//! Repository service: record CRUD over a signed commit chain
//!
//! [`RepoService`] owns one repository. Every mutation runs under a single
//! writer lock: it reads the published head, builds the new tree, signs a
//! commit over it, hands all new blocks to the store in one `apply_commit`
//! and only then swaps the published head. Reads clone the head and walk
//! immutable blocks without taking the writer lock.

mod export;
pub mod types;
pub mod validation;

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::{SmolStr, format_smolstr};
use tokio::sync::Mutex;

use crate::commit::{Commit, SigningKey};
use crate::error::{RepoError, Result};
use crate::mst::{Direction, KeyRange, Mst, util};
use crate::storage::BlockStore;
use crate::tid::{Tid, Ticker};
use crate::value::Value;

pub use types::*;
pub use validation::{NoSchemas, RecordValidator, ValidationStatus};

/// Blocks and metadata of one commit, handed to [`BlockStore::apply_commit`]
#[derive(Debug, Clone)]
pub struct CommitData {
    /// Commit CID
    pub cid: IpldCid,

    /// New revision TID
    pub rev: Tid,

    /// Previous commit CID (None for the first commit)
    pub prev: Option<IpldCid>,

    /// New MST root CID
    pub data: IpldCid,

    /// New blocks to persist (MST nodes + record data + commit block)
    pub blocks: BTreeMap<IpldCid, Bytes>,
}

/// Listing limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoConfig {
    /// Page size when a request gives none
    pub default_list_limit: usize,
    /// Largest page size a request may ask for
    pub max_list_limit: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            default_list_limit: 50,
            max_list_limit: 100,
        }
    }
}

/// Published state of an active repository
#[derive(Debug, Clone)]
pub struct Head {
    /// Current commit; `None` at genesis
    pub commit: Option<CommitEntry>,
    /// Current MST root
    pub root: IpldCid,
}

impl Head {
    /// Sequence number of the current commit, 0 at genesis
    pub fn version(&self) -> u64 {
        self.commit.as_ref().map_or(0, |c| c.commit.version)
    }

    /// Revision of the current commit
    pub fn rev(&self) -> Option<&Tid> {
        self.commit.as_ref().map(|c| &c.commit.rev)
    }

    /// CID of the current commit
    pub fn commit_cid(&self) -> Option<IpldCid> {
        self.commit.as_ref().map(|c| c.cid)
    }

    /// Metadata of the current commit
    pub fn meta(&self) -> Option<CommitMeta> {
        self.commit.as_ref().map(|c| CommitMeta {
            cid: c.cid,
            rev: c.commit.rev.clone(),
            version: c.commit.version,
        })
    }
}

/// Lifecycle state of a repository
#[derive(Debug, Clone)]
pub enum RepoStatus {
    /// Neither initialized nor imported
    Uninitialized,
    /// Serving reads and writes from this head
    Active(Arc<Head>),
}

/// Versioned record repository over a block store
pub struct RepoService<S, K> {
    storage: Arc<S>,
    signer: K,
    did: SmolStr,
    config: RepoConfig,
    validator: Box<dyn RecordValidator>,
    head: RwLock<Option<Arc<Head>>>,
    writer: Mutex<Ticker>,
}

impl<S, K> std::fmt::Debug for RepoService<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoService")
            .field("did", &self.did)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Join collection and rkey into an MST key
pub(crate) fn record_key(collection: &str, rkey: &str) -> Result<SmolStr> {
    validate_collection(collection)?;
    if rkey.is_empty() || rkey.contains('/') || rkey == "." || rkey == ".." {
        return Err(RepoError::invalid_key(rkey).with_help("record keys are one non-empty path segment"));
    }
    let key = format_smolstr!("{}/{}", collection, rkey);
    util::validate_key(&key)?;
    Ok(key)
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() || collection.contains('/') {
        return Err(RepoError::invalid_key(collection)
            .with_help("collection names are one non-empty path segment"));
    }
    util::validate_key(collection)
}

fn check_swap_commit(head: &Head, swap_commit: Option<IpldCid>) -> Result<()> {
    let Some(expected) = swap_commit else {
        return Ok(());
    };
    let current = head.commit_cid();
    if current == Some(expected) {
        return Ok(());
    }
    tracing::warn!(%expected, current = ?current, "swap_commit rejected");
    Err(RepoError::conflict(format!(
        "swap_commit {} does not match current commit {}",
        expected,
        current.map_or_else(|| "none".to_string(), |c| c.to_string())
    )))
}

fn check_swap_record(key: &str, current: Option<IpldCid>, swap_record: Option<IpldCid>) -> Result<()> {
    let Some(expected) = swap_record else {
        return Ok(());
    };
    if current == Some(expected) {
        return Ok(());
    }
    tracing::warn!(key, %expected, current = ?current, "swap_record rejected");
    Err(RepoError::conflict(format!(
        "swap_record {} does not match current record {} at {}",
        expected,
        current.map_or_else(|| "none".to_string(), |c| c.to_string()),
        key
    )))
}

impl<S, K> RepoService<S, K>
where
    S: BlockStore + Send + Sync + 'static,
    K: SigningKey + Send + Sync,
{
    /// Uninitialized service; call [`initialize`](Self::initialize) or
    /// [`import`](Self::import) before writing
    pub fn new(storage: Arc<S>, signer: K, did: impl Into<SmolStr>) -> Self {
        Self {
            storage,
            signer,
            did: did.into(),
            config: RepoConfig::default(),
            validator: Box::new(NoSchemas),
            head: RwLock::new(None),
            writer: Mutex::new(Ticker::new()),
        }
    }

    /// Replace the listing limits
    pub fn with_config(mut self, config: RepoConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the schema validator
    pub fn with_validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Resume an existing chain at `head_commit`
    ///
    /// The head commit must be signed by `signer` and name `did`. Revisions
    /// issued afterwards sort after the head's revision.
    pub async fn open(
        storage: Arc<S>,
        signer: K,
        did: impl Into<SmolStr>,
        head_commit: IpldCid,
    ) -> Result<Self> {
        let mut service = Self::new(storage, signer, did);

        let commit = service.get_commit(&head_commit).await?;
        if commit.did != service.did {
            return Err(RepoError::invalid_commit(format!(
                "head commit belongs to {}, not {}",
                commit.did, service.did
            )));
        }
        commit
            .verify(&service.signer.public_key())
            .map_err(|e| RepoError::from(e).with_help("the configured key did not sign this chain"))?;
        if !service.storage.has(&commit.data).await? {
            return Err(RepoError::not_found("MST root", commit.data));
        }

        service.writer.get_mut().observe(&commit.rev);
        let head = Head {
            root: commit.data,
            commit: Some(CommitEntry {
                cid: head_commit,
                commit,
            }),
        };
        tracing::info!(did = %service.did, commit = %head_commit, version = head.version(), "opened repository");
        service.publish(head)?;
        Ok(service)
    }

    /// Persist the empty tree and enter the active state at genesis
    ///
    /// Genesis has no commit block: the first mutation produces version 1.
    #[tracing::instrument(skip_all, fields(did = %self.did))]
    pub async fn initialize(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        if self.current()?.is_some() {
            return Err(RepoError::already_exists("repository", &self.did));
        }

        let root = Mst::new(self.storage.clone()).persist().await?;
        self.publish(Head { commit: None, root })?;
        tracing::info!(%root, "initialized repository");
        Ok(())
    }

    /// Repository identity
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Listing limits in effect
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Shared reference to the block store
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Public key commits are signed with
    pub fn public_key(&self) -> crate::crypto::PublicKey {
        self.signer.public_key()
    }

    fn current(&self) -> Result<Option<Arc<Head>>> {
        Ok(self
            .head
            .read()
            .map_err(|_| RepoError::storage_msg("head lock poisoned"))?
            .clone())
    }

    /// Snapshot of the published head
    pub fn head(&self) -> Result<Arc<Head>> {
        self.current()?.ok_or_else(RepoError::not_initialized)
    }

    fn publish(&self, head: Head) -> Result<Arc<Head>> {
        let head = Arc::new(head);
        *self
            .head
            .write()
            .map_err(|_| RepoError::storage_msg("head lock poisoned"))? = Some(head.clone());
        Ok(head)
    }

    /// Lifecycle state
    pub fn status(&self) -> Result<RepoStatus> {
        Ok(match self.current()? {
            Some(head) => RepoStatus::Active(head),
            None => RepoStatus::Uninitialized,
        })
    }

    /// CID of the current commit, `None` at genesis
    pub fn current_commit_cid(&self) -> Result<Option<IpldCid>> {
        Ok(self.head()?.commit_cid())
    }

    /// Current MST root
    pub fn current_root(&self) -> Result<IpldCid> {
        Ok(self.head()?.root)
    }

    fn tree_at(&self, root: IpldCid) -> Mst<S> {
        Mst::load(self.storage.clone(), root, None)
    }

    fn validation_status(&self, collection: &str, record: &Value, validate: Option<bool>) -> ValidationStatus {
        match validate {
            Some(false) => ValidationStatus::Unknown,
            _ => self.validator.validate(collection, record),
        }
    }

    /// Sign and durably apply a new tree, then publish it
    async fn commit_tree(
        &self,
        ticker: &mut Ticker,
        head: &Head,
        tree: Mst<S>,
        mut blocks: BTreeMap<IpldCid, Bytes>,
    ) -> Result<CommitMeta> {
        let (data, node_blocks) = tree.collect_blocks().await?;
        blocks.extend(node_blocks);

        let rev = ticker.next(head.rev());
        let version = head.version() + 1;
        let prev = head.commit_cid();

        let commit = Commit::new_unsigned(self.did.clone(), data, rev.clone(), prev, version)
            .sign(&self.signer)
            .inspect_err(|e| tracing::warn!(error = %e, "signing failed, mutation aborted"))?;
        let (cid, commit_bytes) = commit.to_block()?;
        blocks.insert(cid, commit_bytes);

        let block_count = blocks.len();
        self.storage
            .apply_commit(CommitData {
                cid,
                rev: rev.clone(),
                prev,
                data,
                blocks,
            })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "store rejected commit, mutation aborted"))?;

        self.publish(Head {
            commit: Some(CommitEntry { cid, commit }),
            root: data,
        })?;
        tracing::info!(commit = %cid, %rev, version, blocks = block_count, "published commit");

        Ok(CommitMeta { cid, rev, version })
    }

    /// Create a record under a new key
    #[tracing::instrument(skip_all, fields(collection = %req.collection))]
    pub async fn create_record(&self, req: CreateRecordRequest) -> Result<CreateRecordResponse> {
        let mut ticker = self.writer.lock().await;
        let head = self.head()?;
        check_swap_commit(&head, req.swap_commit)?;

        let rkey = match req.rkey {
            Some(rkey) => rkey,
            None => ticker.next(None).into(),
        };
        let key = record_key(&req.collection, &rkey)?;

        let tree = self.tree_at(head.root);
        if tree.get(&key).await?.is_some() {
            return Err(RepoError::already_exists("record", &key));
        }

        let validation_status = self.validation_status(&req.collection, &req.record, req.validate);
        let (cid, bytes) = req.record.to_block()?;
        let tree = tree.add(&key, cid).await?;

        let commit = self
            .commit_tree(&mut ticker, &head, tree, BTreeMap::from([(cid, bytes)]))
            .await?;
        tracing::debug!(%key, %cid, "created record");

        Ok(CreateRecordResponse {
            rkey,
            cid,
            validation_status,
            commit: Some(commit),
        })
    }

    /// Create or replace a record
    ///
    /// Writing the value a key already holds commits nothing.
    #[tracing::instrument(skip_all, fields(collection = %req.collection, rkey = %req.rkey))]
    pub async fn put_record(&self, req: PutRecordRequest) -> Result<PutRecordResponse> {
        let mut ticker = self.writer.lock().await;
        let head = self.head()?;
        check_swap_commit(&head, req.swap_commit)?;

        let key = record_key(&req.collection, &req.rkey)?;
        let tree = self.tree_at(head.root);
        let current = tree.get(&key).await?;
        check_swap_record(&key, current, req.swap_record)?;

        let validation_status = self.validation_status(&req.collection, &req.record, req.validate);
        let (cid, bytes) = req.record.to_block()?;
        if current == Some(cid) {
            tracing::debug!(%key, %cid, "record unchanged, no commit");
            return Ok(PutRecordResponse {
                cid,
                validation_status,
                commit: None,
            });
        }

        let tree = tree.add(&key, cid).await?;
        let commit = self
            .commit_tree(&mut ticker, &head, tree, BTreeMap::from([(cid, bytes)]))
            .await?;

        Ok(PutRecordResponse {
            cid,
            validation_status,
            commit: Some(commit),
        })
    }

    /// Delete a record
    #[tracing::instrument(skip_all, fields(collection = %req.collection, rkey = %req.rkey))]
    pub async fn delete_record(&self, req: DeleteRecordRequest) -> Result<DeleteRecordResponse> {
        let mut ticker = self.writer.lock().await;
        let head = self.head()?;
        check_swap_commit(&head, req.swap_commit)?;

        let key = record_key(&req.collection, &req.rkey)?;
        let tree = self.tree_at(head.root);
        let current = tree.get(&key).await?;
        check_swap_record(&key, current, req.swap_record)?;
        if current.is_none() {
            return Err(RepoError::not_found("record", &key));
        }

        let tree = tree.delete(&key).await?;
        let commit = self
            .commit_tree(&mut ticker, &head, tree, BTreeMap::new())
            .await?;

        Ok(DeleteRecordResponse { commit })
    }

    /// Read a record, optionally as of an earlier version
    ///
    /// `cid` may name a commit on the current chain, the data root of one, or
    /// a record version some commit held at `collection/rkey`. Any other CID
    /// is `NotFound`.
    #[tracing::instrument(skip_all, fields(collection = %req.collection, rkey = %req.rkey))]
    pub async fn get_record(&self, req: GetRecordRequest) -> Result<GetRecordResponse> {
        let head = self.head()?;
        let key = record_key(&req.collection, &req.rkey)?;

        let root = match req.cid {
            None => head.root,
            Some(cid) => self.root_for_version(&head, &key, cid).await?,
        };

        let cid = self
            .tree_at(root)
            .get(&key)
            .await?
            .ok_or_else(|| RepoError::not_found("record", &key))?;
        let value = self.load_value(&cid).await?;
        Ok(GetRecordResponse { cid, value })
    }

    /// Tree root to read `key` at for a version named by `cid`
    ///
    /// Resolved against the chain behind `head`, never by decoding the block.
    async fn root_for_version(&self, head: &Head, key: &str, cid: IpldCid) -> Result<IpldCid> {
        if cid == head.root {
            return Ok(cid);
        }

        let chain = self.chain_from(head).await?;
        if let Some((_, commit, _)) = chain
            .iter()
            .find(|(commit_cid, commit, _)| *commit_cid == cid || commit.data == cid)
        {
            return Ok(commit.data);
        }

        for (_, commit, _) in &chain {
            if self.tree_at(commit.data).get(key).await? == Some(cid) {
                return Ok(commit.data);
            }
        }

        tracing::debug!(%cid, key, "version not on the current chain");
        Err(RepoError::not_found("record version", cid)
            .with_help("pass a commit CID, a commit's data root, or a CID this key once held"))
    }

    async fn load_value(&self, cid: &IpldCid) -> Result<Value> {
        let bytes = self
            .storage
            .get(cid)
            .await?
            .ok_or_else(|| RepoError::not_found("record block", cid))?;
        Value::decode(&bytes)
    }

    /// One page of a collection in key order
    ///
    /// The range is `[rkey_start, rkey_end)`. The response cursor is the last
    /// returned rkey and is present only when more records remain.
    #[tracing::instrument(skip_all, fields(collection = %req.collection, reverse = req.reverse))]
    pub async fn list_records(&self, req: ListRecordsRequest) -> Result<ListRecordsResponse> {
        let head = self.head()?;
        validate_collection(&req.collection)?;

        let limit = req
            .limit
            .unwrap_or(self.config.default_list_limit)
            .clamp(1, self.config.max_list_limit.max(1));

        let prefix = format_smolstr!("{}/", req.collection);
        let start_key = format_smolstr!("{}{}", prefix, req.rkey_start.as_deref().unwrap_or(""));
        let mut start = Bound::Included(start_key.clone());
        let end_key = match &req.rkey_end {
            Some(end) => format_smolstr!("{}{}", prefix, end),
            // '0' sorts immediately after '/'
            None => format_smolstr!("{}0", req.collection),
        };
        let mut end = Bound::Excluded(end_key.clone());

        if let Some(cursor) = &req.cursor {
            let cursor_key = format_smolstr!("{}{}", prefix, cursor);
            if req.reverse {
                if cursor_key <= end_key {
                    end = Bound::Excluded(cursor_key);
                }
            } else if cursor_key >= start_key {
                start = Bound::Excluded(cursor_key);
            }
        }

        let direction = if req.reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        };
        let mut entries = self
            .tree_at(head.root)
            .list_range(KeyRange::new(start, end), direction, Some(limit.saturating_add(1)))
            .await?;

        let has_more = entries.len() > limit;
        entries.truncate(limit);

        let cids: Vec<IpldCid> = entries.iter().map(|(_, cid)| *cid).collect();
        let blocks = self.storage.get_many(&cids).await?;

        let mut records = Vec::with_capacity(entries.len());
        for ((key, cid), block) in entries.into_iter().zip(blocks) {
            let bytes = block.ok_or_else(|| RepoError::not_found("record block", cid))?;
            records.push(RecordEntry {
                collection: req.collection.clone(),
                rkey: SmolStr::new(&key[prefix.len()..]),
                cid,
                value: Value::decode(&bytes)?,
            });
        }

        let cursor = if has_more {
            records.last().map(|r| r.rkey.clone())
        } else {
            None
        };
        Ok(ListRecordsResponse { records, cursor })
    }

    /// Distinct collection names in the current tree
    pub async fn list_collections(&self) -> Result<Vec<SmolStr>> {
        let head = self.head()?;
        self.tree_at(head.root).collections().await
    }

    /// Load and decode a commit block
    pub async fn get_commit(&self, cid: &IpldCid) -> Result<Commit> {
        let bytes = self
            .storage
            .get(cid)
            .await?
            .ok_or_else(|| RepoError::not_found("commit", cid))?;
        Commit::from_cbor(&bytes)
    }

    /// Commits from the head backwards, newest first
    pub async fn commit_log(&self, limit: Option<usize>) -> Result<Vec<CommitEntry>> {
        let head = self.head()?;
        let mut log = Vec::new();
        let mut next = head.commit_cid();

        while let Some(cid) = next {
            if limit.is_some_and(|l| log.len() >= l) {
                break;
            }
            let commit = self.get_commit(&cid).await?;
            next = commit.prev;
            log.push(CommitEntry { cid, commit });
        }

        Ok(log)
    }
}
