//! Block storage abstraction for MST nodes, commits and records

use bytes::Bytes;
use cid::Cid as IpldCid;

use crate::error::Result;
use crate::repo::CommitData;

/// Async block storage trait
///
/// Provides CID-keyed block storage for MST nodes, commits, and record data.
/// Implementations in this crate:
/// - In-memory map ([`MemoryBlockStore`])
/// - CAR file ([`FileBlockStore`])
///
/// Clone is required so MST can share storage references across tree operations.
/// Stores are append-only: nothing in this crate ever removes a block, which is
/// what keeps every historical root readable.
///
/// # Example
///
/// ```rust,ignore
/// use quire_repo::storage::{BlockStore, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryBlockStore::new();
///
/// // Store a block
/// let data = b"\xa1\x61a\x01";
/// let cid = storage.put(data).await?;
///
/// // Retrieve it
/// if let Some(retrieved) = storage.get(&cid).await? {
///     assert_eq!(retrieved.as_ref(), data);
/// }
/// # Ok(())
/// # }
/// ```
#[trait_variant::make(Send)]
pub trait BlockStore: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not found.
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>>;

    /// Put a block, return its CID
    ///
    /// The CID is calculated from the data using SHA-256 hash and DAG-CBOR codec.
    async fn put(&self, data: &[u8]) -> Result<IpldCid>;

    /// Check if a block exists without retrieving it
    async fn has(&self, cid: &IpldCid) -> Result<bool>;

    /// Put many blocks at once
    ///
    /// The provided CIDs should match the data; callers verify before
    /// handing over untrusted blocks.
    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()>;

    /// Get multiple blocks at once
    ///
    /// Returns a vec of the same length as the input, with `None` for missing blocks.
    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>>;

    /// Durably apply a commit
    ///
    /// Persists all of `commit.blocks` and records `commit.cid` as the head.
    /// When this returns `Ok`, the commit must survive a restart of a
    /// persistent store. On error nothing may be reported as the new head.
    async fn apply_commit(&self, commit: CommitData) -> Result<()>;
}

pub mod file;
pub mod memory;

pub use file::FileBlockStore;
pub use memory::MemoryBlockStore;
