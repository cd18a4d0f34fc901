//! Versioned, content-addressed record repository
//!
//! This crate is the storage core of a single-tenant personal data server:
//!
//! - **Codec**: canonical DAG-CBOR encoding and CID construction over the
//!   multicodec/multihash tables
//! - **MST (Merkle Search Tree)**: immutable, deterministic key → CID index
//! - **Commits**: signed checkpoints of the tree, chained by CID
//! - **Storage**: pluggable block storage with in-memory and CAR-file stores
//! - **CAR I/O**: whole-repository export and verified import
//! - **Repository service**: record CRUD with optimistic concurrency checks,
//!   paginated listing and historical reads
//!
//! Any insertion order of the same key/value pairs produces the same tree and
//! therefore the same root CID; old roots stay readable because stores only
//! ever gain blocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quire_repo::{MemoryBlockStore, RepoService, Value};
//! use quire_repo::repo::CreateRecordRequest;
//!
//! # async fn example(key: k256::ecdsa::SigningKey) -> quire_repo::Result<()> {
//! let repo = RepoService::new(Arc::new(MemoryBlockStore::new()), key, "did:example:alice");
//! repo.initialize().await?;
//!
//! let record = Value::map_from_entries([("text", Value::from("hi"))])?;
//! let created = repo
//!     .create_record(CreateRecordRequest::new().collection("posts").record(record).build())
//!     .await?;
//! println!("{} at version {}", created.cid, created.commit.unwrap().version);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// CAR (Content Addressable aRchive) utilities
pub mod car;
pub mod codec;
/// Commit structures and signature verification
pub mod commit;
pub mod crypto;
pub mod error;
/// Merkle Search Tree implementation
pub mod mst;
pub mod repo;
/// Block storage abstraction
pub mod storage;
pub mod tid;
pub mod value;

pub use commit::{Commit, SigningKey};
pub use crypto::{KeyCodec, PublicKey};
pub use error::{RepoError, RepoErrorKind, Result};
pub use mst::Mst;
pub use repo::{CommitData, RepoConfig, RepoService, RepoStatus};
pub use storage::{BlockStore, FileBlockStore, MemoryBlockStore};
pub use tid::{Tid, Ticker};
pub use value::Value;
