//! Request and response types for repository operations

use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;

use super::validation::ValidationStatus;
use crate::commit::Commit;
use crate::tid::Tid;
use crate::value::Value;

/// Commit produced by a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    /// Commit CID
    pub cid: IpldCid,
    /// Revision TID
    pub rev: Tid,
    /// Sequence number along the chain
    pub version: u64,
}

/// Create a record
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct CreateRecordRequest {
    /// Collection name
    #[builder(into)]
    pub collection: SmolStr,
    /// Record key; a TID is generated when absent
    #[builder(into)]
    pub rkey: Option<SmolStr>,
    /// Record value
    pub record: Value,
    /// Expected current commit CID
    pub swap_commit: Option<IpldCid>,
    /// `Some(false)` skips schema validation
    pub validate: Option<bool>,
}

/// Result of creating a record
#[derive(Debug, Clone)]
pub struct CreateRecordResponse {
    /// Record key that was written
    pub rkey: SmolStr,
    /// Record CID
    pub cid: IpldCid,
    /// Validation outcome
    pub validation_status: ValidationStatus,
    /// Commit that recorded the write
    pub commit: Option<CommitMeta>,
}

/// Create or replace a record
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct PutRecordRequest {
    /// Collection name
    #[builder(into)]
    pub collection: SmolStr,
    /// Record key
    #[builder(into)]
    pub rkey: SmolStr,
    /// Record value
    pub record: Value,
    /// Expected current commit CID
    pub swap_commit: Option<IpldCid>,
    /// Expected current record CID
    pub swap_record: Option<IpldCid>,
    /// `Some(false)` skips schema validation
    pub validate: Option<bool>,
}

/// Result of putting a record
#[derive(Debug, Clone)]
pub struct PutRecordResponse {
    /// Record CID
    pub cid: IpldCid,
    /// Validation outcome
    pub validation_status: ValidationStatus,
    /// Commit that recorded the write; `None` when the record was unchanged
    pub commit: Option<CommitMeta>,
}

/// Delete a record
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct DeleteRecordRequest {
    /// Collection name
    #[builder(into)]
    pub collection: SmolStr,
    /// Record key
    #[builder(into)]
    pub rkey: SmolStr,
    /// Expected current commit CID
    pub swap_commit: Option<IpldCid>,
    /// Expected current record CID
    pub swap_record: Option<IpldCid>,
}

/// Result of deleting a record
#[derive(Debug, Clone)]
pub struct DeleteRecordResponse {
    /// Commit that recorded the delete
    pub commit: CommitMeta,
}

/// Read one record
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct GetRecordRequest {
    /// Collection name
    #[builder(into)]
    pub collection: SmolStr,
    /// Record key
    #[builder(into)]
    pub rkey: SmolStr,
    /// Read as of this commit, tree root, or record version
    pub cid: Option<IpldCid>,
}

/// A record and its CID
#[derive(Debug, Clone, PartialEq)]
pub struct GetRecordResponse {
    /// Record CID
    pub cid: IpldCid,
    /// Decoded record
    pub value: Value,
}

/// Page through one collection
#[derive(Debug, Clone, Default, bon::Builder)]
#[builder(start_fn = new)]
pub struct ListRecordsRequest {
    /// Collection name
    #[builder(into)]
    pub collection: SmolStr,
    /// Page size
    pub limit: Option<usize>,
    /// Last rkey of the previous page
    #[builder(into)]
    pub cursor: Option<SmolStr>,
    /// Inclusive lower rkey bound
    #[builder(into)]
    pub rkey_start: Option<SmolStr>,
    /// Exclusive upper rkey bound
    #[builder(into)]
    pub rkey_end: Option<SmolStr>,
    /// Descending order
    #[builder(default)]
    pub reverse: bool,
}

/// One listed record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    /// Collection name
    pub collection: SmolStr,
    /// Record key
    pub rkey: SmolStr,
    /// Record CID
    pub cid: IpldCid,
    /// Decoded record
    pub value: Value,
}

/// One page of records
#[derive(Debug, Clone)]
pub struct ListRecordsResponse {
    /// Records in the requested order
    pub records: Vec<RecordEntry>,
    /// Present only when more records remain
    pub cursor: Option<SmolStr>,
}

/// Everything reachable from one head
///
/// `commits` runs oldest to newest, so the last entry is the head.
#[derive(Debug, Clone, Default)]
pub struct ExportData {
    /// Commit blocks in chain order
    pub commits: Vec<(IpldCid, Bytes)>,
    /// MST node blocks of every commit's tree
    pub nodes: std::collections::BTreeMap<IpldCid, Bytes>,
    /// Record blocks referenced by any of those trees
    pub records: std::collections::BTreeMap<IpldCid, Bytes>,
}

/// A decoded commit and its CID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    /// Commit CID
    pub cid: IpldCid,
    /// Decoded commit
    pub commit: Commit,
}
