mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::*;
use quire_repo::repo::{DeleteRecordRequest, GetRecordRequest, ListRecordsRequest};
use quire_repo::{MemoryBlockStore, RepoErrorKind, RepoService, RepoStatus, SigningKey, Value};

async fn populated() -> MemRepo {
    let repo = memory_repo().await;
    for i in 0..12 {
        put(&repo, "posts", &format!("p{:02}", i), text(&i.to_string())).await;
    }
    put(&repo, "likes", "l1", text("like")).await;
    put(&repo, "posts", "p03", text("edited")).await;
    repo.delete_record(DeleteRecordRequest::new().collection("posts").rkey("p07").build())
        .await
        .unwrap();
    repo
}

fn empty_repo() -> MemRepo {
    RepoService::new(Arc::new(MemoryBlockStore::new()), signing_key(1), DID)
}

#[tokio::test]
async fn earlier_versions_stay_readable() {
    let repo = memory_repo().await;
    put(&repo, "posts", "a", text("v1")).await;
    let first = repo.current_commit_cid().unwrap().unwrap();
    put(&repo, "posts", "a", text("v2")).await;

    let old = repo
        .get_record(
            GetRecordRequest::new()
                .collection("posts")
                .rkey("a")
                .cid(first)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(old.value, text("v1"));

    let now = repo
        .get_record(GetRecordRequest::new().collection("posts").rkey("a").build())
        .await
        .unwrap();
    assert_eq!(now.value, text("v2"));
}

#[tokio::test]
async fn node_shaped_record_reads_by_its_cid() {
    let repo = memory_repo().await;
    let record = Value::map_from_entries([
        ("e", Value::Array(Vec::new())),
        ("text", Value::from("hi")),
    ])
    .unwrap();
    let c1 = put(&repo, "posts", "a", record.clone()).await;
    put(&repo, "posts", "a", text("later")).await;

    let read = repo
        .get_record(GetRecordRequest::new().collection("posts").rkey("a").cid(c1).build())
        .await
        .unwrap();
    assert_eq!(read.cid, c1);
    assert_eq!(read.value, record);
}

#[tokio::test]
async fn version_of_another_key_is_not_found() {
    let repo = memory_repo().await;
    put(&repo, "posts", "a", text("mine")).await;
    let foreign = put(&repo, "notes", "zzz", text("someone else's record")).await;

    let err = repo
        .get_record(
            GetRecordRequest::new()
                .collection("posts")
                .rkey("a")
                .cid(foreign)
                .build(),
        )
        .await
        .unwrap_err();
    assert!(err.is(RepoErrorKind::NotFound));

    // the same CID is a valid version of the key that held it
    let read = repo
        .get_record(
            GetRecordRequest::new()
                .collection("notes")
                .rkey("zzz")
                .cid(foreign)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(read.value, text("someone else's record"));
}

#[tokio::test]
async fn export_import_reproduces_repository() {
    let repo = populated().await;
    let data = repo.export_repository().await.unwrap();
    assert_eq!(data.commits.len(), 15);

    let copy = empty_repo();
    assert!(matches!(copy.status().unwrap(), RepoStatus::Uninitialized));
    copy.import(data, Some(&repo.public_key())).await.unwrap();

    assert_eq!(copy.current_root().unwrap(), repo.current_root().unwrap());
    assert_eq!(
        copy.current_commit_cid().unwrap(),
        repo.current_commit_cid().unwrap()
    );
    assert_eq!(
        copy.list_collections().await.unwrap(),
        repo.list_collections().await.unwrap()
    );

    let listed = copy
        .list_records(ListRecordsRequest::new().collection("posts").build())
        .await
        .unwrap();
    assert_eq!(listed.records.len(), 11);

    // writes continue on the imported chain
    put(&copy, "posts", "new", text("after import")).await;
    let head = copy.head().unwrap();
    assert_eq!(head.version(), 16);
    assert_eq!(
        head.commit.as_ref().unwrap().commit.prev,
        repo.current_commit_cid().unwrap()
    );
    assert!(head.rev() > repo.head().unwrap().rev());
}

#[tokio::test]
async fn car_export_round_trips() {
    let repo = populated().await;
    let car = repo.export_car().await.unwrap();

    let copy = empty_repo();
    copy.import_car(&car, Some(&repo.public_key())).await.unwrap();
    assert_eq!(copy.current_root().unwrap(), repo.current_root().unwrap());
    assert_eq!(copy.commit_log(None).await.unwrap().len(), 15);

    put(&copy, "likes", "l2", text("another")).await;
    assert_eq!(copy.head().unwrap().version(), 16);
}

#[tokio::test]
async fn genesis_exports_empty() {
    let repo = memory_repo().await;
    let data = repo.export_repository().await.unwrap();
    assert!(data.commits.is_empty());

    let car = repo.export_car().await.unwrap();
    let copy = empty_repo();
    copy.import_car(&car, None).await.unwrap();
    assert_eq!(copy.current_root().unwrap(), repo.current_root().unwrap());
    assert_eq!(copy.head().unwrap().version(), 0);
}

#[tokio::test]
async fn tampered_record_is_rejected() {
    let repo = populated().await;
    let mut data = repo.export_repository().await.unwrap();
    let (cid, _) = data.records.iter().next().map(|(c, b)| (*c, b.clone())).unwrap();
    data.records
        .insert(cid, Bytes::from_static(b"\xa1\x61t\x61x"));

    let copy = empty_repo();
    let err = copy.import(data, None).await.unwrap_err();
    assert!(err.is(RepoErrorKind::Encoding));
    assert!(matches!(copy.status().unwrap(), RepoStatus::Uninitialized));
    assert!(copy.storage().is_empty());
}

#[tokio::test]
async fn foreign_signature_is_rejected() {
    let repo = populated().await;
    let data = repo.export_repository().await.unwrap();
    let stranger = signing_key(9).public_key();

    let copy = empty_repo();
    let err = copy.import(data, Some(&stranger)).await.unwrap_err();
    assert!(err.is(RepoErrorKind::Signature));
    assert!(copy.storage().is_empty());
}

#[tokio::test]
async fn broken_chain_is_rejected() {
    let repo = populated().await;
    let mut data = repo.export_repository().await.unwrap();
    data.commits.remove(3);

    let copy = empty_repo();
    let err = copy.import(data, None).await.unwrap_err();
    assert!(err.is(RepoErrorKind::InvalidCommit));
}

#[tokio::test]
async fn import_needs_uninitialized_repository() {
    let repo = populated().await;
    let data = repo.export_repository().await.unwrap();

    let target = memory_repo().await;
    let before = target.current_root().unwrap();
    let err = target.import(data, None).await.unwrap_err();
    assert!(err.is(RepoErrorKind::AlreadyExists));
    assert_eq!(target.current_root().unwrap(), before);
}

#[tokio::test]
async fn commit_log_walks_back() {
    let repo = populated().await;
    let log = repo.commit_log(Some(4)).await.unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0].commit.version, 15);
    assert_eq!(log[3].commit.version, 12);
    for entry in &log {
        entry.commit.verify(&repo.public_key()).unwrap();
    }
}
