mod common;

use std::sync::Arc;

use common::*;
use quire_repo::repo::{GetRecordRequest, ListRecordsRequest};
use quire_repo::{FileBlockStore, RepoErrorKind, RepoService};
use tempfile::TempDir;

#[tokio::test]
async fn reopened_file_resumes_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repo.car");

    let head = {
        let store = Arc::new(FileBlockStore::open(&path).await.unwrap());
        let repo = RepoService::new(store, signing_key(1), DID);
        repo.initialize().await.unwrap();
        for i in 0..5 {
            put(&repo, "posts", &format!("p{}", i), text("hello")).await;
        }
        repo.head().unwrap()
    };

    let store = Arc::new(FileBlockStore::open(&path).await.unwrap());
    let roots = store.roots().unwrap();
    assert_eq!(roots, vec![head.commit_cid().unwrap()]);

    let repo = RepoService::open(store, signing_key(1), DID, roots[0])
        .await
        .unwrap();
    assert_eq!(repo.current_root().unwrap(), head.root);
    assert_eq!(repo.head().unwrap().version(), 5);

    let read = repo
        .get_record(GetRecordRequest::new().collection("posts").rkey("p3").build())
        .await
        .unwrap();
    assert_eq!(read.value, text("hello"));

    put(&repo, "posts", "p5", text("again")).await;
    let next = repo.head().unwrap();
    assert_eq!(next.version(), 6);
    assert!(next.rev() > head.rev());

    let listed = repo
        .list_records(ListRecordsRequest::new().collection("posts").build())
        .await
        .unwrap();
    assert_eq!(listed.records.len(), 6);
}

#[tokio::test]
async fn reopen_with_other_key_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repo.car");

    {
        let store = Arc::new(FileBlockStore::open(&path).await.unwrap());
        let repo = RepoService::new(store, signing_key(1), DID);
        repo.initialize().await.unwrap();
        put(&repo, "posts", "a", text("hello")).await;
    }

    let store = Arc::new(FileBlockStore::open(&path).await.unwrap());
    let head = store.roots().unwrap()[0];

    let err = RepoService::open(store.clone(), signing_key(2), DID, head)
        .await
        .unwrap_err();
    assert!(err.is(RepoErrorKind::Signature));

    let err = RepoService::open(store, signing_key(1), "did:example:bob", head)
        .await
        .unwrap_err();
    assert!(err.is(RepoErrorKind::InvalidCommit));
}

#[tokio::test]
async fn unwritable_file_aborts_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("repo.car");

    let store = Arc::new(FileBlockStore::new(&path));
    let repo = RepoService::new(store.clone(), signing_key(1), DID);
    repo.initialize().await.unwrap();

    let err = repo
        .put_record(
            quire_repo::repo::PutRecordRequest::new()
                .collection("posts")
                .rkey("a")
                .record(text("hello"))
                .build(),
        )
        .await
        .unwrap_err();
    assert!(err.is(RepoErrorKind::Io));
    assert_eq!(repo.current_commit_cid().unwrap(), None);
    assert!(store.roots().unwrap().is_empty());
}
