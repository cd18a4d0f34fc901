//! Fixed tree roots shared with other atproto MST implementations

use std::sync::Arc;

use quire_repo::codec::parse_cid;
use quire_repo::{MemoryBlockStore, Mst};

const EMPTY_ROOT: &str = "bafyreie5737gdxlw5i64vzichcalba3z2v5n6icifvx5xytvske7mr3hpm";
const LEAF: &str = "bafyreie5cvv4h45feadgeuwhbcutmh6t2ceseocckahdoe6uat64zmz454";

#[tokio::test]
async fn empty_tree_root() {
    let mst = Mst::new(Arc::new(MemoryBlockStore::new()));
    assert_eq!(mst.root().await.unwrap().to_string(), EMPTY_ROOT);
}

#[tokio::test]
async fn two_key_tree_root() {
    let leaf = parse_cid(LEAF).unwrap();
    let mst = Mst::new(Arc::new(MemoryBlockStore::new()))
        .add("com.example.record/3jqfcqzm3ft2j", leaf)
        .await
        .unwrap()
        .add("com.example.record/3jqfcqzm3fz2j", leaf)
        .await
        .unwrap();
    assert_eq!(
        mst.root().await.unwrap().to_string(),
        "bafyreidfcktqnfmykz2ps3dbul35pepleq7kvv526g47xahuz3rqtptmky"
    );

    let back = mst.delete("com.example.record/3jqfcqzm3fz2j").await.unwrap();
    let single = Mst::new(Arc::new(MemoryBlockStore::new()))
        .add("com.example.record/3jqfcqzm3ft2j", leaf)
        .await
        .unwrap();
    assert_eq!(back.root().await.unwrap(), single.root().await.unwrap());
}
