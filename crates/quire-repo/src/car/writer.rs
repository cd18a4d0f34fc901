//! CAR file writing utilities

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarWriter;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{RepoError, Result};
use crate::mst::{Mst, MstFuture, NodeEntry};
use crate::storage::BlockStore;

/// Write blocks to CAR file
///
/// Roots should contain commit CID(s).
/// Blocks are written in sorted CID order (BTreeMap) for determinism, and
/// the file is synced to disk before returning.
pub async fn write_car(
    path: impl AsRef<Path>,
    roots: Vec<IpldCid>,
    blocks: BTreeMap<IpldCid, Bytes>,
) -> Result<()> {
    let bytes = encode_car(roots, blocks).await?;

    let mut file = File::create(path).await.map_err(RepoError::io)?;
    file.write_all(&bytes).await.map_err(RepoError::io)?;
    file.sync_all().await.map_err(RepoError::io)?;

    Ok(())
}

async fn encode_car(roots: Vec<IpldCid>, blocks: BTreeMap<IpldCid, Bytes>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let header = iroh_car::CarHeader::new_v1(roots);
    let mut writer = CarWriter::new(header, &mut buffer);

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(RepoError::car)?;
    }

    writer.finish().await.map_err(RepoError::car)?;
    buffer.flush().await.map_err(RepoError::io)?;

    Ok(buffer)
}

/// Write blocks to CAR bytes (in-memory)
///
/// Like `write_car()` but returns the archive instead of writing a file.
pub async fn write_car_bytes(root: IpldCid, blocks: BTreeMap<IpldCid, Bytes>) -> Result<Vec<u8>> {
    encode_car(vec![root], blocks).await
}

impl<S: BlockStore + Send + Sync + 'static> Mst<S> {
    /// Stream this tree's node blocks and then its record blocks to a CAR writer
    ///
    /// Blocks whose CIDs are in `seen` are skipped, and every written CID is
    /// added to it, so several versions of a tree can share one archive
    /// without duplicates. Every block must already be in storage.
    pub async fn write_blocks_to_car<W: AsyncWrite + Send + Unpin>(
        &self,
        writer: &mut CarWriter<W>,
        seen: &mut BTreeSet<IpldCid>,
    ) -> Result<()> {
        let mut leaf_cids = Vec::new();
        self.write_mst_nodes_to_car(writer, seen, &mut leaf_cids)
            .await?;

        leaf_cids.retain(|cid| seen.insert(*cid));
        let leaf_blocks = self.storage().get_many(&leaf_cids).await?;
        for (cid, maybe_data) in leaf_cids.iter().zip(leaf_blocks) {
            let data = maybe_data.ok_or_else(|| RepoError::not_found("record block", cid))?;
            writer.write(*cid, &data).await.map_err(RepoError::car)?;
        }

        Ok(())
    }

    fn write_mst_nodes_to_car<'a, W: AsyncWrite + Send + Unpin>(
        &'a self,
        writer: &'a mut CarWriter<W>,
        seen: &'a mut BTreeSet<IpldCid>,
        leaf_cids: &'a mut Vec<IpldCid>,
    ) -> MstFuture<'a, ()> {
        Box::pin(async move {
            let pointer = self.get_pointer().await?;
            if !seen.insert(pointer) {
                return Ok(());
            }

            let node_bytes = self
                .storage()
                .get(&pointer)
                .await?
                .ok_or_else(|| RepoError::not_found("MST node", pointer))?;
            writer
                .write(pointer, &node_bytes)
                .await
                .map_err(RepoError::car)?;

            for entry in self.get_entries().await? {
                match entry {
                    NodeEntry::Leaf { value, .. } => leaf_cids.push(*value),
                    NodeEntry::Tree(subtree) => {
                        subtree
                            .write_mst_nodes_to_car(writer, seen, leaf_cids)
                            .await?
                    }
                }
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::reader::{parse_car_bytes, read_car};
    use crate::storage::memory::MemoryBlockStore;
    use crate::value::Value;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_write_car_with_blocks() {
        let temp_file = NamedTempFile::new().unwrap();

        let (cid1, data1) = Value::from("one").to_block().unwrap();
        let (cid2, data2) = Value::from("two").to_block().unwrap();
        let blocks = BTreeMap::from([(cid1, data1.clone()), (cid2, data2.clone())]);

        write_car(temp_file.path(), vec![cid1], blocks).await.unwrap();

        let read_blocks = read_car(temp_file.path()).await.unwrap();
        assert_eq!(read_blocks.len(), 2);
        assert_eq!(read_blocks.get(&cid1).unwrap(), &data1);
        assert_eq!(read_blocks.get(&cid2).unwrap(), &data2);
    }

    #[tokio::test]
    async fn test_stream_tree_versions_without_duplicates() {
        let storage = Arc::new(MemoryBlockStore::new());
        let mut mst = Mst::new(storage.clone());
        let mut versions = Vec::new();

        for i in 0..30i64 {
            let (cid, bytes) = Value::from(i).to_block().unwrap();
            storage.put_many([(cid, bytes)]).await.unwrap();
            mst = mst.add(&format!("nums/{:03}", i), cid).await.unwrap();
            mst.persist().await.unwrap();
            versions.push(mst.clone());
        }

        let head = versions.last().unwrap().root().await.unwrap();
        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(iroh_car::CarHeader::new_v1(vec![head]), &mut buffer);
        let mut seen = BTreeSet::new();
        for version in &versions {
            version.write_blocks_to_car(&mut writer, &mut seen).await.unwrap();
        }
        writer.finish().await.unwrap();

        let parsed = parse_car_bytes(&buffer).await.unwrap();
        assert_eq!(parsed.root, head);
        assert_eq!(parsed.blocks.len(), seen.len());
        // 30 records plus every node any version references
        assert!(parsed.blocks.len() > 30);
        for version in &versions {
            let root = version.root().await.unwrap();
            assert!(parsed.blocks.contains_key(&root));
        }
    }

    #[tokio::test]
    async fn test_missing_record_block_is_not_found() {
        let storage = Arc::new(MemoryBlockStore::new());
        let (cid, _) = Value::from("absent").to_block().unwrap();
        let mst = Mst::new(storage).add("a/b", cid).await.unwrap();
        mst.persist().await.unwrap();

        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(iroh_car::CarHeader::new_v1(vec![cid]), &mut buffer);
        let err = mst
            .write_blocks_to_car(&mut writer, &mut BTreeSet::new())
            .await
            .unwrap_err();
        assert!(err.is(crate::RepoErrorKind::NotFound));
    }
}
