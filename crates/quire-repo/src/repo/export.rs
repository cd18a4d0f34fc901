//! Whole-repository export and verified import

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarWriter;
use tokio::io::AsyncWrite;

use super::{CommitData, CommitEntry, ExportData, Head, RepoService};
use crate::car;
use crate::codec;
use crate::commit::{Commit, SigningKey};
use crate::crypto::PublicKey;
use crate::error::{RepoError, Result};
use crate::mst::Mst;
use crate::storage::{BlockStore, MemoryBlockStore};

impl<S, K> RepoService<S, K>
where
    S: BlockStore + Send + Sync + 'static,
    K: SigningKey + Send + Sync,
{
    /// Every block reachable from the current head, history included
    ///
    /// Works from one head snapshot, so concurrent writes do not tear it.
    #[tracing::instrument(skip_all)]
    pub async fn export_repository(&self) -> Result<ExportData> {
        let head = self.head()?;

        let mut log = self.chain_from(&head).await?;
        log.reverse();

        let mut nodes = BTreeMap::new();
        let mut leaves = Vec::new();
        let mut roots = vec![head.root];
        roots.extend(log.iter().map(|(_, commit, _)| commit.data));
        for root in roots {
            self.tree_at(root).walk_blocks(&mut nodes, &mut leaves).await?;
        }

        let leaves: Vec<IpldCid> = leaves
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let blocks = self.storage.get_many(&leaves).await?;
        let mut records = BTreeMap::new();
        for (cid, block) in leaves.into_iter().zip(blocks) {
            let bytes = block.ok_or_else(|| RepoError::not_found("record block", cid))?;
            records.insert(cid, bytes);
        }

        let commits = log.into_iter().map(|(cid, _, bytes)| (cid, bytes)).collect();
        tracing::info!(nodes = nodes.len(), records = records.len(), "exported repository");
        Ok(ExportData {
            commits,
            nodes,
            records,
        })
    }

    /// Commit blocks from `head` back to the first, newest first
    pub(super) async fn chain_from(&self, head: &Head) -> Result<Vec<(IpldCid, Commit, Bytes)>> {
        let mut log = Vec::new();
        let mut next = head.commit_cid();
        while let Some(cid) = next {
            let bytes = self
                .storage
                .get(&cid)
                .await?
                .ok_or_else(|| RepoError::not_found("commit", cid))?;
            let commit = Commit::from_cbor(&bytes)?;
            next = commit.prev;
            log.push((cid, commit, bytes));
        }
        Ok(log)
    }

    /// The same blocks as [`export_repository`](Self::export_repository) as a
    /// CAR archive rooted at the head commit
    ///
    /// At genesis the archive is rooted at the empty tree instead.
    pub async fn export_car(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.export_car_to(&mut buffer).await?;
        Ok(buffer)
    }

    /// Stream the export archive into `out`
    #[tracing::instrument(skip_all)]
    pub async fn export_car_to<W: AsyncWrite + Send + Unpin>(&self, out: &mut W) -> Result<()> {
        let head = self.head()?;
        let log = self.chain_from(&head).await?;

        let car_root = head.commit_cid().unwrap_or(head.root);
        let mut writer = CarWriter::new(iroh_car::CarHeader::new_v1(vec![car_root]), out);
        let mut seen = BTreeSet::new();

        for (cid, _, bytes) in &log {
            seen.insert(*cid);
            writer.write(*cid, bytes).await.map_err(RepoError::car)?;
        }

        self.tree_at(head.root)
            .write_blocks_to_car(&mut writer, &mut seen)
            .await?;
        for (_, commit, _) in &log {
            self.tree_at(commit.data)
                .write_blocks_to_car(&mut writer, &mut seen)
                .await?;
        }

        writer.finish().await.map_err(RepoError::car)?;
        tracing::info!(blocks = seen.len(), root = %car_root, "wrote export archive");
        Ok(())
    }

    /// Load an export into this uninitialized repository
    ///
    /// Every block is re-hashed against its CID. The chain must start at
    /// version 1 with no `prev`, link each commit to the one before, and
    /// increase versions by one and revisions strictly. With `verify_key`
    /// every commit signature is checked. Each commit's tree is rebuilt from
    /// its leaves and must reproduce the committed root. Nothing is written
    /// until all of that passes; the repository then activates at the last
    /// commit.
    #[tracing::instrument(skip_all, fields(commits = data.commits.len()))]
    pub async fn import(&self, data: ExportData, verify_key: Option<&PublicKey>) -> Result<()> {
        let mut ticker = self.writer.lock().await;
        if self.current()?.is_some() {
            return Err(RepoError::already_exists("repository", &self.did));
        }

        for (cid, bytes) in &data.commits {
            if !codec::verify_block(cid, bytes)? {
                return Err(RepoError::invalid_commit(format!("commit block {} does not match its CID", cid)));
            }
        }
        for (cid, bytes) in &data.nodes {
            if !codec::verify_block(cid, bytes)? {
                return Err(RepoError::invalid_mst(format!("node block {} does not match its CID", cid)));
            }
        }
        for (cid, bytes) in &data.records {
            if !codec::verify_block(cid, bytes)? {
                return Err(RepoError::encoding_msg(format!("record block {} does not match its CID", cid)));
            }
        }

        let staging = Arc::new(MemoryBlockStore::new_from_blocks(
            data.nodes.into_iter().chain(data.records).collect(),
        ));

        let mut previous: Option<CommitEntry> = None;
        let mut nodes = BTreeMap::new();
        let mut leaves = Vec::new();
        let mut commit_blocks = BTreeMap::new();

        for (cid, bytes) in data.commits {
            let commit = Commit::from_cbor(&bytes)?;
            self.check_link(previous.as_ref(), &cid, &commit)?;
            if let Some(key) = verify_key {
                commit
                    .verify(key)
                    .map_err(|e| RepoError::from(e).with_context(format!("commit {}", cid)))?;
            }

            replay_tree(&staging, &commit.data).await?;
            Mst::load(staging.clone(), commit.data, None)
                .walk_blocks(&mut nodes, &mut leaves)
                .await?;

            tracing::debug!(commit = %cid, version = commit.version, "verified imported commit");
            commit_blocks.insert(cid, bytes);
            previous = Some(CommitEntry { cid, commit });
        }

        let mut records = BTreeMap::new();
        for cid in leaves {
            let bytes = staging
                .get(&cid)
                .await?
                .ok_or_else(|| RepoError::not_found("record block", cid))?;
            records.insert(cid, bytes);
        }

        let Some(last) = previous else {
            let root = Mst::new(self.storage.clone()).persist().await?;
            self.publish(Head { commit: None, root })?;
            tracing::info!("imported empty repository");
            return Ok(());
        };

        let block_count = nodes.len() + records.len() + commit_blocks.len();
        self.storage.put_many(nodes.into_iter().chain(records)).await?;
        self.storage
            .apply_commit(CommitData {
                cid: last.cid,
                rev: last.commit.rev.clone(),
                prev: last.commit.prev,
                data: last.commit.data,
                blocks: commit_blocks,
            })
            .await?;

        ticker.observe(&last.commit.rev);
        tracing::info!(commit = %last.cid, version = last.commit.version, blocks = block_count, "imported repository");
        self.publish(Head {
            root: last.commit.data,
            commit: Some(last),
        })?;
        Ok(())
    }

    fn check_link(&self, previous: Option<&CommitEntry>, cid: &IpldCid, commit: &Commit) -> Result<()> {
        if commit.did != self.did {
            return Err(RepoError::invalid_commit(format!(
                "commit {} belongs to {}, not {}",
                cid, commit.did, self.did
            )));
        }
        match previous {
            None => {
                if commit.prev.is_some() || commit.version != 1 {
                    return Err(RepoError::invalid_commit(format!(
                        "first commit {} must have version 1 and no prev",
                        cid
                    )));
                }
            }
            Some(prev) => {
                if commit.prev != Some(prev.cid) {
                    return Err(RepoError::invalid_commit(format!(
                        "commit {} does not link to {}",
                        cid, prev.cid
                    )));
                }
                if commit.version != prev.commit.version + 1 {
                    return Err(RepoError::invalid_commit(format!(
                        "commit {} has version {} after {}",
                        cid, commit.version, prev.commit.version
                    )));
                }
                if commit.rev <= prev.commit.rev {
                    return Err(RepoError::invalid_commit(format!(
                        "commit {} revision {} does not follow {}",
                        cid, commit.rev, prev.commit.rev
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse a CAR export and [`import`](Self::import) it
    pub async fn import_car(&self, bytes: &[u8], verify_key: Option<&PublicKey>) -> Result<()> {
        let parsed = car::parse_car_bytes(bytes).await?;
        let staging = Arc::new(MemoryBlockStore::new_from_blocks(parsed.blocks));

        let mut commits = Vec::new();
        let mut next = match staging.get(&parsed.root).await? {
            Some(root) if Commit::from_cbor(&root).is_ok() => Some(parsed.root),
            Some(_) => None,
            None => return Err(RepoError::not_found("CAR root block", parsed.root)),
        };
        while let Some(cid) = next {
            let bytes = staging
                .get(&cid)
                .await?
                .ok_or_else(|| RepoError::not_found("commit", cid))?;
            next = Commit::from_cbor(&bytes)?.prev;
            commits.push((cid, bytes));
        }
        commits.reverse();

        let mut nodes = BTreeMap::new();
        let mut leaves = Vec::new();
        for (_, bytes) in &commits {
            let commit = Commit::from_cbor(bytes)?;
            Mst::load(staging.clone(), commit.data, None)
                .walk_blocks(&mut nodes, &mut leaves)
                .await?;
        }

        let mut records = BTreeMap::new();
        for cid in leaves {
            if let Some(bytes) = staging.get(&cid).await? {
                records.insert(cid, bytes);
            }
        }

        self.import(
            ExportData {
                commits,
                nodes,
                records,
            },
            verify_key,
        )
        .await
    }
}

/// Rebuild the tree at `root` from its leaves and require the same root
async fn replay_tree(staging: &Arc<MemoryBlockStore>, root: &IpldCid) -> Result<()> {
    let leaves = Mst::load(staging.clone(), *root, None).leaves().await?;

    let mut rebuilt = Mst::new(Arc::new(MemoryBlockStore::new()));
    for (key, cid) in &leaves {
        if !staging.has(cid).await? {
            return Err(RepoError::not_found("record block", cid));
        }
        rebuilt = rebuilt.add(key, *cid).await?;
    }

    let rebuilt_root = rebuilt.root().await?;
    if rebuilt_root != *root {
        return Err(RepoError::invalid_mst(format!(
            "tree {} is not canonical, its leaves build {}",
            root, rebuilt_root
        )));
    }
    Ok(())
}
