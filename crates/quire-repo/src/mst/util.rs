//! MST utility functions

use std::sync::Arc;

use bytes::Bytes;
use cid::Cid as IpldCid;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use super::node::{NodeData, NodeEntry, TreeEntry};
use super::tree::{Mst, MstFuture};
use crate::codec;
use crate::error::{MstError, Result};
use crate::storage::BlockStore;

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Serialize node to DAG-CBOR and compute its CID
pub fn node_to_cid(node: &NodeData) -> Result<(IpldCid, Bytes)> {
    let cbor =
        serde_ipld_dagcbor::to_vec(node).map_err(|e| MstError::Serialization(Box::new(e)))?;
    let cid = codec::dag_cbor_cid(&cbor)?;
    Ok((cid, Bytes::from(cbor)))
}

/// Calculate layer (depth) for a key based on its hash
///
/// depth = floor(leading_zero_bits(sha256(key)) / 2), a fanout of 4.
/// More leading zeros = higher layer.
pub fn layer_for_key(key: &str) -> usize {
    let hash = Sha256::digest(key.as_bytes());
    leading_zeros(&hash) / 2
}

/// Count leading zero bits in hash
fn leading_zeros(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Validate MST key format
///
/// Keys must match `[a-zA-Z0-9._:~-/]+`, at most [`MAX_KEY_LEN`] bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MstError::EmptyKey.into());
    }

    if key.len() > MAX_KEY_LEN {
        return Err(MstError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        }
        .into());
    }

    if !key
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b':' | b'~' | b'-' | b'/'))
    {
        return Err(MstError::InvalidKeyChars {
            key: key.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Count shared prefix length between two keys, in bytes
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Serialize flat entries to wire format (with prefix compression)
///
/// Subtree pointers are computed on the way, which may hash children that
/// have not been hashed yet.
pub fn serialize_node_data<'a, S: BlockStore + Send + Sync + 'static>(
    entries: &'a [NodeEntry<S>],
) -> MstFuture<'a, NodeData> {
    Box::pin(async move {
        let mut data = NodeData {
            left: None,
            entries: Vec::new(),
        };

        let mut i = 0;

        if let Some(NodeEntry::Tree(tree)) = entries.first() {
            data.left = Some(tree.get_pointer().await?);
            i += 1;
        }

        let mut last_key: &[u8] = &[];
        while i < entries.len() {
            let NodeEntry::Leaf { key, value } = &entries[i] else {
                return Err(
                    MstError::InvalidNode("Two Trees adjacent in flat entries".into()).into(),
                );
            };
            i += 1;

            let key_bytes = key.as_bytes();
            let prefix_len = common_prefix_len(last_key, key_bytes);

            let tree_ptr = if let Some(NodeEntry::Tree(tree)) = entries.get(i) {
                i += 1;
                Some(tree.get_pointer().await?)
            } else {
                None
            };

            data.entries.push(TreeEntry {
                prefix_len: prefix_len as u32,
                key_suffix: Bytes::copy_from_slice(&key_bytes[prefix_len..]),
                value: *value,
                tree: tree_ptr,
            });

            last_key = key_bytes;
        }

        Ok(data)
    })
}

/// Deserialize wire format to flat entries
///
/// Subtrees are returned unloaded; they are fetched on first access.
pub fn deserialize_node_data<S: BlockStore + Send + Sync + 'static>(
    storage: Arc<S>,
    data: &NodeData,
    layer: Option<usize>,
) -> Result<Vec<NodeEntry<S>>> {
    let mut entries = Vec::new();
    let child_layer = layer.map(|l| l.saturating_sub(1));

    if let Some(left_cid) = data.left {
        entries.push(NodeEntry::Tree(Mst::load(
            storage.clone(),
            left_cid,
            child_layer,
        )));
    }

    let mut last_key: Vec<u8> = Vec::new();
    for entry in &data.entries {
        let prefix_len = entry.prefix_len as usize;
        if prefix_len > last_key.len() {
            return Err(MstError::InvalidNode(format!(
                "prefix length {} exceeds previous key length {}",
                prefix_len,
                last_key.len()
            ))
            .into());
        }

        let mut full_key = last_key[..prefix_len].to_vec();
        full_key.extend_from_slice(&entry.key_suffix);
        let key_str = std::str::from_utf8(&full_key)
            .map_err(|e| MstError::InvalidNode(format!("Invalid UTF-8 in key: {}", e)))?;
        validate_key(key_str)?;

        if !last_key.is_empty() && full_key <= last_key {
            return Err(MstError::InvalidNode(format!("keys out of order at {}", key_str)).into());
        }

        entries.push(NodeEntry::Leaf {
            key: SmolStr::new(key_str),
            value: entry.value,
        });

        if let Some(tree_cid) = entry.tree {
            entries.push(NodeEntry::Tree(Mst::load(
                storage.clone(),
                tree_cid,
                child_layer,
            )));
        }

        last_key = full_key;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_valid() {
        assert!(validate_key("app.bsky.feed.post/abc123").is_ok());
        assert!(validate_key("posts/3jzfcijpj2z2a").is_ok());
        assert!(validate_key("a").is_ok());
        assert!(validate_key(&"a".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn test_validate_key_empty() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_validate_key_too_long() {
        let long_key = "a".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&long_key).is_err());
    }

    #[test]
    fn test_validate_key_invalid_chars() {
        assert!(validate_key("key with spaces").is_err());
        assert!(validate_key("key@invalid").is_err());
        assert!(validate_key("ключ").is_err());
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len(b"hello", b"help"), 3);
        assert_eq!(common_prefix_len(b"abc", b"abc"), 3);
        assert_eq!(common_prefix_len(b"abc", b"def"), 0);
        assert_eq!(common_prefix_len(b"", b"test"), 0);
    }

    #[test]
    fn test_layer_for_key() {
        assert_eq!(layer_for_key("posts/a"), layer_for_key("posts/a"));
        // keys with known hashes from the interop fixtures
        assert_eq!(layer_for_key("2653ae71"), 0);
        assert_eq!(layer_for_key("blue"), 1);
        assert_eq!(layer_for_key("app.bsky.feed.post/454397e440ec"), 4);
        assert_eq!(layer_for_key("app.bsky.feed.post/9adeb165882c"), 8);
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(leading_zeros(&[0, 0, 0, 1]), 31);
        assert_eq!(leading_zeros(&[0xFF, 0, 0]), 0);
        assert_eq!(leading_zeros(&[0, 0x80]), 8);
        assert_eq!(leading_zeros(&[0, 0x01]), 15);
    }
}
