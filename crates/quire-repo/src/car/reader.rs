//! CAR file reading utilities

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarReader;
use n0_future::stream::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::error::{RepoError, Result};

/// Parsed CAR data
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// The first root CID from the CAR header
    pub root: IpldCid,
    /// All blocks in the CAR file
    pub blocks: BTreeMap<IpldCid, Bytes>,
}

async fn collect_blocks<R: AsyncRead + Send + Unpin>(
    reader: CarReader<R>,
) -> Result<BTreeMap<IpldCid, Bytes>> {
    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(RepoError::car_parse)?;
        blocks.insert(cid, Bytes::from(data));
    }

    Ok(blocks)
}

/// Read entire CAR file into memory
///
/// Returns BTreeMap of CID -> block data (sorted order for determinism).
/// Block bytes are not checked against their CIDs here.
pub async fn read_car(path: impl AsRef<Path>) -> Result<BTreeMap<IpldCid, Bytes>> {
    let file = File::open(path).await.map_err(RepoError::io)?;
    let reader = CarReader::new(file).await.map_err(RepoError::car)?;
    collect_blocks(reader).await
}

/// Read CAR file header (roots only)
pub async fn read_car_header(path: impl AsRef<Path>) -> Result<Vec<IpldCid>> {
    let file = File::open(path).await.map_err(RepoError::io)?;
    let reader = CarReader::new(file).await.map_err(RepoError::car)?;
    Ok(reader.header().roots().to_vec())
}

/// Parse CAR bytes into root and block map
///
/// Returns the first root CID and all blocks.
pub async fn parse_car_bytes(data: &[u8]) -> Result<ParsedCar> {
    let reader = CarReader::new(data).await.map_err(RepoError::car_parse)?;

    let root = reader
        .header()
        .roots()
        .first()
        .copied()
        .ok_or_else(|| RepoError::car_msg("CAR file has no roots"))?;

    let blocks = collect_blocks(reader).await?;
    Ok(ParsedCar { root, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dag_cbor_cid;
    use iroh_car::CarWriter;
    use tempfile::NamedTempFile;
    use tokio::io::AsyncWriteExt;

    async fn make_test_car(roots: Vec<IpldCid>, blocks: Vec<(IpldCid, Vec<u8>)>) -> Vec<u8> {
        let mut buf = Vec::new();
        let header = iroh_car::CarHeader::new_v1(roots);
        let mut writer = CarWriter::new(header, &mut buf);

        for (cid, data) in blocks {
            writer.write(cid, data).await.unwrap();
        }

        writer.finish().await.unwrap();
        buf.flush().await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_parse_car_with_blocks() {
        let data1 = vec![0x18, 1];
        let data2 = vec![0x18, 2];
        let cid1 = dag_cbor_cid(&data1).unwrap();
        let cid2 = dag_cbor_cid(&data2).unwrap();

        let car_bytes = make_test_car(
            vec![cid1],
            vec![(cid1, data1.clone()), (cid2, data2.clone())],
        )
        .await;

        let parsed = parse_car_bytes(&car_bytes).await.unwrap();
        assert_eq!(parsed.root, cid1);
        assert_eq!(parsed.blocks.len(), 2);
        assert_eq!(parsed.blocks.get(&cid1).unwrap().as_ref(), &data1);
        assert_eq!(parsed.blocks.get(&cid2).unwrap().as_ref(), &data2);
    }

    #[tokio::test]
    async fn test_parse_garbage() {
        let err = parse_car_bytes(b"not a car file").await.unwrap_err();
        assert!(err.is(crate::RepoErrorKind::Car));
    }

    #[tokio::test]
    async fn test_read_car_from_file() {
        let data = vec![0x18, 7];
        let cid = dag_cbor_cid(&data).unwrap();
        let car_bytes = make_test_car(vec![cid], vec![(cid, data.clone())]).await;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), &car_bytes).await.unwrap();

        assert_eq!(read_car_header(temp_file.path()).await.unwrap(), vec![cid]);
        let blocks = read_car(temp_file.path()).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks.get(&cid).unwrap().as_ref(), &data);
    }
}
