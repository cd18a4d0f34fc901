//! Signed commits: checkpoints of the record tree chained by CID
//!
//! A commit names the repository identity, a sequence number, the MST root
//! it checkpoints, a revision TID and the CID of the commit before it. The
//! signature covers the DAG-CBOR encoding of every field except `sig`.

pub(crate) mod serde_bytes_helper;

use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;

use crate::codec;
use crate::crypto::{KeyCodec, PublicKey};
use crate::error::{CommitError, Result};
use crate::tid::Tid;

/// Repository commit object
///
/// Stored as a DAG-CBOR block and identified by its CID. `prev` is always
/// written, as an explicit `null` for the first commit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commit {
    /// Repository identity (DID)
    pub did: SmolStr,

    /// Sequence number along the chain, 1 for the first commit
    pub version: u64,

    /// MST root CID
    pub data: IpldCid,

    /// Revision TID
    pub rev: Tid,

    /// Previous commit CID (None for the first commit)
    pub prev: Option<IpldCid>,

    /// Signature bytes
    #[serde(with = "serde_bytes_helper")]
    pub sig: Bytes,
}

/// The signed portion of a commit
#[derive(serde::Serialize)]
struct UnsignedCommit<'a> {
    did: &'a str,
    version: u64,
    data: &'a IpldCid,
    rev: &'a Tid,
    prev: Option<&'a IpldCid>,
}

impl Commit {
    /// Create new unsigned commit (sig empty)
    pub fn new_unsigned(
        did: impl Into<SmolStr>,
        data: IpldCid,
        rev: Tid,
        prev: Option<IpldCid>,
        version: u64,
    ) -> Self {
        Self {
            did: did.into(),
            version,
            data,
            rev,
            prev,
            sig: Bytes::new(),
        }
    }

    /// Sign this commit with a key
    pub fn sign(mut self, key: &impl SigningKey) -> Result<Self> {
        let unsigned = self.unsigned_bytes()?;
        self.sig = key.sign_bytes(&unsigned)?;
        Ok(self)
    }

    /// Get the MST root CID
    pub fn data(&self) -> &IpldCid {
        &self.data
    }

    /// Get the revision TID
    pub fn rev(&self) -> &Tid {
        &self.rev
    }

    /// Get the previous commit CID
    pub fn prev(&self) -> Option<&IpldCid> {
        self.prev.as_ref()
    }

    /// Bytes covered by the signature: the commit without its `sig` field
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>> {
        let unsigned = UnsignedCommit {
            did: &self.did,
            version: self.version,
            data: &self.data,
            rev: &self.rev,
            prev: self.prev.as_ref(),
        };
        serde_ipld_dagcbor::to_vec(&unsigned)
            .map_err(|e| CommitError::Serialization(Box::new(e)).into())
    }

    /// Serialize to DAG-CBOR
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CommitError::Serialization(Box::new(e)).into())
    }

    /// Deserialize from DAG-CBOR
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(data)
            .map_err(|e| CommitError::Serialization(Box::new(e)).into())
    }

    /// Encoded block and its CID
    pub fn to_block(&self) -> Result<(IpldCid, Bytes)> {
        let cbor = self.to_cbor()?;
        let cid = codec::dag_cbor_cid(&cbor)?;
        Ok((cid, Bytes::from(cbor)))
    }

    /// Compute CID of this commit
    pub fn to_cid(&self) -> Result<IpldCid> {
        Ok(self.to_block()?.0)
    }

    /// Verify the signature against a public key
    ///
    /// The key type is taken from the key's codec.
    pub fn verify(&self, pubkey: &PublicKey) -> std::result::Result<(), CommitError> {
        let unsigned = self
            .unsigned_bytes()
            .map_err(|e| CommitError::Serialization(e.into()))?;
        let signature = self.sig.as_ref();

        match pubkey.codec {
            KeyCodec::Ed25519 => {
                let vk = pubkey
                    .to_ed25519()
                    .map_err(|e| CommitError::InvalidKey(e.to_string()))?;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
                vk.verify_strict(&unsigned, &sig)
                    .map_err(|_| CommitError::SignatureVerificationFailed)?;
            }
            KeyCodec::Secp256k1 => {
                use k256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
                let pk = pubkey
                    .to_k256()
                    .map_err(|e| CommitError::InvalidKey(e.to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
                VerifyingKey::from(&pk)
                    .verify(&unsigned, &sig)
                    .map_err(|_| CommitError::SignatureVerificationFailed)?;
            }
            KeyCodec::P256 => {
                use p256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
                let pk = pubkey
                    .to_p256()
                    .map_err(|e| CommitError::InvalidKey(e.to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
                VerifyingKey::from(&pk)
                    .verify(&unsigned, &sig)
                    .map_err(|_| CommitError::SignatureVerificationFailed)?;
            }
            KeyCodec::Unknown(code) => {
                return Err(CommitError::UnsupportedKeyType(code));
            }
        }

        Ok(())
    }
}

/// Whether `commit` carries a valid signature from `key`
pub fn verify_commit(commit: &Commit, key: &PublicKey) -> bool {
    match commit.verify(key) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(rev = %commit.rev, error = %e, "commit signature rejected");
            false
        }
    }
}

/// Signing collaborator for commits
///
/// Implemented for `ed25519_dalek::SigningKey`, `k256::ecdsa::SigningKey` and
/// `p256::ecdsa::SigningKey`. Implementations backed by remote signers report
/// failures as [`CommitError::Signer`].
pub trait SigningKey {
    /// Sign the given data and return signature as Bytes
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes>;

    /// Public half of the key, tagged with its codec
    fn public_key(&self) -> PublicKey;
}

impl SigningKey for ed25519_dalek::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use ed25519_dalek::Signer;
        let sig = Signer::sign(self, data);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey {
            codec: KeyCodec::Ed25519,
            bytes: Bytes::copy_from_slice(self.verifying_key().as_bytes()),
        }
    }
}

impl SigningKey for k256::ecdsa::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use k256::ecdsa::signature::Signer;
        let sig: k256::ecdsa::Signature = Signer::sign(self, data);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey {
            codec: KeyCodec::Secp256k1,
            bytes: Bytes::copy_from_slice(self.verifying_key().to_encoded_point(true).as_bytes()),
        }
    }
}

impl SigningKey for p256::ecdsa::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use p256::ecdsa::signature::Signer;
        let sig: p256::ecdsa::Signature = Signer::sign(self, data);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey {
            codec: KeyCodec::P256,
            bytes: Bytes::copy_from_slice(self.verifying_key().to_encoded_point(true).as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipld_core::ipld::Ipld;

    fn sample(prev: Option<IpldCid>) -> Commit {
        let data = codec::dag_cbor_cid(b"\xa2\x61e\x80\x61l\xf6").unwrap();
        Commit::new_unsigned(
            "did:example:alice",
            data,
            Tid::from_parts(1_700_000_000_000_000, 3),
            prev,
            1,
        )
    }

    fn k256_key(seed: u8) -> k256::ecdsa::SigningKey {
        k256::ecdsa::SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    #[test]
    fn test_sign_and_verify_each_curve() {
        let ed = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        let k = k256_key(9);
        let p = p256::ecdsa::SigningKey::from_slice(&[11u8; 32]).unwrap();

        let signed = sample(None).sign(&ed).unwrap();
        assert_eq!(signed.sig.len(), 64);
        signed.verify(&ed.public_key()).unwrap();

        let signed = sample(None).sign(&k).unwrap();
        signed.verify(&k.public_key()).unwrap();

        let signed = sample(None).sign(&p).unwrap();
        signed.verify(&p.public_key()).unwrap();
    }

    #[test]
    fn test_wrong_key_and_tampering_fail() {
        let key = k256_key(1);
        let signed = sample(None).sign(&key).unwrap();

        assert!(matches!(
            signed.verify(&k256_key(2).public_key()),
            Err(CommitError::SignatureVerificationFailed)
        ));
        assert!(!verify_commit(&signed, &k256_key(2).public_key()));

        let mut tampered = signed.clone();
        tampered.version = 2;
        assert!(!verify_commit(&tampered, &key.public_key()));
        assert!(verify_commit(&signed, &key.public_key()));
    }

    #[test]
    fn test_unsigned_bytes_omit_sig() {
        let signed = sample(None).sign(&k256_key(1)).unwrap();
        let unsigned: Ipld = serde_ipld_dagcbor::from_slice(&signed.unsigned_bytes().unwrap()).unwrap();
        let Ipld::Map(map) = unsigned else {
            panic!("commit must encode as a map");
        };
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["data", "did", "prev", "rev", "version"]);
        assert_eq!(map.get("prev"), Some(&Ipld::Null));
    }

    #[test]
    fn test_cbor_roundtrip_keeps_cid() {
        let prev = sample(None).sign(&k256_key(1)).unwrap().to_cid().unwrap();
        let commit = sample(Some(prev)).sign(&k256_key(1)).unwrap();
        let (cid, bytes) = commit.to_block().unwrap();

        let decoded = Commit::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, commit);
        assert_eq!(decoded.prev(), Some(&prev));
        assert_eq!(decoded.to_cid().unwrap(), cid);
        assert!(codec::verify_block(&cid, &bytes).unwrap());
    }

    #[test]
    fn test_unknown_key_type() {
        let signed = sample(None).sign(&k256_key(1)).unwrap();
        let key = PublicKey {
            codec: KeyCodec::Unknown(0x1205),
            bytes: Bytes::from_static(&[0; 33]),
        };
        assert!(matches!(
            signed.verify(&key),
            Err(CommitError::UnsupportedKeyType(0x1205))
        ));
    }
}
