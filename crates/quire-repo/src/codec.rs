//! Content identifiers: codec and hash tables, hashing, CID construction
//!
//! Every repository block (records, MST nodes, commits) is addressed with
//! [`dag_cbor_cid`], which fixes dag-cbor over sha2-256. The general
//! [`compute_cid`] accepts the other codec/hash pairs from the multicodec
//! table and rejects combinations that cannot produce a meaningful address.

use std::fmt;

use blake2::{Blake2b, Blake2s256, digest::consts::U32};
use cid::{Cid as IpldCid, Version};
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::error::{CodecError, Result};

type Blake2b256 = Blake2b<U32>;

/// Largest payload that may be embedded with the identity hash
pub const MAX_IDENTITY_LEN: usize = 64;

/// Content codec tag carried by a CID (multicodec table subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Raw bytes
    Raw,
    /// Protobuf DAG (legacy)
    DagPb,
    /// Canonical DAG-CBOR
    DagCbor,
    /// DAG-JSON
    DagJson,
    /// Ed25519 public key
    Ed25519Pub,
    /// Secp256k1 public key
    Secp256k1Pub,
    /// X25519 public key
    X25519Pub,
    /// BLS12-381 G1 public key
    Bls12381G1Pub,
    /// BLS12-381 G2 public key
    Bls12381G2Pub,
    /// NIST P-256 public key
    P256Pub,
    /// NIST P-384 public key
    P384Pub,
    /// NIST P-521 public key
    P521Pub,
    /// Ed448 public key
    Ed448Pub,
    /// X448 public key
    X448Pub,
    /// RSA public key
    RsaPub,
    /// sha2-256 (hash function name)
    Sha2_256,
    /// sha2-512 (hash function name)
    Sha2_512,
    /// sha3-256 (hash function name)
    Sha3_256,
    /// sha3-512 (hash function name)
    Sha3_512,
    /// blake2b-256 (hash function name)
    Blake2b256,
    /// blake2s-256 (hash function name)
    Blake2s256,
}

impl Codec {
    /// Multicodec code
    pub const fn code(self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::DagPb => 0x70,
            Codec::DagCbor => 0x71,
            Codec::DagJson => 0x0129,
            Codec::Ed25519Pub => 0xed,
            Codec::Secp256k1Pub => 0xe7,
            Codec::X25519Pub => 0xec,
            Codec::Bls12381G1Pub => 0xea,
            Codec::Bls12381G2Pub => 0xeb,
            Codec::P256Pub => 0x1200,
            Codec::P384Pub => 0x1201,
            Codec::P521Pub => 0x1202,
            Codec::Ed448Pub => 0x1203,
            Codec::X448Pub => 0x1204,
            Codec::RsaPub => 0x1205,
            Codec::Sha2_256 => 0x12,
            Codec::Sha2_512 => 0x13,
            Codec::Sha3_512 => 0x14,
            Codec::Sha3_256 => 0x16,
            Codec::Blake2b256 => 0xb220,
            Codec::Blake2s256 => 0xb260,
        }
    }

    /// Look up a codec by multicodec code
    pub fn from_code(code: u64) -> std::result::Result<Self, CodecError> {
        Ok(match code {
            0x55 => Codec::Raw,
            0x70 => Codec::DagPb,
            0x71 => Codec::DagCbor,
            0x0129 => Codec::DagJson,
            0xed => Codec::Ed25519Pub,
            0xe7 => Codec::Secp256k1Pub,
            0xec => Codec::X25519Pub,
            0xea => Codec::Bls12381G1Pub,
            0xeb => Codec::Bls12381G2Pub,
            0x1200 => Codec::P256Pub,
            0x1201 => Codec::P384Pub,
            0x1202 => Codec::P521Pub,
            0x1203 => Codec::Ed448Pub,
            0x1204 => Codec::X448Pub,
            0x1205 => Codec::RsaPub,
            0x12 => Codec::Sha2_256,
            0x13 => Codec::Sha2_512,
            0x14 => Codec::Sha3_512,
            0x16 => Codec::Sha3_256,
            0xb220 => Codec::Blake2b256,
            0xb260 => Codec::Blake2s256,
            other => return Err(CodecError::UnknownCodec(other)),
        })
    }

    /// Multicodec table name
    pub const fn name(self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::DagPb => "dag-pb",
            Codec::DagCbor => "dag-cbor",
            Codec::DagJson => "dag-json",
            Codec::Ed25519Pub => "ed25519-pub",
            Codec::Secp256k1Pub => "secp256k1-pub",
            Codec::X25519Pub => "x25519-pub",
            Codec::Bls12381G1Pub => "bls12_381-g1-pub",
            Codec::Bls12381G2Pub => "bls12_381-g2-pub",
            Codec::P256Pub => "p256-pub",
            Codec::P384Pub => "p384-pub",
            Codec::P521Pub => "p521-pub",
            Codec::Ed448Pub => "ed448-pub",
            Codec::X448Pub => "x448-pub",
            Codec::RsaPub => "rsa-pub",
            Codec::Sha2_256 => "sha2-256",
            Codec::Sha2_512 => "sha2-512",
            Codec::Sha3_256 => "sha3-256",
            Codec::Sha3_512 => "sha3-512",
            Codec::Blake2b256 => "blake2b-256",
            Codec::Blake2s256 => "blake2s-256",
        }
    }

    /// Hash function names share the table but do not describe content
    pub const fn is_hash_name(self) -> bool {
        matches!(
            self,
            Codec::Sha2_256
                | Codec::Sha2_512
                | Codec::Sha3_256
                | Codec::Sha3_512
                | Codec::Blake2b256
                | Codec::Blake2s256
        )
    }

    /// Structured DAG codecs whose blocks may link to other blocks
    pub const fn is_structured(self) -> bool {
        matches!(self, Codec::DagPb | Codec::DagCbor | Codec::DagJson)
    }

    /// Public key codecs
    pub const fn is_key(self) -> bool {
        matches!(
            self,
            Codec::Ed25519Pub
                | Codec::Secp256k1Pub
                | Codec::X25519Pub
                | Codec::Bls12381G1Pub
                | Codec::Bls12381G2Pub
                | Codec::P256Pub
                | Codec::P384Pub
                | Codec::P521Pub
                | Codec::Ed448Pub
                | Codec::X448Pub
                | Codec::RsaPub
        )
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hash algorithm applied to content before addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// sha2-256
    Sha2_256,
    /// sha2-512
    Sha2_512,
    /// sha3-256
    Sha3_256,
    /// sha3-512
    Sha3_512,
    /// blake2b-256
    Blake2b256,
    /// blake2s-256
    Blake2s256,
    /// Identity: content is embedded, not hashed
    None,
}

impl HashAlgorithm {
    /// Multihash code
    pub const fn code(self) -> u64 {
        match self {
            HashAlgorithm::Sha2_256 => 0x12,
            HashAlgorithm::Sha2_512 => 0x13,
            HashAlgorithm::Sha3_512 => 0x14,
            HashAlgorithm::Sha3_256 => 0x16,
            HashAlgorithm::Blake2b256 => 0xb220,
            HashAlgorithm::Blake2s256 => 0xb260,
            HashAlgorithm::None => 0x00,
        }
    }

    /// Look up a hash algorithm by multihash code
    pub fn from_code(code: u64) -> std::result::Result<Self, CodecError> {
        Ok(match code {
            0x12 => HashAlgorithm::Sha2_256,
            0x13 => HashAlgorithm::Sha2_512,
            0x14 => HashAlgorithm::Sha3_512,
            0x16 => HashAlgorithm::Sha3_256,
            0xb220 => HashAlgorithm::Blake2b256,
            0xb260 => HashAlgorithm::Blake2s256,
            0x00 => HashAlgorithm::None,
            other => return Err(CodecError::UnknownHash(other)),
        })
    }

    /// Multihash table name
    pub const fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha2_256 => "sha2-256",
            HashAlgorithm::Sha2_512 => "sha2-512",
            HashAlgorithm::Sha3_256 => "sha3-256",
            HashAlgorithm::Sha3_512 => "sha3-512",
            HashAlgorithm::Blake2b256 => "blake2b-256",
            HashAlgorithm::Blake2s256 => "blake2s-256",
            HashAlgorithm::None => "identity",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hash bytes with the given algorithm
///
/// `HashAlgorithm::None` returns the input unchanged.
pub fn hash(data: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha2_256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha2_512 => Sha512::digest(data).to_vec(),
        HashAlgorithm::Sha3_256 => Sha3_256::digest(data).to_vec(),
        HashAlgorithm::Sha3_512 => Sha3_512::digest(data).to_vec(),
        HashAlgorithm::Blake2b256 => Blake2b256::digest(data).to_vec(),
        HashAlgorithm::Blake2s256 => Blake2s256::digest(data).to_vec(),
        HashAlgorithm::None => data.to_vec(),
    }
}

fn check_pair(
    data: &[u8],
    codec: Codec,
    algorithm: HashAlgorithm,
) -> std::result::Result<(), CodecError> {
    if codec.is_hash_name() {
        return Err(CodecError::NotContentCodec(codec.name()));
    }
    match algorithm {
        HashAlgorithm::None => {
            if codec.is_structured() {
                return Err(CodecError::IdentityForStructured(codec.name()));
            }
            if data.len() > MAX_IDENTITY_LEN {
                return Err(CodecError::IdentityTooLarge {
                    len: data.len(),
                    max: MAX_IDENTITY_LEN,
                });
            }
        }
        _ if codec.is_key() => return Err(CodecError::KeyRequiresIdentity(codec.name())),
        _ => {}
    }
    Ok(())
}

/// Compute a CIDv1 for already-encoded bytes
pub fn compute_cid(
    data: &[u8],
    codec: Codec,
    algorithm: HashAlgorithm,
) -> std::result::Result<IpldCid, CodecError> {
    check_pair(data, codec, algorithm)?;
    let digest = hash(data, algorithm);
    let mh = multihash::Multihash::<64>::wrap(algorithm.code(), &digest)
        .map_err(|e| CodecError::Multihash(e.to_string()))?;
    Ok(IpldCid::new_v1(codec.code(), mh))
}

/// Compute a legacy CIDv0 (sha2-256, implicitly dag-pb)
pub fn compute_cid_v0(data: &[u8]) -> std::result::Result<IpldCid, CodecError> {
    let digest = hash(data, HashAlgorithm::Sha2_256);
    let mh = multihash::Multihash::<64>::wrap(HashAlgorithm::Sha2_256.code(), &digest)
        .map_err(|e| CodecError::Multihash(e.to_string()))?;
    IpldCid::new_v0(mh).map_err(|_| CodecError::InvalidV0)
}

/// Address a repository block: dag-cbor over sha2-256
pub fn dag_cbor_cid(data: &[u8]) -> Result<IpldCid> {
    Ok(compute_cid(data, Codec::DagCbor, HashAlgorithm::Sha2_256)?)
}

/// Decomposed CID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidParts {
    /// CID version
    pub version: Version,
    /// Content codec
    pub codec: Codec,
    /// Hash algorithm
    pub hash: HashAlgorithm,
    /// Digest bytes (or embedded content for identity)
    pub digest: Vec<u8>,
}

/// Split a CID into its typed parts
pub fn describe(cid: &IpldCid) -> std::result::Result<CidParts, CodecError> {
    Ok(CidParts {
        version: cid.version(),
        codec: Codec::from_code(cid.codec())?,
        hash: HashAlgorithm::from_code(cid.hash().code())?,
        digest: cid.hash().digest().to_vec(),
    })
}

/// Parse the textual (multibase) form of a CID
pub fn parse_cid(text: &str) -> Result<IpldCid> {
    IpldCid::try_from(text).map_err(|e| {
        crate::error::RepoError::encoding(e).with_context(format!("invalid CID text: {}", text))
    })
}

/// Check that a block's bytes hash to its CID
pub fn verify_block(cid: &IpldCid, data: &[u8]) -> Result<bool> {
    let parts = describe(cid)?;
    let recomputed = match parts.version {
        Version::V0 => compute_cid_v0(data)?,
        Version::V1 => compute_cid(data, parts.codec, parts.hash)?,
    };
    Ok(&recomputed == cid)
}
