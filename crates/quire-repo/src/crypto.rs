//! Multikey public keys for commit verification
//!
//! A Multikey is `multibase(base58btc, varint(codec) || key bytes)`. The
//! signer hands out raw public key bytes; this module tags them with a codec
//! and converts to the verifying-key types of the curve crates.

use bytes::Bytes;

use crate::codec::Codec;

/// Key codecs accepted for commit signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCodec {
    /// Ed25519
    Ed25519,
    /// Secp256k1
    Secp256k1,
    /// P256
    P256,
    /// Unknown codec
    Unknown(u64),
}

impl KeyCodec {
    /// Multicodec code
    pub fn code(self) -> u64 {
        match self {
            KeyCodec::Ed25519 => Codec::Ed25519Pub.code(),
            KeyCodec::Secp256k1 => Codec::Secp256k1Pub.code(),
            KeyCodec::P256 => Codec::P256Pub.code(),
            KeyCodec::Unknown(c) => c,
        }
    }

    fn from_code(code: u64) -> Self {
        match Codec::from_code(code) {
            Ok(Codec::Ed25519Pub) => KeyCodec::Ed25519,
            Ok(Codec::Secp256k1Pub) => KeyCodec::Secp256k1,
            Ok(Codec::P256Pub) => KeyCodec::P256,
            _ => KeyCodec::Unknown(code),
        }
    }
}

/// Errors from decoding or converting Multikey values
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic, PartialEq, Eq)]
pub enum CryptoError {
    /// Multibase decode error
    #[error("failed to decode multibase")]
    MultibaseDecode,
    /// Multicodec decode error
    #[error("failed to decode multicodec varint")]
    MulticodecDecode,
    /// Unsupported key codec error
    #[error("unsupported key codec: 0x{0:x}")]
    UnsupportedCodec(u64),
    /// Invalid key length error
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidLength {
        /// Expected length of the key
        expected: usize,
        /// Actual length of the key
        got: usize,
    },
    /// Invalid key format error
    #[error("invalid key format")]
    InvalidFormat,
    /// Conversion error
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Public key tagged with its codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Codec used to encode the public key
    pub codec: KeyCodec,
    /// Bytes of the public key (compressed SEC1 for the ECDSA curves)
    pub bytes: Bytes,
}

impl PublicKey {
    /// Wrap raw key bytes, validating their shape
    pub fn new(codec: KeyCodec, bytes: impl Into<Bytes>) -> Result<Self, CryptoError> {
        let bytes = bytes.into();
        match codec {
            KeyCodec::Ed25519 => {
                if bytes.len() != 32 {
                    return Err(CryptoError::InvalidLength {
                        expected: 32,
                        got: bytes.len(),
                    });
                }
            }
            KeyCodec::Secp256k1 | KeyCodec::P256 => {
                if !(bytes.len() == 33 || bytes.len() == 65) {
                    return Err(CryptoError::InvalidLength {
                        expected: 33,
                        got: bytes.len(),
                    });
                }
                // 0x02/0x03 compressed, 0x04 uncompressed
                let first = *bytes.first().ok_or(CryptoError::InvalidFormat)?;
                if first != 0x02 && first != 0x03 && first != 0x04 {
                    return Err(CryptoError::InvalidFormat);
                }
            }
            KeyCodec::Unknown(code) => return Err(CryptoError::UnsupportedCodec(code)),
        }
        Ok(Self { codec, bytes })
    }

    /// Decode a Multikey public key from a multibase-encoded string
    pub fn decode(multibase_str: &str) -> Result<Self, CryptoError> {
        let (_base, data) =
            multibase::decode(multibase_str).map_err(|_| CryptoError::MultibaseDecode)?;
        let (code, offset) = decode_uvarint(&data).ok_or(CryptoError::MulticodecDecode)?;
        Self::new(KeyCodec::from_code(code), Bytes::copy_from_slice(&data[offset..]))
    }

    /// Encode as a base58btc Multikey string
    pub fn encode(&self) -> String {
        let mut buf = encode_uvarint(self.codec.code());
        buf.extend_from_slice(&self.bytes);
        multibase::encode(multibase::Base::Base58Btc, buf)
    }

    /// Convert to ed25519_dalek verifying key
    pub fn to_ed25519(&self) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
        if self.codec != KeyCodec::Ed25519 {
            return Err(CryptoError::UnsupportedCodec(self.codec.code()));
        }
        let raw: [u8; 32] =
            self.bytes
                .as_ref()
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    expected: 32,
                    got: self.bytes.len(),
                })?;
        ed25519_dalek::VerifyingKey::from_bytes(&raw)
            .map_err(|e| CryptoError::Conversion(e.to_string()))
    }

    /// Convert to k256 public key
    pub fn to_k256(&self) -> Result<k256::PublicKey, CryptoError> {
        if self.codec != KeyCodec::Secp256k1 {
            return Err(CryptoError::UnsupportedCodec(self.codec.code()));
        }
        k256::PublicKey::from_sec1_bytes(self.bytes.as_ref())
            .map_err(|e| CryptoError::Conversion(e.to_string()))
    }

    /// Convert to p256 public key
    pub fn to_p256(&self) -> Result<p256::PublicKey, CryptoError> {
        if self.codec != KeyCodec::P256 {
            return Err(CryptoError::UnsupportedCodec(self.codec.code()));
        }
        p256::PublicKey::from_sec1_bytes(self.bytes.as_ref())
            .map_err(|e| CryptoError::Conversion(e.to_string()))
    }
}

fn encode_uvarint(mut x: u64) -> Vec<u8> {
    let mut out = Vec::new();
    while x >= 0x80 {
        out.push(((x as u8) & 0x7F) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
    out
}

fn decode_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut x: u64 = 0;
    let mut s: u32 = 0;
    for (i, b) in data.iter().copied().enumerate() {
        if b < 0x80 {
            if i > 9 || (i == 9 && b > 1) {
                return None;
            }
            return Some((x | ((b as u64) << s), i + 1));
        }
        x |= ((b & 0x7F) as u64) << s;
        s += 7;
    }
    None
}
