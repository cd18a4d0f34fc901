//! Record values
//!
//! [`Value`] is the recursive data model stored in records. Its canonical
//! encoding is DAG-CBOR: map keys are emitted in canonical order, integers in
//! their shortest form, floats as 64-bit, links as tag 42. Two equal values
//! always encode to identical bytes.

use std::collections::BTreeMap;
use std::fmt;

use base64::{Engine, prelude::BASE64_STANDARD};
use bytes::Bytes;
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;
use serde::{Serialize, Serializer, ser::Error as _};
use smol_str::SmolStr;

use crate::codec;
use crate::error::{RepoError, Result};

pub mod convert;

/// Recursive record value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// Finite 64-bit float
    Float(f64),
    /// UTF-8 text
    Text(SmolStr),
    /// Byte string
    Bytes(Bytes),
    /// Link to another block
    Cid(IpldCid),
    /// Ordered list
    Array(Vec<Value>),
    /// Text-keyed map, keys unique
    Map(BTreeMap<SmolStr, Value>),
}

/// Value kind, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Null
    Null,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Float
    Float,
    /// Text
    Text,
    /// Bytes
    Bytes,
    /// Link
    Cid,
    /// Array
    Array,
    /// Map
    Map,
}

impl Value {
    /// Build a map, rejecting duplicate keys
    pub fn map_from_entries<K, I>(entries: I) -> Result<Value>
    where
        K: Into<SmolStr>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            if map.contains_key(&key) {
                return Err(RepoError::encoding_msg(format!("duplicate map key: {}", key)));
            }
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Cid(_) => ValueKind::Cid,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Look up a map field
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Text content, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Map content, if this is a map
    pub fn as_map(&self) -> Option<&BTreeMap<SmolStr, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Every CID linked from this value, depth first
    pub fn links(&self) -> Vec<IpldCid> {
        let mut out = Vec::new();
        self.collect_links(&mut out);
        out
    }

    fn collect_links(&self, out: &mut Vec<IpldCid>) {
        match self {
            Value::Cid(cid) => out.push(*cid),
            Value::Array(items) => items.iter().for_each(|v| v.collect_links(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_links(out)),
            _ => {}
        }
    }

    fn check_finite(&self) -> Result<()> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(RepoError::encoding_msg(format!(
                "float {} cannot be canonically encoded",
                f
            ))),
            Value::Array(items) => items.iter().try_for_each(Value::check_finite),
            Value::Map(map) => map.values().try_for_each(Value::check_finite),
            _ => Ok(()),
        }
    }

    /// Canonical DAG-CBOR encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check_finite()?;
        serde_ipld_dagcbor::to_vec(self).map_err(RepoError::encoding)
    }

    /// Decode DAG-CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Value> {
        let ipld: Ipld = serde_ipld_dagcbor::from_slice(bytes).map_err(RepoError::encoding)?;
        Value::try_from(ipld)
    }

    /// Encode and address as a repository block
    pub fn to_block(&self) -> Result<(IpldCid, Bytes)> {
        let bytes = self.encode()?;
        let cid = codec::dag_cbor_cid(&bytes)?;
        Ok((cid, Bytes::from(bytes)))
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => {
                if !f.is_finite() {
                    return Err(S::Error::custom("non-finite float"));
                }
                serializer.serialize_f64(*f)
            }
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(bytes) => {
                if serializer.is_human_readable() {
                    let mut map = serializer.serialize_map(Some(1))?;
                    map.serialize_entry("$bytes", &BASE64_STANDARD.encode(bytes))?;
                    map.end()
                } else {
                    serializer.serialize_bytes(bytes)
                }
            }
            Value::Cid(cid) => {
                if serializer.is_human_readable() {
                    let mut map = serializer.serialize_map(Some(1))?;
                    map.serialize_entry("$link", &cid.to_string())?;
                    map.end()
                } else {
                    cid.serialize(serializer)
                }
            }
            Value::Array(items) => items.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

impl TryFrom<Ipld> for Value {
    type Error = RepoError;

    fn try_from(ipld: Ipld) -> Result<Self> {
        Ok(match ipld {
            Ipld::Null => Value::Null,
            Ipld::Bool(b) => Value::Bool(b),
            Ipld::Integer(i) => Value::Int(i64::try_from(i).map_err(|_| {
                RepoError::encoding_msg(format!("integer {} out of 64-bit range", i))
            })?),
            Ipld::Float(f) => Value::Float(f),
            Ipld::String(s) => Value::Text(SmolStr::new(s)),
            Ipld::Bytes(b) => Value::Bytes(Bytes::from(b)),
            Ipld::Link(cid) => Value::Cid(cid),
            Ipld::List(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Ipld::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((SmolStr::new(k), Value::try_from(v)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        })
    }
}

impl From<&Value> for Ipld {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Ipld::Null,
            Value::Bool(b) => Ipld::Bool(*b),
            Value::Int(i) => Ipld::Integer(*i as i128),
            Value::Float(f) => Ipld::Float(*f),
            Value::Text(s) => Ipld::String(s.to_string()),
            Value::Bytes(b) => Ipld::Bytes(b.to_vec()),
            Value::Cid(cid) => Ipld::Link(*cid),
            Value::Array(items) => Ipld::List(items.iter().map(Ipld::from).collect()),
            Value::Map(map) => Ipld::Map(
                map.iter()
                    .map(|(k, v)| (k.to_string(), Ipld::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(SmolStr::new(s))
    }
}

impl From<SmolStr> for Value {
    fn from(s: SmolStr) -> Self {
        Value::Text(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<IpldCid> for Value {
    fn from(cid: IpldCid) -> Self {
        Value::Cid(cid)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}
