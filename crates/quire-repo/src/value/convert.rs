//! JSON conversion for [`Value`]
//!
//! Links are written as `{"$link": "<cid>"}` and byte strings as
//! `{"$bytes": "<base64>"}`. Integers that fit in 64 bits stay integers,
//! everything else numeric becomes a float.

use std::collections::BTreeMap;

use base64::{
    Engine,
    prelude::{BASE64_STANDARD, BASE64_STANDARD_NO_PAD},
};
use bytes::Bytes;
use smol_str::SmolStr;

use super::Value;
use crate::codec;
use crate::error::{RepoError, Result};

/// Convert parsed JSON into a [`Value`]
pub fn from_json(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(RepoError::encoding_msg(format!("unrepresentable number {}", n)));
            }
        }
        serde_json::Value::String(s) => Value::Text(SmolStr::new(s)),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(from_json).collect::<Result<Vec<_>>>()?)
        }
        serde_json::Value::Object(obj) => {
            if obj.len() == 1 {
                if let Some(serde_json::Value::String(link)) = obj.get("$link") {
                    return Ok(Value::Cid(codec::parse_cid(link)?));
                }
                if let Some(serde_json::Value::String(b64)) = obj.get("$bytes") {
                    return Ok(Value::Bytes(decode_base64(b64)?));
                }
            }
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                map.insert(SmolStr::new(k), from_json(v)?);
            }
            Value::Map(map)
        }
    })
}

/// Parse a JSON document into a [`Value`]
pub fn from_json_str(text: &str) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(RepoError::encoding)?;
    from_json(&json)
}

/// Convert a [`Value`] into JSON
pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(RepoError::encoding)
}

fn decode_base64(text: &str) -> Result<Bytes> {
    BASE64_STANDARD_NO_PAD
        .decode(text.trim_end_matches('='))
        .or_else(|_| BASE64_STANDARD.decode(text))
        .map(Bytes::from)
        .map_err(RepoError::encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = from_json_str(r#"{"text": "hi", "n": 3, "f": 1.5, "ok": true, "none": null}"#)
            .unwrap();
        assert_eq!(v.get("text").and_then(Value::as_text), Some("hi"));
        assert_eq!(v.get("n"), Some(&Value::Int(3)));
        assert_eq!(v.get("f"), Some(&Value::Float(1.5)));
        assert_eq!(v.get("ok"), Some(&Value::Bool(true)));
        assert_eq!(v.get("none"), Some(&Value::Null));
    }

    #[test]
    fn test_link_and_bytes() {
        let cid = codec::dag_cbor_cid(b"\xa0").unwrap();
        let text = format!(r#"{{"ref": {{"$link": "{}"}}, "blob": {{"$bytes": "aGVsbG8"}}}}"#, cid);
        let v = from_json_str(&text).unwrap();
        assert_eq!(v.get("ref"), Some(&Value::Cid(cid)));
        assert_eq!(v.get("blob"), Some(&Value::Bytes(Bytes::from_static(b"hello"))));

        let json = to_json(&v).unwrap();
        assert_eq!(json["ref"]["$link"], serde_json::json!(cid.to_string()));
        assert_eq!(json["blob"]["$bytes"], serde_json::json!("aGVsbG8="));
    }

    #[test]
    fn test_bad_link_rejected() {
        assert!(from_json_str(r#"{"$link": "nope"}"#).is_err());
    }

    #[test]
    fn test_object_with_extra_keys_is_a_map() {
        let v = from_json_str(r#"{"$link": "x", "other": 1}"#).unwrap();
        assert_eq!(v.get("$link").and_then(Value::as_text), Some("x"));
    }
}
