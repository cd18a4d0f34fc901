//! Timestamp identifiers used for commit revisions and generated record keys

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::{SmolStr, SmolStrBuilder};

const S32_CHAR: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";

fn s32_encode(mut i: u64) -> SmolStr {
    let mut chars = [0u8; 13];
    for slot in chars.iter_mut().rev() {
        *slot = S32_CHAR[(i & 0x1F) as usize];
        i >>= 5;
    }

    let mut builder = SmolStrBuilder::new();
    for c in chars {
        builder.push(c as char);
    }
    builder.finish()
}

fn s32_decode(s: &str) -> u64 {
    s.bytes().fold(0u64, |acc, c| {
        let digit = S32_CHAR.iter().position(|x| *x == c).unwrap_or(0) as u64;
        (acc << 5) | digit
    })
}

static TID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[234567abcdefghij][234567abcdefghijklmnopqrstuvwxyz]{12}$").unwrap()
});

/// Error parsing a TID
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic, PartialEq, Eq)]
#[error("invalid TID {0:?}: expected 13 base32-sortable characters")]
#[diagnostic(help("TIDs look like 3jzfcijpj2z2a"))]
pub struct TidError(pub String);

/// Timestamp identifier
///
/// 64 bits laid out as `0` + 53 bits of microseconds since the epoch + 10
/// bits of clock id, encoded as 13 base32-sortable characters. String order
/// equals numeric order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tid(SmolStr);

impl Tid {
    /// Parse a TID
    pub fn new(tid: impl AsRef<str>) -> Result<Self, TidError> {
        let tid = tid.as_ref();
        if tid.len() != 13 || !TID_REGEX.is_match(tid) {
            return Err(TidError(tid.to_string()));
        }
        Ok(Self(SmolStr::new_inline(tid)))
    }

    /// Construct from microsecond timestamp and clock id
    pub fn from_parts(micros: u64, clock_id: u32) -> Self {
        // 0TTTTTTTTTTTTTTT TTTTTTTTTTTTTTTT TTTTTTTTTTTTTTTT TTTTTTCCCCCCCCCC
        let tid = ((micros << 10) & 0x7FFF_FFFF_FFFF_FC00) | (clock_id as u64 & 0x3FF);
        Self(s32_encode(tid))
    }

    /// Microsecond timestamp
    pub fn timestamp(&self) -> u64 {
        s32_decode(&self.0) >> 10
    }

    /// Clock id
    pub fn clock_id(&self) -> u32 {
        (s32_decode(&self.0) & 0x3FF) as u32
    }

    /// Returns the TID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tid {
    type Err = TidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = SmolStr::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Tid> for SmolStr {
    fn from(value: Tid) -> Self {
        value.0
    }
}

impl AsRef<str> for Tid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Monotonic TID source
///
/// Each call to [`Ticker::next`] returns a TID strictly greater than every
/// TID it has issued and than the optional `prev`, even when the wall clock
/// stalls or steps backwards.
#[derive(Debug, Clone)]
pub struct Ticker {
    last_timestamp: u64,
    clock_id: u32,
}

impl Ticker {
    /// Ticker with a random clock id
    pub fn new() -> Self {
        use rand::Rng;
        Self::with_clock_id(rand::thread_rng().gen_range(0..1024))
    }

    /// Ticker with a fixed clock id
    pub fn with_clock_id(clock_id: u32) -> Self {
        Self {
            last_timestamp: 0,
            clock_id: clock_id & 0x3FF,
        }
    }

    /// Raise the floor so later TIDs sort after `tid`
    pub fn observe(&mut self, tid: &Tid) {
        self.last_timestamp = self.last_timestamp.max(tid.timestamp());
    }

    /// Next TID, greater than `prev` if given
    pub fn next(&mut self, prev: Option<&Tid>) -> Tid {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let mut timestamp = now.max(self.last_timestamp + 1);
        if let Some(prev) = prev {
            timestamp = timestamp.max(prev.timestamp() + 1);
        }
        self.last_timestamp = timestamp;
        Tid::from_parts(timestamp, self.clock_id)
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}
