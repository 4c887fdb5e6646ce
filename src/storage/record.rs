//! The record model: one embedded chunk and its payload.
//!
//! Records are stored one per file as JSON (`{id, vector, payload}`). The
//! filename carries the id, escaped so that any opaque id string maps to a
//! safe and reversible name; this is what lets the id index be rebuilt from
//! directory listings alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::payload_keys::PayloadKey;

/// Filename prefix of every record file.
pub const RECORD_PREFIX: &str = "record_";

/// Filename extension of every record file.
pub const RECORD_EXTENSION: &str = ".json";

/// A payload value: a small closed set of scalars plus string lists.
///
/// Serialized untagged so payloads read as plain JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    TextList(Vec<String>),
}

impl PayloadValue {
    /// Returns the string if this is a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int` value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Filter semantics: equal values match, and a `TextList` matches a
    /// `Text` it contains.
    #[must_use]
    pub fn matches(&self, expected: &PayloadValue) -> bool {
        match (self, expected) {
            (Self::TextList(items), Self::Text(wanted)) => items.iter().any(|i| i == wanted),
            (actual, expected) => actual == expected,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for PayloadValue {
    fn from(value: Vec<String>) -> Self {
        Self::TextList(value)
    }
}

/// Ordered payload map; ordering keeps serialization deterministic.
pub type Payload = BTreeMap<String, PayloadValue>;

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub payload: Payload,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Payload::new(),
        }
    }

    /// Builder-style payload insertion.
    #[must_use]
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Payload lookup by well-known key.
    #[must_use]
    pub fn get(&self, key: PayloadKey) -> Option<&PayloadValue> {
        self.payload.get(key.as_str())
    }

    /// Source file path from the payload, if present.
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.get(PayloadKey::FilePath).and_then(PayloadValue::as_text)
    }
}

/// Longest record filename accepted, the common filesystem name limit.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Builds the filename for a record id.
///
/// Bytes outside `[A-Za-z0-9._-]` are escaped as `%XX`, so a non-ASCII id
/// can need up to three times its length. Ids whose filename would exceed
/// [`MAX_FILENAME_BYTES`] are rejected at write time.
pub fn record_filename(id: &str) -> String {
    let mut name = String::with_capacity(RECORD_PREFIX.len() + id.len() + RECORD_EXTENSION.len());
    name.push_str(RECORD_PREFIX);
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name.push_str(RECORD_EXTENSION);
    name
}

/// Recovers the record id from a filename produced by [`record_filename`].
///
/// Returns `None` for anything that is not a record file.
pub fn id_from_filename(name: &str) -> Option<String> {
    let escaped = name
        .strip_prefix(RECORD_PREFIX)?
        .strip_suffix(RECORD_EXTENSION)?;
    if escaped.is_empty() {
        return None;
    }

    let bytes = escaped.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
