//! Structured documents: typed trees of scalars, arrays and string-keyed hashes.
//!
//! Game-data flag pages, save-data pages and map placement units are all
//! documents. The binary form is a four byte magic followed by a MessagePack
//! payload, optionally wrapped by the compression codec.

use crate::compression::decompress_if_needed;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node in a structured document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Hash(BTreeMap<String, Value>),
}

impl Value {
    pub const MAGIC: [u8; 4] = *b"BYML";

    /// Build a hash node from `(key, value)` pairs.
    pub fn hash<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Hash(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns `true` if the buffer (after decompression) starts with the document magic.
    pub fn is_document(data: &[u8]) -> bool {
        match decompress_if_needed(data) {
            Ok(raw) => raw.starts_with(&Self::MAGIC),
            Err(_) => false,
        }
    }

    /// Decode a document, decompressing it first if needed.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let raw = decompress_if_needed(data)?;
        let Some(payload) = raw.strip_prefix(&Self::MAGIC) else {
            return Err(Error::InvalidMagic {
                expected: Self::MAGIC,
                found: raw.iter().take(4).copied().collect(),
            });
        };
        Ok(rmp_serde::from_slice(payload)?)
    }

    /// Encode the document without compression.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut out = Self::MAGIC.to_vec();
        out.extend(rmp_serde::to_vec(self)?);
        Ok(out)
    }

    pub fn as_hash(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret any non-negative integer node as `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::UInt(v) => Some(v),
            Value::Int(v) => u32::try_from(v).ok(),
            Value::Int64(v) => u32::try_from(v).ok(),
            Value::UInt64(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    /// Look up a key if this node is a hash.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_hash().and_then(|h| h.get(key))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
