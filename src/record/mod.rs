//! Canonical record types
//!
//! Every source produces [`RawItem`]s; the normalizer turns them into
//! [`Record`]s, which are what the store persists. A record is identified by
//! `(source, external_id)`.

mod normalize;

pub use normalize::{normalize, normalize_title, NormalizeError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// Which external API a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "stackexchange", alias = "stackoverflow")]
    StackOverflow,
}

impl SourceKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::StackOverflow => "stackoverflow",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "github" => Some(Self::GitHub),
            "stackoverflow" => Some(Self::StackOverflow),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A normalized item ready for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub source: SourceKind,
    pub external_id: String,
    pub title: String,
    pub url: String,
    /// Only StackExchange questions carry an answered flag
    pub is_answered: Option<bool>,
    /// Serialized size of the raw item in bytes
    pub size_estimate: f64,
    pub fetched_at: DateTime<Utc>,
}

/// One item as returned by a source API, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub kind: SourceKind,
    pub payload: serde_json::Value,
}

impl RawItem {
    pub fn new(kind: SourceKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }

    /// Byte length of the item serialized as compact JSON
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(&self.payload)
            .map(|bytes| bytes.len())
            .unwrap_or(0)
    }
}
