//! Raw item normalization
//!
//! Maps source-specific JSON payloads onto [`Record`]. This is a pure
//! function: a malformed item yields an error for that item only, and the
//! caller decides to skip it.

use crate::record::{RawItem, Record, SourceKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Why a raw item could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has an unexpected type")]
    InvalidField { field: &'static str },
}

/// Normalizes a raw API item into a record
///
/// # Field mapping
///
/// | Record field  | GitHub issue | StackExchange question |
/// |---------------|--------------|------------------------|
/// | external_id   | `id`         | `question_id`          |
/// | title         | `title`      | `title` (HTML-decoded) |
/// | url           | `html_url`   | `link`                 |
/// | is_answered   | -            | `is_answered`          |
///
/// `id` and a non-empty `title` are required; a missing url becomes an empty string.
pub fn normalize(item: &RawItem, fetched_at: DateTime<Utc>) -> Result<Record, NormalizeError> {
    let payload = &item.payload;

    let (id_field, url_field) = match item.kind {
        SourceKind::GitHub => ("id", "html_url"),
        SourceKind::StackOverflow => ("question_id", "link"),
    };

    let external_id = external_id(payload, id_field)?;

    let title = match payload.get("title") {
        None | Some(Value::Null) => return Err(NormalizeError::MissingField("title")),
        Some(Value::String(s)) => normalize_title(s),
        Some(_) => return Err(NormalizeError::InvalidField { field: "title" }),
    };
    if title.is_empty() {
        return Err(NormalizeError::MissingField("title"));
    }

    let url = payload
        .get(url_field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let is_answered = match item.kind {
        SourceKind::GitHub => None,
        SourceKind::StackOverflow => payload.get("is_answered").and_then(Value::as_bool),
    };

    Ok(Record {
        source: item.kind,
        external_id,
        title,
        url,
        is_answered,
        size_estimate: item.size_bytes() as f64,
        fetched_at,
    })
}

fn external_id(payload: &Value, field: &'static str) -> Result<String, NormalizeError> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(field)),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(NormalizeError::MissingField(field)),
        Some(_) => Err(NormalizeError::InvalidField { field }),
    }
}

/// Decodes HTML entities and collapses whitespace
///
/// StackExchange returns titles entity-encoded (`&quot;`, `&#39;`).
pub fn normalize_title(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
