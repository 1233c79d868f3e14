//! Nested document access
//!
//! Response envelopes and unit profiles are JSON documents. The controller
//! frequently answers with only a prefix of the expected shape (an error
//! envelope has no `pc` payload), so every lookup goes through [`resolve`],
//! which reports absence instead of failing.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// A parsed JSON document: Null, Bool, Number, String, List or Object
pub type Document = Value;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Missing required field: {key}")]
    MissingField { key: String },
    #[error("Cannot descend into non-object at: {key}")]
    NotAnObject { key: String },
    #[error("Invalid document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Walk `keys` from `doc` and return the value at the final key
///
/// Returns `None` on any structural mismatch. Unless `allow_missing` is set
/// the mismatch is logged as a warning, since the caller expected the key.
pub fn resolve<'a>(doc: &'a Document, keys: &[&str], allow_missing: bool) -> Option<&'a Document> {
    match require(doc, keys) {
        Ok(value) => Some(value),
        Err(e) => {
            if !allow_missing {
                warn!(error = %e, keys = ?keys, "Expected member not found in document");
            }
            None
        }
    }
}

/// Like [`resolve`], but reports which key was missing
pub fn require<'a>(doc: &'a Document, keys: &[&str]) -> Result<&'a Document, DocumentError> {
    let mut current = doc;
    for key in keys {
        let object = current.as_object().ok_or_else(|| DocumentError::NotAnObject {
            key: (*key).to_string(),
        })?;
        current = object.get(*key).ok_or_else(|| DocumentError::MissingField {
            key: (*key).to_string(),
        })?;
    }
    Ok(current)
}

/// Resolve a required field and return it as text
pub fn require_text(doc: &Document, keys: &[&str]) -> Result<String, DocumentError> {
    let value = require(doc, keys)?;
    render_value(value).ok_or_else(|| DocumentError::MissingField {
        key: keys.last().copied().unwrap_or_default().to_string(),
    })
}

/// Shape of a document node as seen by the resource walker
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    /// `null`: carries no name and no children
    Empty,
    /// A primitive whose text names one more path segment
    Scalar(&'a Document),
    List(&'a [Document]),
    Object(&'a Map<String, Document>),
}

impl<'a> Node<'a> {
    pub fn of(doc: &'a Document) -> Self {
        match doc {
            Value::Null => Node::Empty,
            Value::Array(items) => Node::List(items),
            Value::Object(map) => Node::Object(map),
            scalar => Node::Scalar(scalar),
        }
    }
}

/// Render a primitive as a path segment
pub fn scalar_text(value: &Document) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render any value as published text; composites become compact JSON
pub fn render_value(value: &Document) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
        scalar => scalar_text(scalar),
    }
}

/// Decode a content value that may itself be a JSON-encoded document
pub fn parse_embedded(content: &Document) -> Result<Document, DocumentError> {
    match content {
        Value::String(text) => Ok(serde_json::from_str(text)?),
        other => Ok(other.clone()),
    }
}
