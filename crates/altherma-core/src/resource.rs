//! Resource paths and the channel identifiers derived from them
//!
//! A [`ResourcePath`] addresses one node in the controller's resource tree,
//! e.g. `2/Operation/TargetTemperature`. Each discovered leaf becomes a
//! channel whose [`ChannelId`] is derived from the path with a reversible
//! encoding, so the identifier is stable across discovery runs and can be
//! decoded back into the path it came from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator used when a path is sent as a query key
pub const PATH_SEPARATOR: char = '/';

/// Separator used when a path is rendered as a human label
pub const LABEL_SEPARATOR: &str = " -> ";

/// Suffix addressing the latest content instance of a resource
pub const LATEST_SEGMENT: &str = "la";

/// Separator between encoded segments inside a channel identifier
const ID_SEGMENT_SEPARATOR: char = '_';

/// Escape introducer for bytes outside `[A-Za-z0-9]` inside an identifier
const ID_ESCAPE: char = '-';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Empty path segment")]
    EmptySegment,
    #[error("Path segment contains separator: {0}")]
    ContainsSeparator(String),
}

/// An ordered sequence of segments identifying one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(Vec<String>);

impl ResourcePath {
    /// Path of a top-level group, e.g. `"3"`
    pub fn group(index: u32) -> Self {
        Self(vec![index.to_string()])
    }

    /// Build a path from segments, validating each one
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self(Vec::new());
        for segment in segments {
            path.push(segment)?;
        }
        Ok(path)
    }

    /// Append a segment in place
    pub fn push(&mut self, segment: impl Into<String>) -> Result<(), PathError> {
        let segment = segment.into();
        validate_segment(&segment)?;
        self.0.push(segment);
        Ok(())
    }

    /// Return a new path with `segment` appended
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathError> {
        let mut path = self.clone();
        path.push(segment)?;
        Ok(path)
    }

    /// Address of this resource's latest value (`<path>/la`)
    pub fn latest(&self) -> Self {
        let mut segments = self.0.clone();
        segments.push(LATEST_SEGMENT.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments below the group root (the root itself is depth 0)
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Query key form, segments joined by `/`
    pub fn key(&self) -> String {
        self.0.join(&PATH_SEPARATOR.to_string())
    }

    /// Display form, segments joined by ` -> `
    pub fn label(&self) -> String {
        self.0.join(LABEL_SEPARATOR)
    }
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment.contains(PATH_SEPARATOR) {
        return Err(PathError::ContainsSeparator(segment.to_string()));
    }
    Ok(())
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for ResourcePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segments(s.split(PATH_SEPARATOR))
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.key()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelIdError {
    #[error("Invalid escape sequence in channel id: {0}")]
    InvalidEscape(String),
    #[error("Channel id does not decode to UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("Channel id does not decode to a valid path: {0}")]
    InvalidPath(#[from] PathError),
}

/// Stable external identifier of a channel
///
/// Segments are joined by `_`. Inside a segment ASCII alphanumerics are kept
/// and every other byte is written as `-XX` (uppercase hex), so `_` and `-`
/// never occur unescaped and the encoding is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Derive the identifier for a resource path
    pub fn from_path(path: &ResourcePath) -> Self {
        let encoded: Vec<String> = path.segments().iter().map(|s| encode_segment(s)).collect();
        Self(encoded.join(&ID_SEGMENT_SEPARATOR.to_string()))
    }

    /// Decode an identifier back into the path it was derived from
    pub fn to_path(&self) -> Result<ResourcePath, ChannelIdError> {
        let mut segments = Vec::new();
        for encoded in self.0.split(ID_SEGMENT_SEPARATOR) {
            segments.push(decode_segment(encoded)?);
        }
        Ok(ResourcePath::from_segments(segments)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelIdError;

    /// Parse an identifier, rejecting strings no path would produce
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Self(s.to_string());
        id.to_path()?;
        Ok(id)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ChannelIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if b.is_ascii_alphanumeric() {
            out.push(b as char);
        } else {
            out.push(ID_ESCAPE);
            out.push_str(&format!("{:02X}", b));
        }
    }
    out
}

fn decode_segment(encoded: &str) -> Result<String, ChannelIdError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == ID_ESCAPE as u8 {
            // Only the canonical uppercase form decodes
            let hex = encoded
                .get(i + 1..i + 3)
                .filter(|h| h.bytes().all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(&c)))
                .ok_or_else(|| ChannelIdError::InvalidEscape(encoded.to_string()))?;
            let value = u8::from_str_radix(hex, 16)
                .map_err(|_| ChannelIdError::InvalidEscape(encoded.to_string()))?;
            out.push(value);
            i += 3;
        } else if b.is_ascii_alphanumeric() {
            out.push(b);
            i += 1;
        } else {
            return Err(ChannelIdError::InvalidEscape(encoded.to_string()));
        }
    }
    String::from_utf8(out).map_err(|_| ChannelIdError::InvalidUtf8(encoded.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_and_label() {
        let path: ResourcePath = "2/Operation/TargetTemperature".parse().unwrap();
        assert_eq!(path.key(), "2/Operation/TargetTemperature");
        assert_eq!(path.label(), "2 -> Operation -> TargetTemperature");
        assert_eq!(path.depth(), 2);
        assert_eq!(ResourcePath::group(7).depth(), 0);
        assert_eq!(path.latest().key(), "2/Operation/TargetTemperature/la");
    }

    #[test]
    fn test_segment_validation() {
        let root = ResourcePath::group(0);
        assert_eq!(root.child(""), Err(PathError::EmptySegment));
        assert!(matches!(
            root.child("a/b"),
            Err(PathError::ContainsSeparator(_))
        ));
        assert!("0//x".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn test_channel_id_plain_path() {
        let path: ResourcePath = "1/Sensor/OutdoorTemperature".parse().unwrap();
        let id = ChannelId::from_path(&path);
        assert_eq!(id.as_str(), "1_Sensor_OutdoorTemperature");
        assert_eq!(id.to_path().unwrap(), path);
    }

    #[test]
    fn test_channel_id_escapes_are_reversible() {
        let path = ResourcePath::from_segments(["0", "Tank_Temp", "a-b", "x y", "Überhitzung"]).unwrap();
        let id = ChannelId::from_path(&path);
        assert!(!id.as_str().contains(' '));
        assert_eq!(id.as_str().matches('_').count(), 4);
        assert_eq!(id.to_path().unwrap(), path);
    }

    #[test]
    fn test_channel_id_no_collision_on_separator_chars() {
        // Joined naively with "_" these two would both become "0_a_b"
        let a = ResourcePath::from_segments(["0", "a_b"]).unwrap();
        let b = ResourcePath::from_segments(["0", "a", "b"]).unwrap();
        assert_ne!(ChannelId::from_path(&a), ChannelId::from_path(&b));
    }

    #[test]
    fn test_channel_id_parse_rejects_garbage() {
        assert!("0_a-Z".parse::<ChannelId>().is_err());
        assert!("0__a".parse::<ChannelId>().is_err());
        assert!("0_a.b".parse::<ChannelId>().is_err());
        assert!("0_a-5Fb".parse::<ChannelId>().is_ok());
    }

    #[test]
    fn test_channel_id_deserialize_validates() {
        let id: ChannelId = serde_json::from_str("\"1_Operation_Power\"").unwrap();
        assert_eq!(id.to_path().unwrap().key(), "1/Operation/Power");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1_Operation_Power\"");

        assert!(serde_json::from_str::<ChannelId>("\"0_a-Z\"").is_err());
        assert!(serde_json::from_str::<ChannelId>("\"0__a\"").is_err());
    }
}
