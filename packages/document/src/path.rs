//! # Paths
//!
//! A [`Path`] is the dot-joined chain of local identifiers from the document
//! root down to a node, e.g. `melee-attack.melee-attack-3.tabs.tab-7.damage`.
//!
//! The segment [`ITEMS_SEGMENT`] placed directly after a grid or tab set names
//! that container's ordered child collection. Structural messages use it
//! (`gear.items`, `gear.items.gear-1`); resolution skips it, and canonical
//! paths produced by the document never contain it.

use crate::DocumentError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Segment naming the ordered child collection of a grid or tab set.
pub const ITEMS_SEGMENT: &str = "items";

/// Dot-separated address of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The document root (empty path).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-joined path. The empty string is the root.
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DocumentError::InvalidPath(raw.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, DocumentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Split into `(parent, leaf)`.
    pub fn split_leaf(&self) -> Option<(Path, &str)> {
        let leaf = self.leaf()?;
        Some((self.parent()?, leaf))
    }

    /// Append one segment. The segment is not validated.
    pub fn child(&self, segment: impl Into<String>) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Append every segment of `relative`.
    pub fn join(&self, relative: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self { segments }
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// The part of this path below `prefix`, or `None` when it is not below it.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }

    /// True when the last segment is the collection marker.
    pub fn ends_with_items(&self) -> bool {
        self.leaf() == Some(ITEMS_SEGMENT)
    }

    /// This path with a trailing collection marker (added once).
    pub fn items(&self) -> Path {
        if self.ends_with_items() {
            self.clone()
        } else {
            self.child(ITEMS_SEGMENT)
        }
    }

    /// This path without a trailing collection marker.
    pub fn without_items(&self) -> Path {
        if self.ends_with_items() {
            self.parent().unwrap_or_default()
        } else {
            self.clone()
        }
    }
}

/// Local identifiers must be non-empty and must not contain the separator.
pub fn validate_segment(segment: &str) -> Result<(), DocumentError> {
    if segment.is_empty() || segment.contains('.') {
        return Err(DocumentError::InvalidIdentifier(segment.to_string()));
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for Path {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Path::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        let path = Path::parse("melee-attack-3.tabs.tab-7.damage").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.leaf(), Some("damage"));
        assert_eq!(path.to_string(), "melee-attack-3.tabs.tab-7.damage");
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!(Path::parse("a..b").is_err());
        assert!(Path::parse(".a").is_err());
        assert!(Path::parse("").unwrap().is_root());
    }

    #[test]
    fn test_split_leaf() {
        let path = Path::parse("characteristics.WS.value").unwrap();
        let (parent, leaf) = path.split_leaf().unwrap();
        assert_eq!(parent.to_string(), "characteristics.WS");
        assert_eq!(leaf, "value");
        assert!(Path::root().split_leaf().is_none());
    }

    #[test]
    fn test_items_marker_helpers() {
        let grid = Path::parse("gear").unwrap();
        assert_eq!(grid.items().to_string(), "gear.items");
        assert_eq!(grid.items().items().to_string(), "gear.items");
        assert_eq!(grid.items().without_items(), grid);
    }

    #[test]
    fn test_starts_with() {
        let a = Path::parse("notes.n-1.name").unwrap();
        assert!(a.starts_with(&Path::parse("notes.n-1").unwrap()));
        assert!(!a.starts_with(&Path::parse("notes.n-10").unwrap()));
        assert!(a.starts_with(&Path::root()));
    }

    #[test]
    fn test_strip_prefix() {
        let a = Path::parse("gear.gear-1.name").unwrap();
        assert_eq!(a.strip_prefix(&Path::root()), Some(a.clone()));
        assert_eq!(
            a.strip_prefix(&Path::parse("gear").unwrap()).unwrap().to_string(),
            "gear-1.name"
        );
        assert!(a.strip_prefix(&a).unwrap().is_root());
        assert!(a.strip_prefix(&Path::parse("notes").unwrap()).is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let path = Path::parse("a.b").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"a.b\"");
        assert!(serde_json::from_str::<Path>("\"a..b\"").is_err());
    }
}
