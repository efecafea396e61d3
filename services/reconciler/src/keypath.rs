//! Keyed hierarchical paths into the config tree.
//!
//! A path is an ordered sequence of named segments, each optionally carrying
//! a list key: `/services/ipam/from-pool{edge}/request{r1}/attributes`.
//! Paths identify both config locations (requests, attribute leaves) and the
//! operational response region the engine writes back into.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One path segment: a node name plus the list key, when the node is a
/// keyed list entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    pub name: String,
    pub key: Option<String>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    pub fn keyed(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}{{{}}}", self.name, key),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An absolute path into the config tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    /// The tree root (empty path).
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Extend with an unkeyed segment, returning the new path.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::new(name));
        Self { segments }
    }

    /// Extend with a keyed list entry, returning the new path.
    pub fn entry(&self, name: impl Into<String>, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::keyed(name, key));
        Self { segments }
    }

    /// Path to the containing node, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns true if `self` is `other` or lies underneath it.
    pub fn starts_with(&self, other: &KeyPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Returns true if `self` lies strictly underneath `other`.
    pub fn is_descendant_of(&self, other: &KeyPath) -> bool {
        self.segments.len() > other.segments.len() && self.starts_with(other)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Failed to parse a path string.
#[derive(Debug, Error)]
#[error("invalid path {0:?}")]
pub struct ParsePathError(pub String);

impl FromStr for KeyPath {
    type Err = ParsePathError;

    /// Parse the `/name{key}/name` notation used in config leaves that
    /// reference other tree nodes (e.g. `redeploy-service`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix('/')
            .ok_or_else(|| ParsePathError(s.to_string()))?;
        if body.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for part in body.split('/') {
            if part.is_empty() {
                return Err(ParsePathError(s.to_string()));
            }
            let segment = match part.split_once('{') {
                Some((name, rest)) => {
                    let key = rest
                        .strip_suffix('}')
                        .ok_or_else(|| ParsePathError(s.to_string()))?;
                    if name.is_empty() || key.is_empty() {
                        return Err(ParsePathError(s.to_string()));
                    }
                    Segment::keyed(name, key)
                }
                None => Segment::new(part),
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }
}
