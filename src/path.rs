//! Path table definitions
//!
//! A `PathTable` maps each flat field name to the sequence of keys that
//! locate its value inside a nested record. Tables are built once and never
//! mutated afterwards, so they can be read from any number of threads.

use crate::error::FlattenError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default mapping from flat field names to nested paths
pub const DEFAULT_FIELD_MAPPING: &[(&str, &[&str])] = &[
    ("project_id", &["project_id"]),
    ("user_id", &["user_id"]),
    ("mouse_movements", &["metrics", "mouse", "movements"]),
    ("mouse_clicks", &["metrics", "mouse", "clicks"]),
    ("mouse_mouseDowns", &["metrics", "mouse", "mouseDowns"]),
    ("mouse_mouseUps", &["metrics", "mouse", "mouseUps"]),
    ("keypresses", &["metrics", "keyboard", "keypresses"]),
    ("keydowns", &["metrics", "keyboard", "keydowns"]),
    ("keyups", &["metrics", "keyboard", "keyups"]),
    ("keyboard_specificKeyEvents", &["metrics", "keyboard", "specificKeyEvents"]),
    ("signInButton_hoverToClickTime", &["metrics", "signInButton", "hoverToClickTime"]),
    ("signInButton_mouseLeaveCount", &["metrics", "signInButton", "mouseLeaveCount"]),
];

/// An ordered, non-empty sequence of key segments from the record root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Build a path from segments, rejecting empty paths and empty segments
    pub fn new<I, S>(segments: I) -> Result<Self, FlattenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(FlattenError::InvalidPathTable(
                "path must have at least one segment".to_string(),
            ));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FlattenError::InvalidPathTable(format!(
                "path {} contains an empty segment",
                segments.join(".")
            )));
        }
        Ok(Self(segments))
    }

    /// Parse a dotted path such as `metrics.mouse.clicks`
    pub fn parse_dotted(dotted: &str) -> Result<Self, FlattenError> {
        Self::new(dotted.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a constructed path
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` is a prefix of (or equal to) `other`
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Whether the given location is this path's leaf or lies below it
    pub(crate) fn covers(&self, segments: &[&str]) -> bool {
        self.0.len() <= segments.len() && self.0.iter().zip(segments).all(|(a, b)| a == b)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Mapping from flat field name to nested path
///
/// Entries are kept ordered by flat key, which makes every traversal over
/// the table deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<String>>",
    into = "BTreeMap<String, Vec<String>>"
)]
pub struct PathTable {
    entries: BTreeMap<String, FieldPath>,
}

impl PathTable {
    /// Build a table from `(flat_key, path)` pairs
    pub fn new<I>(entries: I) -> Result<Self, FlattenError>
    where
        I: IntoIterator<Item = (String, FieldPath)>,
    {
        let mut map = BTreeMap::new();
        for (key, path) in entries {
            if key.is_empty() {
                return Err(FlattenError::InvalidPathTable(
                    "flat key must not be empty".to_string(),
                ));
            }
            if map.insert(key.clone(), path).is_some() {
                return Err(FlattenError::InvalidPathTable(format!(
                    "duplicate flat key {}",
                    key
                )));
            }
        }
        if map.is_empty() {
            return Err(FlattenError::InvalidPathTable(
                "table must contain at least one entry".to_string(),
            ));
        }
        Ok(Self { entries: map })
    }

    /// Build a table from static `(flat_key, segments)` pairs
    pub fn from_static(entries: &[(&str, &[&str])]) -> Result<Self, FlattenError> {
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, segments) in entries {
            pairs.push((key.to_string(), FieldPath::new(segments.iter().copied())?));
        }
        Self::new(pairs)
    }

    /// The default table for sign-in interaction telemetry
    pub fn default_mapping() -> Self {
        let entries = DEFAULT_FIELD_MAPPING
            .iter()
            .map(|(key, segments)| {
                (
                    key.to_string(),
                    FieldPath(segments.iter().map(|s| s.to_string()).collect()),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, flat_key: &str) -> Option<&FieldPath> {
        self.entries.get(flat_key)
    }

    pub fn contains_key(&self, flat_key: &str) -> bool {
        self.entries.contains_key(flat_key)
    }

    /// Iterate entries in flat-key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldPath)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Find the flat key whose leaf is, or contains, the given location
    ///
    /// Used to attribute schema failures to a table entry. A location above
    /// every leaf (a whole section) belongs to no single key. The first key
    /// in flat-key order wins when several entries share the location.
    pub fn key_covering(&self, segments: &[&str]) -> Option<&str> {
        if segments.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(_, path)| path.covers(segments))
            .map(|(k, _)| k.as_str())
    }
}

impl Default for PathTable {
    fn default() -> Self {
        Self::default_mapping()
    }
}

impl TryFrom<BTreeMap<String, Vec<String>>> for PathTable {
    type Error = FlattenError;

    fn try_from(raw: BTreeMap<String, Vec<String>>) -> Result<Self, Self::Error> {
        let mut pairs = Vec::with_capacity(raw.len());
        for (key, segments) in raw {
            let path = FieldPath::new(segments).map_err(|e| match e {
                FlattenError::InvalidPathTable(msg) => {
                    FlattenError::InvalidPathTable(format!("{}: {}", key, msg))
                }
                other => other,
            })?;
            pairs.push((key, path));
        }
        Self::new(pairs)
    }
}

impl From<PathTable> for BTreeMap<String, Vec<String>> {
    fn from(table: PathTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(k, p)| (k, p.0))
            .collect()
    }
}
