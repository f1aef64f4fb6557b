//! Structured view of one generation-backend reply.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// Status recovered from a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpretationStatus {
    Continuing,
    Complete,
}

impl InterpretationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InterpretationStatus::Continuing => "continuing",
            InterpretationStatus::Complete => "complete",
        }
    }

    pub fn is_complete(self) -> bool {
        self == InterpretationStatus::Complete
    }
}

impl fmt::Display for InterpretationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage of the fallback chain produced a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    /// An explicit `[KEY:value]` token.
    Token,
    /// A natural-language regular pattern.
    Pattern,
    /// A keyword scan or last-sentence guess.
    Heuristic,
    /// Nothing matched; the documented default was used.
    Default,
}

/// Ordered finding-name to finding-value mapping.
///
/// Iteration order is discovery order. Inserting an existing key replaces
/// its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    entries: Vec<(String, String)>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Findings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Provenance of each interpreted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sources {
    pub status: FieldSource,
    pub action: FieldSource,
    pub findings: FieldSource,
    pub answer: Option<FieldSource>,
}

/// Result of interpreting one reply. Every field is always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interpretation {
    pub status: InterpretationStatus,
    pub action: String,
    pub findings: Findings,
    /// Present only when `status` is `Complete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub sources: Sources,
}
