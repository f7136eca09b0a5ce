//! Index type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which search an indexed file answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Code,
    Doc,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Code => "CODE",
            EntryKind::Doc => "DOC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CODE" => Some(EntryKind::Code),
            "DOC" => Some(EntryKind::Doc),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Workspace-relative, `/`-separated path
    pub filepath: String,

    #[serde(rename = "type")]
    pub kind: EntryKind,

    /// SHA-256 of the file contents that produced the vector
    pub content_hash: String,

    pub indexed_at: DateTime<Utc>,
}

/// One indexed file. The id is the relative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// A search result as handed to tools and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub filepath: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub score: f32,
}

/// Statistics about the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: u64,
    pub code_entries: u64,
    pub doc_entries: u64,
    pub size_bytes: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
}
