use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A file discovered by the scanner. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    /// Repo-relative path with `/` separators, unique per run
    pub path: String,
    pub extension: String,
    pub size_bytes: u64,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        let path = path.into();
        let extension = std::path::Path::new(&path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            path,
            extension,
            size_bytes,
        }
    }

    /// Final path component
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Final path component without its extension
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }
}

/// Processing strategy for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Static description, never sent to the description service
    Skip,
    /// Described in grouped requests from a leading excerpt
    Batch,
    /// Described one at a time from full content
    Deep,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Skip => "skip",
            Tier::Batch => "batch",
            Tier::Deep => "deep",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFile {
    pub record: FileRecord,
    pub tier: Tier,
    /// Only set for `Tier::Skip`
    pub auto_description: Option<String>,
}

impl ClassifiedFile {
    pub fn path(&self) -> &str {
        &self.record.path
    }
}

/// Persisted state for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub digest: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_analyzed_at: Option<DateTime<Utc>>,
    /// Description came from the offline describer; a run with a real
    /// service replaces it even when the content is unchanged
    #[serde(default, skip_serializing_if = "is_false")]
    pub heuristic: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Path → entry. Ordered so the store file is stable across saves.
pub type DigestMap = BTreeMap<String, DigestEntry>;

/// Classification of the current and stored path universes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
}

impl DiffResult {
    /// Paths that need (re)analysis because their content is new or different
    pub fn stale(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.changed.iter())
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty() || !self.removed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "added: {} | changed: {} | removed: {} | unchanged: {}",
            self.added.len(),
            self.changed.len(),
            self.removed.len(),
            self.unchanged.len()
        )
    }
}

/// Result of one analysis pass. Every submitted path lands in exactly one of
/// `descriptions` or `pending`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub descriptions: BTreeMap<String, String>,
    pub pending: Vec<String>,
    /// Requests issued to the description service, retries included
    pub service_calls: usize,
}

impl AnalysisOutcome {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}
