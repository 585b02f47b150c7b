use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What an artifact entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Table,
    JoinedTable,
}

/// Integrity record for one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: EntryKind,
    /// SHA-256 hex digest of the stored bytes.
    pub digest: String,
    pub size: u64,
}

/// Contents of `manifest.json` for one artifact version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub version: u32,
    /// Digest over every entry name and digest; equal digests mean equal content.
    pub digest: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Id of the run that logged this version, if any.
    #[serde(default)]
    pub created_by: Option<String>,
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl ArtifactManifest {
    /// `name:v<N>`.
    pub fn qualified_name(&self) -> String {
        format!("{}:v{}", self.name, self.version)
    }

    /// Total stored bytes across entries.
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|entry| entry.size).sum()
    }

    /// Iterate entry names of a given kind.
    pub fn entries_of(&self, kind: EntryKind) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.kind == kind)
            .map(|(name, _)| name.as_str())
    }
}

/// Alias table stored next to the versions (`aliases.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct Aliases {
    #[serde(flatten)]
    pub(super) versions: BTreeMap<String, u32>,
}
