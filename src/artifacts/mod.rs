//! Local, filesystem-backed artifact store.
//!
//! Layout under the store root:
//!
//! ```text
//! <entity>/<project>/artifacts/<name>/aliases.json
//! <entity>/<project>/artifacts/<name>/v<N>/manifest.json
//! <entity>/<project>/artifacts/<name>/v<N>/files/<entry>
//! <entity>/<project>/runs/<run id>.json
//! ```
//!
//! Versions are written into a staging directory and renamed into place, so a
//! version directory is either complete or absent. Logged versions are never
//! modified afterwards.

mod fs_ops;
mod manifest;
mod run;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::table::{self, JOINED_TABLE_SUFFIX, JoinedTable, TABLE_SUFFIX, Table, TableError};

pub use manifest::{ArtifactManifest, EntryKind, ManifestEntry};
pub use run::{Run, RunRecord};

use manifest::Aliases;

/// Alias that always points at the newest version.
pub const LATEST_ALIAS: &str = "latest";
/// Entity used when none is configured.
pub const DEFAULT_ENTITY: &str = "local";

const MANIFEST_FILE_NAME: &str = "manifest.json";
const ALIASES_FILE_NAME: &str = "aliases.json";
const FILES_DIR_NAME: &str = "files";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid artifact name {0:?}")]
    InvalidName(String),
    #[error("invalid artifact reference {0:?} (expected name[:alias|:vN])")]
    InvalidReference(String),
    #[error("invalid entry name {0:?}")]
    InvalidEntryName(String),
    #[error("duplicate entry {0:?}")]
    DuplicateEntry(String),
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("artifact {artifact} has no entry {entry:?}")]
    MissingEntry { artifact: String, entry: String },
    #[error("artifact {name} has type {existing:?}, cannot log it as {requested:?}")]
    TypeMismatch {
        name: String,
        existing: String,
        requested: String,
    },
    #[error("digest mismatch for {entry} in {artifact}")]
    Corrupt { artifact: String, entry: String },
    #[error("timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

/// `name`, `name:alias` or `name:v<N>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub selector: VersionSelector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Alias(String),
    Version(u32),
}

impl ArtifactRef {
    pub fn parse(reference: &str) -> Result<Self, ArtifactError> {
        let (name, selector) = match reference.split_once(':') {
            Some((name, selector)) => (name, selector),
            None => (reference, LATEST_ALIAS),
        };
        validate_name(name).map_err(|_| ArtifactError::InvalidReference(reference.to_string()))?;
        if selector.is_empty() {
            return Err(ArtifactError::InvalidReference(reference.to_string()));
        }
        let selector = match selector
            .strip_prefix('v')
            .and_then(|digits| digits.parse::<u32>().ok())
        {
            Some(version) => VersionSelector::Version(version),
            None => VersionSelector::Alias(selector.to_string()),
        };
        Ok(Self {
            name: name.to_string(),
            selector,
        })
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.selector {
            VersionSelector::Alias(alias) => write!(f, "{}:{alias}", self.name),
            VersionSelector::Version(version) => write!(f, "{}:v{version}", self.name),
        }
    }
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ArtifactError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone)]
enum PendingEntry {
    File(PathBuf),
    Table(Table),
    JoinedTable(JoinedTable),
}

/// An artifact being assembled before it is logged.
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    artifact_type: String,
    entries: BTreeMap<String, PendingEntry>,
}

impl Artifact {
    pub fn new(name: &str, artifact_type: &str) -> Result<Self, ArtifactError> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            artifact_type: artifact_type.to_string(),
            entries: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artifact_type(&self) -> &str {
        &self.artifact_type
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a single file, stored under `name` or its own file name.
    pub fn add_file(&mut self, path: &Path, name: Option<&str>) -> Result<(), ArtifactError> {
        if !path.is_file() {
            return Err(ArtifactError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a file"),
            });
        }
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ArtifactError::InvalidEntryName(path.display().to_string()))?,
        };
        self.insert(name, PendingEntry::File(path.to_path_buf()))
    }

    /// Add every file below `dir`, prefixed by `name` when given.
    ///
    /// Returns the number of files added.
    pub fn add_dir(&mut self, dir: &Path, name: Option<&str>) -> Result<usize, ArtifactError> {
        let files = fs_ops::list_files(dir)?;
        let count = files.len();
        for (rel, path) in files {
            let entry = match name {
                Some(prefix) => format!("{prefix}/{rel}"),
                None => rel,
            };
            self.insert(entry, PendingEntry::File(path))?;
        }
        Ok(count)
    }

    /// Add a table stored as `<name>.table.json`.
    pub fn add_table(&mut self, table: Table, name: &str) -> Result<(), ArtifactError> {
        self.insert(format!("{name}{TABLE_SUFFIX}"), PendingEntry::Table(table))
    }

    /// Add a joined table stored as `<name>.joined-table.json`.
    ///
    /// Both referenced tables must be part of this artifact when it is logged.
    pub fn add_joined_table(&mut self, joined: JoinedTable, name: &str) -> Result<(), ArtifactError> {
        self.insert(
            format!("{name}{JOINED_TABLE_SUFFIX}"),
            PendingEntry::JoinedTable(joined),
        )
    }

    fn insert(&mut self, name: String, entry: PendingEntry) -> Result<(), ArtifactError> {
        fs_ops::validate_entry_name(&name)?;
        if self.entries.contains_key(&name) {
            return Err(ArtifactError::DuplicateEntry(name));
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    fn check_joined_tables(&self) -> Result<(), ArtifactError> {
        for (entry_name, entry) in &self.entries {
            let PendingEntry::JoinedTable(joined) = entry else {
                continue;
            };
            for table_name in [&joined.table1, &joined.table2] {
                if !self.entries.contains_key(&format!("{table_name}{TABLE_SUFFIX}")) {
                    return Err(ArtifactError::MissingEntry {
                        artifact: format!("{} ({entry_name})", self.name),
                        entry: table_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Stored tables copied in as plain files keep their table kind.
fn entry_kind_for_file(name: &str) -> EntryKind {
    if name.ends_with(TABLE_SUFFIX) {
        EntryKind::Table
    } else if name.ends_with(JOINED_TABLE_SUFFIX) {
        EntryKind::JoinedTable
    } else {
        EntryKind::File
    }
}

/// A logged, immutable artifact version.
#[derive(Debug, Clone)]
pub struct LoggedArtifact {
    dir: PathBuf,
    manifest: ArtifactManifest,
}

impl LoggedArtifact {
    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> u32 {
        self.manifest.version
    }

    pub fn qualified_name(&self) -> String {
        self.manifest.qualified_name()
    }

    /// Directory holding the stored entries.
    pub fn files_dir(&self) -> PathBuf {
        self.dir.join(FILES_DIR_NAME)
    }

    /// Stored path of an entry.
    pub fn entry_path(&self, entry: &str) -> Result<PathBuf, ArtifactError> {
        if !self.manifest.entries.contains_key(entry) {
            return Err(ArtifactError::MissingEntry {
                artifact: self.qualified_name(),
                entry: entry.to_string(),
            });
        }
        Ok(fs_ops::entry_path(&self.files_dir(), entry))
    }

    /// Copy every entry into `root`, verifying digests, and return `root`.
    pub fn download(&self, root: &Path) -> Result<PathBuf, ArtifactError> {
        fs::create_dir_all(root)?;
        for (entry, record) in &self.manifest.entries {
            let src = fs_ops::entry_path(&self.files_dir(), entry);
            let (digest, _) = fs_ops::sha256_file(&src)?;
            if digest != record.digest {
                return Err(ArtifactError::Corrupt {
                    artifact: self.qualified_name(),
                    entry: entry.clone(),
                });
            }
            fs_ops::copy_file(&src, &fs_ops::entry_path(root, entry))?;
        }
        tracing::debug!(
            artifact = %self.qualified_name(),
            root = %root.display(),
            entries = self.manifest.entries.len(),
            "artifact downloaded"
        );
        Ok(root.to_path_buf())
    }

    /// Load a table by entry name; joined tables are materialized.
    pub fn get_table(&self, name: &str) -> Result<Table, ArtifactError> {
        let table_entry = format!("{name}{TABLE_SUFFIX}");
        if self.manifest.entries.contains_key(&table_entry) {
            return Ok(Table::read_json(&self.entry_path(&table_entry)?)?);
        }
        let joined_entry = format!("{name}{JOINED_TABLE_SUFFIX}");
        if self.manifest.entries.contains_key(&joined_entry) {
            let bytes = fs::read(self.entry_path(&joined_entry)?)?;
            let joined: JoinedTable = serde_json::from_slice(&bytes)?;
            let left = self.get_table(&joined.table1)?;
            let right = self.get_table(&joined.table2)?;
            return Ok(table::join(&left, &right, &joined.join_key)?);
        }
        Err(ArtifactError::MissingEntry {
            artifact: self.qualified_name(),
            entry: name.to_string(),
        })
    }
}

/// Artifact store scoped to one entity and project.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    entity: String,
    project: String,
}

impl ArtifactStore {
    pub fn open(base: &Path, entity: Option<&str>, project: &str) -> Result<Self, ArtifactError> {
        let entity = entity.unwrap_or(DEFAULT_ENTITY);
        validate_name(entity)?;
        validate_name(project)?;
        let root = base.join(entity).join(project);
        fs::create_dir_all(root.join("artifacts"))?;
        fs::create_dir_all(root.join("runs"))?;
        Ok(Self {
            root,
            entity: entity.to_string(),
            project: project.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn artifact_dir(&self, name: &str) -> PathBuf {
        self.root.join("artifacts").join(name)
    }

    pub(crate) fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Existing version numbers of `name`, ascending.
    pub fn versions(&self, name: &str) -> Result<Vec<u32>, ArtifactError> {
        let dir = self.artifact_dir(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(version) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix('v'))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if entry.path().join(MANIFEST_FILE_NAME).is_file() {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Resolve a reference such as `bdd_simple_1k:latest` or `bdd_simple_1k:v2`.
    pub fn resolve(&self, reference: &str) -> Result<LoggedArtifact, ArtifactError> {
        let parsed = ArtifactRef::parse(reference)?;
        let version = match &parsed.selector {
            VersionSelector::Version(version) => *version,
            VersionSelector::Alias(alias) => *self
                .load_aliases(&parsed.name)?
                .versions
                .get(alias)
                .ok_or_else(|| ArtifactError::NotFound(parsed.to_string()))?,
        };
        let dir = self.artifact_dir(&parsed.name).join(format!("v{version}"));
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Err(ArtifactError::NotFound(parsed.to_string()));
        }
        let bytes = fs::read(&manifest_path)?;
        let manifest: ArtifactManifest = serde_json::from_slice(&bytes)?;
        Ok(LoggedArtifact { dir, manifest })
    }

    /// Log an artifact outside of a run.
    pub fn log(&self, artifact: Artifact) -> Result<LoggedArtifact, ArtifactError> {
        self.log_from(artifact, None)
    }

    pub(crate) fn log_from(
        &self,
        artifact: Artifact,
        producer: Option<&str>,
    ) -> Result<LoggedArtifact, ArtifactError> {
        artifact.check_joined_tables()?;
        let artifact_dir = self.artifact_dir(&artifact.name);
        fs::create_dir_all(&artifact_dir)?;

        let latest = match self.resolve(&format!("{}:{LATEST_ALIAS}", artifact.name)) {
            Ok(latest) => Some(latest),
            Err(ArtifactError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        if let Some(latest) = &latest {
            if latest.manifest.artifact_type != artifact.artifact_type {
                return Err(ArtifactError::TypeMismatch {
                    name: artifact.name.clone(),
                    existing: latest.manifest.artifact_type.clone(),
                    requested: artifact.artifact_type.clone(),
                });
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&artifact_dir)?;
        let files_dir = staging.path().join(FILES_DIR_NAME);
        fs::create_dir_all(&files_dir)?;

        let mut entries = BTreeMap::new();
        for (name, pending) in &artifact.entries {
            let dest = fs_ops::entry_path(&files_dir, name);
            let kind = match pending {
                PendingEntry::File(src) => {
                    fs_ops::copy_file(src, &dest)?;
                    entry_kind_for_file(name)
                }
                PendingEntry::Table(table) => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    table.write_json(&dest)?;
                    EntryKind::Table
                }
                PendingEntry::JoinedTable(joined) => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&dest, serde_json::to_vec(joined)?)?;
                    EntryKind::JoinedTable
                }
            };
            let (digest, size) = fs_ops::sha256_file(&dest)?;
            entries.insert(name.clone(), ManifestEntry { kind, digest, size });
        }
        let digest =
            fs_ops::digest_listing(entries.iter().map(|(name, entry)| (name, &entry.digest)));

        if let Some(latest) = latest {
            if latest.manifest.digest == digest {
                tracing::info!(
                    artifact = %latest.qualified_name(),
                    "content unchanged; reusing existing version"
                );
                return Ok(latest);
            }
        }

        let version = self
            .versions(&artifact.name)?
            .last()
            .map_or(0, |last| last + 1);
        let manifest = ArtifactManifest {
            name: artifact.name.clone(),
            artifact_type: artifact.artifact_type.clone(),
            version,
            digest,
            created_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            created_by: producer.map(str::to_string),
            entries,
        };
        fs_ops::write_json_atomic(&staging.path().join(MANIFEST_FILE_NAME), &manifest)?;

        let dir = artifact_dir.join(format!("v{version}"));
        let staged = staging.keep();
        fs::rename(&staged, &dir)?;

        let mut aliases = self.load_aliases(&artifact.name)?;
        aliases.versions.insert(LATEST_ALIAS.to_string(), version);
        fs_ops::write_json_atomic(&artifact_dir.join(ALIASES_FILE_NAME), &aliases)?;

        tracing::info!(
            artifact = %manifest.qualified_name(),
            kind = %manifest.artifact_type,
            entries = manifest.entries.len(),
            bytes = manifest.total_size(),
            "artifact logged"
        );
        Ok(LoggedArtifact { dir, manifest })
    }

    /// Point `alias` at an existing version.
    pub fn set_alias(&self, name: &str, alias: &str, version: u32) -> Result<(), ArtifactError> {
        if alias.starts_with('v') && alias[1..].parse::<u32>().is_ok() {
            return Err(ArtifactError::InvalidReference(format!("{name}:{alias}")));
        }
        self.resolve(&format!("{name}:v{version}"))?;
        let mut aliases = self.load_aliases(name)?;
        aliases.versions.insert(alias.to_string(), version);
        fs_ops::write_json_atomic(&self.artifact_dir(name).join(ALIASES_FILE_NAME), &aliases)
    }

    fn load_aliases(&self, name: &str) -> Result<Aliases, ArtifactError> {
        let path = self.artifact_dir(name).join(ALIASES_FILE_NAME);
        if !path.is_file() {
            return Ok(Aliases::default());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
