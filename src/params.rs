//! Pipeline parameters: project naming, artifact names, class labels and split settings.
//!
//! Defaults describe the BDD simple 1k dataset. Any field can be overridden
//! from a TOML file; missing fields keep their defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default remote archive holding `images/`, `labels/` and `LICENSE.txt`.
pub const DEFAULT_DATASET_URL: &str =
    "https://storage.googleapis.com/wandb_course/bdd_simple_1k.zip";

const DEFAULT_CLASSES: &[(u16, &str)] = &[
    (0, "background"),
    (1, "road"),
    (2, "traffic light"),
    (3, "traffic sign"),
    (4, "person"),
    (5, "vehicle"),
    (6, "bicycle"),
];

/// Errors that may occur while loading or validating parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },
    /// Parameters parsed but are not usable.
    #[error("Invalid parameters: {0}")]
    Invalid(String),
}

/// One entry of the class-label map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLabel {
    /// Pixel value used for the class in mask images.
    pub id: u16,
    /// Human-readable class name, also used as a table column.
    pub name: String,
}

/// Parameters shared by the ingestion and split steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Project namespace inside the artifact store.
    pub project: String,
    /// Optional team/entity namespace; `None` uses the store's default entity.
    pub entity: Option<String>,
    /// Name of the artifact produced by ingestion.
    pub raw_data_artifact: String,
    /// Name of the artifact produced by the split step.
    pub processed_data_artifact: String,
    /// Remote dataset archive.
    pub dataset_url: String,
    /// Class column whose presence drives stratification.
    pub stratify_class: String,
    /// Number of folds for the grouped stratified split.
    pub n_splits: usize,
    /// Shuffle group order (seeded) before fold assignment.
    pub shuffle: bool,
    /// Seed string used when `shuffle` is enabled.
    pub seed: String,
    /// File names are cut at the first occurrence of this to derive the group key.
    pub group_separator: String,
    /// Class-label map.
    pub classes: Vec<ClassLabel>,
    /// Artifact store root; defaults to the application directory.
    pub store_dir: Option<PathBuf>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            project: "mlops-course-001".to_string(),
            entity: None,
            raw_data_artifact: "bdd_simple_1k".to_string(),
            processed_data_artifact: "bdd_simple_1k_split".to_string(),
            dataset_url: DEFAULT_DATASET_URL.to_string(),
            stratify_class: "bicycle".to_string(),
            n_splits: 10,
            shuffle: false,
            seed: "segprep-split-v1".to_string(),
            group_separator: "-".to_string(),
            classes: DEFAULT_CLASSES
                .iter()
                .map(|(id, name)| ClassLabel {
                    id: *id,
                    name: (*name).to_string(),
                })
                .collect(),
            store_dir: None,
        }
    }
}

impl Params {
    /// Load parameters from a TOML file and validate them.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let params: Params = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Load from `path` when given, otherwise return validated defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let params = Self::default();
                params.validate()?;
                Ok(params)
            }
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::Invalid("project must not be empty".into()));
        }
        if self.n_splits < 2 {
            return Err(ConfigError::Invalid(format!(
                "n_splits must be at least 2, got {}",
                self.n_splits
            )));
        }
        if self.group_separator.is_empty() {
            return Err(ConfigError::Invalid("group_separator must not be empty".into()));
        }
        if self.classes.is_empty() {
            return Err(ConfigError::Invalid("at least one class is required".into()));
        }
        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        for class in &self.classes {
            if !ids.insert(class.id) {
                return Err(ConfigError::Invalid(format!("duplicate class id {}", class.id)));
            }
            if !names.insert(class.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate class name {:?}",
                    class.name
                )));
            }
        }
        if !names.contains(self.stratify_class.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "stratify_class {:?} is not one of the configured classes",
                self.stratify_class
            )));
        }
        Ok(())
    }

    /// Class-label map keyed by pixel value.
    pub fn class_map(&self) -> BTreeMap<u16, String> {
        self.classes
            .iter()
            .map(|class| (class.id, class.name.clone()))
            .collect()
    }

    /// Group key for a file name: everything before the first separator.
    ///
    /// Names without a separator form their own group.
    pub fn group_key<'a>(&self, file_name: &'a str) -> &'a str {
        file_name
            .split_once(self.group_separator.as_str())
            .map(|(group, _)| group)
            .unwrap_or(file_name)
    }
}
