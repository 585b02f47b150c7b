//! Grouped stratified train/valid/test assignment over an ingested dataset artifact.

mod kfold;
mod stage;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::{Artifact, ArtifactError, ArtifactStore, LATEST_ALIAS, Run};
use crate::params::Params;
use crate::table::{JoinedTable, Table, TableError};

use super::{EDA_TABLE_NAME, FILE_NAME_COLUMN, IMAGES_DIR, file_name_of, list_image_files};

pub use kfold::StratifiedGroupKFold;
pub use stage::Stage;

/// CSV written by the split step; also stored in the artifact under this name.
pub const SPLIT_CSV_NAME: &str = "data_split.csv";
/// Artifact type of the split step's output.
pub const SPLIT_DATA_TYPE: &str = "split_data";
/// Table holding `File_Name` and `Stage`.
pub const SPLIT_TABLE_NAME: &str = "data_split";
/// Joined EDA + split table.
pub const JOINED_TABLE_NAME: &str = "eda_table_data_split";
/// Column holding the assigned stage.
pub const STAGE_COLUMN: &str = "Stage";
const JOB_TYPE: &str = "data_split";
const STEP_DIR_NAME: &str = "02_split";

/// Errors from the fold assignment itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("n_splits must be at least 2, got {0}")]
    TooFewSplits(usize),
    #[error("{labels} labels but {groups} group keys")]
    LengthMismatch { labels: usize, groups: usize },
}

/// Errors from the split step.
#[derive(Debug, Error)]
pub enum SplitStepError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("split error: {0}")]
    Split(#[from] SplitError),
    #[error("downloaded artifact has no images directory at {0}")]
    MissingImages(PathBuf),
    #[error("No images found in {0}")]
    NoImages(PathBuf),
    #[error("{table} has no row for {file}")]
    MissingRow { table: String, file: String },
    #[error("{column} value for {file} is not an integer label")]
    InvalidLabel { column: String, file: String },
}

/// One line of `data_split.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRow {
    #[serde(rename = "File_Name")]
    pub file_name: String,
    #[serde(rename = "Stage")]
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Root output directory; the step writes into `<output_dir>/02_split`.
    pub output_dir: PathBuf,
    /// Artifact reference override (defaults to `<raw_data_artifact>:latest`).
    pub artifact: Option<String>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            artifact: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitSummary {
    pub rows: usize,
    pub stage_counts: BTreeMap<Stage, usize>,
    pub csv_path: PathBuf,
    /// Qualified name of the consumed artifact.
    pub source_artifact: String,
    /// Qualified name of the logged artifact.
    pub artifact: String,
    pub run_id: String,
}

/// Assign a stage to every file from its group key and stratification label.
pub fn assign_stages(
    file_names: &[String],
    groups: &[&str],
    labels: &[i64],
    splitter: &StratifiedGroupKFold,
) -> Result<Vec<SplitRow>, SplitError> {
    if file_names.len() != labels.len() {
        return Err(SplitError::LengthMismatch {
            labels: labels.len(),
            groups: file_names.len(),
        });
    }
    let folds = splitter.assign(labels, groups)?;
    Ok(file_names
        .iter()
        .zip(folds)
        .map(|(file_name, fold)| SplitRow {
            file_name: file_name.clone(),
            stage: Stage::from_fold(fold),
        })
        .collect())
}

pub fn stage_counts(rows: &[SplitRow]) -> BTreeMap<Stage, usize> {
    let mut out = BTreeMap::new();
    for row in rows {
        *out.entry(row.stage).or_insert(0) += 1;
    }
    out
}

/// Write `File_Name,Stage` rows with `\n` line endings.
///
/// The header is written even when `rows` is empty.
pub fn write_split_csv(path: &Path, rows: &[SplitRow]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    writer.write_record([FILE_NAME_COLUMN, STAGE_COLUMN])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_split_csv(path: &Path) -> Result<Vec<SplitRow>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    reader.deserialize().collect()
}

/// Table form of the split, keyed by `File_Name`.
pub fn split_table(rows: &[SplitRow]) -> Result<Table, TableError> {
    let mut table = Table::new([FILE_NAME_COLUMN, STAGE_COLUMN]);
    for row in rows {
        table.add_row(vec![row.file_name.as_str().into(), row.stage.as_str().into()])?;
    }
    Ok(table)
}

/// Stratification labels for `file_names`, looked up by name in `table`.
pub fn labels_for(table: &Table, column: &str, file_names: &[String]) -> Result<Vec<i64>, SplitStepError> {
    let index = table.index_by(FILE_NAME_COLUMN)?;
    let column_idx = table.column_index(column)?;
    file_names
        .iter()
        .map(|file| {
            let row = index.get(file.as_str()).ok_or_else(|| SplitStepError::MissingRow {
                table: EDA_TABLE_NAME.to_string(),
                file: file.clone(),
            })?;
            table.rows()[*row][column_idx]
                .as_int()
                .ok_or_else(|| SplitStepError::InvalidLabel {
                    column: column.to_string(),
                    file: file.clone(),
                })
        })
        .collect()
}

/// Run the split step end to end and log the `split_data` artifact.
pub fn split_dataset(
    params: &Params,
    store: &ArtifactStore,
    options: &SplitOptions,
) -> Result<SplitSummary, SplitStepError> {
    let step_dir = options.output_dir.join(STEP_DIR_NAME);
    fs::create_dir_all(&step_dir)?;

    let mut run = Run::init(store, JOB_TYPE)?;
    let reference = options
        .artifact
        .clone()
        .unwrap_or_else(|| format!("{}:{LATEST_ALIAS}", params.raw_data_artifact));
    let raw = run.use_artifact(&reference)?;

    let download_root = step_dir.join("artifacts");
    if download_root.exists() {
        fs::remove_dir_all(&download_root)?;
    }
    let root = raw.download(&download_root)?;

    let images_dir = root.join(IMAGES_DIR);
    if !images_dir.is_dir() {
        return Err(SplitStepError::MissingImages(images_dir));
    }
    let file_names: Vec<String> = list_image_files(&images_dir)?
        .iter()
        .filter_map(|path| file_name_of(path))
        .collect();
    if file_names.is_empty() {
        return Err(SplitStepError::NoImages(images_dir));
    }
    let groups: Vec<&str> = file_names
        .iter()
        .map(|name| params.group_key(name))
        .collect();

    let eda_table = raw.get_table(EDA_TABLE_NAME)?;
    let labels = labels_for(&eda_table, &params.stratify_class, &file_names)?;

    let mut splitter = StratifiedGroupKFold::new(params.n_splits)?;
    if params.shuffle {
        splitter = splitter.with_shuffle(&params.seed);
    }
    tracing::info!(
        files = file_names.len(),
        n_splits = splitter.n_splits(),
        stratify_class = %params.stratify_class,
        "assigning folds"
    );
    let rows = assign_stages(&file_names, &groups, &labels, &splitter)?;
    let counts = stage_counts(&rows);
    for (stage, count) in &counts {
        tracing::info!(stage = %stage, count, "stage count");
    }

    let csv_path = step_dir.join(SPLIT_CSV_NAME);
    write_split_csv(&csv_path, &rows)?;

    let mut artifact = Artifact::new(&params.processed_data_artifact, SPLIT_DATA_TYPE)?;
    artifact.add_file(&csv_path, Some(SPLIT_CSV_NAME))?;
    artifact.add_dir(&root, None)?;
    artifact.add_table(split_table(&rows)?, SPLIT_TABLE_NAME)?;
    artifact.add_joined_table(
        JoinedTable::new(EDA_TABLE_NAME, SPLIT_TABLE_NAME, FILE_NAME_COLUMN),
        JOINED_TABLE_NAME,
    )?;
    let logged = run.log_artifact(artifact)?;
    let record = run.finish()?;

    Ok(SplitSummary {
        rows: rows.len(),
        stage_counts: counts,
        csv_path,
        source_artifact: raw.qualified_name(),
        artifact: logged.qualified_name(),
        run_id: record.id,
    })
}

#[cfg(test)]
mod tests;
