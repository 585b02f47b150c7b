//! Package a raw segmentation dataset and its EDA table as a `raw_data` artifact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::artifacts::{Artifact, ArtifactError, ArtifactStore, Run};
use crate::params::Params;
use crate::table::{Cell, ImageRef, Table, TableError};

use super::masks::{self, MaskError, MASK_SUFFIX};
use super::source::DatasetLayout;
use super::{
    EDA_TABLE_NAME, FILE_NAME_COLUMN, IMAGES_DIR, LABELS_DIR, LICENSE_FILE_NAME, file_name_of,
    list_image_files,
};

/// Artifact type of the ingestion output.
pub const RAW_DATA_TYPE: &str = "raw_data";
/// Column referencing the image and its mask.
pub const IMAGES_COLUMN: &str = "Images";
/// Placeholder split column, filled in by the split step's joined table.
pub const SPLIT_COLUMN: &str = "Split";
const SPLIT_PLACEHOLDER: &str = "None";
const JOB_TYPE: &str = "upload";
const STEP_DIR_NAME: &str = "01_eda";

/// Progress update emitted while building the EDA table.
#[derive(Clone, Copy, Debug)]
pub struct IngestProgress {
    /// Human-readable stage name.
    pub stage: &'static str,
    /// Images processed so far.
    pub processed: usize,
    /// Total images expected.
    pub total: usize,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mask error: {0}")]
    Mask(#[from] MaskError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("No images found in {0}")]
    NoImages(PathBuf),
    #[error("Image file name is not valid UTF-8: {0}")]
    FileName(PathBuf),
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub images: usize,
    /// Images containing each class, keyed by class name.
    pub class_counts: BTreeMap<String, usize>,
    /// Copy of the EDA table written under the step's output directory.
    pub table_path: PathBuf,
    /// Qualified name of the logged artifact.
    pub artifact: String,
    pub run_id: String,
}

fn progress_tick(
    progress: &mut Option<&mut dyn FnMut(IngestProgress)>,
    stage: &'static str,
    processed: usize,
    total: usize,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(IngestProgress {
            stage,
            processed,
            total,
        });
    }
}

/// Build the EDA table: `File_Name, Images, Split, <class names...>`.
pub fn build_eda_table(
    layout: &DatasetLayout,
    classes: &BTreeMap<u16, String>,
    mut progress: Option<&mut dyn FnMut(IngestProgress)>,
) -> Result<Table, IngestError> {
    let images = list_image_files(&layout.images_dir)?;
    if images.is_empty() {
        return Err(IngestError::NoImages(layout.images_dir.clone()));
    }
    let total = images.len();
    let mut columns = vec![
        FILE_NAME_COLUMN.to_string(),
        IMAGES_COLUMN.to_string(),
        SPLIT_COLUMN.to_string(),
    ];
    columns.extend(classes.values().cloned());
    let mut table = Table::new(columns);

    progress_tick(&mut progress, "Reading masks", 0, total);
    for (index, image) in images.iter().enumerate() {
        let file_name =
            file_name_of(image).ok_or_else(|| IngestError::FileName(image.clone()))?;
        let presence = masks::classes_in_image(image, classes)?;
        let mut row: Vec<Cell> = vec![
            file_name.as_str().into(),
            image_ref(image, &file_name)?.into(),
            SPLIT_PLACEHOLDER.into(),
        ];
        row.extend(presence.as_ints().map(|(_, flag)| Cell::Int(flag)));
        table.add_row(row)?;
        tracing::debug!(file = %file_name, "mask read");
        progress_tick(&mut progress, "Reading masks", index + 1, total);
    }
    Ok(table)
}

fn image_ref(image: &Path, file_name: &str) -> Result<ImageRef, IngestError> {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IngestError::FileName(image.to_path_buf()))?;
    Ok(ImageRef {
        path: format!("{IMAGES_DIR}/{file_name}"),
        mask: Some(format!("{LABELS_DIR}/{stem}{MASK_SUFFIX}")),
    })
}

/// Images containing each class, from the 0/1 columns of an EDA table.
pub fn class_counts(
    table: &Table,
    classes: &BTreeMap<u16, String>,
) -> Result<BTreeMap<String, usize>, TableError> {
    let mut counts = BTreeMap::new();
    for name in classes.values() {
        let present = table
            .column(name)?
            .into_iter()
            .filter(|cell| cell.as_int() == Some(1))
            .count();
        counts.insert(name.clone(), present);
    }
    Ok(counts)
}

/// Run the ingestion step end to end and log the `raw_data` artifact.
pub fn ingest_dataset(
    params: &Params,
    store: &ArtifactStore,
    layout: &DatasetLayout,
    output_dir: &Path,
    mut progress: Option<&mut dyn FnMut(IngestProgress)>,
) -> Result<IngestSummary, IngestError> {
    let step_dir = output_dir.join(STEP_DIR_NAME);
    fs::create_dir_all(&step_dir)?;

    let mut run = Run::init(store, JOB_TYPE)?;
    let mut artifact = Artifact::new(&params.raw_data_artifact, RAW_DATA_TYPE)?;
    artifact.add_file(&layout.license_path, Some(LICENSE_FILE_NAME))?;
    let image_files = artifact.add_dir(&layout.images_dir, Some(IMAGES_DIR))?;
    let label_files = artifact.add_dir(&layout.labels_dir, Some(LABELS_DIR))?;
    tracing::info!(images = image_files, labels = label_files, "dataset files staged");

    let classes = params.class_map();
    let reborrow: Option<&mut dyn FnMut(IngestProgress)> = match progress.as_mut() {
        Some(callback) => Some(&mut **callback),
        None => None,
    };
    let table = build_eda_table(layout, &classes, reborrow)?;
    let counts = class_counts(&table, &classes)?;
    for (class, count) in &counts {
        tracing::info!(class = %class, images = count, "class presence");
    }
    let table_path = step_dir.join(format!("{EDA_TABLE_NAME}{}", crate::table::TABLE_SUFFIX));
    table.write_json(&table_path)?;

    let images = table.len();
    artifact.add_table(table, EDA_TABLE_NAME)?;
    progress_tick(&mut progress, "Logging artifact", images, images);
    let logged = run.log_artifact(artifact)?;
    let record = run.finish()?;

    Ok(IngestSummary {
        images,
        class_counts: counts,
        table_path,
        artifact: logged.qualified_name(),
        run_id: record.id,
    })
}
