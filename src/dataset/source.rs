//! Fetch the raw dataset archive into a local cache and locate its layout.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use thiserror::Error;
use url::Url;

use crate::http_client;

use super::{IMAGES_DIR, LABELS_DIR, LICENSE_FILE_NAME};

const MAX_ARCHIVE_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const MAX_ZIP_ENTRIES: usize = 200_000;
const MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES: u64 = 512 * 1024 * 1024;
const MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES: u64 = 16 * 1024 * 1024 * 1024;
const MAX_ZIP_COMPRESSION_RATIO: u64 = 200;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid dataset URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Download failed: {0}")]
    Http(String),
    #[error("Zip error: {0}")]
    Zip(String),
    #[error("Unsafe archive: {0}")]
    Archive(String),
    #[error("Dataset at {root} is missing {missing}")]
    Layout { root: PathBuf, missing: String },
}

/// Where and how to fetch the archive.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub url: String,
    /// Directory holding downloaded archives and their extracted trees.
    pub cache_dir: PathBuf,
    /// Re-download and re-extract even if a cached copy exists.
    pub force: bool,
}

#[derive(Clone, Copy)]
struct ZipExtractionLimits {
    max_entries: usize,
    max_entry_uncompressed_bytes: u64,
    max_total_uncompressed_bytes: u64,
    max_compression_ratio: u64,
}

impl ZipExtractionLimits {
    fn standard() -> Self {
        Self {
            max_entries: MAX_ZIP_ENTRIES,
            max_entry_uncompressed_bytes: MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES,
            max_total_uncompressed_bytes: MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES,
            max_compression_ratio: MAX_ZIP_COMPRESSION_RATIO,
        }
    }
}

/// Directory layout of an extracted dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
    pub license_path: PathBuf,
}

impl DatasetLayout {
    /// Treat `root` as the dataset root and check the required entries.
    pub fn open(root: &Path) -> Result<Self, SourceError> {
        let layout = Self {
            root: root.to_path_buf(),
            images_dir: root.join(IMAGES_DIR),
            labels_dir: root.join(LABELS_DIR),
            license_path: root.join(LICENSE_FILE_NAME),
        };
        for (path, missing) in [
            (&layout.images_dir, IMAGES_DIR),
            (&layout.labels_dir, LABELS_DIR),
        ] {
            if !path.is_dir() {
                return Err(SourceError::Layout {
                    root: root.to_path_buf(),
                    missing: format!("{missing}/"),
                });
            }
        }
        if !layout.license_path.is_file() {
            return Err(SourceError::Layout {
                root: root.to_path_buf(),
                missing: LICENSE_FILE_NAME.to_string(),
            });
        }
        Ok(layout)
    }

    /// Find the dataset root at `dir` or in its single wrapping subdirectory.
    pub fn locate(dir: &Path) -> Result<Self, SourceError> {
        if dir.join(IMAGES_DIR).is_dir() {
            return Self::open(dir);
        }
        let mut candidates = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.path().join(IMAGES_DIR).is_dir() {
                candidates.push(entry.path());
            }
        }
        match candidates.as_slice() {
            [single] => Self::open(single),
            _ => Err(SourceError::Layout {
                root: dir.to_path_buf(),
                missing: format!("{IMAGES_DIR}/"),
            }),
        }
    }
}

/// Download (if needed) and extract the archive, returning its layout.
pub fn fetch_dataset(options: &FetchOptions) -> Result<DatasetLayout, SourceError> {
    let url = validate_dataset_url(&options.url)?;
    let stem = archive_stem(&url);
    fs::create_dir_all(&options.cache_dir)?;
    let extract_dir = options.cache_dir.join(&stem);
    let archive_path = options.cache_dir.join(format!("{stem}.zip"));

    if extract_dir.is_dir() && !options.force {
        tracing::info!(path = %extract_dir.display(), "using cached dataset");
        return DatasetLayout::locate(&extract_dir);
    }

    if !archive_path.is_file() || options.force {
        tracing::info!(url = %url, "downloading dataset");
        let bytes = download_to_file(url.as_str(), &archive_path)?;
        tracing::info!(bytes, path = %archive_path.display(), "download complete");
    }

    let staging = Builder::new()
        .prefix(".extract-")
        .tempdir_in(&options.cache_dir)?;
    unzip_to_dir(&archive_path, staging.path())?;
    if extract_dir.exists() {
        fs::remove_dir_all(&extract_dir)?;
    }
    let staged = staging.keep();
    fs::rename(&staged, &extract_dir)?;
    tracing::info!(path = %extract_dir.display(), "dataset extracted");
    DatasetLayout::locate(&extract_dir)
}

fn validate_dataset_url(url: &str) -> Result<Url, SourceError> {
    let parsed = Url::parse(url).map_err(|err| SourceError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(SourceError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {other}"),
            });
        }
    }
    if parsed.host_str().is_none() {
        return Err(SourceError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}

/// Cache directory name derived from the last path segment of the URL.
fn archive_stem(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("dataset");
    let stem = name.strip_suffix(".zip").unwrap_or(name);
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

/// Stream the archive into a temp file beside `dest`, then move it into place.
fn download_to_file(url: &str, dest: &Path) -> Result<u64, SourceError> {
    let response = http_client::agent()
        .get(url)
        .call()
        .map_err(|err| SourceError::Http(err.to_string()))?;
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes = http_client::copy_response_to_writer(response, tmp.as_file_mut(), MAX_ARCHIVE_BYTES)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|err| SourceError::Io(err.error))?;
    Ok(bytes)
}

fn unzip_to_dir(zip_path: &Path, dest_dir: &Path) -> Result<(), SourceError> {
    unzip_to_dir_with_limits(zip_path, dest_dir, ZipExtractionLimits::standard())
}

#[cfg(unix)]
fn safe_unix_file_mode(archive_mode: u32) -> u32 {
    if archive_mode & 0o111 != 0 { 0o755 } else { 0o644 }
}

fn unzip_to_dir_with_limits(
    zip_path: &Path,
    dest_dir: &Path,
    limits: ZipExtractionLimits,
) -> Result<(), SourceError> {
    let file = File::open(zip_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|err| SourceError::Zip(err.to_string()))?;
    let entry_count = archive.len();
    if entry_count > limits.max_entries {
        return Err(SourceError::Archive(format!(
            "{entry_count} entries, limit is {}",
            limits.max_entries
        )));
    }
    let mut total_uncompressed: u64 = 0;
    for i in 0..entry_count {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| SourceError::Zip(err.to_string()))?;
        let uncompressed_size = entry.size();
        if uncompressed_size > limits.max_entry_uncompressed_bytes {
            return Err(SourceError::Archive(format!(
                "entry '{}' is too large ({} bytes, limit {})",
                entry.name(),
                uncompressed_size,
                limits.max_entry_uncompressed_bytes
            )));
        }
        if uncompressed_size > 0 {
            let compressed_size = entry.compressed_size();
            if compressed_size == 0
                || uncompressed_size > compressed_size.saturating_mul(limits.max_compression_ratio)
            {
                return Err(SourceError::Archive(format!(
                    "entry '{}' exceeds compression ratio limit",
                    entry.name()
                )));
            }
        }
        total_uncompressed = total_uncompressed
            .checked_add(uncompressed_size)
            .ok_or_else(|| SourceError::Archive("size overflow".into()))?;
        if total_uncompressed > limits.max_total_uncompressed_bytes {
            return Err(SourceError::Archive(format!(
                "extracted size {} exceeds limit {}",
                total_uncompressed, limits.max_total_uncompressed_bytes
            )));
        }
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "skipping archive entry outside destination");
            continue;
        };
        let outpath = dest_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(safe_unix_file_mode(mode)))?;
            }
        }
    }
    Ok(())
}
