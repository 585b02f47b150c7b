use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Component, Path, PathBuf},
};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::ArtifactError;

/// Compute the SHA-256 hex digest for a local file.
pub(super) fn sha256_file(path: &Path) -> Result<(String, u64), ArtifactError> {
    let mut file = File::open(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buf[..read]);
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// SHA-256 over a sorted `(entry, digest)` listing.
pub(super) fn digest_listing<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    let mut hasher = Sha256::new();
    for (name, digest) in entries {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Copy `src` to `dest`, creating parent directories.
pub(super) fn copy_file(src: &Path, dest: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest).map_err(|source| ArtifactError::Read {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Recursively list regular files under `root` as `/`-separated relative names.
pub(super) fn list_files(root: &Path) -> Result<Vec<(String, PathBuf)>, ArtifactError> {
    let mut out = Vec::new();
    collect_files(root, root, &mut out)?;
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), ArtifactError> {
    let entries = fs::read_dir(dir).map_err(|source| ArtifactError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry?;
        let ty = entry.file_type()?;
        let path = entry.path();
        if ty.is_dir() {
            collect_files(root, &path, out)?;
        } else if ty.is_file() {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            out.push((relative_name(rel), path));
        }
    }
    Ok(())
}

fn relative_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Entry names are `/`-separated, relative, and never climb out of the artifact.
pub(super) fn validate_entry_name(name: &str) -> Result<(), ArtifactError> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(ArtifactError::InvalidEntryName(name.to_string()));
    }
    Ok(())
}

/// Map an entry name onto a directory.
pub(super) fn entry_path(dir: &Path, name: &str) -> PathBuf {
    name.split('/').fold(dir.to_path_buf(), |acc, part| acc.join(part))
}

/// Write pretty JSON through a temp file in the same directory, then rename over `path`.
pub(super) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let dir = path.parent().ok_or_else(|| {
        ArtifactError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let bytes = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|err| ArtifactError::Io(err.error))?;
    Ok(())
}
