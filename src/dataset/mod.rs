//! Image/mask segmentation dataset preparation: fetch, ingest, split.

pub mod ingest;
pub mod masks;
pub mod source;
pub mod split;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory holding the input images.
pub const IMAGES_DIR: &str = "images";
/// Directory holding the segmentation masks.
pub const LABELS_DIR: &str = "labels";
/// License file shipped with the dataset.
pub const LICENSE_FILE_NAME: &str = "LICENSE.txt";
/// Name of the EDA table inside the raw artifact.
pub const EDA_TABLE_NAME: &str = "eda_table";
/// Key column shared by every dataset table.
pub const FILE_NAME_COLUMN: &str = "File_Name";

const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp",
];

/// Image files directly inside `dir` (no recursion), sorted by file name.
pub fn list_image_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if is_image_path(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// File name as UTF-8, if it has one.
pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_only_top_level_images_in_name_order() {
        let dir = tempdir().unwrap();
        for name in ["b-2.JPG", "a-1.jpg", "notes.txt", "c-3.png"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/d-4.jpg"), b"x").unwrap();

        let names: Vec<String> = list_image_files(dir.path())
            .unwrap()
            .iter()
            .filter_map(|p| file_name_of(p))
            .collect();
        assert_eq!(names, ["a-1.jpg", "b-2.JPG", "c-3.png"]);
    }
}
