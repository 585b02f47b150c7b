//! Class presence from segmentation masks.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use thiserror::Error;

use super::LABELS_DIR;

/// Suffix appended to an image stem to name its mask.
pub const MASK_SUFFIX: &str = "_mask.png";

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Failed to read mask {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decode mask {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to decode indexed mask {path}: {source}")]
    Png {
        path: PathBuf,
        source: png::DecodingError,
    },
    #[error("Mask {path} is {color} (expected single-channel class ids)")]
    UnsupportedFormat { path: PathBuf, color: String },
    #[error("Cannot derive a mask path for {0}")]
    NoMaskPath(PathBuf),
}

/// `<root>/images/<stem>.<ext>` -> `<root>/labels/<stem>_mask.png`.
pub fn mask_path_for(image: &Path) -> Result<PathBuf, MaskError> {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MaskError::NoMaskPath(image.to_path_buf()))?;
    let root = image
        .parent()
        .and_then(Path::parent)
        .ok_or_else(|| MaskError::NoMaskPath(image.to_path_buf()))?;
    Ok(root.join(LABELS_DIR).join(format!("{stem}{MASK_SUFFIX}")))
}

/// Decode a mask into row-major class ids.
///
/// Palette PNGs yield their raw palette indices; other masks must be
/// single-channel 8 or 16 bit.
pub fn load_mask_ids(path: &Path) -> Result<Vec<u16>, MaskError> {
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if is_png {
        if let Some(ids) = load_palette_indices(path)? {
            return Ok(ids);
        }
    }
    let reader = ImageReader::open(path).map_err(|source| MaskError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = reader.with_guessed_format().map_err(|source| MaskError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let image = reader.decode().map_err(|source| MaskError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    match image {
        DynamicImage::ImageLuma8(buf) => Ok(buf.into_raw().into_iter().map(u16::from).collect()),
        DynamicImage::ImageLuma16(buf) => Ok(buf.into_raw()),
        other => Err(MaskError::UnsupportedFormat {
            path: path.to_path_buf(),
            color: format!("{:?}", other.color()),
        }),
    }
}

/// Palette indices of an indexed PNG, or `None` for any other colour type.
fn load_palette_indices(path: &Path) -> Result<Option<Vec<u16>>, MaskError> {
    let file = File::open(path).map_err(|source| MaskError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let png_error = |source| MaskError::Png {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = png::Decoder::new(BufReader::new(file));
    // Keep indices as stored instead of expanding them through the palette.
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().map_err(png_error)?;
    if reader.info().color_type != png::ColorType::Indexed {
        return Ok(None);
    }
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf).map_err(png_error)?;
    Ok(Some(unpack_indices(
        &buf,
        frame.width as usize,
        frame.height as usize,
        frame.line_size,
        frame.bit_depth as u8,
    )))
}

/// Unpack MSB-first packed samples of `bits` width (1, 2, 4 or 8).
fn unpack_indices(buf: &[u8], width: usize, height: usize, line_size: usize, bits: u8) -> Vec<u16> {
    let bits = usize::from(bits);
    let per_byte = 8 / bits;
    let mask = (1u16 << bits) - 1;
    let mut ids = Vec::with_capacity(width * height);
    for row in buf.chunks(line_size).take(height) {
        for x in 0..width {
            let byte = u16::from(row[x / per_byte]);
            let shift = 8 - bits * (x % per_byte + 1);
            ids.push((byte >> shift) & mask);
        }
    }
    ids
}

/// Per-class presence flags, ordered by class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPresence {
    flags: Vec<(String, bool)>,
}

impl ClassPresence {
    pub fn get(&self, class_name: &str) -> Option<bool> {
        self.flags
            .iter()
            .find(|(name, _)| name == class_name)
            .map(|(_, present)| *present)
    }

    /// `(class name, 0/1)` pairs in class-id order.
    pub fn as_ints(&self) -> impl Iterator<Item = (&str, i64)> {
        self.flags
            .iter()
            .map(|(name, present)| (name.as_str(), i64::from(*present)))
    }

    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.flags
            .iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| name.as_str())
    }
}

/// Which classes of `classes` occur anywhere in `ids`.
pub fn class_presence<I>(ids: I, classes: &BTreeMap<u16, String>) -> ClassPresence
where
    I: IntoIterator<Item = u16>,
{
    let unique: HashSet<u16> = ids.into_iter().collect();
    ClassPresence {
        flags: classes
            .iter()
            .map(|(id, name)| (name.clone(), unique.contains(id)))
            .collect(),
    }
}

/// Load the mask for `image` and compute class presence.
pub fn classes_in_image(
    image: &Path,
    classes: &BTreeMap<u16, String>,
) -> Result<ClassPresence, MaskError> {
    let mask = mask_path_for(image)?;
    let ids = load_mask_ids(&mask)?;
    Ok(class_presence(ids, classes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};
    use tempfile::tempdir;

    fn classes() -> BTreeMap<u16, String> {
        [(0, "background"), (1, "road"), (6, "bicycle")]
            .into_iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect()
    }

    #[test]
    fn presence_marks_only_occurring_ids() {
        let presence = class_presence([0, 0, 6, 9, 6], &classes());
        assert_eq!(presence.get("background"), Some(true));
        assert_eq!(presence.get("road"), Some(false));
        assert_eq!(presence.get("bicycle"), Some(true));
        assert_eq!(presence.get("vehicle"), None);
        assert_eq!(
            presence.as_ints().collect::<Vec<_>>(),
            [("background", 1), ("road", 0), ("bicycle", 1)]
        );
    }

    #[test]
    fn mask_path_sits_in_sibling_labels_dir() {
        let path = mask_path_for(Path::new("/data/bdd/images/0a0a-7c39.jpg")).unwrap();
        assert_eq!(path, Path::new("/data/bdd/labels/0a0a-7c39_mask.png"));
    }

    #[test]
    fn reads_grayscale_mask_pixels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a_mask.png");
        let mut mask = GrayImage::new(4, 2);
        mask.put_pixel(3, 1, Luma([6]));
        mask.put_pixel(0, 0, Luma([1]));
        mask.save(&path).unwrap();

        let ids = load_mask_ids(&path).unwrap();
        assert_eq!(ids.len(), 8);
        let presence = class_presence(ids, &classes());
        assert_eq!(presence.present().collect::<Vec<_>>(), ["background", "road", "bicycle"]);
    }

    fn write_indexed_png(path: &Path, width: u32, depth: png::BitDepth, data: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, 1);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(depth);
        // Palette colours deliberately differ from the indices.
        encoder.set_palette(vec![
            10, 20, 30, 200, 0, 0, 0, 200, 0, 0, 0, 200, 9, 9, 9, 1, 2, 3, 4, 5, 6, 7, 8, 9,
        ]);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn palette_masks_yield_their_indices() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p_mask.png");
        write_indexed_png(&path, 4, png::BitDepth::Eight, &[0, 6, 6, 1]);
        assert_eq!(load_mask_ids(&path).unwrap(), vec![0, 6, 6, 1]);
        let presence = class_presence(load_mask_ids(&path).unwrap(), &classes());
        assert_eq!(presence.present().collect::<Vec<_>>(), ["background", "road", "bicycle"]);
    }

    #[test]
    fn packed_palette_masks_are_unpacked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packed_mask.png");
        // Three 2-bit samples 0, 1, 3 packed MSB first.
        write_indexed_png(&path, 3, png::BitDepth::Two, &[0b0001_1100]);
        assert_eq!(load_mask_ids(&path).unwrap(), vec![0, 1, 3]);
    }

    #[test]
    fn rejects_colour_masks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rgb_mask.png");
        RgbImage::new(2, 2).save(&path).unwrap();
        assert!(matches!(
            load_mask_ids(&path),
            Err(MaskError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn missing_mask_is_an_io_error() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("images/x-1.jpg");
        assert!(matches!(
            classes_in_image(&image, &classes()),
            Err(MaskError::Read { .. })
        ));
    }
}
