use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};

/// Write `images/`, `labels/` and `LICENSE.txt` under `root`.
///
/// Each sample is `(stem, class ids present in its mask)`.
pub fn write_dataset(root: &Path, samples: &[(String, Vec<u8>)]) {
    fs::create_dir_all(root.join("images")).expect("images dir");
    fs::create_dir_all(root.join("labels")).expect("labels dir");
    fs::write(root.join("LICENSE.txt"), b"CC BY-NC-SA 4.0").expect("license");
    for (stem, ids) in samples {
        fs::write(root.join("images").join(format!("{stem}.jpg")), stem.as_bytes())
            .expect("image");
        let mut mask = GrayImage::new(4, 4);
        for (i, id) in ids.iter().enumerate() {
            mask.put_pixel((i % 4) as u32, (i / 4) as u32, Luma([*id]));
        }
        mask.save(root.join("labels").join(format!("{stem}_mask.png")))
            .expect("mask");
    }
}

/// Samples spread over `groups` sequences; every third carries a bicycle.
pub fn synthetic_samples(count: usize, groups: usize) -> Vec<(String, Vec<u8>)> {
    (0..count)
        .map(|i| {
            let stem = format!("seq{:02}-{i:04}", i % groups);
            let ids = if i % 3 == 0 { vec![0, 1, 6] } else { vec![0, 1] };
            (stem, ids)
        })
        .collect()
}
