//! Persistence of normalized images for debugging

use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Save `image` as PNG under `dir` and return the path.
///
/// Names carry a millisecond timestamp and a random suffix, so concurrent
/// invocations never write to the same file.
pub fn persist(dir: &Path, image: &DynamicImage) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let file = tempfile::Builder::new()
        .prefix(&format!("captcha_{}_", millis))
        .suffix(".png")
        .tempfile_in(dir)?;

    image
        .save_with_format(file.path(), ImageFormat::Png)
        .map_err(std::io::Error::other)?;

    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_persist_writes_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 4, Luma([200])));

        let first = persist(dir.path(), &img).unwrap();
        let second = persist(dir.path(), &img).unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with(dir.path()));
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("png"));

        let reloaded = image::open(&second).unwrap();
        assert_eq!(reloaded.width(), 8);
    }

    #[test]
    fn test_persist_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("debug").join("captchas");
        let img = DynamicImage::ImageLuma8(GrayImage::new(2, 2));

        let path = persist(&nested, &img).unwrap();
        assert!(path.exists());
    }
}
