//! Capture backend that replays a saved screenshot.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;

use super::region::{crop_region, AbsoluteRect};
use super::ScreenCapture;
use crate::error::ExtractError;

/// Treats a full-screen image on disk as the screen.
pub struct ImageFileCapture {
    path: PathBuf,
    frame: RgbImage,
}

impl ImageFileCapture {
    pub fn open(path: &Path) -> Result<Self> {
        let frame = image::open(path)
            .with_context(|| format!("Failed to load capture image {}", path.display()))?
            .to_rgb8();
        info!(
            "Replaying {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(Self::from_image(path.to_path_buf(), frame))
    }

    pub fn from_image(path: PathBuf, frame: RgbImage) -> Self {
        Self { path, frame }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScreenCapture for ImageFileCapture {
    fn screen_size(&mut self) -> Result<(u32, u32), ExtractError> {
        Ok(self.frame.dimensions())
    }

    fn capture(&mut self, rect: AbsoluteRect) -> Result<RgbImage, ExtractError> {
        crop_region(&self.frame, rect)
    }

    fn name(&self) -> &str {
        "image_file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    #[test]
    fn test_replays_saved_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("screen.png");
        RgbImage::from_fn(40, 30, |x, _| Rgb([x as u8, 0, 0]))
            .save(&path)
            .unwrap();

        let mut backend = ImageFileCapture::open(&path).unwrap();
        assert_eq!(backend.screen_size().unwrap(), (40, 30));
        assert_eq!(backend.path(), path.as_path());

        let crop = backend
            .capture(AbsoluteRect {
                x: 10,
                y: 5,
                width: 8,
                height: 4,
            })
            .unwrap();
        assert_eq!(crop.dimensions(), (8, 4));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([10, 0, 0]));
    }
}
