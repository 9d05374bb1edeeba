use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::platform::Screen;
use crate::types::Region;

/// Captures regions and persists each to a fixed, per-region JPEG path that
/// is overwritten every cycle.
pub struct ScreenshotTaker {
    screen: Box<dyn Screen>,
    dir: PathBuf,
}

impl ScreenshotTaker {
    pub fn new(screen: Box<dyn Screen>, dir: impl Into<PathBuf>) -> Self {
        Self { screen, dir: dir.into() }
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("current_screenshot_{}.jpg", index))
    }

    /// Capture `rect` and write it as the current screenshot for `index`.
    pub fn capture_to_file(&mut self, index: usize, rect: Region) -> Result<PathBuf> {
        let img = self.screen.capture(rect)?;
        let path = self.path_for(index);
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        save_jpeg(DynamicImage::ImageRgba8(img), &path)?;
        Ok(path)
    }
}

/// JPEG has no alpha channel, so flatten to RGB first.
pub fn save_jpeg(img: DynamicImage, path: &Path) -> Result<()> {
    DynamicImage::ImageRgb8(img.to_rgb8())
        .save_with_format(path, image::ImageFormat::Jpeg)
        .with_context(|| format!("saving {}", path.display()))
}
