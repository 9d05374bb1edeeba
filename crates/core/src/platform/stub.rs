use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};

use crate::types::Region;
use crate::logger;
use super::{Platform, Pointer, Screen};

pub fn platform() -> Platform {
    Platform {
        screen: Box::new(StubScreen),
        pointer: Box::new(StubPointer),
    }
}

/// Returns a blank image of the requested size.
pub struct StubScreen;

impl Screen for StubScreen {
    fn capture(&mut self, rect: Region) -> Result<RgbaImage> {
        logger::info_p("stub", &format!("capture {}", rect));
        if rect.is_empty() {
            bail!("cannot capture empty region {}", rect);
        }
        Ok(RgbaImage::from_pixel(rect.width(), rect.height(), Rgba([32, 32, 32, 255])))
    }
}

/// Logs clicks instead of performing them.
pub struct StubPointer;

impl Pointer for StubPointer {
    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        logger::info_p("stub", &format!("click({}, {})", x, y));
        Ok(())
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        Some((1920, 1080))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_capture_matches_region_size() {
        let img = StubScreen.capture(Region::new(10, 10, 110, 60)).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
    }

    #[test]
    fn stub_capture_rejects_empty_region() {
        assert!(StubScreen.capture(Region::new(10, 10, 10, 60)).is_err());
    }
}
