pub mod stub;

#[cfg(feature = "desktop")]
pub mod desktop;

use anyhow::Result;
use image::RgbaImage;

use crate::types::Region;
use crate::logger;

/// Grabs pixels from an absolute screen rectangle.
pub trait Screen: Send {
    fn capture(&mut self, rect: Region) -> Result<RgbaImage>;
}

/// Synthesizes mouse input at absolute screen coordinates.
pub trait Pointer: Send {
    fn click(&mut self, x: i32, y: i32) -> Result<()>;
    fn screen_size(&self) -> Option<(u32, u32)>;
}

/// The OS-facing collaborators of the detection cycle.
pub struct Platform {
    pub screen: Box<dyn Screen>,
    pub pointer: Box<dyn Pointer>,
}

/// Create the platform appropriate for the current build.
pub fn create_platform(force_stub: bool) -> Platform {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return stub::platform();
    }
    #[cfg(feature = "desktop")]
    {
        logger::register_prefix("desktop", logger::COLOR_GRAY);
        desktop::platform()
    }
    #[cfg(not(feature = "desktop"))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        logger::warn("built without the desktop feature, using stub platform");
        stub::platform()
    }
}
