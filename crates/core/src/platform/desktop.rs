use anyhow::{anyhow, bail, Context, Result};
use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};
use image::RgbaImage;
use xcap::Monitor;

use crate::types::Region;
use crate::logger;
use super::{Platform, Pointer, Screen};

pub fn platform() -> Platform {
    Platform {
        screen: Box::new(DesktopScreen),
        pointer: Box::new(DesktopPointer),
    }
}

/// Monitor origin and size in virtual-screen coordinates.
fn monitor_bounds(monitor: &Monitor) -> Result<(i32, i32, u32, u32)> {
    Ok((
        monitor.x().map_err(|e| anyhow!("monitor x: {}", e))?,
        monitor.y().map_err(|e| anyhow!("monitor y: {}", e))?,
        monitor.width().map_err(|e| anyhow!("monitor width: {}", e))?,
        monitor.height().map_err(|e| anyhow!("monitor height: {}", e))?,
    ))
}

/// Captures via xcap: find the monitor holding the rectangle's origin,
/// grab it whole, then crop.
pub struct DesktopScreen;

impl Screen for DesktopScreen {
    fn capture(&mut self, rect: Region) -> Result<RgbaImage> {
        if rect.is_empty() {
            bail!("cannot capture empty region {}", rect);
        }

        let monitors = Monitor::all().map_err(|e| anyhow!("failed to enumerate monitors: {}", e))?;
        let mut found = None;
        for monitor in monitors {
            let (mx, my, mw, mh) = monitor_bounds(&monitor)?;
            let inside = rect.x1 >= mx
                && rect.y1 >= my
                && rect.x1 < mx + mw as i32
                && rect.y1 < my + mh as i32;
            if inside {
                found = Some((monitor, mx, my, mw, mh));
                break;
            }
        }
        let (monitor, mx, my, mw, mh) =
            found.ok_or_else(|| anyhow!("no monitor contains region {}", rect))?;

        let full = monitor
            .capture_image()
            .map_err(|e| anyhow!("screen capture failed: {}", e))
            .context(format!("capturing {}", rect))?;

        // Clip to the monitor; regions spanning two screens keep the first part.
        let x = (rect.x1 - mx) as u32;
        let y = (rect.y1 - my) as u32;
        let w = rect.width().min(mw - x);
        let h = rect.height().min(mh - y);
        Ok(image::imageops::crop_imm(&full, x, y, w, h).to_image())
    }
}

/// Left-clicks via enigo. A fresh connection is opened per click so the
/// handle never crosses threads.
pub struct DesktopPointer;

impl Pointer for DesktopPointer {
    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow!("failed to open input connection: {:?}", e))?;
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| anyhow!("move to ({}, {}) failed: {:?}", x, y, e))?;
        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| anyhow!("click at ({}, {}) failed: {:?}", x, y, e))?;
        logger::info_p("desktop", &format!("clicked ({}, {})", x, y));
        Ok(())
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        let enigo = Enigo::new(&Settings::default()).ok()?;
        let (w, h) = enigo.main_display().ok()?;
        Some((w as u32, h as u32))
    }
}
