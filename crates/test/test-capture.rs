//! Live capture checks against the real desktop backend.
//! Set SCREENSPY_STUB=1 to run them against the stub platform.

use libtest_mimic::{Arguments, Failed, Trial};

use screenspy_core::platform::create_platform;
use screenspy_core::screenshot::ScreenshotTaker;
use screenspy_core::types::Region;

fn force_stub() -> bool {
    std::env::var_os("SCREENSPY_STUB").is_some()
}

fn capture_region_size() -> Result<(), Failed> {
    let mut platform = create_platform(force_stub());
    let rect = Region::new(10, 10, 210, 110);
    let img = platform.screen.capture(rect)?;
    if img.dimensions() != (200, 100) {
        return Err(format!("expected 200x100, got {:?}", img.dimensions()).into());
    }
    Ok(())
}

fn inverted_region_is_normalized() -> Result<(), Failed> {
    let mut platform = create_platform(force_stub());
    let img = platform.screen.capture(Region::new(120, 80, 20, 30))?;
    if img.dimensions() != (100, 50) {
        return Err(format!("expected 100x50, got {:?}", img.dimensions()).into());
    }
    Ok(())
}

fn empty_region_fails() -> Result<(), Failed> {
    let mut platform = create_platform(force_stub());
    match platform.screen.capture(Region::new(5, 5, 5, 50)) {
        Ok(_) => Err("capturing a zero-width region should fail".into()),
        Err(_) => Ok(()),
    }
}

fn screenshot_file_round_trip() -> Result<(), Failed> {
    let dir = tempfile::tempdir()?;
    let platform = create_platform(force_stub());
    let mut taker = ScreenshotTaker::new(platform.screen, dir.path());
    for index in 0..2 {
        let path = taker.capture_to_file(index, Region::new(0, 0, 64, 48))?;
        let decoded = image::open(&path)?;
        if (decoded.width(), decoded.height()) != (64, 48) {
            return Err(format!("{} has wrong size", path.display()).into());
        }
    }
    Ok(())
}

fn pointer_reports_screen() -> Result<(), Failed> {
    let platform = create_platform(force_stub());
    match platform.pointer.screen_size() {
        Some((w, h)) if w > 0 && h > 0 => Ok(()),
        other => Err(format!("unexpected screen size {:?}", other).into()),
    }
}

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        Trial::test("capture_region_size", capture_region_size),
        Trial::test("inverted_region_is_normalized", inverted_region_is_normalized),
        Trial::test("empty_region_fails", empty_region_fails),
        Trial::test("screenshot_file_round_trip", screenshot_file_round_trip),
        Trial::test("pointer_reports_screen", pointer_reports_screen),
    ];
    libtest_mimic::run(&args, tests).exit();
}
