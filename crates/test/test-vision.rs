//! Round trips against a live OpenAI-compatible endpoint. Ignored unless
//! OPENAI_API_KEY is set; OPENAI_API_BASE and OPENAI_MODEL are honored.

use image::{DynamicImage, Rgb, RgbImage};
use libtest_mimic::{Arguments, Failed, Trial};

use screenspy_core::screenshot::save_jpeg;
use screenspy_core::vision::{Analyzer, ApiConfig, OpenAiAnalyzer, DEFAULT_MODEL};

fn analyzer() -> Result<OpenAiAnalyzer, Failed> {
    let base = std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
    let config = ApiConfig::new(std::env::var("OPENAI_API_KEY").ok(), Some(base), &model)?;
    Ok(OpenAiAnalyzer::new(config)?)
}

fn connection() -> Result<(), Failed> {
    analyzer()?.test_connection()?;
    Ok(())
}

fn blank_image_has_no_text() -> Result<(), Failed> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blank.jpg");
    let img = RgbImage::from_pixel(320, 80, Rgb([255, 255, 255]));
    save_jpeg(DynamicImage::ImageRgb8(img), &path)?;

    if analyzer()?.detect(&path, "try again")? {
        return Err("model reported text on a blank image".into());
    }
    Ok(())
}

fn main() {
    let args = Arguments::from_args();
    let offline = std::env::var_os("OPENAI_API_KEY").is_none();
    let tests = vec![
        Trial::test("connection", connection).with_ignored_flag(offline),
        Trial::test("blank_image_has_no_text", blank_image_has_no_text).with_ignored_flag(offline),
    ];
    libtest_mimic::run(&args, tests).exit();
}
