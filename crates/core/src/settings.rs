use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cycle::{RetryPolicy, Timing, Watch, DEFAULT_ERROR_BACKOFF, DEFAULT_INTERVAL};
use crate::clicker::DEFAULT_CLICK_PAUSE;
use crate::agent::DEFAULT_STOP_TIMEOUT;
use crate::error::ConfigError;
use crate::state::DEFAULT_HISTORY_LIMIT;
use crate::types::{ClickPoint, ClickTarget, Region};
use crate::vision::{DEFAULT_MODEL, DEFAULT_TIMEOUT};

pub const DEFAULT_CONFIG_FILE: &str = "screen_spy_config.json";

const DEFAULT_PHRASES: [&str; 4] = ["new chat", "reject accept", "resume the", "try again"];

/// Which analyzer answers "is the phrase in this region".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    #[default]
    Vision,
    Ocr,
}

/// One watched rectangle with its question and click sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSettings {
    pub rect: Region,
    pub phrase: String,
    #[serde(default)]
    pub clicks: Vec<ClickPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub regions: Vec<RegionSettings>,
    /// Seconds between cycles.
    pub interval: f64,
    pub model: String,
    pub api_base: Option<String>,
    pub history_limit: usize,
    pub error_backoff: f64,
    pub click_pause: f64,
    pub stop_timeout: f64,
    pub request_timeout: f64,
    pub screenshot_dir: PathBuf,
    /// `None` retries failed cycles forever.
    pub max_consecutive_failures: Option<u32>,
    pub analyzer: AnalyzerKind,
    pub ocr_command: PathBuf,
    pub ocr_language: String,
}

fn default_regions() -> Vec<RegionSettings> {
    DEFAULT_PHRASES
        .iter()
        .enumerate()
        .map(|(i, phrase)| {
            let top = 100 + 200 * i as i32;
            let rect = Region::new(0, top, 400, top + 40);
            let clicks = if i == 0 { vec![] } else { vec![rect.center()] };
            RegionSettings { rect, phrase: phrase.to_string(), clicks }
        })
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            interval: DEFAULT_INTERVAL.as_secs_f64(),
            model: DEFAULT_MODEL.to_string(),
            api_base: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            error_backoff: DEFAULT_ERROR_BACKOFF.as_secs_f64(),
            click_pause: DEFAULT_CLICK_PAUSE.as_secs_f64(),
            stop_timeout: DEFAULT_STOP_TIMEOUT.as_secs_f64(),
            request_timeout: DEFAULT_TIMEOUT.as_secs_f64(),
            screenshot_dir: PathBuf::from("screenshots"),
            max_consecutive_failures: None,
            analyzer: AnalyzerKind::Vision,
            ocr_command: PathBuf::from("tesseract"),
            ocr_language: "eng".to_string(),
        }
    }
}

/// Seconds to a duration, falling back when the value is negative or not finite.
fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

impl Settings {
    /// Missing or unreadable files give defaults, as do missing fields.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn watches(&self) -> Result<Vec<Watch>, ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        Ok(self
            .regions
            .iter()
            .map(|r| Watch { region: r.rect, phrase: r.phrase.clone() })
            .collect())
    }

    pub fn targets(&self) -> Vec<ClickTarget> {
        self.regions.iter().map(|r| r.clicks.clone()).collect()
    }

    pub fn timing(&self) -> Result<Timing, ConfigError> {
        Timing::new(self.interval, secs(self.error_backoff, DEFAULT_ERROR_BACKOFF))
    }

    pub fn retry(&self) -> RetryPolicy {
        match self.max_consecutive_failures {
            Some(n) if n > 0 => RetryPolicy::Bounded { max_consecutive_failures: n },
            _ => RetryPolicy::Forever,
        }
    }

    pub fn click_pause(&self) -> Duration {
        secs(self.click_pause, DEFAULT_CLICK_PAUSE)
    }

    pub fn stop_timeout(&self) -> Duration {
        secs(self.stop_timeout, DEFAULT_STOP_TIMEOUT)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout, DEFAULT_TIMEOUT)
    }

    #[cfg(feature = "ocr")]
    pub fn ocr_options(&self) -> crate::ocr::OcrOptions {
        crate::ocr::OcrOptions {
            command: self.ocr_command.clone(),
            language: self.ocr_language.clone(),
            ..Default::default()
        }
    }

    /// Step the interval by `delta` seconds, never below one second.
    pub fn adjust_interval(&mut self, delta: f64) {
        self.interval = (self.interval + delta).max(1.0);
    }
}
