use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::platform::Pointer;
use crate::types::ClickPoint;
use crate::logger;
use crate::sleep;

pub const DEFAULT_MACRO_FILE: &str = "macros.json";
pub const DEFAULT_PLAY_PAUSE: Duration = Duration::from_secs(3);

/// Named click sequences, stored as `{ "name": [[x, y], ...] }`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacroBook {
    macros: BTreeMap<String, Vec<ClickPoint>>,
}

impl MacroBook {
    /// A missing file is an empty book; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    /// Add or replace a macro.
    pub fn insert(&mut self, name: &str, points: Vec<ClickPoint>) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("macro name must not be empty");
        }
        if points.is_empty() {
            bail!("macro '{}' needs at least one click", name);
        }
        self.macros.insert(name.to_string(), points);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<ClickPoint>> {
        self.macros.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&[ClickPoint]> {
        self.macros.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Click `points` in order, pausing between clicks. Stops early once
/// `cancel` is set. Returns how many clicks succeeded.
pub fn play(points: &[ClickPoint], pointer: &mut dyn Pointer, pause: Duration, cancel: &AtomicBool) -> usize {
    let mut done = 0;
    for (i, p) in points.iter().enumerate() {
        if cancel.load(Ordering::Acquire) {
            logger::warn_p("macro", "playback cancelled");
            break;
        }
        match pointer.click(p.x, p.y) {
            Ok(()) => {
                done += 1;
                logger::info_p("macro", &format!("click {}/{} at ({}, {})", i + 1, points.len(), p.x, p.y));
            }
            Err(e) => logger::error_p("macro", &format!("click at ({}, {}) failed: {:#}", p.x, p.y, e)),
        }
        if i + 1 < points.len() {
            sleep::sleep_until_cancelled(cancel, pause);
        }
    }
    done
}
