use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::ConfigError;
use crate::types::DETECTED_SHIFT;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Mutable record of one agent run over a fixed number of regions.
///
/// Region 0 only drives the vertical shift; the click decision is the OR of
/// the remaining regions.
#[derive(Debug, Clone)]
pub struct AgentState {
    num_regions: usize,
    history_limit: usize,
    current_screenshots: Vec<String>,
    detection_results: Vec<bool>,
    detection_history: VecDeque<Vec<bool>>,
    action_history: VecDeque<bool>,
    vertical_shift: i32,
    should_click: bool,
    cycles: u64,
    last_cycle_at: Option<DateTime<Local>>,
}

/// Plain serializable view of [`AgentState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub num_regions: usize,
    pub history_limit: usize,
    pub current_screenshots: Vec<String>,
    pub detection_results: Vec<bool>,
    pub detection_history: Vec<Vec<bool>>,
    pub action_history: Vec<bool>,
    pub vertical_shift: i32,
    pub should_click: bool,
    pub cycles: u64,
    pub last_cycle_at: Option<String>,
}

/// Append and evict from the front until `limit` entries remain.
fn push_bounded<T>(list: &mut VecDeque<T>, item: T, limit: usize) {
    list.push_back(item);
    while list.len() > limit {
        list.pop_front();
    }
}

impl AgentState {
    pub fn new(num_regions: usize, history_limit: usize) -> Result<Self, ConfigError> {
        if num_regions == 0 {
            return Err(ConfigError::NoRegions);
        }
        if history_limit == 0 {
            return Err(ConfigError::HistoryLimit);
        }
        Ok(Self {
            num_regions,
            history_limit,
            current_screenshots: vec![String::new(); num_regions],
            detection_results: vec![false; num_regions],
            detection_history: VecDeque::new(),
            action_history: VecDeque::new(),
            vertical_shift: 0,
            should_click: false,
            cycles: 0,
            last_cycle_at: None,
        })
    }

    fn check_index(&self, index: usize) -> Result<(), ConfigError> {
        if index >= self.num_regions {
            return Err(ConfigError::RegionIndex { index, max: self.num_regions - 1 });
        }
        Ok(())
    }

    pub fn set_current_screenshot(&mut self, index: usize, path: impl Into<String>) -> Result<(), ConfigError> {
        self.check_index(index)?;
        self.current_screenshots[index] = path.into();
        Ok(())
    }

    /// Record a detection for one region.
    ///
    /// Region 0 opens a new history row and recomputes the vertical shift;
    /// other regions fill in the latest row.
    pub fn update_detection(&mut self, index: usize, detected: bool) -> Result<(), ConfigError> {
        self.check_index(index)?;

        if index == 0 {
            self.vertical_shift = if detected { DETECTED_SHIFT } else { 0 };
            push_bounded(
                &mut self.detection_history,
                vec![false; self.num_regions],
                self.history_limit,
            );
        } else if self.detection_history.is_empty() {
            push_bounded(
                &mut self.detection_history,
                vec![false; self.num_regions],
                self.history_limit,
            );
        }

        if let Some(row) = self.detection_history.back_mut() {
            row[index] = detected;
        }
        self.detection_results[index] = detected;
        self.should_click = self.detection_results.iter().skip(1).any(|&d| d);
        Ok(())
    }

    /// Record the outcome of a click sequence.
    pub fn update_action(&mut self, success: bool) {
        push_bounded(&mut self.action_history, success, self.history_limit);
    }

    /// Mark the end of a successful cycle.
    pub fn finish_cycle(&mut self) {
        self.cycles += 1;
        self.last_cycle_at = Some(Local::now());
    }

    pub fn clear_history(&mut self) {
        self.detection_history.clear();
        self.action_history.clear();
    }

    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn vertical_shift(&self) -> i32 {
        self.vertical_shift
    }

    pub fn should_click(&self) -> bool {
        self.should_click
    }

    pub fn detection_results(&self) -> &[bool] {
        &self.detection_results
    }

    pub fn current_screenshots(&self) -> &[String] {
        &self.current_screenshots
    }

    pub fn detection_history(&self) -> &VecDeque<Vec<bool>> {
        &self.detection_history
    }

    pub fn action_history(&self) -> &VecDeque<bool> {
        &self.action_history
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Local>> {
        self.last_cycle_at
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            num_regions: self.num_regions,
            history_limit: self.history_limit,
            current_screenshots: self.current_screenshots.clone(),
            detection_results: self.detection_results.clone(),
            detection_history: self.detection_history.iter().cloned().collect(),
            action_history: self.action_history.iter().copied().collect(),
            vertical_shift: self.vertical_shift,
            should_click: self.should_click,
            cycles: self.cycles,
            last_cycle_at: self.last_cycle_at.map(|t| t.format("%H:%M:%S").to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}
