use std::time::Duration;

use anyhow::{bail, Result};

use crate::platform::Pointer;
use crate::types::{ClickPoint, ClickTarget};
use crate::logger;

pub const DEFAULT_CLICK_PAUSE: Duration = Duration::from_secs(2);

/// Fires the per-region click sequences.
pub struct Clicker {
    pointer: Box<dyn Pointer>,
    targets: Vec<ClickTarget>,
    pause: Duration,
    vertical_shift: i32,
}

impl Clicker {
    pub fn new(pointer: Box<dyn Pointer>, targets: Vec<ClickTarget>) -> Self {
        Self {
            pointer,
            targets,
            pause: DEFAULT_CLICK_PAUSE,
            vertical_shift: 0,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn set_vertical_shift(&mut self, shift: i32) {
        self.vertical_shift = shift;
    }

    pub fn vertical_shift(&self) -> i32 {
        self.vertical_shift
    }

    pub fn targets(&self, index: usize) -> &[ClickPoint] {
        self.targets.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Where a point actually lands: the shift applies to every region but 0.
    pub fn effective_point(&self, index: usize, point: ClickPoint) -> ClickPoint {
        if index > 0 {
            point.shifted(self.vertical_shift)
        } else {
            point
        }
    }

    /// Click every target of `index` in order, pausing between clicks.
    /// Failures are logged and reported as `false`.
    pub fn click_region(&mut self, index: usize) -> bool {
        let points: Vec<ClickPoint> = self
            .targets(index)
            .iter()
            .map(|&p| self.effective_point(index, p))
            .collect();

        for (n, point) in points.iter().enumerate() {
            if let Err(e) = self.click_once(*point) {
                logger::error_p("click", &format!("region {} click {}: {:#}", index, n, e));
                return false;
            }
            if n + 1 < points.len() {
                std::thread::sleep(self.pause);
            }
        }
        if !points.is_empty() {
            logger::info_p("click", &format!("region {}: {} click(s) done", index, points.len()));
        }
        true
    }

    fn click_once(&mut self, point: ClickPoint) -> Result<()> {
        if point.x < 0 || point.y < 0 {
            bail!("coordinates must be non-negative, got ({}, {})", point.x, point.y);
        }
        self.pointer.click(point.x, point.y)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Pointer that records every click and can be told to fail.
    #[derive(Clone, Default)]
    pub struct RecordingPointer {
        pub clicks: Arc<Mutex<Vec<(i32, i32)>>>,
        pub fail: bool,
    }

    impl Pointer for RecordingPointer {
        fn click(&mut self, x: i32, y: i32) -> Result<()> {
            if self.fail {
                bail!("input backend unavailable");
            }
            self.clicks.lock().unwrap().push((x, y));
            Ok(())
        }

        fn screen_size(&self) -> Option<(u32, u32)> {
            Some((1920, 1080))
        }
    }

    fn targets() -> Vec<ClickTarget> {
        vec![
            vec![ClickPoint::new(5, 5)],
            vec![ClickPoint::new(100, 200), ClickPoint::new(110, 210)],
            vec![],
        ]
    }

    #[test]
    fn clicks_in_order_with_shift_on_later_regions() {
        let pointer = RecordingPointer::default();
        let mut clicker = Clicker::new(Box::new(pointer.clone()), targets()).with_pause(Duration::ZERO);
        clicker.set_vertical_shift(-23);
        assert!(clicker.click_region(1));
        assert_eq!(*pointer.clicks.lock().unwrap(), vec![(100, 177), (110, 187)]);
    }

    #[test]
    fn region_zero_is_never_shifted() {
        let pointer = RecordingPointer::default();
        let mut clicker = Clicker::new(Box::new(pointer.clone()), targets()).with_pause(Duration::ZERO);
        clicker.set_vertical_shift(-23);
        assert!(clicker.click_region(0));
        assert_eq!(*pointer.clicks.lock().unwrap(), vec![(5, 5)]);
    }

    #[test]
    fn empty_target_list_succeeds_without_input() {
        let pointer = RecordingPointer { fail: true, ..Default::default() };
        let mut clicker = Clicker::new(Box::new(pointer.clone()), targets());
        assert!(clicker.click_region(2));
        assert!(clicker.click_region(9));
        assert!(pointer.clicks.lock().unwrap().is_empty());
    }

    #[test]
    fn input_failure_reports_false() {
        let pointer = RecordingPointer { fail: true, ..Default::default() };
        let mut clicker = Clicker::new(Box::new(pointer), targets()).with_pause(Duration::ZERO);
        assert!(!clicker.click_region(1));
    }

    #[test]
    fn negative_target_after_shift_fails() {
        let pointer = RecordingPointer::default();
        let targets = vec![vec![], vec![ClickPoint::new(10, 10)]];
        let mut clicker = Clicker::new(Box::new(pointer.clone()), targets);
        clicker.set_vertical_shift(-23);
        assert!(!clicker.click_region(1));
        assert!(pointer.clicks.lock().unwrap().is_empty());
    }

    #[test]
    fn pauses_between_but_not_after_clicks() {
        let pointer = RecordingPointer::default();
        let mut clicker =
            Clicker::new(Box::new(pointer), targets()).with_pause(Duration::from_millis(300));
        let start = std::time::Instant::now();
        assert!(clicker.click_region(1));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(600));
    }
}
