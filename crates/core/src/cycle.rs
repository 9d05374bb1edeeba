use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::clicker::Clicker;
use crate::error::ConfigError;
use crate::screenshot::ScreenshotTaker;
use crate::state::AgentState;
use crate::types::{CycleReport, Region, RegionReport};
use crate::vision::Analyzer;
use crate::logger;
use crate::sleep;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What the loop does after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Back off and retry with no upper bound.
    Forever,
    /// Stop the loop after this many failures in a row.
    Bounded { max_consecutive_failures: u32 },
}

/// Validated timing for the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub interval: Duration,
    pub error_backoff: Duration,
}

impl Timing {
    /// `interval_secs` must be strictly positive.
    pub fn new(interval_secs: f64, error_backoff: Duration) -> Result<Self, ConfigError> {
        if !(interval_secs > 0.0) || !interval_secs.is_finite() {
            return Err(ConfigError::InvalidInterval(interval_secs));
        }
        Ok(Self {
            interval: Duration::from_secs_f64(interval_secs),
            error_backoff,
        })
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self { interval: DEFAULT_INTERVAL, error_backoff: DEFAULT_ERROR_BACKOFF }
    }
}

/// One watched region: where to look and what to ask about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
    pub region: Region,
    pub phrase: String,
}

/// Capture, ask, record and click over every region, once per tick.
pub struct DetectionCycle {
    watches: Vec<Watch>,
    taker: ScreenshotTaker,
    analyzer: Box<dyn Analyzer>,
    clicker: Clicker,
    state: Arc<Mutex<AgentState>>,
    timing: Timing,
    retry: RetryPolicy,
}

impl DetectionCycle {
    pub fn new(
        watches: Vec<Watch>,
        taker: ScreenshotTaker,
        analyzer: Box<dyn Analyzer>,
        clicker: Clicker,
        state: Arc<Mutex<AgentState>>,
        timing: Timing,
    ) -> Result<Self, ConfigError> {
        if watches.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        let tracked = lock(&state).num_regions();
        if tracked != watches.len() {
            return Err(ConfigError::PhraseCountMismatch { regions: tracked, phrases: watches.len() });
        }
        Ok(Self {
            watches,
            taker,
            analyzer,
            clicker,
            state,
            timing,
            retry: RetryPolicy::Forever,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> Arc<Mutex<AgentState>> {
        Arc::clone(&self.state)
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Capture rectangle for region `index` under the current shift.
    pub fn effective_rect(&self, index: usize) -> Region {
        let region = self.watches[index].region;
        if index > 0 {
            region.shifted(self.clicker.vertical_shift())
        } else {
            region
        }
    }

    /// Run a single pass over all regions. Any error aborts the pass.
    /// Clicks are skipped once `running` is cleared.
    pub fn run_cycle(&mut self, running: &AtomicBool) -> Result<CycleReport> {
        let mut reports = Vec::with_capacity(self.watches.len());

        for index in 0..self.watches.len() {
            let rect = self.effective_rect(index);
            let path = self
                .taker
                .capture_to_file(index, rect)
                .with_context(|| format!("region {} capture", index))?;
            lock(&self.state).set_current_screenshot(index, path.to_string_lossy())?;

            let phrase = &self.watches[index].phrase;
            let detected = self
                .analyzer
                .detect(&path, phrase)
                .with_context(|| format!("region {} detection", index))?;
            let shift = {
                let mut state = lock(&self.state);
                state.update_detection(index, detected)?;
                state.vertical_shift()
            };

            let mut clicked = None;
            if index == 0 {
                self.clicker.set_vertical_shift(shift);
            } else if detected && !running.load(Ordering::Acquire) {
                logger::warn_p("click", &format!("region {}: stopped, click skipped", index));
            } else if detected {
                let ok = self.clicker.click_region(index);
                lock(&self.state).update_action(ok);
                clicked = Some(ok);
            }

            reports.push(RegionReport { index, rect, detected, clicked });
        }

        let mut state = lock(&self.state);
        state.finish_cycle();
        Ok(CycleReport { regions: reports, vertical_shift: state.vertical_shift() })
    }

    /// Loop until `running` is cleared (or the retry policy gives up).
    pub fn run(&mut self, running: &AtomicBool) {
        logger::info_p("cycle", &format!(
            "agent started: {} region(s), interval {:?}",
            self.watches.len(),
            self.timing.interval
        ));
        let mut failures: u32 = 0;

        while running.load(Ordering::Acquire) {
            match self.run_cycle(running) {
                Ok(report) => {
                    failures = 0;
                    let hits: Vec<usize> = report
                        .regions
                        .iter()
                        .filter(|r| r.detected)
                        .map(|r| r.index)
                        .collect();
                    logger::info_p("cycle", &format!(
                        "cycle done: detected {:?}, shift {}",
                        hits, report.vertical_shift
                    ));
                    if !sleep::sleep_while(running, self.timing.interval) {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    logger::error_p("cycle", &format!("cycle failed ({} in a row): {:#}", failures, e));
                    if let RetryPolicy::Bounded { max_consecutive_failures } = self.retry {
                        if failures >= max_consecutive_failures {
                            logger::error_p("cycle", "giving up after repeated failures");
                            running.store(false, Ordering::Release);
                            break;
                        }
                    }
                    sleep::sleep_while(running, self.timing.error_backoff);
                }
            }
        }
        logger::info_p("cycle", "agent stopped");
    }
}

fn lock(state: &Mutex<AgentState>) -> std::sync::MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;

    use anyhow::bail;
    use image::RgbaImage;

    use crate::clicker::tests::RecordingPointer;
    use crate::platform::Screen;
    use crate::types::ClickPoint;

    /// Screen that records every requested rectangle.
    #[derive(Clone, Default)]
    pub struct RecordingScreen {
        pub rects: Arc<Mutex<Vec<Region>>>,
    }

    impl Screen for RecordingScreen {
        fn capture(&mut self, rect: Region) -> Result<RgbaImage> {
            self.rects.lock().unwrap().push(rect);
            Ok(RgbaImage::new(rect.width().max(1), rect.height().max(1)))
        }
    }

    /// Analyzer answering from a queue; `None` entries fail the call.
    pub struct ScriptedAnalyzer {
        pub answers: VecDeque<Option<bool>>,
        pub phrases: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedAnalyzer {
        pub fn new(answers: impl IntoIterator<Item = Option<bool>>) -> Self {
            Self { answers: answers.into_iter().collect(), phrases: Arc::default() }
        }
    }

    impl Analyzer for ScriptedAnalyzer {
        fn detect(&mut self, _image: &Path, phrase: &str) -> Result<bool> {
            self.phrases.lock().unwrap().push(phrase.to_string());
            match self.answers.pop_front() {
                Some(Some(answer)) => Ok(answer),
                Some(None) => bail!("API unavailable"),
                None => bail!("script exhausted"),
            }
        }
    }

    static RUNNING: AtomicBool = AtomicBool::new(true);

    const PHRASES: [&str; 4] = ["new chat", "reject accept", "resume the", "try again"];

    fn regions() -> Vec<Region> {
        vec![
            Region::new(0, 100, 200, 130),
            Region::new(0, 300, 200, 330),
            Region::new(0, 500, 200, 530),
            Region::new(0, 700, 200, 730),
        ]
    }

    struct Rig {
        cycle: DetectionCycle,
        screen: RecordingScreen,
        pointer: RecordingPointer,
        phrases: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    fn rig(answers: Vec<Option<bool>>) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let screen = RecordingScreen::default();
        let pointer = RecordingPointer::default();
        let analyzer = ScriptedAnalyzer::new(answers);
        let phrases = Arc::clone(&analyzer.phrases);
        let targets = regions().iter().map(|r| vec![r.center()]).collect();
        let watches = regions()
            .into_iter()
            .zip(PHRASES)
            .map(|(region, phrase)| Watch { region, phrase: phrase.to_string() })
            .collect();
        let cycle = DetectionCycle::new(
            watches,
            ScreenshotTaker::new(Box::new(screen.clone()), dir.path()),
            Box::new(analyzer),
            Clicker::new(Box::new(pointer.clone()), targets).with_pause(Duration::ZERO),
            Arc::new(Mutex::new(AgentState::new(4, 100).unwrap())),
            Timing::new(0.05, Duration::from_millis(10)).unwrap(),
        )
        .unwrap();
        Rig { cycle, screen, pointer, phrases, _dir: dir }
    }

    fn cycles(answers: &[[bool; 4]]) -> Vec<Option<bool>> {
        answers.iter().flat_map(|c| c.iter().map(|&a| Some(a))).collect()
    }

    #[test]
    fn interval_must_be_positive() {
        assert_eq!(Timing::new(0.0, DEFAULT_ERROR_BACKOFF), Err(ConfigError::InvalidInterval(0.0)));
        assert_eq!(Timing::new(-3.0, DEFAULT_ERROR_BACKOFF), Err(ConfigError::InvalidInterval(-3.0)));
        assert!(Timing::new(f64::NAN, DEFAULT_ERROR_BACKOFF).is_err());
        assert_eq!(Timing::new(15.0, DEFAULT_ERROR_BACKOFF).unwrap().interval, Duration::from_secs(15));
    }

    #[test]
    fn region_count_must_match_state() {
        let dir = tempfile::tempdir().unwrap();
        let err = DetectionCycle::new(
            vec![Watch { region: Region::new(0, 0, 10, 10), phrase: "x".into() }],
            ScreenshotTaker::new(Box::new(RecordingScreen::default()), dir.path()),
            Box::new(ScriptedAnalyzer::new([])),
            Clicker::new(Box::new(RecordingPointer::default()), vec![]),
            Arc::new(Mutex::new(AgentState::new(4, 100).unwrap())),
            Timing::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err, ConfigError::PhraseCountMismatch { regions: 4, phrases: 1 });
    }

    #[test]
    fn four_region_scenario() {
        let mut rig = rig(cycles(&[
            [false, true, false, false],
            [true, false, false, false],
            [true, false, false, false],
        ]));

        // Cycle 1: only region 1 fires.
        let report = rig.cycle.run_cycle(&RUNNING).unwrap();
        assert_eq!(report.vertical_shift, 0);
        assert_eq!(report.regions[1].clicked, Some(true));
        assert!(report.regions.iter().filter(|r| r.index != 1).all(|r| r.clicked.is_none()));
        {
            let state = rig.cycle.state();
            let state = state.lock().unwrap();
            assert!(state.should_click());
            assert_eq!(state.vertical_shift(), 0);
            assert_eq!(state.action_history().iter().copied().collect::<Vec<_>>(), vec![true]);
        }
        assert_eq!(*rig.pointer.clicks.lock().unwrap(), vec![(100, 315)]);

        // Cycle 2: only region 0 fires; nothing is clicked.
        let report = rig.cycle.run_cycle(&RUNNING).unwrap();
        assert_eq!(report.vertical_shift, -23);
        assert!(report.regions.iter().all(|r| r.clicked.is_none()));
        assert_eq!(rig.pointer.clicks.lock().unwrap().len(), 1);
        assert!(!rig.cycle.state().lock().unwrap().should_click());

        // While region 0 keeps firing, later regions are captured 23px higher.
        rig.cycle.run_cycle(&RUNNING).unwrap();
        let rects = rig.screen.rects.lock().unwrap();
        for cycle in [&rects[4..8], &rects[8..12]] {
            assert_eq!(cycle[0], regions()[0]);
            for i in 1..4 {
                assert_eq!(cycle[i], regions()[i].shifted(-23));
            }
        }
        assert_eq!(rects[1], regions()[1]);

        let asked = rig.phrases.lock().unwrap();
        assert_eq!(&asked[..4], &PHRASES);
        assert_eq!(rig.cycle.state().lock().unwrap().detection_history().len(), 3);
    }

    #[test]
    fn shift_applies_within_the_same_cycle() {
        let mut rig = rig(cycles(&[[true, false, true, false]]));
        let report = rig.cycle.run_cycle(&RUNNING).unwrap();
        assert_eq!(report.regions[0].rect, regions()[0]);
        assert_eq!(report.regions[2].rect, regions()[2].shifted(-23));
        // Click target is the region centre, shifted too.
        let expected = regions()[2].center();
        assert_eq!(
            *rig.pointer.clicks.lock().unwrap(),
            vec![(expected.x, expected.y - 23)]
        );
    }

    #[test]
    fn shift_resets_when_region_zero_clears() {
        let mut rig = rig(cycles(&[[true, false, false, false], [false, false, false, true]]));
        rig.cycle.run_cycle(&RUNNING).unwrap();
        let report = rig.cycle.run_cycle(&RUNNING).unwrap();
        assert_eq!(report.vertical_shift, 0);
        assert_eq!(report.regions[3].rect, regions()[3]);
        let c = regions()[3].center();
        assert_eq!(*rig.pointer.clicks.lock().unwrap(), vec![(c.x, c.y)]);
    }

    #[test]
    fn cleared_flag_skips_clicks() {
        let mut rig = rig(cycles(&[[false, true, true, true]]));
        let stopped = AtomicBool::new(false);
        let report = rig.cycle.run_cycle(&stopped).unwrap();
        assert!(report.regions.iter().all(|r| r.clicked.is_none()));
        assert!(rig.pointer.clicks.lock().unwrap().is_empty());
        let state = rig.cycle.state();
        let state = state.lock().unwrap();
        assert!(state.action_history().is_empty());
        assert_eq!(state.detection_results(), vec![false, true, true, true]);
    }

    #[test]
    fn api_error_aborts_cycle() {
        let mut rig = rig(vec![Some(false), None]);
        let err = rig.cycle.run_cycle(&RUNNING).unwrap_err();
        assert!(format!("{:#}", err).contains("region 1 detection"));
        assert_eq!(rig.screen.rects.lock().unwrap().len(), 2);
        assert_eq!(rig.cycle.state().lock().unwrap().cycles(), 0);
    }

    #[test]
    fn screenshot_paths_are_recorded() {
        let mut rig = rig(cycles(&[[false; 4]]));
        rig.cycle.run_cycle(&RUNNING).unwrap();
        let state = rig.cycle.state();
        let state = state.lock().unwrap();
        for (i, path) in state.current_screenshots().iter().enumerate() {
            assert!(path.ends_with(&format!("current_screenshot_{}.jpg", i)), "{}", path);
        }
    }

    #[test]
    fn loop_retries_after_failure_and_stops_on_flag() {
        // First cycle fails at region 0, second succeeds, then the script runs dry.
        let mut answers = vec![None];
        answers.extend(cycles(&[[false, false, true, false]]));
        let mut rig = rig(answers);
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.store(false, Ordering::Release);
        });
        rig.cycle.run(&running);
        stopper.join().unwrap();

        assert!(!running.load(Ordering::Acquire));
        assert_eq!(rig.cycle.state().lock().unwrap().cycles(), 1);
        assert_eq!(rig.pointer.clicks.lock().unwrap().len(), 1);
    }

    #[test]
    fn bounded_retry_gives_up() {
        let rig = rig(vec![None, None, None, None]);
        let mut cycle = rig.cycle.with_retry(RetryPolicy::Bounded { max_consecutive_failures: 2 });
        let running = AtomicBool::new(true);
        cycle.run(&running);
        assert!(!running.load(Ordering::Acquire));
        assert_eq!(cycle.state().lock().unwrap().cycles(), 0);
    }

    #[test]
    fn region_without_clicks_records_success() {
        let dir = tempfile::tempdir().unwrap();
        let pointer = RecordingPointer { fail: true, ..Default::default() };
        let watches = vec![
            Watch { region: Region::new(0, 0, 10, 10), phrase: "a".into() },
            Watch { region: Region::new(0, 20, 10, 30), phrase: "b".into() },
        ];
        let mut cycle = DetectionCycle::new(
            watches,
            ScreenshotTaker::new(Box::new(RecordingScreen::default()), dir.path()),
            Box::new(ScriptedAnalyzer::new([Some(false), Some(true)])),
            Clicker::new(Box::new(pointer.clone()), vec![vec![ClickPoint::new(1, 1)], vec![]]),
            Arc::new(Mutex::new(AgentState::new(2, 10).unwrap())),
            Timing::default(),
        )
        .unwrap();
        let report = cycle.run_cycle(&RUNNING).unwrap();
        assert_eq!(report.regions[1].clicked, Some(true));
        assert!(pointer.clicks.lock().unwrap().is_empty());
    }
}
