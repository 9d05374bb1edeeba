use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use screenspy_core::agent::Agent;
use screenspy_core::cycle::DetectionCycle;
use screenspy_core::logger;
use screenspy_core::settings::Settings;
use screenspy_core::state::AgentState;
use screenspy_core::types::AgentStatus;

use crate::confirm::ConfirmDialog;

/// Builds a fresh detection cycle from the current settings, wired to the
/// shared state.
pub type CycleFactory = Box<dyn FnMut(&Settings, Arc<Mutex<AgentState>>) -> anyhow::Result<DetectionCycle>>;

pub struct App {
    pub agent: Agent,
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
    factory: CycleFactory,
}

impl App {
    pub fn new(
        agent: Agent,
        settings: Settings,
        settings_path: PathBuf,
        log_rx: mpsc::Receiver<String>,
        factory: CycleFactory,
    ) -> Self {
        Self {
            agent,
            settings,
            settings_path,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            confirm: None,
            should_quit: false,
            factory,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, AgentState> {
        self.agent.state_ref().lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> AgentStatus {
        self.agent.status()
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
    }

    /// Reap a stopping agent. Called once per frame.
    pub fn tick(&mut self) {
        self.agent.poll_stopped();
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.settings.regions.len() {
            self.selected += 1;
        }
    }

    pub fn start_stop(&mut self) {
        match self.agent.status() {
            AgentStatus::Running => {
                logger::info("stopping agent");
                self.agent.request_stop(self.settings.stop_timeout());
            }
            AgentStatus::Stopping => {}
            AgentStatus::Stopped => match (self.factory)(&self.settings, self.agent.state()) {
                Ok(cycle) => {
                    self.agent.start(cycle);
                }
                Err(e) => logger::error(&format!("cannot start agent: {:#}", e)),
            },
        }
    }

    pub fn reset_history(&mut self) {
        self.state().clear_history();
        logger::info("history cleared");
    }

    /// Change the polling interval and persist it. A running loop keeps its
    /// interval until the next start.
    pub fn adjust_interval(&mut self, delta: f64) {
        self.settings.adjust_interval(delta);
        match self.settings.save(&self.settings_path) {
            Ok(()) => logger::info(&format!("interval set to {}s", self.settings.interval)),
            Err(e) => logger::error(&format!("saving settings: {:#}", e)),
        }
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Quit right away when idle, ask first while the agent runs.
    pub fn request_quit(&mut self) {
        if self.agent.status() == AgentStatus::Stopped {
            self.should_quit = true;
        } else {
            self.confirm = Some(ConfirmDialog::new("Agent is running. Stop and quit?"));
        }
    }

    /// Resolve the open confirm dialog.
    pub fn answer_confirm(&mut self, yes: bool) {
        if self.confirm.take().is_some() && yes {
            self.shutdown();
            self.should_quit = true;
        }
    }

    /// Stop the agent with the configured bounded wait.
    pub fn shutdown(&mut self) {
        let timeout = self.settings.stop_timeout();
        if !self.agent.stop(timeout) {
            logger::warn(&format!("agent still busy after {:?}, leaving it behind", timeout));
        }
    }
}
