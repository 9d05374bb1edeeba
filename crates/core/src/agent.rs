use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cycle::DetectionCycle;
use crate::state::AgentState;
use crate::types::AgentStatus;
use crate::logger;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the background detection thread and its running flag.
pub struct Agent {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    state: Arc<Mutex<AgentState>>,
    stop_deadline: Option<Instant>,
}

impl Agent {
    pub fn new(state: Arc<Mutex<AgentState>>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            state,
            stop_deadline: None,
        }
    }

    pub fn state(&self) -> Arc<Mutex<AgentState>> {
        Arc::clone(&self.state)
    }

    pub fn state_ref(&self) -> &Mutex<AgentState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> AgentStatus {
        match (&self.handle, self.is_running()) {
            (Some(_), true) => AgentStatus::Running,
            (Some(_), false) => AgentStatus::Stopping,
            (None, _) => AgentStatus::Stopped,
        }
    }

    /// Spawn the loop. Ignored (returns false) while a previous loop is still
    /// running or stopping.
    pub fn start(&mut self, mut cycle: DetectionCycle) -> bool {
        if self.handle.is_some() {
            logger::warn("agent already running");
            return false;
        }
        // Fresh flag so an abandoned thread can never be revived.
        self.running = Arc::new(AtomicBool::new(true));
        self.stop_deadline = None;
        let running = Arc::clone(&self.running);
        self.handle = Some(thread::spawn(move || cycle.run(&running)));
        true
    }

    /// Clear the running flag without waiting.
    pub fn request_stop(&mut self, timeout: Duration) {
        if self.handle.is_some() && self.stop_deadline.is_none() {
            self.running.store(false, Ordering::Release);
            self.stop_deadline = Some(Instant::now() + timeout);
        }
    }

    /// Reap the thread if it finished, or abandon it once the stop deadline
    /// has passed. Also notices a loop that stopped on its own.
    pub fn poll_stopped(&mut self) -> AgentStatus {
        if self.handle.as_ref().map_or(false, |h| h.is_finished()) {
            self.reap();
        } else if self.stop_deadline.map_or(false, |d| Instant::now() >= d) {
            self.detach();
        }
        self.status()
    }

    /// Stop and wait up to `timeout` for the thread to exit.
    /// Returns false if the thread had to be abandoned.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        if self.handle.is_none() {
            return true;
        }
        self.running.store(false, Ordering::Release);
        let deadline = Instant::now() + timeout;
        loop {
            if self.handle.as_ref().map_or(true, |h| h.is_finished()) {
                self.reap();
                logger::info("agent stopped");
                return true;
            }
            if Instant::now() >= deadline {
                self.detach();
                return false;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                logger::error("agent thread panicked");
            }
        }
        self.running.store(false, Ordering::Release);
        self.stop_deadline = None;
    }

    fn detach(&mut self) {
        logger::warn("agent thread did not stop in time, detaching it");
        self.running.store(false, Ordering::Release);
        self.handle = None;
        self.stop_deadline = None;
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
