use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLICE: Duration = Duration::from_millis(100);

/// Sleep up to `total`, waking every 100ms to check `running`.
/// Returns whether the flag is still set afterwards.
pub fn sleep_while(running: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
    running.load(Ordering::Acquire)
}

/// Sleep up to `total`, waking every 100ms to check `cancel`.
/// Returns whether `cancel` got set.
pub fn sleep_until_cancelled(cancel: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while !cancel.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
    cancel.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_early_when_flag_cleared() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        assert!(!sleep_while(&running, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleeps_full_duration_while_running() {
        let running = AtomicBool::new(true);
        let start = Instant::now();
        assert!(sleep_while(&running, Duration::from_millis(150)));
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn cancelled_sleep_wakes_early() {
        let cancel = std::sync::Arc::new(AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&cancel);
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(120));
            flag.store(true, Ordering::Release);
        });
        let start = Instant::now();
        assert!(sleep_until_cancelled(&cancel, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        setter.join().unwrap();
    }
}
