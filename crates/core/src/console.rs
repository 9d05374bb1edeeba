use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use crate::agent::Agent;
use crate::types::AgentStatus;
use crate::logger;

const POLL: Duration = Duration::from_millis(200);

/// Forward lines from `input` on a worker thread. The channel disconnects
/// at end of input.
pub fn spawn_reader<R: BufRead + Send + 'static>(input: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Set `cancel` as soon as a line arrives on `input`. End of input leaves
/// it untouched.
pub fn cancel_on_input<R: BufRead + Send + 'static>(mut input: R, cancel: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut line = String::new();
        if matches!(input.read_line(&mut line), Ok(n) if n > 0) {
            cancel.store(true, Ordering::Release);
        }
    })
}

/// Serve `status` and `stop` commands while the agent runs. Returns once
/// a stop is asked for or the loop ends on its own, then stops the agent
/// within `stop_timeout`.
pub fn run_headless<W: Write>(
    agent: &mut Agent,
    commands: &Receiver<String>,
    out: &mut W,
    stop_timeout: Duration,
) -> Result<()> {
    let mut input_open = true;
    loop {
        let next = if input_open {
            commands.recv_timeout(POLL)
        } else {
            thread::sleep(POLL);
            Err(RecvTimeoutError::Timeout)
        };
        match next {
            Ok(line) => match line.trim() {
                "stop" | "quit" | "exit" => break,
                "status" => {
                    let snapshot = agent.state_ref().lock().unwrap_or_else(|e| e.into_inner()).to_json();
                    writeln!(out, "{}", serde_json::to_string_pretty(&snapshot)?)?;
                }
                "" => {}
                other => writeln!(out, "unknown command '{}' (status, stop)", other)?,
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                logger::info("input closed, running until the loop stops");
                input_open = false;
            }
        }
        if agent.poll_stopped() == AgentStatus::Stopped {
            logger::info("agent loop ended");
            break;
        }
    }
    agent.stop(stop_timeout);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::clicker::tests::RecordingPointer;
    use crate::clicker::Clicker;
    use crate::cycle::tests::{RecordingScreen, ScriptedAnalyzer};
    use crate::cycle::{DetectionCycle, RetryPolicy, Timing, Watch};
    use crate::screenshot::ScreenshotTaker;
    use crate::state::AgentState;
    use crate::types::Region;

    fn agent(answers: Vec<Option<bool>>, retry: RetryPolicy, dir: &Path) -> Agent {
        let state = Arc::new(Mutex::new(AgentState::new(1, 10).unwrap()));
        let cycle = DetectionCycle::new(
            vec![Watch { region: Region::new(0, 0, 20, 20), phrase: "new chat".into() }],
            ScreenshotTaker::new(Box::new(RecordingScreen::default()), dir),
            Box::new(ScriptedAnalyzer::new(answers)),
            Clicker::new(Box::new(RecordingPointer::default()), vec![vec![]]),
            Arc::clone(&state),
            Timing::new(0.05, Duration::from_millis(10)).unwrap(),
        )
        .unwrap()
        .with_retry(retry);
        let mut agent = Agent::new(state);
        agent.start(cycle);
        agent
    }

    /// Reader that never yields a line, like a terminal nobody types into.
    struct SilentInput;

    impl Read for SilentInput {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_secs(30));
            Ok(0)
        }
    }

    #[test]
    fn reader_forwards_lines_then_disconnects() {
        let rx = spawn_reader(Cursor::new("status\nstop\n"));
        assert_eq!(rx.recv().unwrap(), "status");
        assert_eq!(rx.recv().unwrap(), "stop");
        assert!(rx.recv().is_err());
    }

    #[test]
    fn status_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let answers = std::iter::repeat(Some(false)).take(1000).collect();
        let mut agent = agent(answers, RetryPolicy::Forever, dir.path());
        let (tx, rx) = mpsc::channel();
        tx.send("status".to_string()).unwrap();
        tx.send("bogus".to_string()).unwrap();
        tx.send("stop".to_string()).unwrap();

        let mut out = Vec::new();
        run_headless(&mut agent, &rx, &mut out, Duration::from_secs(5)).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("\"num_regions\": 1"), "{}", out);
        assert!(out.contains("unknown command 'bogus'"));
        assert_eq!(agent.status(), AgentStatus::Stopped);
    }

    #[test]
    fn returns_when_loop_gives_up_without_any_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = agent(vec![None, None], RetryPolicy::Bounded { max_consecutive_failures: 1 }, dir.path());
        let rx = spawn_reader(std::io::BufReader::new(SilentInput));

        let started = Instant::now();
        run_headless(&mut agent, &rx, &mut Vec::new(), Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(agent.status(), AgentStatus::Stopped);
    }

    #[test]
    fn closed_input_keeps_running_until_loop_ends() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = agent(vec![Some(false), None], RetryPolicy::Bounded { max_consecutive_failures: 1 }, dir.path());
        let rx = spawn_reader(Cursor::new(""));
        run_headless(&mut agent, &rx, &mut Vec::new(), Duration::from_secs(5)).unwrap();
        assert_eq!(agent.state_ref().lock().unwrap().cycles(), 1);
    }

    #[test]
    fn enter_cancels() {
        let cancel = Arc::new(AtomicBool::new(false));
        cancel_on_input(Cursor::new("\n"), Arc::clone(&cancel)).join().unwrap();
        assert!(cancel.load(Ordering::Acquire));
    }

    #[test]
    fn end_of_input_does_not_cancel() {
        let cancel = Arc::new(AtomicBool::new(false));
        cancel_on_input(Cursor::new(""), Arc::clone(&cancel)).join().unwrap();
        assert!(!cancel.load(Ordering::Acquire));
    }
}
