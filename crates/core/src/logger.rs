use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex, OnceLock};
use chrono::Local;

static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

struct Logger {
    file: Option<File>,
    console: bool,
    tui_tx: Option<mpsc::Sender<String>>,
    prefixes: HashMap<String, u8>, // prefix -> color index
}

// Color indices for TUI rendering (mapped in ui.rs)
pub const COLOR_GRAY: u8 = 1;
pub const COLOR_BLUE: u8 = 2;
pub const COLOR_GREEN: u8 = 3;
pub const COLOR_MAGENTA: u8 = 4;

pub const LOG_FILE: &str = "screenspy.log";

fn with_logger(f: impl FnOnce(&mut Logger)) {
    if let Some(logger) = LOGGER.get() {
        let mut l = logger.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut l);
    }
}

/// Initialize the global logger and truncate the log file. Calls after the
/// first are ignored.
pub fn init(log_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_dir.join(LOG_FILE))?;

    let mut prefixes = HashMap::new();
    prefixes.insert("cycle".to_string(), COLOR_GREEN);
    prefixes.insert("vision".to_string(), COLOR_BLUE);
    prefixes.insert("click".to_string(), COLOR_MAGENTA);

    LOGGER
        .set(Mutex::new(Logger { file: Some(file), console: false, tui_tx: None, prefixes }))
        .ok();
    Ok(())
}

/// Echo plain lines to stderr (headless runs and subcommands).
pub fn set_console(enabled: bool) {
    with_logger(|l| l.console = enabled);
}

/// Wire the TUI log channel.
pub fn set_tui_sender(tx: mpsc::Sender<String>) {
    with_logger(|l| l.tui_tx = Some(tx));
}

/// Register a prefix with a color. All subsequent log calls through
/// the `*_p` variants will use this color for the prefix.
pub fn register_prefix(prefix: &str, color: u8) {
    with_logger(|l| {
        l.prefixes.insert(prefix.to_string(), color);
    });
}

/// Internal: format for TUI channel uses \x1f as field separator:
/// level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage
fn write_log(level: &str, prefix: &str, msg: &str) {
    let ts = Local::now().format("%H:%M:%S").to_string();

    let plain = if prefix.is_empty() {
        format!("[{}] [{}] {}", ts, level, msg)
    } else {
        format!("[{}] [{}] [{}] {}", ts, level, prefix, msg)
    };

    with_logger(|l| {
        if let Some(file) = l.file.as_mut() {
            writeln!(file, "{}", plain).ok();
        }
        if l.console {
            eprintln!("{}", plain);
        }
        if let Some(tx) = &l.tui_tx {
            let color = l.prefixes.get(prefix).copied().unwrap_or(0);
            tx.send(format!("{}\x1f{}\x1f{}\x1f{}\x1f{}", level, prefix, color, ts, msg)).ok();
        }
    });
}

pub fn info(msg: &str) {
    write_log("INFO", "", msg);
}

pub fn warn(msg: &str) {
    write_log("WARN", "", msg);
}

pub fn error(msg: &str) {
    write_log("ERROR", "", msg);
}

pub fn info_p(prefix: &str, msg: &str) {
    write_log("INFO", prefix, msg);
}

pub fn warn_p(prefix: &str, msg: &str) {
    write_log("WARN", prefix, msg);
}

pub fn error_p(prefix: &str, msg: &str) {
    write_log("ERROR", prefix, msg);
}
