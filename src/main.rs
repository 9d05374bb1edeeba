use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use screenspy_core::agent::Agent;
use screenspy_core::assistant::DEFAULT_SESSION;
use screenspy_core::clicker::Clicker;
use screenspy_core::console;
use screenspy_core::cycle::DetectionCycle;
use screenspy_core::macros::{self, MacroBook, DEFAULT_MACRO_FILE, DEFAULT_PLAY_PAUSE};
use screenspy_core::platform::create_platform;
use screenspy_core::screenshot::ScreenshotTaker;
use screenspy_core::settings::{AnalyzerKind, Settings, DEFAULT_CONFIG_FILE};
use screenspy_core::state::AgentState;
use screenspy_core::types::ClickPoint;
use screenspy_core::vision::{Analyzer, ApiConfig, OpenAiAnalyzer};
use screenspy_core::logger;
use screenspy_tui::CycleFactory;

#[derive(Parser)]
#[command(name = "screenspy", version, about = "Watch screen regions with a vision model and click when text shows up")]
struct Cli {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_BASE", global = true)]
    api_base: Option<String>,

    /// Vision model; `provider/model` names are trimmed to `model`
    #[arg(long, env = "OPENAI_MODEL", global = true)]
    model: Option<String>,

    /// Seconds between detection cycles
    #[arg(long, env = "INTERVAL", global = true)]
    interval: Option<f64>,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Use the stub platform (no real capture or clicks)
    #[arg(long, global = true)]
    stub: bool,

    /// Read regions with local tesseract OCR instead of the vision model
    #[arg(long, global = true)]
    ocr: bool,

    /// Run without the terminal UI; reads stop/status from stdin
    #[arg(long, global = true)]
    headless: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the detection loop (default)
    Run,
    /// Send a tiny request to verify key, base URL and model
    Check,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Named click sequences
    Macro {
        #[arg(long, default_value = DEFAULT_MACRO_FILE)]
        file: PathBuf,
        #[command(subcommand)]
        action: MacroAction,
    },
    /// Drive the servo arm over a serial port
    Arm {
        #[arg(long)]
        port: String,
        #[command(subcommand)]
        mode: Option<ArmMode>,
    },
}

#[derive(Subcommand)]
enum ArmMode {
    /// Type commands at a prompt (default)
    Console,
    /// Let the chat model move the arm through tool calls
    Agent {
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
        /// Where chat_history_<session>.json lives
        #[arg(long, default_value = ".")]
        history_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the current settings (defaults plus overrides) to the config file
    Init,
    Show,
}

#[derive(Subcommand)]
enum MacroAction {
    List,
    Show { name: String },
    /// Record a macro from `x,y` points
    Add {
        name: String,
        #[arg(required = true)]
        points: Vec<ClickPoint>,
    },
    Delete { name: String },
    Play { name: String },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let logs_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("logs");
    logger::init(&logs_dir).with_context(|| format!("opening log dir {}", logs_dir.display()))?;

    let mut settings = Settings::load(&cli.config);
    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }
    if cli.api_base.is_some() {
        settings.api_base = cli.api_base.clone();
    }
    if let Some(interval) = cli.interval {
        settings.interval = interval;
    }
    if cli.ocr {
        settings.analyzer = AnalyzerKind::Ocr;
    }

    match &cli.command {
        None | Some(Command::Run) => run(&cli, settings),
        Some(Command::Check) => {
            logger::set_console(true);
            match settings.analyzer {
                AnalyzerKind::Vision => {
                    let api = api_config(&cli, &settings)?;
                    let analyzer = OpenAiAnalyzer::new(api)?;
                    analyzer.test_connection()?;
                    println!("API connection OK");
                }
                AnalyzerKind::Ocr => {
                    ocr_analyzers(&settings)?;
                    println!("tesseract OK");
                }
            }
            Ok(())
        }
        Some(Command::Config { action: ConfigAction::Init }) => {
            settings.save(&cli.config)?;
            println!("wrote {}", cli.config.display());
            Ok(())
        }
        Some(Command::Config { action: ConfigAction::Show }) => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Some(Command::Macro { file, action }) => {
            logger::set_console(true);
            logger::register_prefix("macro", logger::COLOR_MAGENTA);
            macro_command(file, action, cli.stub)
        }
        Some(Command::Arm { port, mode }) => {
            logger::set_console(true);
            logger::register_prefix("arm", logger::COLOR_MAGENTA);
            match mode {
                None | Some(ArmMode::Console) => arm_command(port),
                Some(ArmMode::Agent { session, history_dir }) => {
                    let api = api_config(&cli, &settings)?;
                    arm_agent_command(port, api, history_dir, session)
                }
            }
        }
    }
}

fn api_config(cli: &Cli, settings: &Settings) -> Result<ApiConfig> {
    let api = ApiConfig::new(cli.api_key.clone(), settings.api_base.clone(), &settings.model)?;
    Ok(api.with_timeout(settings.request_timeout()))
}

/// Builds one analyzer per agent start.
type AnalyzerSource = Box<dyn Fn() -> Result<Box<dyn Analyzer>>>;

fn vision_analyzers(api: ApiConfig) -> AnalyzerSource {
    Box::new(move || Ok(Box::new(OpenAiAnalyzer::new(api.clone())?) as Box<dyn Analyzer>))
}

#[cfg(feature = "ocr")]
fn ocr_analyzers(settings: &Settings) -> Result<AnalyzerSource> {
    use screenspy_core::ocr::TesseractAnalyzer;

    let options = settings.ocr_options();
    let version = TesseractAnalyzer::new(options.clone())
        .version()
        .context("tesseract not found; install it or set ocr_command in the config")?;
    logger::info_p("vision", &format!("using {}", version));
    Ok(Box::new(move || Ok(Box::new(TesseractAnalyzer::new(options.clone())) as Box<dyn Analyzer>)))
}

#[cfg(not(feature = "ocr"))]
fn ocr_analyzers(_settings: &Settings) -> Result<AnalyzerSource> {
    bail!("built without the ocr feature")
}

/// Wires platform, analyzer and clicker into a fresh cycle each time the
/// agent starts.
fn cycle_factory(analyzers: AnalyzerSource, force_stub: bool) -> CycleFactory {
    Box::new(move |settings: &Settings, state: Arc<Mutex<AgentState>>| -> Result<DetectionCycle> {
        let platform = create_platform(force_stub);
        let taker = ScreenshotTaker::new(platform.screen, &settings.screenshot_dir);
        let analyzer = analyzers()?;
        let clicker = Clicker::new(platform.pointer, settings.targets()).with_pause(settings.click_pause());
        let cycle = DetectionCycle::new(settings.watches()?, taker, analyzer, clicker, state, settings.timing()?)?;
        Ok(cycle.with_retry(settings.retry()))
    })
}

fn run(cli: &Cli, settings: Settings) -> Result<()> {
    // Startup validation happens before anything is spawned.
    let analyzers = match settings.analyzer {
        AnalyzerKind::Vision => vision_analyzers(api_config(cli, &settings)?),
        AnalyzerKind::Ocr => ocr_analyzers(&settings)?,
    };
    let watches = settings.watches()?;
    settings.timing()?;
    let state = AgentState::new(watches.len(), settings.history_limit)?;
    let agent = Agent::new(Arc::new(Mutex::new(state)));
    let factory = cycle_factory(analyzers, cli.stub);

    if cli.headless {
        run_headless(agent, settings, factory)
    } else {
        run_tui(agent, settings, cli.config.clone(), factory)
    }
}

fn run_headless(mut agent: Agent, settings: Settings, mut factory: CycleFactory) -> Result<()> {
    logger::set_console(true);
    agent.start(factory(&settings, agent.state())?);
    logger::info("type 'status' for a snapshot, 'stop' to quit");

    let commands = console::spawn_reader(io::BufReader::new(io::stdin()));
    console::run_headless(&mut agent, &commands, &mut io::stdout(), settings.stop_timeout())
}

fn run_tui(agent: Agent, settings: Settings, settings_path: PathBuf, factory: CycleFactory) -> Result<()> {
    let (log_tx, log_rx) = mpsc::channel::<String>();
    logger::set_tui_sender(log_tx);
    logger::info("screenspy started");

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = screenspy_tui::App::new(agent, settings, settings_path, log_rx, factory);
    app.start_stop();

    let result = screenspy_tui::event::run(&mut terminal, &mut app);
    app.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

fn macro_command(file: &Path, action: &MacroAction, force_stub: bool) -> Result<()> {
    let mut book = MacroBook::load(file)?;
    match action {
        MacroAction::List => {
            if book.is_empty() {
                println!("no macros in {}", file.display());
            }
            for name in book.names() {
                println!("{}", name);
            }
        }
        MacroAction::Show { name } => {
            let points = book.get(name).with_context(|| format!("no macro named '{}'", name))?;
            for (i, p) in points.iter().enumerate() {
                println!("{:>3}: ({}, {})", i + 1, p.x, p.y);
            }
        }
        MacroAction::Add { name, points } => {
            book.insert(name, points.clone())?;
            book.save(file)?;
            println!("saved '{}' with {} click(s)", name.trim(), points.len());
        }
        MacroAction::Delete { name } => {
            if book.remove(name).is_none() {
                bail!("no macro named '{}'", name);
            }
            book.save(file)?;
            println!("deleted '{}'", name);
        }
        MacroAction::Play { name } => {
            let points = book.get(name).with_context(|| format!("no macro named '{}'", name))?;
            let mut platform = create_platform(force_stub);
            let cancel = Arc::new(AtomicBool::new(false));
            console::cancel_on_input(io::BufReader::new(io::stdin()), Arc::clone(&cancel));
            println!("playing '{}', press Enter to cancel", name);
            let done = macros::play(points, platform.pointer.as_mut(), DEFAULT_PLAY_PAUSE, &cancel);
            println!("played '{}': {}/{} click(s)", name, done, points.len());
        }
    }
    Ok(())
}

#[cfg(feature = "serial")]
fn arm_command(port: &str) -> Result<()> {
    use screenspy_core::arm::{self, Arm};

    let serial = arm::open_serial(port)?;
    let mut arm = Arm::new(serial);
    println!("commands: servo <motor> <angle>, move <name>, button <left|middle|right>, delay <secs>, time, elapsed, quit");
    arm::run_repl(&mut arm, io::stdin().lock(), io::stdout())
}

#[cfg(feature = "serial")]
fn arm_agent_command(port: &str, api: ApiConfig, history_dir: &Path, session: &str) -> Result<()> {
    use std::time::Instant;

    use screenspy_core::arm::{self, Arm};
    use screenspy_core::assistant::{self, Assistant, ChatHistory, OpenAiChat, Toolbox, IDLE_CHECK, PROACTIVE_AFTER};

    let model = OpenAiChat::new(api)?;
    let history = ChatHistory::open(history_dir, session)?;
    logger::info_p("arm", &format!("session '{}': {} message(s) in {}", session, history.messages().len(), history.path().display()));
    let serial = arm::open_serial(port)?;
    let mut bot = Assistant::new(Box::new(model), Toolbox::new(Arm::new(serial)), history);

    let (tx, turns) = mpsc::sync_channel(1);
    let activity = Arc::new(Mutex::new(Instant::now()));
    assistant::spawn_input(io::BufReader::new(io::stdin()), tx.clone());
    assistant::spawn_idle_watch(Arc::clone(&activity), PROACTIVE_AFTER, IDLE_CHECK, tx);
    println!("chatting with the arm, 'quit' to leave");
    assistant::run_chat(&mut bot, &turns, &activity, io::stdout())
}

#[cfg(not(feature = "serial"))]
fn arm_command(_port: &str) -> Result<()> {
    bail!("built without the serial feature")
}

#[cfg(not(feature = "serial"))]
fn arm_agent_command(_port: &str, _api: ApiConfig, _history_dir: &Path, _session: &str) -> Result<()> {
    bail!("built without the serial feature")
}
