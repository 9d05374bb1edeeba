use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::arm::Arm;
use crate::vision::ApiConfig;
use crate::logger;

pub const MAX_HISTORY_BYTES: usize = 64 * 1024;
pub const PROACTIVE_AFTER: Duration = Duration::from_secs(15 * 60);
pub const IDLE_CHECK: Duration = Duration::from_secs(10);
pub const DEFAULT_SESSION: &str = "default";

const MAX_TOOL_ROUNDS: usize = 10;
const MAX_TOOL_DELAY: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a personal assistant nicknamed Arm, because you control a small \
toy desk manipulator through your tools. Liven up the conversation with spontaneous movements that show \
how you feel about what is said. For example: when greeted, turn left, then down, then sit; when you \
agree, nod (down, then sit); when you disagree, shake (right, then left). Feel free to invent your own \
gestures. Do not describe movements in text; call the tools and really move. The arm is your own \
physical limb.";

pub const PROACTIVE_PROMPT: &str = "This message was generated automatically to nudge you into being \
proactive. Is there anything you would like to ask, or ask for?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One chat-completions message, in the shape the API and the history file
/// both use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool(call_id: &str, content: impl Into<String>) -> Self {
        Self { tool_call_id: Some(call_id.to_string()), ..Self::text(Role::Tool, content) }
    }

    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the API sends them.
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".into()
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            kind: function_kind(),
            function: FunctionCall { name: name.to_string(), arguments: arguments.to_string() },
        }
    }
}

/// Conversation kept on disk as `chat_history_<session>.json`. Only user
/// inputs and final replies are stored, never tool traffic.
pub struct ChatHistory {
    path: PathBuf,
    messages: Vec<Message>,
}

impl ChatHistory {
    pub fn file_name(session: &str) -> Result<String> {
        let session = session.trim();
        if session.is_empty() || session.contains(['/', '\\']) || session.starts_with('.') {
            bail!("invalid session name '{}'", session);
        }
        Ok(format!("chat_history_{}.json", session))
    }

    /// Load the session's history. A missing file is an empty history; an
    /// oversized one is trimmed and written back.
    pub fn open(dir: &Path, session: &str) -> Result<Self> {
        let path = dir.join(Self::file_name(session)?);
        let messages = if path.exists() {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Vec::new()
        };
        let mut history = Self { path, messages };
        let dropped = history.trim(MAX_HISTORY_BYTES);
        if dropped > 0 {
            logger::info_p("arm", &format!("history over {} bytes, dropped {} old message(s)", MAX_HISTORY_BYTES, dropped));
            history.save()?;
        }
        Ok(history)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop the oldest messages until the encoded list fits in `max_bytes`.
    /// Returns how many were dropped.
    pub fn trim(&mut self, max_bytes: usize) -> usize {
        let mut dropped = 0;
        while !self.messages.is_empty() && encoded_len(&self.messages) > max_bytes {
            self.messages.remove(0);
            dropped += 1;
        }
        dropped
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.messages)?;
        std::fs::write(&self.path, json).with_context(|| format!("writing {}", self.path.display()))
    }
}

fn encoded_len(messages: &[Message]) -> usize {
    serde_json::to_vec(messages).map(|v| v.len()).unwrap_or(0)
}

/// Function schemas offered to the model.
pub fn tool_specs() -> Vec<Value> {
    let function = |name: &str, description: &str, parameters: Value| {
        json!({
            "type": "function",
            "function": { "name": name, "description": description, "parameters": parameters },
        })
    };
    let none = json!({ "type": "object", "properties": {} });
    vec![
        function(
            "servo_control",
            "Turn one servo to an angle. Motor 3 is the base (0 = far right, 180 = far left). \
             Motors 4, 5 and 6 are the segments from the base outwards (0 = back, 180 = forward); \
             motor 5 can usually stay at 150. Motor 7 is the gripper (20 = closed, 120 = open).",
            json!({
                "type": "object",
                "properties": {
                    "motor": { "type": "integer" },
                    "angle": { "type": "integer", "minimum": 0, "maximum": 180 },
                },
                "required": ["motor", "angle"],
            }),
        ),
        function(
            "manipulator_control",
            "Run a named move: sit (compact rest pose), down (lean down until the gripper almost \
             touches the base), forward (reach forward and up), left, right (turn the base to its end \
             stops, 180 degrees apart), middle (centre the base), open, close (the gripper).",
            json!({
                "type": "object",
                "properties": {
                    "move": {
                        "type": "string",
                        "enum": ["sit", "down", "forward", "left", "right", "middle", "open", "close"],
                    },
                },
                "required": ["move"],
            }),
        ),
        function(
            "button_press",
            "Press a button with the arm: left, middle or right. Turns towards the button, then goes down.",
            json!({
                "type": "object",
                "properties": { "button": { "type": "string", "enum": ["left", "middle", "right"] } },
                "required": ["button"],
            }),
        ),
        function(
            "delay",
            "Wait for a number of seconds.",
            json!({
                "type": "object",
                "properties": { "seconds": { "type": "number", "minimum": 0 } },
                "required": ["seconds"],
            }),
        ),
        function("current_time", "Current local time as HH:MM:SS.", none.clone()),
        function("time_elapsed_since_last_message", "Seconds since the previous user message.", none),
    ]
}

fn number_arg(args: &Value, key: &str) -> Result<f64, String> {
    match args.get(key) {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| format!("'{}' is not a number", key)),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| format!("'{}' is not a number: '{}'", key, s)),
        _ => Err(format!("missing argument '{}'", key)),
    }
}

fn int_arg(args: &Value, key: &str) -> Result<i64, String> {
    let n = number_arg(args, key)?;
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(format!("'{}' must be a whole number, got {}", key, n));
    }
    Ok(n as i64)
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| format!("missing argument '{}'", key))
}

/// Executes tool calls against the arm. Failures come back as text for the
/// model to read, never as errors.
pub struct Toolbox<W: Write> {
    arm: Arm<W>,
    previous_message: Option<Instant>,
}

impl<W: Write> Toolbox<W> {
    pub fn new(arm: Arm<W>) -> Self {
        Self { arm, previous_message: None }
    }

    pub fn into_arm(self) -> Arm<W> {
        self.arm
    }

    pub fn dispatch(&mut self, name: &str, arguments: &str) -> String {
        let args: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => return format!("error: arguments are not valid JSON: {}", e),
            }
        };
        logger::info_p("arm", &format!("tool {} {}", name, args));

        let result = match name {
            "servo_control" => int_arg(&args, "motor")
                .and_then(|m| u8::try_from(m).map_err(|_| format!("no motor {}", m)))
                .and_then(|motor| {
                    let angle = int_arg(&args, "angle")?;
                    self.arm.servo(motor, angle).map_err(|e| e.to_string())
                }),
            "manipulator_control" => {
                str_arg(&args, "move").and_then(|m| self.arm.perform(m).map_err(|e| e.to_string()))
            }
            "button_press" => {
                str_arg(&args, "button").and_then(|b| self.arm.press(b).map_err(|e| e.to_string()))
            }
            "delay" => number_arg(&args, "seconds").and_then(|secs| {
                let wait = Duration::try_from_secs_f64(secs).map_err(|_| format!("bad delay {}", secs))?;
                if wait > MAX_TOOL_DELAY {
                    return Err(format!("delay is capped at {}s", MAX_TOOL_DELAY.as_secs()));
                }
                thread::sleep(wait);
                Ok(format!("waited {} seconds", secs))
            }),
            "current_time" => Ok(chrono::Local::now().format("%H:%M:%S").to_string()),
            "time_elapsed_since_last_message" => Ok(match self.previous_message {
                None => "this is the first message".to_string(),
                Some(t) => format!("{:.2} seconds since the last message", t.elapsed().as_secs_f64()),
            }),
            other => Err(format!("unknown tool '{}'", other)),
        };

        result.unwrap_or_else(|e| {
            logger::warn_p("arm", &format!("tool {} failed: {}", name, e));
            format!("error: {}", e)
        })
    }
}

/// Anything that can answer a chat with optional tool calls.
pub trait ChatModel {
    fn chat(&mut self, messages: &[Message], tools: &[Value]) -> Result<Message>;
}

#[derive(Serialize)]
struct ToolChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    tools: &'a [Value],
    temperature: f32,
}

#[derive(Deserialize)]
struct ToolChatResponse {
    choices: Vec<ToolChoice>,
}

#[derive(Deserialize)]
struct ToolChoice {
    message: Message,
}

/// Blocking chat-completions client with function calling.
pub struct OpenAiChat {
    config: ApiConfig,
    client: reqwest::blocking::Client,
}

impl OpenAiChat {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building HTTP client")?;
        logger::info_p("arm", &format!("chat client ready: {} model {}", config.api_base, config.model));
        Ok(Self { config, client })
    }
}

impl ChatModel for OpenAiChat {
    fn chat(&mut self, messages: &[Message], tools: &[Value]) -> Result<Message> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let body = ToolChatRequest { model: &self.config.model, messages, tools, temperature: 0.7 };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            bail!("API returned {}: {}", status, snippet);
        }
        let parsed: ToolChatResponse = resp.json().context("decoding chat response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow!("chat response has no choices"))
    }
}

/// A chat model driving the arm, with a persistent conversation.
pub struct Assistant<W: Write> {
    model: Box<dyn ChatModel>,
    tools: Toolbox<W>,
    history: ChatHistory,
    max_history_bytes: usize,
}

impl<W: Write> Assistant<W> {
    pub fn new(model: Box<dyn ChatModel>, tools: Toolbox<W>, history: ChatHistory) -> Self {
        Self { model, tools, history, max_history_bytes: MAX_HISTORY_BYTES }
    }

    pub fn with_history_limit(mut self, max_bytes: usize) -> Self {
        self.max_history_bytes = max_bytes;
        self
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn into_arm(self) -> Arm<W> {
        self.tools.into_arm()
    }

    /// Answer one input, running whatever tool calls the model asks for on
    /// the way.
    pub fn respond(&mut self, input: &str) -> Result<String> {
        let received = Instant::now();
        let result = self.exchange(input);
        self.tools.previous_message = Some(received);
        result
    }

    fn exchange(&mut self, input: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(self.history.messages().len() + 2);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend(self.history.messages().iter().cloned());
        messages.push(Message::user(input));
        let specs = tool_specs();

        for _ in 0..MAX_TOOL_ROUNDS {
            let reply = self.model.chat(&messages, &specs)?;
            let calls = reply.calls().to_vec();
            if calls.is_empty() {
                let text = reply.content.unwrap_or_default();
                self.history.push(Message::user(input));
                self.history.push(Message::assistant(text.clone()));
                self.history.trim(self.max_history_bytes);
                self.history.save()?;
                return Ok(text);
            }
            messages.push(reply);
            for call in calls {
                let output = self.tools.dispatch(&call.function.name, &call.function.arguments);
                messages.push(Message::tool(&call.id, output));
            }
        }
        bail!("model still calling tools after {} rounds", MAX_TOOL_ROUNDS)
    }
}

/// Work for the chat loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    Proactive,
    Closed,
}

/// Feed stdin-style lines into the turn queue, then `Closed` at end of input.
pub fn spawn_input<R: BufRead + Send + 'static>(input: R, tx: SyncSender<Turn>) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if tx.send(Turn::User(line)).is_err() {
                return;
            }
        }
        tx.send(Turn::Closed).ok();
    })
}

/// Queue a `Proactive` turn whenever `activity` is older than `idle`. A
/// full queue means a user turn is pending, so the nudge is skipped.
pub fn spawn_idle_watch(
    activity: Arc<Mutex<Instant>>,
    idle: Duration,
    check: Duration,
    tx: SyncSender<Turn>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        thread::sleep(check);
        let last = *activity.lock().unwrap_or_else(|e| e.into_inner());
        if last.elapsed() < idle {
            continue;
        }
        match tx.try_send(Turn::Proactive) {
            Ok(()) | Err(TrySendError::Full(_)) => {
                *activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    })
}

/// Serve turns until `quit`, `exit` or end of input.
pub fn run_chat<W: Write, O: Write>(
    assistant: &mut Assistant<W>,
    turns: &Receiver<Turn>,
    activity: &Mutex<Instant>,
    mut out: O,
) -> Result<()> {
    write!(out, "==> ")?;
    out.flush()?;
    while let Ok(turn) = turns.recv() {
        let input = match turn {
            Turn::Closed => break,
            Turn::User(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                line.to_string()
            }
            Turn::Proactive => {
                logger::info_p("arm", "idle for a while, nudging the model");
                PROACTIVE_PROMPT.to_string()
            }
        };

        match assistant.respond(&input) {
            Ok(text) => writeln!(out, "\nagent: {}\n", text)?,
            Err(e) => {
                logger::error_p("arm", &format!("chat failed: {:#}", e));
                writeln!(out, "\nerror: {:#}\ntry rephrasing the request\n", e)?;
            }
        }
        *activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        write!(out, "==> ")?;
        out.flush()?;
    }
    Ok(())
}
