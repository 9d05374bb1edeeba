use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logger;

pub const DEFAULT_MODEL: &str = "vis-openai/gpt-4o-mini";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Answers "is this phrase visible in this image".
pub trait Analyzer: Send {
    fn detect(&mut self, image: &Path, phrase: &str) -> Result<bool>;
}

/// Credentials and model for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl ApiConfig {
    /// Both key and base are mandatory; blank values count as missing.
    pub fn new(api_key: Option<String>, api_base: Option<String>, model: &str) -> Result<Self, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let api_base = api_base
            .filter(|b| !b.trim().is_empty())
            .ok_or(ConfigError::MissingApiBase)?;
        Ok(Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: clean_model_name(model),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Some providers take `provider/model`; only the last segment is sent.
pub fn clean_model_name(model: &str) -> String {
    model.rsplit('/').next().unwrap_or(model).to_string()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    n: u32,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You inspect screenshots for text. Reply with yes or no.";

fn question(phrase: &str) -> String {
    format!("Is the text '{}' present in this image? Answer with yes or no.", phrase)
}

/// Blocking chat-completions client.
pub struct OpenAiAnalyzer {
    config: ApiConfig,
    client: reqwest::blocking::Client,
}

impl OpenAiAnalyzer {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building HTTP client")?;
        logger::info_p("vision", &format!("client ready: {} model {}", config.api_base, config.model));
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    fn complete(&self, messages: Vec<ChatMessage>, temperature: f32, max_tokens: u32) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature,
            max_tokens,
            n: 1,
        };
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", self.endpoint()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            bail!("API returned {}: {}", status, snippet);
        }

        let parsed: ChatResponse = resp.json().context("decoding chat response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat response has no message content"))
    }

    /// Minimal text-only round trip to validate key, base and model.
    pub fn test_connection(&self) -> Result<()> {
        let messages = vec![
            ChatMessage { role: "system", content: ChatContent::Text("You are a helpful assistant.".into()) },
            ChatMessage { role: "user", content: ChatContent::Text("Hello, is the API working?".into()) },
        ];
        self.complete(messages, 0.0, 10).map(|_| ())
    }
}

impl Analyzer for OpenAiAnalyzer {
    fn detect(&mut self, image: &Path, phrase: &str) -> Result<bool> {
        let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let messages = vec![
            ChatMessage { role: "system", content: ChatContent::Text(SYSTEM_PROMPT.into()) },
            ChatMessage {
                role: "user",
                content: ChatContent::Parts(vec![
                    ContentPart::Text { text: question(phrase) },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: format!("data:image/jpeg;base64,{}", b64) },
                    },
                ]),
            },
        ];

        let answer = self.complete(messages, 0.3, 50)?;
        let detected = parse_answer(&answer, phrase);
        logger::info_p("vision", &format!("'{}': \"{}\" -> {}", phrase, answer.trim(), detected));
        Ok(detected)
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// Whole-word matcher for one phrase word.
fn word_pattern(word: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(word))).ok()
}

/// Interpret a free-text model answer as yes/no.
pub fn parse_answer(answer: &str, phrase: &str) -> bool {
    static YES: OnceLock<Regex> = OnceLock::new();
    static BOTH_PRESENT: OnceLock<Regex> = OnceLock::new();
    static PRESENCE: OnceLock<Regex> = OnceLock::new();
    static NEGATION: OnceLock<Regex> = OnceLock::new();

    let text = answer.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'");
    if regex(&YES, r"\byes\b").is_match(&text) {
        return true;
    }

    let words: Vec<Regex> = phrase
        .split_whitespace()
        .filter_map(|w| word_pattern(&w.to_lowercase()))
        .collect();

    // A phrase like "no results" must not read as a negation of itself.
    let mut rest = text.clone();
    for word in &words {
        rest = word.replace_all(&rest, " ").into_owned();
    }
    if regex(&NEGATION, r"\b(no|not)\b|n't\b").is_match(&rest) {
        return false;
    }
    if regex(&BOTH_PRESENT, r"(?s)both.*present").is_match(&text) {
        return true;
    }

    !words.is_empty()
        && words.iter().all(|w| w.is_match(&text))
        && regex(&PRESENCE, r"\b(present|visible|appears|shown|both)\b").is_match(&text)
}
