use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::vision::Analyzer;
use crate::logger;

pub const DEFAULT_COMMAND: &str = "tesseract";
pub const DEFAULT_LANGUAGE: &str = "eng";
/// Page segmentation mode 6: one uniform block of text.
pub const DEFAULT_PSM: u8 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct OcrOptions {
    pub command: PathBuf,
    pub language: String,
    pub psm: u8,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            command: PathBuf::from(DEFAULT_COMMAND),
            language: DEFAULT_LANGUAGE.to_string(),
            psm: DEFAULT_PSM,
        }
    }
}

/// Local text recognition through the `tesseract` executable. Needs no API
/// key, but only sees text, not layout.
pub struct TesseractAnalyzer {
    options: OcrOptions,
}

impl TesseractAnalyzer {
    pub fn new(options: OcrOptions) -> Self {
        Self { options }
    }

    fn command(&self, image: &Path) -> Command {
        let mut cmd = Command::new(&self.options.command);
        cmd.arg(image)
            .arg("stdout")
            .args(["-l", &self.options.language])
            .args(["--psm", &self.options.psm.to_string()]);
        cmd
    }

    /// First line of `tesseract --version`; fails when the binary is missing.
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.options.command)
            .arg("--version")
            .output()
            .with_context(|| format!("running {}", self.options.command.display()))?;
        if !output.status.success() {
            bail!("{} --version exited with {}", self.options.command.display(), output.status);
        }
        // Older releases print the version on stderr.
        let text = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        Ok(String::from_utf8_lossy(text).lines().next().unwrap_or("").trim().to_string())
    }

    pub fn extract_text(&self, image: &Path) -> Result<String> {
        let output = self
            .command(image)
            .output()
            .with_context(|| format!("running {}", self.options.command.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tesseract failed on {}: {}", image.display(), stderr.trim());
        }
        Ok(clean_output(&output.stdout))
    }
}

/// Drop the trailing form feed and blank lines tesseract emits.
fn clean_output(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|l| l.trim_end_matches('\u{c}').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every word of `phrase` shows up as a whole word, ignoring case.
pub fn phrase_in_text(text: &str, phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    !words.is_empty()
        && words.iter().all(|w| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(w))).map_or(false, |re| re.is_match(text))
        })
}

impl Analyzer for TesseractAnalyzer {
    fn detect(&mut self, image: &Path, phrase: &str) -> Result<bool> {
        let text = self.extract_text(image)?;
        let detected = phrase_in_text(&text, phrase);
        let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let snippet: String = flat.chars().take(80).collect();
        logger::info_p("vision", &format!("'{}': ocr \"{}\" -> {}", phrase, snippet, detected));
        Ok(detected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stdout_command() {
        let analyzer = TesseractAnalyzer::new(OcrOptions { language: "deu".into(), ..Default::default() });
        let cmd = analyzer.command(Path::new("shots/current_screenshot_1.jpg"));
        assert_eq!(cmd.get_program(), "tesseract");
        let args: Vec<&str> = cmd.get_args().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, vec!["shots/current_screenshot_1.jpg", "stdout", "-l", "deu", "--psm", "6"]);
    }

    #[test]
    fn output_is_cleaned() {
        assert_eq!(clean_output(b"  Reject   Accept \n\n Try again\n\x0c"), "Reject   Accept\nTry again");
        assert_eq!(clean_output(b"\x0c"), "");
    }

    #[test]
    fn phrase_matching() {
        assert!(phrase_in_text("Reject\nACCEPT all", "reject accept"));
        assert!(phrase_in_text("... Try again ...", "try again"));
        assert!(!phrase_in_text("Accepted", "accept"));
        assert!(!phrase_in_text("there is nothing", "the end"));
        assert!(!phrase_in_text("anything", "   "));
    }

    #[test]
    fn missing_binary_is_an_error() {
        let mut analyzer = TesseractAnalyzer::new(OcrOptions {
            command: PathBuf::from("/nonexistent/tesseract-binary"),
            ..Default::default()
        });
        assert!(analyzer.version().is_err());
        let err = analyzer.detect(Path::new("x.jpg"), "new chat").unwrap_err();
        assert!(format!("{:#}", err).contains("running /nonexistent/tesseract-binary"));
    }
}
