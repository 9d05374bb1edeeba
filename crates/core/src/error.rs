use thiserror::Error;

/// Startup and validation failures. These are fatal: they are raised before
/// the detection loop starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("interval must be greater than 0 (got {0})")]
    InvalidInterval(f64),
    #[error("at least one region is required")]
    NoRegions,
    #[error("region index {index} is out of range (0 to {max})")]
    RegionIndex { index: usize, max: usize },
    #[error("expected {regions} phrases, got {phrases}")]
    PhraseCountMismatch { regions: usize, phrases: usize },
    #[error("history limit must be at least 1")]
    HistoryLimit,
    #[error("API key is required. Set it with --api-key or OPENAI_API_KEY")]
    MissingApiKey,
    #[error("API base URL is required. Set it with --api-base or OPENAI_API_BASE")]
    MissingApiBase,
}

/// Rejected arm input. Nothing is written to the port when one of these is
/// returned, except `Write` which reports the failed write itself.
#[derive(Debug, Error)]
pub enum ArmError {
    #[error("angle must be between 0 and 180 degrees (got {0})")]
    AngleOutOfRange(i64),
    #[error("unknown move '{0}'")]
    UnknownMove(String),
    #[error("unknown button '{0}'")]
    UnknownButton(String),
    #[error("failed to send command: {0}")]
    Write(#[from] std::io::Error),
}
