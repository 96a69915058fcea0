use std::path::PathBuf;
use thiserror::Error;

/// Crate-level errors. Per-file and per-unit failures never surface here;
/// they are contained as excluded files or pending entries.
#[derive(Error, Debug)]
pub enum BriefError {
    #[error("No API key configured. Set ANTHROPIC_API_KEY or ai.api_key, or run with --free")]
    MissingCredential,

    #[error("Failed to persist digest store at {path}: {source}")]
    StorePersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize digest store: {0}")]
    StoreEncode(#[from] serde_json::Error),

    #[error("Failed to scan {path}: {message}")]
    Scan { path: PathBuf, message: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BriefError>;

/// Why a single file could not be fingerprinted.
#[derive(Error, Debug)]
pub enum DigestError {
    #[error("unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("binary content")]
    Binary,
}

/// Failure of one description unit (a chunk or a deep file).
#[derive(Error, Debug)]
pub enum DescribeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DescribeError {
    /// Rate limiting, server-side errors and dropped connections are worth
    /// another attempt; everything else fails the unit immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            DescribeError::Http(e) => e.is_timeout() || e.is_connect(),
            DescribeError::Status { status, .. } => *status == 429 || *status >= 500,
            DescribeError::Malformed(_) | DescribeError::Read { .. } => false,
        }
    }
}
