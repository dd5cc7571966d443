use serde::Serialize;
use thiserror::Error;

/// One failed attempt against a mirror URL, kept for run-log diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTML parsing failed: {0}")]
    HtmlParse(String),

    #[error("parsing error: {0}")]
    Parse(String),

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("API error: {0}")]
    Api(String),

    #[error("{message}")]
    SourceUnreachable {
        message: String,
        attempts: Vec<AttemptFailure>,
    },

    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Network-level failures are worth retrying; structural failures
    /// (bad markup, bad JSON, missing config) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PipelineError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
