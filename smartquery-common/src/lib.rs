pub mod config;
pub use config::{Config, DisplayConfig, EngineConfig, LimitsConfig, ProviderConfig, ProviderKind};

use thiserror::Error;

/// Failures of the query resolution pipeline.
///
/// `RateLimited` is the transient signal a provider raises for a single call; the
/// retry policy consumes it and, once attempts run out, reports `RateLimitExceeded`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("query not recognized")]
    UnrecognizedQuery,
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },
    #[error("provider error: {0}")]
    Provider(String),
}

impl ResolutionError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ResolutionError::RateLimited(_))
    }

    /// Text suitable for showing to the person who typed the query.
    pub fn user_message(&self) -> String {
        match self {
            ResolutionError::UnrecognizedQuery => {
                "Could not understand the query. Try naming a column, e.g. \"age over 30\".".into()
            }
            ResolutionError::MalformedResponse(_) => {
                "The model returned a response that could not be read as filters.".into()
            }
            ResolutionError::RateLimited(_) | ResolutionError::RateLimitExceeded { .. } => {
                "Rate limit exceeded. Please wait a few minutes before trying again.".into()
            }
            ResolutionError::Provider(msg) => format!("Failed to process query: {msg}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SmartQueryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SmartQueryError>;
