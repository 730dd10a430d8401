//! Error types for market analysis operations

use thiserror::Error;

/// Market analysis specific errors
#[derive(Debug, Error)]
pub enum MarketError {
    /// A required input field is missing or empty
    #[error("{0}")]
    MissingInput(String),

    /// Chart image could not be decoded
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Price records could not be turned into a series
    #[error("Malformed price series: {0}")]
    MalformedSeries(String),

    /// Technical indicator calculation error
    #[error("Technical indicator error: {0}")]
    IndicatorError(String),

    /// Text classifier failed or returned an unusable result
    #[error("Classifier error: {0}")]
    ClassifierError(String),

    /// Captioning or question-answering provider failed
    #[error("Vision provider error: {0}")]
    VisionError(String),

    /// Report synthesis produced output outside its contract
    #[error("Report synthesis error: {0}")]
    ReportSynthesis(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// File system error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for market analysis operations
pub type Result<T> = std::result::Result<T, MarketError>;

impl From<image::ImageError> for MarketError {
    fn from(err: image::ImageError) -> Self {
        MarketError::ImageDecode(err.to_string())
    }
}

impl From<ta::errors::TaError> for MarketError {
    fn from(err: ta::errors::TaError) -> Self {
        MarketError::IndicatorError(format!("{err:?}"))
    }
}

/// Convert MarketError to agent_core::Error
impl From<MarketError> for agent_core::Error {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::MissingInput(msg) => agent_core::Error::Validation(msg),
            other => agent_core::Error::ProcessingFailed(other.to_string()),
        }
    }
}

/// Convert agent_core::Error to MarketError
impl From<agent_core::Error> for MarketError {
    fn from(err: agent_core::Error) -> Self {
        match err {
            agent_core::Error::Validation(msg) => MarketError::MissingInput(msg),
            other => MarketError::Other(other.to_string()),
        }
    }
}
