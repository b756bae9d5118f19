use thiserror::Error;

pub type Result<T> = std::result::Result<T, StressError>;

#[derive(Error, Debug)]
pub enum StressError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid test configuration: {0}")]
    InvalidConfiguration(String),
    #[error("A stress test is already running")]
    AlreadyRunning,
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Histogram error: {0}")]
    Histogram(String),
}

/// Signals an executor raises instead of producing a sample.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    #[error("request cancelled")]
    Cancelled,
    #[error("cannot dispatch request: {0}")]
    Fatal(String),
}

