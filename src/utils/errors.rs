use thiserror::Error;

/// Main error type for Colloquy
#[derive(Error, Debug)]
pub enum ColloquyError {
    /// Empty or missing required input. Conversation state is unchanged.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown provider: '{0}'")]
    UnknownProvider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend could not be reached or loaded.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Failure after generation started. Partial output is never committed.
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Answer not ready: {0}")]
    NotReady(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ColloquyError {
    /// Map a reqwest failure onto the taxonomy: connect/timeout problems mean the
    /// backend is unreachable, anything else happened mid-generation.
    pub fn from_http(err: reqwest::Error, endpoint: &str) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::BackendUnavailable(format!("{} ({})", endpoint, err))
        } else {
            Self::Generation(format!("{} ({})", endpoint, err))
        }
    }
}
