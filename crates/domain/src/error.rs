/// Shared error type used across all Drover crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("model {model}: {message}")]
    Model { model: String, message: String },

    #[error("model {model} has been sunset")]
    ModelSunset { model: String },

    #[error("rate limited")]
    RateLimited,

    #[error("tool: {0}")]
    Tool(String),

    #[error("checkpoint: {0}")]
    Checkpoint(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient errors are retried at the call site; everything else
    /// escalates to the recovery path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_) | Error::RateLimited)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
