//! BirdWeather client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BirdWeatherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The service answered with a GraphQL `errors` payload.
    #[error("BirdWeather API error: {0}")]
    Remote(String),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status without a GraphQL error body.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Unexpected response shape: {0}")]
    Decode(String),
}

impl BirdWeatherError {
    /// Whether the failure is transient and the caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::InvalidConfiguration(_) | Self::Remote(_) | Self::Decode(_) => false,
        }
    }

    /// Whether the failure came from a timed-out request.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
