/// Weather provider errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("No observation station found near {0}")]
    NoStation(String),
}

impl WeatherError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::InvalidConfiguration(_) | Self::Parse(_) | Self::NoStation(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |s| WeatherError::HttpStatus { status: s, url: String::new(), body: String::new() };
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!WeatherError::Parse("bad".into()).is_retryable());
    }
}
