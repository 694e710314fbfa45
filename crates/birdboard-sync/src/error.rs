//! Sync engine errors.

use birdboard_birdweather::BirdWeatherError;
use birdboard_core::ConfigError;
use birdboard_store::StoreError;
use birdboard_weather::WeatherError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    BirdWeather(#[from] BirdWeatherError),

    #[error(transparent)]
    Weather(#[from] WeatherError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Image download failed for {url}: {reason}")]
    Image { url: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Detection handler failed: {0}")]
    Handler(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Some species failed while others were committed.
    #[error("Partial sync failure: {failed} species failed, {succeeded} succeeded")]
    PartialFailure { failed: usize, succeeded: usize },
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BirdWeather(e) => e.is_retryable(),
            Self::Weather(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Image {
            url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            reason: e.to_string(),
        }
    }
}
