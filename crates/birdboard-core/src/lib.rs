//! Shared configuration and process setup for Birdboard.

pub mod config;
pub mod error;

pub use config::{
    BirdWeatherConfig, Config, DatabaseConfig, SchedulerConfig, UnitSystem, ValidationResult,
    WeatherConfig,
};
pub use error::ConfigError;

/// Initialize tracing/logging for the process
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Birdboard core initialized");
}
