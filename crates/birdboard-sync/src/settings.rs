//! Runtime settings derived from the loaded [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use birdboard_birdweather::BirdWeatherSettings;
use birdboard_core::{Config, ConfigError, UnitSystem as ConfiguredUnits};
use birdboard_weather::{UnitSystem, WeatherSettings};

use crate::retry::RetryConfig;

/// Everything the sync engines and the scheduler need, resolved once at
/// startup.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub birdweather: BirdWeatherSettings,
    pub weather: WeatherSettings,
    pub unit_system: UnitSystem,
    pub coordinate_tolerance_km: f64,
    /// Species queried individually; empty means the unfiltered top-species query.
    pub tracked_species: Vec<String>,
    /// Size of the first pass window when no watermark exists yet.
    pub historical_days: u32,
    pub images_dir: PathBuf,
    pub interval: Duration,
    pub retry: RetryConfig,
}

impl SyncSettings {
    /// Resolve settings, failing when the API key or station is missing.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config
            .birdweather
            .effective_api_key()
            .ok_or_else(|| ConfigError::MissingSetting("birdweather.api_key".into()))?;
        let station_id = config
            .birdweather
            .station_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSetting("birdweather.station_id".into()))?;

        if config.scheduler.interval_minutes == 0 {
            return Err(ConfigError::Invalid("scheduler.interval_minutes must be at least 1".into()));
        }

        let request_timeout = Duration::from_secs(config.birdweather.request_timeout_secs.max(1));

        Ok(Self {
            birdweather: BirdWeatherSettings {
                api_url: config.birdweather.api_url.clone(),
                api_key: Some(api_key),
                station_id: Some(station_id),
                request_timeout,
            },
            weather: WeatherSettings {
                base_url: config.weather.base_url.clone(),
                user_agent: config.weather.user_agent.clone(),
                request_timeout,
            },
            unit_system: match config.weather.unit_system {
                ConfiguredUnits::Imperial => UnitSystem::Imperial,
                ConfiguredUnits::Metric => UnitSystem::Metric,
            },
            coordinate_tolerance_km: config.weather.coordinate_tolerance_km,
            tracked_species: config
                .birdweather
                .tracked_species
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            historical_days: config.database.historical_days,
            images_dir: config.database.images_dir.clone(),
            interval: Duration::from_secs(u64::from(config.scheduler.interval_minutes) * 60),
            retry: RetryConfig::default(),
        })
    }
}
