use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// BirdWeather GraphQL API settings
    #[serde(default)]
    pub birdweather: BirdWeatherConfig,

    /// Local database and media cache
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Weather service settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Background refresh settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirdWeatherConfig {
    /// GraphQL endpoint
    #[serde(default = "default_birdweather_url")]
    pub api_url: String,

    /// API token (`BIRDWEATHER_API_KEY` overrides the file value)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Station whose detections are mirrored locally
    #[serde(default)]
    pub station_id: Option<String>,

    /// When non-empty, species statistics are fetched one species at a time
    /// for exactly these ids instead of through the unfiltered top-species call.
    #[serde(default)]
    pub tracked_species: Vec<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_birdweather_url() -> String {
    "https://app.birdweather.com/graphql".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for BirdWeatherConfig {
    fn default() -> Self {
        Self {
            api_url: default_birdweather_url(),
            api_key: None,
            station_id: None,
            tracked_species: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BirdWeatherConfig {
    /// The API key, preferring the environment over the config file.
    pub fn effective_api_key(&self) -> Option<String> {
        std::env::var("BIRDWEATHER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Directory that receives downloaded species images
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Lookback window for the very first species sync
    #[serde(default = "default_historical_days")]
    pub historical_days: u32,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("birdboard")
}

fn default_database_path() -> PathBuf {
    data_dir().join("birdboard.db")
}

fn default_images_dir() -> PathBuf {
    data_dir().join("img").join("birds")
}

fn default_historical_days() -> u32 {
    60
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            images_dir: default_images_dir(),
            historical_days: default_historical_days(),
        }
    }
}

/// Display unit preference for weather readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Imperial,
    Metric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Weather service root
    #[serde(default = "default_weather_url")]
    pub base_url: String,

    /// The weather service rejects requests without an identifying agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub unit_system: UnitSystem,

    /// Station movement (great-circle, km) that forces forecast-office and
    /// observation-station re-resolution
    #[serde(default = "default_coordinate_tolerance_km")]
    pub coordinate_tolerance_km: f64,
}

fn default_weather_url() -> String {
    "https://api.weather.gov".to_string()
}

fn default_user_agent() -> String {
    format!("Birdboard/{} (birdboard@localhost)", env!("CARGO_PKG_VERSION"))
}

fn default_coordinate_tolerance_km() -> f64 {
    1.0
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_url(),
            user_agent: default_user_agent(),
            unit_system: UnitSystem::default(),
            coordinate_tolerance_km: default_coordinate_tolerance_km(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minutes between refresh passes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

fn default_interval_minutes() -> u32 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file, writing defaults if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(config_path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match config_path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.birdweather.api_url, "birdweather.api_url", &mut result);
        self.validate_url(&self.weather.base_url, "weather.base_url", &mut result);

        if self.birdweather.effective_api_key().is_none() {
            result.add_warning(
                "birdweather.api_key",
                "No API key configured - species sync will fail",
            );
        }

        match self.birdweather.station_id.as_deref() {
            None => result.add_warning(
                "birdweather.station_id",
                "No station configured - species sync will fail",
            ),
            Some(id) if id.trim().is_empty() => {
                result.add_error("birdweather.station_id", "Station id must not be blank")
            }
            Some(_) => {}
        }

        if self.birdweather.tracked_species.iter().any(|s| s.trim().is_empty()) {
            result.add_error("birdweather.tracked_species", "Species ids must not be blank");
        }

        if self.birdweather.request_timeout_secs == 0 {
            result.add_error(
                "birdweather.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if self.database.historical_days == 0 {
            result.add_error(
                "database.historical_days",
                "Historical lookback must be at least one day",
            );
        } else if self.database.historical_days > 365 {
            result.add_warning(
                "database.historical_days",
                "Historical lookback is more than a year; the first sync may be slow",
            );
        }

        if !self.weather.coordinate_tolerance_km.is_finite()
            || self.weather.coordinate_tolerance_km <= 0.0
        {
            result.add_error(
                "weather.coordinate_tolerance_km",
                "Coordinate tolerance must be a positive distance",
            );
        }

        if self.weather.user_agent.trim().is_empty() {
            result.add_error("weather.user_agent", "User agent must not be empty");
        }

        if self.scheduler.interval_minutes == 0 {
            result.add_error(
                "scheduler.interval_minutes",
                "Refresh interval must be greater than 0",
            );
        } else if self.scheduler.interval_minutes > 1440 {
            result.add_warning(
                "scheduler.interval_minutes",
                "Refresh interval is more than 24 hours",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("platform config directory".into()))?
            .join("birdboard");

        Ok(config_dir.join("config.toml"))
    }
}
