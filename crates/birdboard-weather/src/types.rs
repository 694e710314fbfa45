use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::units::UnitSystem;

/// Most forecast periods kept (day/night pairs over seven days).
pub const MAX_FORECAST_PERIODS: usize = 14;

/// Static metadata resolved for one coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationWeatherConfig {
    /// Forecast office identifier, e.g. "HGX".
    pub forecast_office: String,
    pub grid_x: i64,
    pub grid_y: i64,
    pub station_id: String,
    pub observation_url: String,
    pub forecast_url: String,
    /// Coordinates the config was resolved for, rounded to 4 dp.
    pub coordinates: Coordinates,
    pub resolved_at: DateTime<Utc>,
}

/// Latest observation converted to the display unit system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub observed_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub dew_point: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Degrees from true north.
    pub wind_direction: Option<f64>,
    pub wind_gust: Option<f64>,
    /// hPa in both unit systems.
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub precipitation_last_hour: Option<f64>,
    pub precipitation_last_3h: Option<f64>,
    pub precipitation_last_6h: Option<f64>,
    pub condition: Option<String>,
    pub icon_url: Option<String>,
    pub unit_system: UnitSystem,
}

/// One named forecast period ("Tonight", "Wednesday").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    pub number: u32,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_daytime: bool,
    pub temperature: Option<f64>,
    /// Percent chance of precipitation.
    pub precipitation_probability: Option<f64>,
    pub short_forecast: Option<String>,
    /// Speed and direction, e.g. "5 to 10 mph SW".
    pub wind: Option<String>,
    pub icon_url: Option<String>,
    pub detailed_forecast: Option<String>,
}
