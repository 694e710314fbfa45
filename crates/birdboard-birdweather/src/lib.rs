//! BirdWeather integration for Birdboard.
//!
//! GraphQL client for detection statistics, species metadata and station
//! state, plus a cursor pager over raw detections.

pub mod client;
pub mod error;
pub mod graphql;
pub mod pager;
pub mod types;

pub use client::{BirdWeatherClient, BirdWeatherSettings, DEFAULT_API_URL};
pub use error::BirdWeatherError;
pub use graphql::FieldMapping;
pub use pager::DetectionPager;
pub use types::{
    AqiStatus, DailyCount, Detection, DetectionPage, DetectionQuery, EnvironmentSensors, Period,
    PeriodUnit, SpeciesInfo, SpeciesStats, StationInfo, SystemSensors,
};
