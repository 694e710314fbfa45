//! Weather service for Birdboard
//!
//! Resolves a coordinate pair to its NWS forecast office, grid and nearest
//! observation station, and fetches current conditions and forecasts in the
//! configured display units.

pub mod error;
pub mod geo;
pub mod provider;
pub mod types;
pub mod units;

pub use error::WeatherError;
pub use geo::{haversine_km, Coordinates};
pub use provider::{WeatherProvider, WeatherSettings, NWS_API_BASE};
pub use types::*;
pub use units::UnitSystem;
