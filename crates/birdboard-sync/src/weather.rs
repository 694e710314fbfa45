//! Weather sync pass.
//!
//! Reads the station coordinates, reuses or re-resolves the weather location,
//! and replaces the stored snapshot. Nothing is written unless every fetch
//! succeeded.

use std::sync::Arc;

use birdboard_store::Store;
use birdboard_weather::{Coordinates, LocationWeatherConfig, UnitSystem, WeatherProvider};
use tracing::{debug, info, instrument};

use crate::error::SyncError;
use crate::retry::{with_retry, RetryConfig};
use crate::{store_read, store_write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherOutcome {
    /// No station coordinates are known yet.
    Skipped,
    Updated {
        /// The location was resolved again instead of reused.
        config_refreshed: bool,
        forecast_periods: usize,
    },
}

pub struct WeatherSync {
    store: Arc<Store>,
    provider: WeatherProvider,
    unit_system: UnitSystem,
    tolerance_km: f64,
    retry: RetryConfig,
}

impl WeatherSync {
    pub fn new(store: Arc<Store>, provider: WeatherProvider) -> Self {
        Self {
            store,
            provider,
            unit_system: UnitSystem::default(),
            tolerance_km: 1.0,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_unit_system(mut self, unit_system: UnitSystem) -> Self {
        self.unit_system = unit_system;
        self
    }

    /// Station movement beyond this distance forces a new location lookup.
    pub fn with_tolerance_km(mut self, tolerance_km: f64) -> Self {
        self.tolerance_km = tolerance_km;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip(self), level = "info")]
    pub async fn sync(&self) -> Result<WeatherOutcome, SyncError> {
        let (station, stored) =
            store_read(&self.store, |tx| Ok((tx.station_coordinates()?, tx.weather_config()?))).await?;

        let Some(station) = station else {
            info!("No station coordinates stored yet; skipping weather sync");
            return Ok(WeatherOutcome::Skipped);
        };

        let (config, config_refreshed) = match stored {
            Some(config) if within_tolerance(&config, &station, self.tolerance_km) => {
                debug!(station = %config.station_id, "Reusing weather location");
                (config, false)
            }
            previous => {
                if let Some(previous) = &previous {
                    info!(
                        moved_km = previous.coordinates.distance_km(&station),
                        "Station moved beyond tolerance; resolving weather location again"
                    );
                }
                let resolved =
                    with_retry(&self.retry, "weather location", || self.provider.resolve_location(station))
                        .await?;
                (resolved, true)
            }
        };

        let system = self.unit_system;
        let conditions = with_retry(&self.retry, "current conditions", || {
            self.provider.current_conditions(&config, system)
        })
        .await?;
        let forecast =
            with_retry(&self.retry, "forecast", || self.provider.forecast(&config, system)).await?;

        let forecast_periods = forecast.len();
        store_write(&self.store, move |tx| {
            let refreshed = config_refreshed.then_some(&config);
            Ok(tx.replace_weather_snapshot(refreshed, &conditions, &forecast)?)
        })
        .await?;

        info!(config_refreshed, forecast_periods, "Weather sync complete");
        Ok(WeatherOutcome::Updated {
            config_refreshed,
            forecast_periods,
        })
    }
}

fn within_tolerance(config: &LocationWeatherConfig, station: &Coordinates, tolerance_km: f64) -> bool {
    config.coordinates.distance_km(station) <= tolerance_km
}
