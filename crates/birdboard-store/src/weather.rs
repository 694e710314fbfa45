//! Weather snapshot: location config, current conditions and forecast.

use birdboard_weather::{
    Coordinates, CurrentConditions, ForecastPeriod, LocationWeatherConfig, UnitSystem,
    MAX_FORECAST_PERIODS,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::StoreError;
use crate::store::{from_sql_time, to_sql_time, StoreTx};

fn unit_system_from_sql(raw: &str) -> rusqlite::Result<UnitSystem> {
    match raw {
        "imperial" => Ok(UnitSystem::Imperial),
        "metric" => Ok(UnitSystem::Metric),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown unit system '{}'", other).into(),
        )),
    }
}

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<LocationWeatherConfig> {
    Ok(LocationWeatherConfig {
        forecast_office: row.get(0)?,
        grid_x: row.get(1)?,
        grid_y: row.get(2)?,
        station_id: row.get(3)?,
        observation_url: row.get(4)?,
        forecast_url: row.get(5)?,
        coordinates: Coordinates::new(row.get(6)?, row.get(7)?),
        resolved_at: from_sql_time(8, row.get(8)?)?,
    })
}

fn row_to_conditions(row: &Row<'_>) -> rusqlite::Result<CurrentConditions> {
    let units: String = row.get(15)?;
    Ok(CurrentConditions {
        observed_at: from_sql_time(0, row.get(0)?)?,
        temperature: row.get(1)?,
        feels_like: row.get(2)?,
        dew_point: row.get(3)?,
        humidity: row.get(4)?,
        wind_speed: row.get(5)?,
        wind_direction: row.get(6)?,
        wind_gust: row.get(7)?,
        pressure: row.get(8)?,
        visibility: row.get(9)?,
        precipitation_last_hour: row.get(10)?,
        precipitation_last_3h: row.get(11)?,
        precipitation_last_6h: row.get(12)?,
        condition: row.get(13)?,
        icon_url: row.get(14)?,
        unit_system: unit_system_from_sql(&units)?,
    })
}

fn row_to_period(row: &Row<'_>) -> rusqlite::Result<ForecastPeriod> {
    Ok(ForecastPeriod {
        number: row.get(0)?,
        name: row.get(1)?,
        start_time: from_sql_time(2, row.get(2)?)?,
        end_time: from_sql_time(3, row.get(3)?)?,
        is_daytime: row.get::<_, i64>(4)? != 0,
        temperature: row.get(5)?,
        precipitation_probability: row.get(6)?,
        short_forecast: row.get(7)?,
        wind: row.get(8)?,
        icon_url: row.get(9)?,
        detailed_forecast: row.get(10)?,
    })
}

impl StoreTx<'_> {
    pub fn weather_config(&self) -> Result<Option<LocationWeatherConfig>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT forecast_office, grid_x, grid_y, station_id, observation_url, forecast_url,
                        latitude, longitude, resolved_at
                 FROM location_weather_config WHERE id = 1",
                [],
                row_to_config,
            )
            .optional()?)
    }

    pub fn current_conditions(&self) -> Result<Option<CurrentConditions>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT observed_at, temperature, feels_like, dew_point, humidity, wind_speed,
                        wind_direction, wind_gust, pressure, visibility, precipitation_last_hour,
                        precipitation_last_3h, precipitation_last_6h, condition, icon_url, unit_system
                 FROM current_conditions WHERE id = 1",
                [],
                row_to_conditions,
            )
            .optional()?)
    }

    /// Forecast periods in stored order.
    pub fn forecast(&self) -> Result<Vec<ForecastPeriod>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT number, name, start_time, end_time, is_daytime, temperature,
                    precipitation_probability, short_forecast, wind, icon_url, detailed_forecast
             FROM forecast_periods ORDER BY period_index",
        )?;
        let rows = stmt.query_map([], row_to_period)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace the weather snapshot. `config` is written only when given; the
    /// conditions row and all forecast periods are always replaced.
    pub fn replace_weather_snapshot(
        &self,
        config: Option<&LocationWeatherConfig>,
        conditions: &CurrentConditions,
        forecast: &[ForecastPeriod],
    ) -> Result<(), StoreError> {
        if forecast.len() > MAX_FORECAST_PERIODS {
            return Err(StoreError::Invalid(format!(
                "forecast has {} periods, at most {} allowed",
                forecast.len(),
                MAX_FORECAST_PERIODS
            )));
        }

        if let Some(config) = config {
            self.conn.execute(
                "INSERT OR REPLACE INTO location_weather_config
                     (id, forecast_office, grid_x, grid_y, station_id, observation_url, forecast_url,
                      latitude, longitude, resolved_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    config.forecast_office,
                    config.grid_x,
                    config.grid_y,
                    config.station_id,
                    config.observation_url,
                    config.forecast_url,
                    config.coordinates.latitude,
                    config.coordinates.longitude,
                    to_sql_time(&config.resolved_at),
                ],
            )?;
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO current_conditions
                 (id, observed_at, temperature, feels_like, dew_point, humidity, wind_speed,
                  wind_direction, wind_gust, pressure, visibility, precipitation_last_hour,
                  precipitation_last_3h, precipitation_last_6h, condition, icon_url, unit_system,
                  updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                to_sql_time(&conditions.observed_at),
                conditions.temperature,
                conditions.feels_like,
                conditions.dew_point,
                conditions.humidity,
                conditions.wind_speed,
                conditions.wind_direction,
                conditions.wind_gust,
                conditions.pressure,
                conditions.visibility,
                conditions.precipitation_last_hour,
                conditions.precipitation_last_3h,
                conditions.precipitation_last_6h,
                conditions.condition,
                conditions.icon_url,
                conditions.unit_system.as_str(),
                to_sql_time(&Utc::now()),
            ],
        )?;

        self.conn.execute("DELETE FROM forecast_periods", [])?;
        let mut insert = self.conn.prepare(
            "INSERT INTO forecast_periods
                 (period_index, number, name, start_time, end_time, is_daytime, temperature,
                  precipitation_probability, short_forecast, wind, icon_url, detailed_forecast)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for (index, period) in forecast.iter().enumerate() {
            insert.execute(params![
                index as i64,
                period.number,
                period.name,
                to_sql_time(&period.start_time),
                to_sql_time(&period.end_time),
                period.is_daytime as i64,
                period.temperature,
                period.precipitation_probability,
                period.short_forecast,
                period.wind,
                period.icon_url,
                period.detailed_forecast,
            ])?;
        }

        tracing::debug!(periods = forecast.len(), config_replaced = config.is_some(), "Replaced weather snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::Store;
    use chrono::{DateTime, Duration};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn config() -> LocationWeatherConfig {
        LocationWeatherConfig {
            forecast_office: "HGX".into(),
            grid_x: 40,
            grid_y: 90,
            station_id: "KSGR".into(),
            observation_url: "https://api.weather.gov/stations/KSGR/observations/latest".into(),
            forecast_url: "https://api.weather.gov/gridpoints/HGX/40,90/forecast".into(),
            coordinates: Coordinates::new(29.6216, -95.6229),
            resolved_at: ts("2024-05-01T00:00:00Z"),
        }
    }

    fn conditions(temp: f64) -> CurrentConditions {
        CurrentConditions {
            observed_at: ts("2024-05-01T12:00:00Z"),
            temperature: Some(temp),
            feels_like: Some(temp),
            dew_point: None,
            humidity: Some(55.0),
            wind_speed: Some(4.0),
            wind_direction: Some(180.0),
            wind_gust: None,
            pressure: Some(1013.2),
            visibility: Some(10.0),
            precipitation_last_hour: None,
            precipitation_last_3h: None,
            precipitation_last_6h: None,
            condition: Some("Sunny".into()),
            icon_url: None,
            unit_system: UnitSystem::Imperial,
        }
    }

    fn periods(n: usize) -> Vec<ForecastPeriod> {
        let start = ts("2024-05-01T18:00:00Z");
        (0..n)
            .map(|i| ForecastPeriod {
                number: i as u32 + 1,
                name: format!("Period {}", i + 1),
                start_time: start + Duration::hours(12 * i as i64),
                end_time: start + Duration::hours(12 * (i as i64 + 1)),
                is_daytime: i % 2 == 1,
                temperature: Some(80.0 - i as f64),
                precipitation_probability: Some(10.0),
                short_forecast: Some("Clear".into()),
                wind: Some("5 mph S".into()),
                icon_url: None,
                detailed_forecast: None,
            })
            .collect()
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = Store::in_memory().unwrap();
        store
            .write(|tx| tx.replace_weather_snapshot(Some(&config()), &conditions(90.8), &periods(14)))
            .unwrap();

        store
            .read(|tx| -> Result<(), StoreError> {
                assert_eq!(tx.weather_config()?, Some(config()));
                assert_eq!(tx.current_conditions()?, Some(conditions(90.8)));
                let forecast = tx.forecast()?;
                assert_eq!(forecast, periods(14));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_replace_without_config_keeps_existing_config() {
        let store = Store::in_memory().unwrap();
        store
            .write(|tx| tx.replace_weather_snapshot(Some(&config()), &conditions(70.0), &periods(14)))
            .unwrap();
        store
            .write(|tx| tx.replace_weather_snapshot(None, &conditions(72.0), &periods(3)))
            .unwrap();

        store
            .read(|tx| -> Result<(), StoreError> {
                assert_eq!(tx.weather_config()?, Some(config()));
                assert_eq!(tx.current_conditions()?.unwrap().temperature, Some(72.0));
                assert_eq!(tx.forecast()?.len(), 3);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_oversized_forecast_leaves_snapshot_intact() {
        let store = Store::in_memory().unwrap();
        store
            .write(|tx| tx.replace_weather_snapshot(Some(&config()), &conditions(70.0), &periods(2)))
            .unwrap();

        let result = store.write(|tx| tx.replace_weather_snapshot(None, &conditions(99.0), &periods(15)));
        assert!(matches!(result, Err(StoreError::Invalid(_))));

        let current = store.read(|tx| tx.current_conditions()).unwrap().unwrap();
        assert_eq!(current.temperature, Some(70.0));
        assert_eq!(store.read(|tx| tx.forecast()).unwrap().len(), 2);
    }
}
