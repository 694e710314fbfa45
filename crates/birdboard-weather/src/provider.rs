//! National Weather Service client.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::WeatherError;
use crate::geo::Coordinates;
use crate::types::{CurrentConditions, ForecastPeriod, LocationWeatherConfig, MAX_FORECAST_PERIODS};
use crate::units::{self, UnitSystem};

pub const NWS_API_BASE: &str = "https://api.weather.gov";

#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub base_url: String,
    /// NWS rejects requests without an identifying User-Agent.
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            base_url: NWS_API_BASE.to_string(),
            user_agent: concat!("Birdboard/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    base_url: String,
}

impl WeatherProvider {
    pub fn new(settings: WeatherSettings) -> Result<Self, WeatherError> {
        if settings.user_agent.trim().is_empty() {
            return Err(WeatherError::InvalidConfiguration("User-Agent is required".into()));
        }
        if settings.base_url.trim().is_empty() {
            return Err(WeatherError::InvalidConfiguration("base URL is not set".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/geo+json"));

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve forecast office, grid and nearest observation station for a
    /// coordinate pair. Coordinates are rounded to 4 dp before the lookup.
    #[instrument(skip(self), level = "info")]
    pub async fn resolve_location(
        &self,
        coordinates: Coordinates,
    ) -> Result<LocationWeatherConfig, WeatherError> {
        let rounded = coordinates.rounded();
        let url = format!("{}/points/{},{}", self.base_url, rounded.latitude, rounded.longitude);
        let point: Feature<PointProperties> = self.get_json(&url).await?;
        let props = point.properties;

        let forecast_office = props
            .cwa
            .or(props.grid_id)
            .ok_or_else(|| WeatherError::Parse("points: missing forecast office".into()))?;
        let (grid_x, grid_y) = match (props.grid_x, props.grid_y) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(WeatherError::Parse("points: missing grid coordinates".into())),
        };
        let forecast_url =
            props.forecast.ok_or_else(|| WeatherError::Parse("points: missing forecast URL".into()))?;
        let stations_url = props
            .observation_stations
            .ok_or_else(|| WeatherError::Parse("points: missing observation stations".into()))?;

        let (station_id, distance_km) = self.nearest_station(&stations_url, &rounded).await?;
        info!(
            station = %station_id,
            distance_km,
            office = %forecast_office,
            "Resolved weather location"
        );

        Ok(LocationWeatherConfig {
            forecast_office,
            grid_x,
            grid_y,
            observation_url: format!("{}/stations/{}/observations/latest", self.base_url, station_id),
            station_id,
            forecast_url,
            coordinates: rounded,
            resolved_at: Utc::now(),
        })
    }

    async fn nearest_station(
        &self,
        stations_url: &str,
        target: &Coordinates,
    ) -> Result<(String, f64), WeatherError> {
        let collection: StationCollection = self.get_json(stations_url).await?;

        collection
            .features
            .into_iter()
            .filter_map(|feature| {
                let id = feature.properties.station_identifier?;
                // GeoJSON order is [lon, lat].
                let coords = feature.geometry?.coordinates;
                let (lon, lat) = (*coords.first()?, *coords.get(1)?);
                Some((id, target.distance_km(&Coordinates::new(lat, lon))))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| WeatherError::NoStation(stations_url.to_string()))
    }

    /// Latest observation from the configured station, in `system` units.
    #[instrument(skip(self, config), fields(station = %config.station_id), level = "info")]
    pub async fn current_conditions(
        &self,
        config: &LocationWeatherConfig,
        system: UnitSystem,
    ) -> Result<CurrentConditions, WeatherError> {
        let observation: Feature<ObservationProperties> = self.get_json(&config.observation_url).await?;
        let p = observation.properties;
        let observed_at =
            p.timestamp.ok_or_else(|| WeatherError::Parse("observation has no timestamp".into()))?;

        let temp_c = p.temperature.as_ref().and_then(Quantity::celsius);
        let wind_kmh = p.wind_speed.as_ref().and_then(Quantity::kmh);
        let humidity = p.relative_humidity.as_ref().and_then(|q| q.value);

        let feels_like = temp_c.map(|c| {
            let f = units::feels_like_f(
                units::celsius_to_fahrenheit(c),
                wind_kmh.map(units::kmh_to_mph),
                humidity,
            );
            match system {
                UnitSystem::Imperial => f,
                UnitSystem::Metric => units::fahrenheit_to_celsius(f),
            }
        });

        let precipitation = |q: &Option<Quantity>| {
            q.as_ref().and_then(Quantity::millimetres).map(|mm| system.precipitation(mm))
        };

        Ok(CurrentConditions {
            observed_at,
            temperature: temp_c.map(|c| system.temperature(c)),
            feels_like,
            dew_point: p.dewpoint.as_ref().and_then(Quantity::celsius).map(|c| system.temperature(c)),
            humidity,
            wind_speed: wind_kmh.map(|s| system.speed(s)),
            wind_direction: p.wind_direction.as_ref().and_then(|q| q.value),
            wind_gust: p.wind_gust.as_ref().and_then(Quantity::kmh).map(|s| system.speed(s)),
            pressure: p.barometric_pressure.as_ref().and_then(|q| q.value).map(units::pascal_to_hpa),
            visibility: p.visibility.as_ref().and_then(Quantity::metres).map(|m| system.distance(m)),
            precipitation_last_hour: precipitation(&p.precipitation_last_hour),
            precipitation_last_3h: precipitation(&p.precipitation_last_3_hours),
            precipitation_last_6h: precipitation(&p.precipitation_last_6_hours),
            condition: p.text_description.filter(|s| !s.is_empty()),
            icon_url: p.icon,
            unit_system: system,
        })
    }

    /// Forecast periods in order, at most [`MAX_FORECAST_PERIODS`].
    #[instrument(skip(self, config), level = "info")]
    pub async fn forecast(
        &self,
        config: &LocationWeatherConfig,
        system: UnitSystem,
    ) -> Result<Vec<ForecastPeriod>, WeatherError> {
        let forecast: Feature<ForecastProperties> = self.get_json(&config.forecast_url).await?;

        let mut periods = Vec::with_capacity(MAX_FORECAST_PERIODS);
        for (index, raw) in forecast.properties.periods.into_iter().enumerate() {
            if periods.len() == MAX_FORECAST_PERIODS {
                break;
            }
            let (Some(start_time), Some(end_time)) = (raw.start_time, raw.end_time) else {
                warn!(index, "Skipping forecast period without start/end time");
                continue;
            };

            let temperature = raw.temperature.map(|t| {
                let is_celsius = raw.temperature_unit.as_deref() == Some("C");
                match (system, is_celsius) {
                    (UnitSystem::Imperial, true) => units::celsius_to_fahrenheit(t),
                    (UnitSystem::Metric, false) => units::fahrenheit_to_celsius(t),
                    _ => t,
                }
            });
            let wind = match (raw.wind_speed, raw.wind_direction) {
                (Some(speed), Some(dir)) if !dir.is_empty() => Some(format!("{} {}", speed, dir)),
                (Some(speed), _) => Some(speed),
                (None, dir) => dir,
            };

            periods.push(ForecastPeriod {
                number: raw.number.unwrap_or(index as u32 + 1),
                name: raw.name.unwrap_or_default(),
                start_time,
                end_time,
                is_daytime: raw.is_daytime.unwrap_or(true),
                temperature,
                precipitation_probability: raw.probability_of_precipitation.and_then(|q| q.value),
                short_forecast: raw.short_forecast,
                wind,
                icon_url: raw.icon,
                detailed_forecast: raw.detailed_forecast,
            });
        }

        debug!(count = periods.len(), "Fetched forecast");
        Ok(periods)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, WeatherError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(WeatherError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| WeatherError::Parse(format!("{}: {}", url, e)))
    }
}

#[derive(Debug, Deserialize)]
struct Feature<P> {
    properties: P,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointProperties {
    cwa: Option<String>,
    grid_id: Option<String>,
    grid_x: Option<i64>,
    grid_y: Option<i64>,
    forecast: Option<String>,
    observation_stations: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StationCollection {
    #[serde(default)]
    features: Vec<StationFeature>,
}

#[derive(Debug, Deserialize)]
struct StationFeature {
    geometry: Option<Geometry>,
    properties: StationProperties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationProperties {
    station_identifier: Option<String>,
}

/// A measured value with its WMO unit code, e.g. `wmoUnit:degC`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quantity {
    unit_code: Option<String>,
    value: Option<f64>,
}

impl Quantity {
    fn unit(&self) -> &str {
        self.unit_code
            .as_deref()
            .and_then(|code| code.rsplit(':').next())
            .unwrap_or("")
    }

    fn celsius(&self) -> Option<f64> {
        let v = self.value?;
        Some(if self.unit() == "degF" { units::fahrenheit_to_celsius(v) } else { v })
    }

    fn kmh(&self) -> Option<f64> {
        let v = self.value?;
        Some(if self.unit() == "m_s-1" { v * 3.6 } else { v })
    }

    fn metres(&self) -> Option<f64> {
        let v = self.value?;
        Some(if self.unit() == "km" { v * 1000.0 } else { v })
    }

    fn millimetres(&self) -> Option<f64> {
        let v = self.value?;
        Some(if self.unit() == "m" { v * 1000.0 } else { v })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationProperties {
    timestamp: Option<DateTime<Utc>>,
    text_description: Option<String>,
    icon: Option<String>,
    temperature: Option<Quantity>,
    dewpoint: Option<Quantity>,
    wind_direction: Option<Quantity>,
    wind_speed: Option<Quantity>,
    wind_gust: Option<Quantity>,
    barometric_pressure: Option<Quantity>,
    visibility: Option<Quantity>,
    relative_humidity: Option<Quantity>,
    precipitation_last_hour: Option<Quantity>,
    #[serde(rename = "precipitationLast3Hours")]
    precipitation_last_3_hours: Option<Quantity>,
    #[serde(rename = "precipitationLast6Hours")]
    precipitation_last_6_hours: Option<Quantity>,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<RawPeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeriod {
    number: Option<u32>,
    name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    is_daytime: Option<bool>,
    temperature: Option<f64>,
    temperature_unit: Option<String>,
    probability_of_precipitation: Option<Quantity>,
    wind_speed: Option<String>,
    wind_direction: Option<String>,
    icon: Option<String>,
    short_forecast: Option<String>,
    detailed_forecast: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> WeatherProvider {
        WeatherProvider::new(WeatherSettings {
            base_url: server.uri(),
            user_agent: "Birdboard-test (test@example.com)".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn config_for(server: &MockServer) -> LocationWeatherConfig {
        LocationWeatherConfig {
            forecast_office: "HGX".into(),
            grid_x: 40,
            grid_y: 90,
            station_id: "KSGR".into(),
            observation_url: format!("{}/stations/KSGR/observations/latest", server.uri()),
            forecast_url: format!("{}/gridpoints/HGX/40,90/forecast", server.uri()),
            coordinates: Coordinates::new(29.6216, -95.6229),
            resolved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_resolve_location_picks_nearest_station() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/points/29.6216,-95.6229"))
            .and(header("accept", "application/geo+json"))
            .and(header("user-agent", "Birdboard-test (test@example.com)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "cwa": "HGX",
                    "gridX": 40,
                    "gridY": 90,
                    "forecast": format!("{}/gridpoints/HGX/40,90/forecast", server.uri()),
                    "observationStations": format!("{}/gridpoints/HGX/40,90/stations", server.uri())
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gridpoints/HGX/40,90/stations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [
                    {"geometry": {"coordinates": [-95.3633, 29.6375]}, "properties": {"stationIdentifier": "KHOU"}},
                    {"geometry": {"coordinates": [-95.6567, 29.6219]}, "properties": {"stationIdentifier": "KSGR"}},
                    {"geometry": null, "properties": {"stationIdentifier": "BROKEN"}}
                ]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let config = provider
            .resolve_location(Coordinates::new(29.621_649, -95.622_91))
            .await
            .unwrap();

        assert_eq!(config.forecast_office, "HGX");
        assert_eq!((config.grid_x, config.grid_y), (40, 90));
        assert_eq!(config.station_id, "KSGR");
        assert_eq!(config.coordinates, Coordinates::new(29.6216, -95.6229));
        assert!(config.observation_url.ends_with("/stations/KSGR/observations/latest"));
    }

    #[tokio::test]
    async fn test_no_stations_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/points/1,2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "gridId": "XYZ", "gridX": 1, "gridY": 1,
                    "forecast": format!("{}/f", server.uri()),
                    "observationStations": format!("{}/s", server.uri())
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/s"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"features": []})))
            .mount(&server)
            .await;

        let result = provider_for(&server).resolve_location(Coordinates::new(1.0, 2.0)).await;
        assert!(matches!(result, Err(WeatherError::NoStation(_))));
    }

    #[tokio::test]
    async fn test_current_conditions_imperial() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/stations/KSGR/observations/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "timestamp": "2024-07-01T19:53:00+00:00",
                    "textDescription": "Mostly Cloudy",
                    "icon": "https://api.weather.gov/icons/land/day/bkn?size=medium",
                    "temperature": {"unitCode": "wmoUnit:degC", "value": 32.68},
                    "dewpoint": {"unitCode": "wmoUnit:degC", "value": 22.0},
                    "windDirection": {"unitCode": "wmoUnit:degree_(angle)", "value": 180},
                    "windSpeed": {"unitCode": "wmoUnit:km_h-1", "value": 16.0},
                    "windGust": {"unitCode": "wmoUnit:km_h-1", "value": null},
                    "barometricPressure": {"unitCode": "wmoUnit:Pa", "value": 101_320},
                    "visibility": {"unitCode": "wmoUnit:m", "value": 16_090},
                    "relativeHumidity": {"unitCode": "wmoUnit:percent", "value": 54.2},
                    "precipitationLastHour": {"unitCode": "wmoUnit:mm", "value": 2.54},
                    "precipitationLast3Hours": {"unitCode": "wmoUnit:mm", "value": null}
                }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let c = provider.current_conditions(&config_for(&server), UnitSystem::Imperial).await.unwrap();

        let temp = c.temperature.unwrap();
        assert!((temp - 90.8).abs() <= 0.1, "got {}", temp);
        assert!(c.feels_like.unwrap() > temp, "heat index should exceed air temperature");
        assert!((c.wind_speed.unwrap() - 9.94).abs() < 0.01);
        assert!(c.wind_gust.is_none());
        assert!((c.pressure.unwrap() - 1013.2).abs() < 1e-9);
        assert!((c.visibility.unwrap() - 10.0).abs() < 0.01);
        assert!((c.precipitation_last_hour.unwrap() - 0.1).abs() < 0.001);
        assert!(c.precipitation_last_3h.is_none());
        assert!(c.precipitation_last_6h.is_none());
        assert_eq!(c.condition.as_deref(), Some("Mostly Cloudy"));
        assert_eq!(c.unit_system, UnitSystem::Imperial);
    }

    #[tokio::test]
    async fn test_current_conditions_metric() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/stations/KSGR/observations/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "timestamp": "2024-01-10T12:00:00Z",
                    "temperature": {"unitCode": "wmoUnit:degC", "value": 2.0},
                    "windSpeed": {"unitCode": "wmoUnit:km_h-1", "value": 30.0},
                    "visibility": {"unitCode": "wmoUnit:m", "value": 8000}
                }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let c = provider.current_conditions(&config_for(&server), UnitSystem::Metric).await.unwrap();

        assert_eq!(c.temperature, Some(2.0));
        assert!(c.feels_like.unwrap() < 2.0, "wind chill should apply");
        assert_eq!(c.wind_speed, Some(30.0));
        assert_eq!(c.visibility, Some(8.0));
        assert!(c.humidity.is_none());
    }

    #[tokio::test]
    async fn test_forecast_is_capped_and_ordered() {
        let server = MockServer::start().await;

        let periods: Vec<_> = (1..=16)
            .map(|n| {
                json!({
                    "number": n,
                    "name": format!("Period {}", n),
                    "startTime": "2024-07-01T18:00:00-05:00",
                    "endTime": "2024-07-02T06:00:00-05:00",
                    "isDaytime": n % 2 == 1,
                    "temperature": 86,
                    "temperatureUnit": "F",
                    "probabilityOfPrecipitation": {"unitCode": "wmoUnit:percent", "value": 20},
                    "windSpeed": "5 to 10 mph",
                    "windDirection": "SSE",
                    "shortForecast": "Slight Chance Showers",
                    "detailedForecast": "A slight chance of showers."
                })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path("/gridpoints/HGX/40,90/forecast"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"properties": {"periods": periods}})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let config = config_for(&server);

        let forecast = provider.forecast(&config, UnitSystem::Imperial).await.unwrap();
        assert_eq!(forecast.len(), MAX_FORECAST_PERIODS);
        assert_eq!(forecast[0].number, 1);
        assert_eq!(forecast[13].name, "Period 14");
        assert_eq!(forecast[0].temperature, Some(86.0));
        assert_eq!(forecast[0].wind.as_deref(), Some("5 to 10 mph SSE"));
        assert_eq!(forecast[0].precipitation_probability, Some(20.0));
        assert_eq!(forecast[0].start_time.to_rfc3339(), "2024-07-01T23:00:00+00:00");
        assert!(!forecast[1].is_daytime);

        let metric = provider.forecast(&config, UnitSystem::Metric).await.unwrap();
        assert!((metric[0].temperature.unwrap() - 30.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.forecast(&config_for(&server), UnitSystem::Imperial).await.unwrap_err();

        assert!(matches!(err, WeatherError::HttpStatus { status: 500, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_empty_user_agent_rejected() {
        let settings = WeatherSettings {
            user_agent: String::new(),
            ..WeatherSettings::default()
        };
        assert!(matches!(
            WeatherProvider::new(settings),
            Err(WeatherError::InvalidConfiguration(_))
        ));
    }
}
