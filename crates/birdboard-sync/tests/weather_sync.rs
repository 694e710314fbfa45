//! Integration tests for the weather sync engine using wiremock.

use std::sync::Arc;
use std::time::Duration;

use birdboard_store::{Store, StoreError};
use birdboard_sync::{RetryConfig, WeatherOutcome, WeatherSync};
use birdboard_weather::{
    Coordinates, CurrentConditions, LocationWeatherConfig, UnitSystem, WeatherProvider, WeatherSettings,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(server: &MockServer, store: &Arc<Store>) -> WeatherSync {
    let provider = WeatherProvider::new(WeatherSettings {
        base_url: server.uri(),
        user_agent: "Birdboard-test (test@example.com)".into(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap();
    WeatherSync::new(Arc::clone(store), provider)
        .with_unit_system(UnitSystem::Imperial)
        .with_tolerance_km(1.0)
        .with_retry(RetryConfig::none())
}

fn cached_config(server: &MockServer) -> LocationWeatherConfig {
    LocationWeatherConfig {
        forecast_office: "HGX".into(),
        grid_x: 40,
        grid_y: 90,
        station_id: "KSGR".into(),
        observation_url: format!("{}/stations/KSGR/observations/latest", server.uri()),
        forecast_url: format!("{}/gridpoints/HGX/40,90/forecast", server.uri()),
        coordinates: Coordinates::new(29.6216, -95.6229),
        resolved_at: "2024-05-01T00:00:00Z".parse().unwrap(),
    }
}

fn stale_conditions() -> CurrentConditions {
    CurrentConditions {
        observed_at: "2024-06-30T12:00:00Z".parse().unwrap(),
        temperature: Some(70.0),
        feels_like: Some(70.0),
        dew_point: None,
        humidity: None,
        wind_speed: None,
        wind_direction: None,
        wind_gust: None,
        pressure: None,
        visibility: None,
        precipitation_last_hour: None,
        precipitation_last_3h: None,
        precipitation_last_6h: None,
        condition: Some("Clear".into()),
        icon_url: None,
        unit_system: UnitSystem::Imperial,
    }
}

/// Points lookup and station list for the office at HGX 40,90.
async fn mount_points(server: &MockServer, lat_lon: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/points/{}", lat_lon)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": {
                "cwa": "HGX",
                "gridX": 40,
                "gridY": 90,
                "forecast": format!("{}/gridpoints/HGX/40,90/forecast", server.uri()),
                "observationStations": format!("{}/gridpoints/HGX/40,90/stations", server.uri())
            }
        })))
        .expect(calls)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gridpoints/HGX/40,90/stations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [
                {"geometry": {"coordinates": [-95.3633, 29.6375]}, "properties": {"stationIdentifier": "KHOU"}},
                {"geometry": {"coordinates": [-95.6567, 29.6219]}, "properties": {"stationIdentifier": "KSGR"}}
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_observation_and_forecast(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/stations/KSGR/observations/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": {
                "timestamp": "2024-07-01T19:53:00+00:00",
                "textDescription": "Mostly Cloudy",
                "temperature": {"unitCode": "wmoUnit:degC", "value": 32.68},
                "windSpeed": {"unitCode": "wmoUnit:km_h-1", "value": 16.0},
                "relativeHumidity": {"unitCode": "wmoUnit:percent", "value": 54.2},
                "barometricPressure": {"unitCode": "wmoUnit:Pa", "value": 101_320}
            }
        })))
        .mount(server)
        .await;

    let periods: Vec<_> = (1..=14)
        .map(|n| {
            json!({
                "number": n,
                "name": format!("Period {}", n),
                "startTime": "2024-07-01T18:00:00-05:00",
                "endTime": "2024-07-02T06:00:00-05:00",
                "isDaytime": n % 2 == 1,
                "temperature": 88,
                "temperatureUnit": "F",
                "windSpeed": "5 mph",
                "windDirection": "S",
                "shortForecast": "Sunny"
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/gridpoints/HGX/40,90/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"properties": {"periods": periods}})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_skipped_without_station_coordinates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(Store::in_memory().unwrap());
    let outcome = engine(&server, &store).sync().await.unwrap();
    assert_eq!(outcome, WeatherOutcome::Skipped);
    assert!(store.read(|tx| tx.current_conditions()).unwrap().is_none());
}

#[tokio::test]
async fn test_first_sync_resolves_location_and_stores_snapshot() {
    let server = MockServer::start().await;
    mount_points(&server, "29.6216,-95.6229", 1).await;
    mount_observation_and_forecast(&server).await;

    let store = Arc::new(Store::in_memory().unwrap());
    store
        .write(|tx| tx.set_station_coordinates(Coordinates::new(29.621_631, -95.622_874)))
        .unwrap();

    let outcome = engine(&server, &store).sync().await.unwrap();
    assert_eq!(
        outcome,
        WeatherOutcome::Updated {
            config_refreshed: true,
            forecast_periods: 14
        }
    );

    let config = store.read(|tx| tx.weather_config()).unwrap().unwrap();
    assert_eq!(config.station_id, "KSGR");
    assert_eq!(config.coordinates, Coordinates::new(29.6216, -95.6229));

    let conditions = store.read(|tx| tx.current_conditions()).unwrap().unwrap();
    let temp = conditions.temperature.unwrap();
    assert!((temp - 90.8).abs() <= 0.1, "got {}", temp);
    assert!(conditions.feels_like.unwrap() > temp);
    assert_eq!(store.read(|tx| tx.forecast()).unwrap().len(), 14);
}

#[tokio::test]
async fn test_small_drift_reuses_location() {
    let server = MockServer::start().await;
    mount_points(&server, "29.6217,-95.623", 0).await;
    mount_observation_and_forecast(&server).await;

    let store = Arc::new(Store::in_memory().unwrap());
    let cached = cached_config(&server);
    store
        .write(|tx| -> Result<(), StoreError> {
            tx.replace_weather_snapshot(Some(&cached), &stale_conditions(), &[])?;
            // Roughly 15 m from the cached location.
            tx.set_station_coordinates(Coordinates::new(29.6217, -95.6230))
        })
        .unwrap();

    let outcome = engine(&server, &store).sync().await.unwrap();
    assert_eq!(
        outcome,
        WeatherOutcome::Updated {
            config_refreshed: false,
            forecast_periods: 14
        }
    );

    assert_eq!(store.read(|tx| tx.weather_config()).unwrap(), Some(cached));
    let conditions = store.read(|tx| tx.current_conditions()).unwrap().unwrap();
    assert_eq!(conditions.condition.as_deref(), Some("Mostly Cloudy"));
    assert_eq!(store.read(|tx| tx.forecast()).unwrap().len(), 14);
}

#[tokio::test]
async fn test_large_move_resolves_location_again() {
    let server = MockServer::start().await;
    mount_points(&server, "29.7604,-95.3698", 1).await;
    mount_observation_and_forecast(&server).await;

    let store = Arc::new(Store::in_memory().unwrap());
    let cached = cached_config(&server);
    store
        .write(|tx| -> Result<(), StoreError> {
            tx.replace_weather_snapshot(Some(&cached), &stale_conditions(), &[])?;
            tx.set_station_coordinates(Coordinates::new(29.7604, -95.3698))
        })
        .unwrap();

    let outcome = engine(&server, &store).sync().await.unwrap();
    assert!(matches!(outcome, WeatherOutcome::Updated { config_refreshed: true, .. }));

    let config = store.read(|tx| tx.weather_config()).unwrap().unwrap();
    assert_eq!(config.coordinates, Coordinates::new(29.7604, -95.3698));
}

#[tokio::test]
async fn test_failed_forecast_leaves_snapshot_intact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stations/KSGR/observations/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": {
                "timestamp": "2024-07-01T19:53:00+00:00",
                "temperature": {"unitCode": "wmoUnit:degC", "value": 32.68}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gridpoints/HGX/40,90/forecast"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let store = Arc::new(Store::in_memory().unwrap());
    let cached = cached_config(&server);
    store
        .write(|tx| -> Result<(), StoreError> {
            tx.replace_weather_snapshot(Some(&cached), &stale_conditions(), &[])?;
            tx.set_station_coordinates(Coordinates::new(29.6216, -95.6229))
        })
        .unwrap();

    let result = engine(&server, &store).sync().await;
    assert!(result.is_err());

    let conditions = store.read(|tx| tx.current_conditions()).unwrap().unwrap();
    assert_eq!(conditions, stale_conditions());
}
