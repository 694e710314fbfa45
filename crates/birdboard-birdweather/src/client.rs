//! BirdWeather GraphQL client.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::BirdWeatherError;
use crate::graphql::{decode, selection, Envelope};
use crate::types::*;

pub const DEFAULT_API_URL: &str = "https://app.birdweather.com/graphql";

/// Connection settings for [`BirdWeatherClient`].
#[derive(Debug, Clone)]
pub struct BirdWeatherSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Station queried when an operation is not given explicit station ids.
    pub station_id: Option<String>,
    pub request_timeout: Duration,
}

impl Default for BirdWeatherSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            station_id: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct BirdWeatherClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    station_id: Option<String>,
}

impl BirdWeatherClient {
    pub fn new(settings: BirdWeatherSettings) -> Result<Self, BirdWeatherError> {
        if settings.api_url.trim().is_empty() {
            return Err(BirdWeatherError::InvalidConfiguration("API URL is not set".into()));
        }
        let api_key = settings
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BirdWeatherError::InvalidConfiguration("API key is not set".into()))?;

        let client = reqwest::Client::builder().timeout(settings.request_timeout).build()?;

        Ok(Self {
            client,
            api_url: settings.api_url,
            api_key,
            station_id: settings.station_id.filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station_id.as_deref()
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Explicit ids win; otherwise fall back to the configured station.
    fn station_ids(&self, explicit: Option<Vec<String>>) -> Result<Vec<String>, BirdWeatherError> {
        match explicit {
            Some(ids) if !ids.is_empty() => Ok(ids),
            _ => self
                .station_id
                .clone()
                .map(|id| vec![id])
                .ok_or_else(|| BirdWeatherError::InvalidConfiguration("station id is not set".into())),
        }
    }

    /// Daily detection totals for the window.
    #[instrument(skip(self), level = "info")]
    pub async fn daily_detection_counts(
        &self,
        period: Period,
        station_ids: Option<Vec<String>>,
        species_ids: Option<Vec<String>>,
    ) -> Result<Vec<DailyCount>, BirdWeatherError> {
        let query = format!(
            "query DailyDetectionCounts($period: InputDuration, $stationIds: [ID!], $speciesIds: [ID!]) {{ \
             dailyDetectionCounts(period: $period, stationIds: $stationIds, speciesIds: $speciesIds) {{ {} }} }}",
            selection(DAILY_COUNT_FIELDS)
        );
        let variables = json!({
            "period": period,
            "stationIds": self.station_ids(station_ids)?,
            "speciesIds": check_species_ids(species_ids)?,
        });

        let data = self.execute(&query, variables).await?;
        decode_list(&data["dailyDetectionCounts"], DAILY_COUNT_FIELDS, "daily count")
    }

    /// One page of detections.
    #[instrument(skip(self), level = "info")]
    pub async fn detections(&self, query: DetectionQuery) -> Result<DetectionPage, BirdWeatherError> {
        let document = format!(
            "query Detections($period: InputDuration, $stationIds: [ID!], $speciesIds: [ID!], $first: Int, $after: String) {{ \
             detections(period: $period, stationIds: $stationIds, speciesIds: $speciesIds, first: $first, after: $after) {{ \
             totalCount pageInfo {{ hasNextPage endCursor }} nodes {{ {} }} }} }}",
            selection(DETECTION_FIELDS)
        );
        let variables = json!({
            "period": query.period,
            "stationIds": self.station_ids(query.station_ids)?,
            "speciesIds": check_species_ids(query.species_ids)?,
            "first": query.first,
            "after": query.after,
        });

        let data = self.execute(&document, variables).await?;
        let connection = &data["detections"];
        if connection.is_null() {
            return Err(BirdWeatherError::Decode("detections: missing connection".into()));
        }

        let page = DetectionPage {
            detections: decode_list(&connection["nodes"], DETECTION_FIELDS, "detection")?,
            has_next_page: connection["pageInfo"]["hasNextPage"].as_bool().unwrap_or(false),
            end_cursor: connection["pageInfo"]["endCursor"].as_str().map(str::to_string),
            total_count: connection["totalCount"].as_u64().unwrap_or(0),
        };
        debug!(
            count = page.detections.len(),
            has_next_page = page.has_next_page,
            "Fetched detections page"
        );
        Ok(page)
    }

    /// Descriptive metadata for one species.
    #[instrument(skip(self), level = "info")]
    pub async fn species_info(&self, species_id: &str) -> Result<SpeciesInfo, BirdWeatherError> {
        if species_id.trim().is_empty() {
            return Err(BirdWeatherError::InvalidConfiguration("empty species id".into()));
        }
        let query = format!(
            "query Species($id: ID!) {{ species(id: $id) {{ {} }} }}",
            selection(SPECIES_INFO_FIELDS)
        );

        let data = self.execute(&query, json!({ "id": species_id })).await?;
        let species = &data["species"];
        if species.is_null() {
            return Err(BirdWeatherError::Remote(format!("species {} not found", species_id)));
        }
        decode(species, SPECIES_INFO_FIELDS, "species")
    }

    /// Per-species statistics for the window.
    ///
    /// With a species filter, each species is queried on its own through
    /// `detections(first: 1)`: the connection's `totalCount` is the count and
    /// its first node is the newest detection. Species with no detections in
    /// the window are omitted. Without a filter a single `topSpecies` query is
    /// issued. Latest-detection timestamps are truncated to whole seconds.
    #[instrument(skip(self), level = "info")]
    pub async fn species_stats(
        &self,
        period: Period,
        station_ids: Option<Vec<String>>,
        species_ids: Option<Vec<String>>,
        limit: Option<u32>,
    ) -> Result<Vec<SpeciesStats>, BirdWeatherError> {
        let stats = match check_species_ids(species_ids)? {
            Some(ids) => {
                let mut stats = Vec::with_capacity(ids.len());
                for id in ids {
                    let mut query = DetectionQuery::new(period.clone())
                        .with_species(vec![id.clone()])
                        .with_page_size(1);
                    query.station_ids = station_ids.clone();
                    let page = self.detections(query).await?;
                    stats.extend(SpeciesStats::from_page(&id, &page));
                }
                stats
            }
            None => self.top_species(period, station_ids, limit).await?,
        };
        Ok(stats.into_iter().map(SpeciesStats::at_second_resolution).collect())
    }

    async fn top_species(
        &self,
        period: Period,
        station_ids: Option<Vec<String>>,
        limit: Option<u32>,
    ) -> Result<Vec<SpeciesStats>, BirdWeatherError> {
        let query = format!(
            "query TopSpecies($period: InputDuration, $stationIds: [ID!], $limit: Int) {{ \
             topSpecies(period: $period, stationIds: $stationIds, limit: $limit) {{ {} }} }}",
            selection(TOP_SPECIES_FIELDS)
        );
        let variables = json!({
            "period": period,
            "stationIds": self.station_ids(station_ids)?,
            "limit": limit,
        });

        let data = self.execute(&query, variables).await?;
        let stats: Vec<SpeciesStats> =
            decode_list(&data["topSpecies"], TOP_SPECIES_FIELDS, "top species")?;
        Ok(stats.into_iter().filter(|s| s.count > 0).collect())
    }

    /// Station metadata, sensors and detection totals over `period`.
    #[instrument(skip(self), level = "info")]
    pub async fn station_info(
        &self,
        station_id: Option<&str>,
        period: Period,
    ) -> Result<StationInfo, BirdWeatherError> {
        let id = match station_id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => self
                .station_id
                .clone()
                .ok_or_else(|| BirdWeatherError::InvalidConfiguration("station id is not set".into()))?,
        };
        let query = format!(
            "query Station($id: ID!, $period: InputDuration) {{ station(id: $id) {{ {} }} }}",
            selection(STATION_FIELDS)
        );

        let data = self.execute(&query, json!({ "id": id, "period": period })).await?;
        let station = &data["station"];
        if station.is_null() {
            return Err(BirdWeatherError::Remote(format!("station {} not found", id)));
        }
        let flat: FlatStation = decode(station, STATION_FIELDS, "station")?;
        Ok(StationInfo::from(flat))
    }

    /// Post a GraphQL document and unwrap the response envelope.
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, BirdWeatherError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", self.auth_header())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let envelope: Envelope = serde_json::from_str(&body)
                .map_err(|e| BirdWeatherError::Decode(format!("JSON parse error: {}", e)))?;
            return envelope.into_data();
        }

        // Error statuses sometimes still carry a GraphQL error body.
        match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) if !envelope.errors.is_empty() => envelope.into_data(),
            _ => Err(BirdWeatherError::HttpStatus {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

fn check_species_ids(ids: Option<Vec<String>>) -> Result<Option<Vec<String>>, BirdWeatherError> {
    match ids {
        Some(ids) if ids.iter().any(|id| id.trim().is_empty()) => {
            Err(BirdWeatherError::InvalidConfiguration("empty species id".into()))
        }
        Some(ids) if ids.is_empty() => Ok(None),
        other => Ok(other),
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(
    value: &Value,
    fields: &[crate::graphql::FieldMapping],
    what: &str,
) -> Result<Vec<T>, BirdWeatherError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(|item| decode(item, fields, what)).collect(),
        other => Err(BirdWeatherError::Decode(format!("{}: expected a list, got {}", what, other))),
    }
}
