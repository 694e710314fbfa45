//! BirdWeather API types and the field tables that map them from the wire.

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::graphql::FieldMapping;

/// Unit of a relative query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Query window, serialized as the API's `InputDuration`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Period {
    /// The last `count` units, e.g. "7 day".
    Relative { count: u32, unit: PeriodUnit },
    /// Everything at or after `from`.
    Since { from: DateTime<Utc> },
}

impl Period {
    pub fn days(count: u32) -> Self {
        Self::Relative {
            count,
            unit: PeriodUnit::Day,
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self::Since { from }
    }
}

/// Detections per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: u64,
}

pub const DAILY_COUNT_FIELDS: &[FieldMapping] = &[
    FieldMapping::new("date", "date"),
    FieldMapping::new("total", "total"),
];

/// A single detection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: Option<f64>,
    pub probability: Option<f64>,
    pub score: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub soundscape_url: Option<String>,
    pub species_id: Option<String>,
}

pub const DETECTION_FIELDS: &[FieldMapping] = &[
    FieldMapping::new("confidence", "confidence"),
    FieldMapping::new("probability", "probability"),
    FieldMapping::new("score", "score"),
    FieldMapping::new("timestamp", "timestamp"),
    FieldMapping::new("soundscape.url", "soundscape_url"),
    FieldMapping::new("species.id", "species_id"),
];

/// One page of detections plus the cursor that continues it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionPage {
    pub detections: Vec<Detection>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
    pub total_count: u64,
}

/// Filters for a detections query.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionQuery {
    pub period: Period,
    pub station_ids: Option<Vec<String>>,
    pub species_ids: Option<Vec<String>>,
    pub first: Option<u32>,
    pub after: Option<String>,
}

impl DetectionQuery {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            station_ids: None,
            species_ids: None,
            first: None,
            after: None,
        }
    }

    pub fn with_species(mut self, species_ids: Vec<String>) -> Self {
        self.species_ids = Some(species_ids);
        self
    }

    pub fn with_page_size(mut self, first: u32) -> Self {
        self.first = Some(first);
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.after = cursor;
        self
    }

    /// Identifies the result sequence this query walks, ignoring the page
    /// cursor. A saved cursor is only valid for a query with the same key.
    pub fn resume_key(&self) -> String {
        serde_json::json!({
            "period": self.period,
            "stationIds": self.station_ids,
            "speciesIds": self.species_ids,
            "first": self.first,
        })
        .to_string()
    }
}

/// Descriptive metadata for a species.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeciesInfo {
    pub birdweather_url: Option<String>,
    pub color: Option<String>,
    pub common_name: Option<String>,
    pub ebird_url: Option<String>,
    pub image_url: Option<String>,
    pub scientific_name: Option<String>,
    pub thumbnail_url: Option<String>,
    pub wikipedia_summary: Option<String>,
    pub wikipedia_url: Option<String>,
}

pub const SPECIES_INFO_FIELDS: &[FieldMapping] = &[
    FieldMapping::new("birdweatherUrl", "birdweather_url"),
    FieldMapping::new("color", "color"),
    FieldMapping::new("commonName", "common_name"),
    FieldMapping::new("ebirdUrl", "ebird_url"),
    FieldMapping::new("imageUrl", "image_url"),
    FieldMapping::new("scientificName", "scientific_name"),
    FieldMapping::new("thumbnailUrl", "thumbnail_url"),
    FieldMapping::new("wikipediaSummary", "wikipedia_summary"),
    FieldMapping::new("wikipediaUrl", "wikipedia_url"),
];

/// Aggregate statistics for one species over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesStats {
    pub species_id: String,
    pub count: u64,
    pub latest_detection_at: Option<DateTime<Utc>>,
    pub probability: Option<f64>,
    pub confidence: Option<f64>,
    pub score: Option<f64>,
}

impl SpeciesStats {
    /// Stats from a single-species `detections(first: 1)` page; the newest
    /// detection leads the page.
    pub(crate) fn from_page(species_id: &str, page: &DetectionPage) -> Option<Self> {
        if page.total_count == 0 {
            return None;
        }
        let latest = page.detections.first();
        Some(Self {
            species_id: species_id.to_string(),
            count: page.total_count,
            latest_detection_at: latest.map(|d| d.timestamp),
            probability: latest.and_then(|d| d.probability),
            confidence: latest.and_then(|d| d.confidence),
            score: latest.and_then(|d| d.score),
        })
    }

    /// Drop sub-second precision from the latest detection. Stored
    /// timestamps have second resolution, so anything finer would always
    /// compare as newer than the stored value.
    pub(crate) fn at_second_resolution(mut self) -> Self {
        self.latest_detection_at = self.latest_detection_at.map(|ts| ts.trunc_subsecs(0));
        self
    }
}

pub const TOP_SPECIES_FIELDS: &[FieldMapping] = &[
    FieldMapping::new("speciesId", "species_id"),
    FieldMapping::new("count", "count"),
    FieldMapping::new("latestDetection.timestamp", "latest_detection_at"),
    FieldMapping::new("latestDetection.probability", "probability"),
    FieldMapping::new("latestDetection.confidence", "confidence"),
    FieldMapping::new("latestDetection.score", "score"),
];

/// Air quality banding for the station's AQI sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiStatus {
    Good,
    Moderate,
    Unhealthy,
}

impl AqiStatus {
    /// 0–50 Good, 51–100 Moderate, 101+ Unhealthy. Fractional readings band
    /// by their rounded value.
    pub fn from_value(aqi: f64) -> Self {
        let rounded = aqi.round();
        if rounded <= 50.0 {
            Self::Good
        } else if rounded <= 100.0 {
            Self::Moderate
        } else {
            Self::Unhealthy
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::Unhealthy => "Unhealthy",
        }
    }
}

/// Latest environment sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSensors {
    pub aqi: Option<f64>,
    pub aqi_status: Option<AqiStatus>,
    pub pressure: Option<f64>,
    pub eco2: Option<f64>,
    pub humidity: Option<f64>,
    pub temperature_c: Option<f64>,
    pub temperature_f: Option<f64>,
    pub voc: Option<f64>,
}

/// Latest station hardware reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSensors {
    pub battery_voltage: Option<f64>,
    pub power_source: Option<String>,
    pub sd_capacity_gb: Option<f64>,
    pub sd_available_gb: Option<f64>,
    /// Percentage of queued uploads completed.
    pub upload_progress: Option<f64>,
    pub wifi_signal: Option<f64>,
}

/// Station metadata and current sensor state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationInfo {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub earliest_detection_at: Option<DateTime<Utc>>,
    pub latest_detection_at: Option<DateTime<Utc>>,
    pub environment: Option<EnvironmentSensors>,
    pub system: Option<SystemSensors>,
    pub detection_count: Option<u64>,
    pub species_count: Option<u64>,
}

pub const STATION_FIELDS: &[FieldMapping] = &[
    FieldMapping::new("name", "name"),
    FieldMapping::new("coords.lat", "latitude"),
    FieldMapping::new("coords.lon", "longitude"),
    FieldMapping::new("earliestDetectionAt", "earliest_detection_at"),
    FieldMapping::new("latestDetectionAt", "latest_detection_at"),
    FieldMapping::new("sensors.environment.aqi", "aqi"),
    FieldMapping::new("sensors.environment.barometricPressure", "pressure"),
    FieldMapping::new("sensors.environment.eco2", "eco2"),
    FieldMapping::new("sensors.environment.humidity", "humidity"),
    FieldMapping::new("sensors.environment.temperature", "temperature_c"),
    FieldMapping::new("sensors.environment.voc", "voc"),
    FieldMapping::new("sensors.system.batteryVoltage", "battery_voltage"),
    FieldMapping::new("sensors.system.powerSource", "power_source"),
    FieldMapping::new("sensors.system.sdCapacity", "sd_capacity_gb"),
    FieldMapping::new("sensors.system.sdAvailable", "sd_available_gb"),
    FieldMapping::new("sensors.system.uploadingCompleted", "uploads_completed"),
    FieldMapping::new("sensors.system.uploadingTotal", "uploads_total"),
    FieldMapping::new("sensors.system.wifiRssi", "wifi_signal"),
    FieldMapping::new("counts(period: $period).detections", "detection_count"),
    FieldMapping::new("counts(period: $period).species", "species_count"),
];

/// Flat, locally-named station record as produced by `STATION_FIELDS`.
#[derive(Debug, Deserialize)]
pub(crate) struct FlatStation {
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    earliest_detection_at: Option<DateTime<Utc>>,
    latest_detection_at: Option<DateTime<Utc>>,
    aqi: Option<f64>,
    pressure: Option<f64>,
    eco2: Option<f64>,
    humidity: Option<f64>,
    temperature_c: Option<f64>,
    voc: Option<f64>,
    battery_voltage: Option<f64>,
    power_source: Option<String>,
    sd_capacity_gb: Option<f64>,
    sd_available_gb: Option<f64>,
    uploads_completed: Option<f64>,
    uploads_total: Option<f64>,
    wifi_signal: Option<f64>,
    detection_count: Option<u64>,
    species_count: Option<u64>,
}

impl From<FlatStation> for StationInfo {
    fn from(s: FlatStation) -> Self {
        let has_environment = s.aqi.is_some()
            || s.pressure.is_some()
            || s.eco2.is_some()
            || s.humidity.is_some()
            || s.temperature_c.is_some()
            || s.voc.is_some();
        let environment = has_environment.then(|| EnvironmentSensors {
            aqi: s.aqi,
            aqi_status: s.aqi.map(AqiStatus::from_value),
            pressure: s.pressure,
            eco2: s.eco2,
            humidity: s.humidity,
            temperature_c: s.temperature_c,
            temperature_f: s.temperature_c.map(|c| c * 9.0 / 5.0 + 32.0),
            voc: s.voc,
        });

        let upload_progress = match (s.uploads_completed, s.uploads_total) {
            (Some(_), Some(total)) if total <= 0.0 => Some(100.0),
            (Some(done), Some(total)) => Some((done / total * 100.0).clamp(0.0, 100.0)),
            _ => None,
        };
        let has_system = s.battery_voltage.is_some()
            || s.power_source.is_some()
            || s.sd_capacity_gb.is_some()
            || s.sd_available_gb.is_some()
            || upload_progress.is_some()
            || s.wifi_signal.is_some();
        let system = has_system.then(|| SystemSensors {
            battery_voltage: s.battery_voltage,
            power_source: s.power_source,
            sd_capacity_gb: s.sd_capacity_gb,
            sd_available_gb: s.sd_available_gb,
            upload_progress,
            wifi_signal: s.wifi_signal,
        });

        Self {
            name: s.name,
            latitude: s.latitude,
            longitude: s.longitude,
            earliest_detection_at: s.earliest_detection_at,
            latest_detection_at: s.latest_detection_at,
            environment,
            system,
            detection_count: s.detection_count,
            species_count: s.species_count,
        }
    }
}
