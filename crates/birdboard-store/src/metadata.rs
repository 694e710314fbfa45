//! Key/value metadata with typed accessors for the well-known keys.

use birdboard_weather::Coordinates;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::StoreError;
use crate::store::{from_sql_time, to_sql_time, StoreTx};

pub mod keys {
    /// Latest detection timestamp covered by a completed species sync.
    pub const WATERMARK: &str = "last_detection_at";
    pub const STATION_LATITUDE: &str = "station_latitude";
    pub const STATION_LONGITUDE: &str = "station_longitude";
    pub const STATION_NAME: &str = "station_name";
    /// Prefix of the raw detection walker's resume cursors, one per query.
    pub const DETECTIONS_CURSOR: &str = "detections_cursor";
}

/// A tagged metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

impl MetaValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Timestamp(_) => "timestamp",
        }
    }

    fn encode(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Timestamp(ts) => to_sql_time(ts),
        }
    }

    fn decode(kind: &str, raw: String) -> rusqlite::Result<Self> {
        let invalid = |msg: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, msg.into())
        };
        match kind {
            "text" => Ok(Self::Text(raw)),
            "number" => raw
                .parse()
                .map(Self::Number)
                .map_err(|e| invalid(format!("bad number '{}': {}", raw, e))),
            "timestamp" => from_sql_time(2, raw).map(Self::Timestamp),
            other => Err(invalid(format!("unknown metadata kind '{}'", other))),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl StoreTx<'_> {
    pub fn get_meta(&self, key: &str) -> Result<Option<MetaValue>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT kind, value FROM metadata WHERE key = ?1",
                params![key],
                |row| {
                    let kind: String = row.get(0)?;
                    MetaValue::decode(&kind, row.get(1)?)
                },
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &MetaValue) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO metadata (key, kind, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, value = excluded.value,
                 updated_at = excluded.updated_at",
            params![key, value.kind(), value.encode(), to_sql_time(&Utc::now())],
        )?;
        Ok(())
    }

    /// Returns true if the key existed.
    pub fn delete_meta(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.conn.execute("DELETE FROM metadata WHERE key = ?1", params![key])? > 0)
    }

    fn typed_meta<T>(
        &self,
        key: &str,
        expected: &'static str,
        extract: impl FnOnce(&MetaValue) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        match self.get_meta(key)? {
            None => Ok(None),
            Some(value) => extract(&value).map(Some).ok_or_else(|| StoreError::TypeMismatch {
                key: key.to_string(),
                expected,
                found: value.kind(),
            }),
        }
    }

    pub fn watermark(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.typed_meta(keys::WATERMARK, "timestamp", MetaValue::as_timestamp)
    }

    /// Advance the watermark. A value older than the stored one is ignored;
    /// the effective watermark is returned.
    pub fn advance_watermark(&self, candidate: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        match self.watermark()? {
            Some(current) if current >= candidate => Ok(current),
            _ => {
                self.set_meta(keys::WATERMARK, &MetaValue::Timestamp(candidate))?;
                Ok(candidate)
            }
        }
    }

    pub fn station_coordinates(&self) -> Result<Option<Coordinates>, StoreError> {
        let lat = self.typed_meta(keys::STATION_LATITUDE, "number", MetaValue::as_number)?;
        let lon = self.typed_meta(keys::STATION_LONGITUDE, "number", MetaValue::as_number)?;
        Ok(match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        })
    }

    pub fn set_station_coordinates(&self, coordinates: Coordinates) -> Result<(), StoreError> {
        if !(-90.0..=90.0).contains(&coordinates.latitude)
            || !(-180.0..=180.0).contains(&coordinates.longitude)
        {
            return Err(StoreError::Invalid(format!(
                "coordinates out of range: {}, {}",
                coordinates.latitude, coordinates.longitude
            )));
        }
        self.set_meta(keys::STATION_LATITUDE, &MetaValue::Number(coordinates.latitude))?;
        self.set_meta(keys::STATION_LONGITUDE, &MetaValue::Number(coordinates.longitude))
    }

    pub fn station_name(&self) -> Result<Option<String>, StoreError> {
        self.typed_meta(keys::STATION_NAME, "text", |v| v.as_text().map(str::to_string))
    }

    pub fn set_station_name(&self, name: &str) -> Result<(), StoreError> {
        self.set_meta(keys::STATION_NAME, &MetaValue::Text(name.to_string()))
    }

    /// Resume cursor saved for `query_key`. Each query has its own cursor.
    pub fn detections_cursor(&self, query_key: &str) -> Result<Option<String>, StoreError> {
        let key = cursor_key(query_key);
        self.typed_meta(&key, "text", |v| v.as_text().map(str::to_string))
    }

    /// Persist the walker's resume point for `query_key`; `None` clears it.
    pub fn set_detections_cursor(&self, query_key: &str, cursor: Option<&str>) -> Result<(), StoreError> {
        let key = cursor_key(query_key);
        match cursor {
            Some(c) => self.set_meta(&key, &MetaValue::Text(c.to_string())),
            None => self.delete_meta(&key).map(|_| ()),
        }
    }
}

fn cursor_key(query_key: &str) -> String {
    format!("{}:{}", keys::DETECTIONS_CURSOR, query_key)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::Store;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_tagged_values_round_trip() {
        let store = Store::in_memory().unwrap();
        store
            .write(|tx| -> Result<(), StoreError> {
                tx.set_meta("t", &MetaValue::Text("hello".into()))?;
                tx.set_meta("n", &MetaValue::Number(-95.6229))?;
                tx.set_meta("ts", &MetaValue::Timestamp(ts("2024-05-01T10:00:00Z")))
            })
            .unwrap();

        store
            .read(|tx| -> Result<(), StoreError> {
                assert_eq!(tx.get_meta("t")?, Some(MetaValue::Text("hello".into())));
                assert_eq!(tx.get_meta("n")?, Some(MetaValue::Number(-95.6229)));
                assert_eq!(tx.get_meta("ts")?, Some(MetaValue::Timestamp(ts("2024-05-01T10:00:00Z"))));
                assert_eq!(tx.get_meta("missing")?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_watermark_never_decreases() {
        let store = Store::in_memory().unwrap();
        let later = ts("2024-05-02T00:00:00Z");
        let earlier = ts("2024-05-01T00:00:00Z");

        assert_eq!(store.write(|tx| tx.advance_watermark(later)).unwrap(), later);
        assert_eq!(store.write(|tx| tx.advance_watermark(earlier)).unwrap(), later);
        assert_eq!(store.read(|tx| tx.watermark()).unwrap(), Some(later));
    }

    #[test]
    fn test_typed_accessor_rejects_wrong_kind() {
        let store = Store::in_memory().unwrap();
        store
            .write(|tx| tx.set_meta(keys::WATERMARK, &MetaValue::Text("yesterday".into())))
            .unwrap();

        match store.read(|tx| tx.watermark()) {
            Err(StoreError::TypeMismatch { expected: "timestamp", found: "text", .. }) => {}
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_station_coordinates_need_both_halves() {
        let store = Store::in_memory().unwrap();
        store
            .write(|tx| tx.set_meta(keys::STATION_LATITUDE, &MetaValue::Number(29.6216)))
            .unwrap();
        assert_eq!(store.read(|tx| tx.station_coordinates()).unwrap(), None);

        store
            .write(|tx| tx.set_station_coordinates(Coordinates::new(29.6216, -95.6229)))
            .unwrap();
        assert_eq!(
            store.read(|tx| tx.station_coordinates()).unwrap(),
            Some(Coordinates::new(29.6216, -95.6229))
        );

        assert!(store.write(|tx| tx.set_station_coordinates(Coordinates::new(91.0, 0.0))).is_err());
    }

    #[test]
    fn test_cursor_set_and_clear() {
        let store = Store::in_memory().unwrap();
        store.write(|tx| tx.set_detections_cursor("q1", Some("abc"))).unwrap();
        assert_eq!(store.read(|tx| tx.detections_cursor("q1")).unwrap().as_deref(), Some("abc"));
        // Another query does not pick up q1's position.
        assert_eq!(store.read(|tx| tx.detections_cursor("q2")).unwrap(), None);

        // Finishing q2 leaves q1's position alone.
        store.write(|tx| tx.set_detections_cursor("q2", None)).unwrap();
        assert_eq!(store.read(|tx| tx.detections_cursor("q1")).unwrap().as_deref(), Some("abc"));

        store.write(|tx| tx.set_detections_cursor("q1", None)).unwrap();
        assert_eq!(store.read(|tx| tx.detections_cursor("q1")).unwrap(), None);

        store.write(|tx| tx.set_station_name("Backyard")).unwrap();
        assert_eq!(store.read(|tx| tx.station_name()).unwrap().as_deref(), Some("Backyard"));
    }
}
