//! Species rows.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::StoreError;
use crate::store::{from_sql_time, from_sql_time_opt, to_sql_time, StoreTx};

/// Cached image and thumbnail for a species. Both exist or neither does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    pub image: PathBuf,
    pub thumbnail: PathBuf,
}

/// Descriptive species metadata as stored locally.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpeciesDetails {
    pub common_name: Option<String>,
    pub scientific_name: Option<String>,
    pub color: Option<String>,
    pub birdweather_url: Option<String>,
    pub ebird_url: Option<String>,
    pub wikipedia_url: Option<String>,
    pub wikipedia_summary: Option<String>,
}

/// A species about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSpecies {
    pub id: String,
    pub details: SpeciesDetails,
    pub images: Option<ImagePair>,
    pub detection_count: u64,
    pub latest_detection_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub id: String,
    pub details: SpeciesDetails,
    pub images: Option<ImagePair>,
    /// Classification flag; false until set explicitly.
    pub common: bool,
    pub detection_count: u64,
    pub latest_detection_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SPECIES_COLUMNS: &str = "id, common_name, scientific_name, color, birdweather_url, ebird_url, \
     wikipedia_url, wikipedia_summary, image_path, thumbnail_path, common, detection_count, \
     latest_detection_at, created_at, updated_at";

fn row_to_species(row: &Row<'_>) -> rusqlite::Result<Species> {
    let image: Option<String> = row.get(8)?;
    let thumbnail: Option<String> = row.get(9)?;
    let images = match (image, thumbnail) {
        (Some(image), Some(thumbnail)) => Some(ImagePair {
            image: PathBuf::from(image),
            thumbnail: PathBuf::from(thumbnail),
        }),
        _ => None,
    };
    let count: i64 = row.get(11)?;

    Ok(Species {
        id: row.get(0)?,
        details: SpeciesDetails {
            common_name: row.get(1)?,
            scientific_name: row.get(2)?,
            color: row.get(3)?,
            birdweather_url: row.get(4)?,
            ebird_url: row.get(5)?,
            wikipedia_url: row.get(6)?,
            wikipedia_summary: row.get(7)?,
        },
        images,
        common: row.get::<_, i64>(10)? != 0,
        detection_count: count.max(0) as u64,
        latest_detection_at: from_sql_time_opt(12, row.get(12)?)?,
        created_at: from_sql_time(13, row.get(13)?)?,
        updated_at: from_sql_time(14, row.get(14)?)?,
    })
}

fn image_columns(images: Option<&ImagePair>) -> (Option<String>, Option<String>) {
    match images {
        Some(pair) => (
            Some(pair.image.to_string_lossy().into_owned()),
            Some(pair.thumbnail.to_string_lossy().into_owned()),
        ),
        None => (None, None),
    }
}

fn count_to_sql(count: u64) -> Result<i64, StoreError> {
    i64::try_from(count).map_err(|_| StoreError::Invalid(format!("detection count {} out of range", count)))
}

impl StoreTx<'_> {
    /// Insert a new species. Fails if the id already exists.
    pub fn insert_species(&self, species: &NewSpecies) -> Result<(), StoreError> {
        if species.id.trim().is_empty() {
            return Err(StoreError::Invalid("species id is empty".into()));
        }
        let now = to_sql_time(&Utc::now());
        let (image, thumbnail) = image_columns(species.images.as_ref());
        let d = &species.details;

        self.conn.execute(
            "INSERT INTO species (id, common_name, scientific_name, color, birdweather_url, ebird_url,
                 wikipedia_url, wikipedia_summary, image_path, thumbnail_path, common, detection_count,
                 latest_detection_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?13)",
            params![
                species.id,
                d.common_name,
                d.scientific_name,
                d.color,
                d.birdweather_url,
                d.ebird_url,
                d.wikipedia_url,
                d.wikipedia_summary,
                image,
                thumbnail,
                count_to_sql(species.detection_count)?,
                species.latest_detection_at.as_ref().map(to_sql_time),
                now,
            ],
        )?;
        tracing::debug!("Inserted species {}", species.id);
        Ok(())
    }

    /// Insert, or refresh an existing species.
    ///
    /// On conflict the descriptive metadata is overwritten, images are replaced
    /// only when new ones are given, the count is added to the stored count and
    /// the latest detection keeps the later of the two timestamps.
    pub fn upsert_species(&self, species: &NewSpecies) -> Result<(), StoreError> {
        if self.get_species(&species.id)?.is_none() {
            return self.insert_species(species);
        }

        let d = &species.details;
        self.conn.execute(
            "UPDATE species SET common_name = ?2, scientific_name = ?3, color = ?4, birdweather_url = ?5,
                 ebird_url = ?6, wikipedia_url = ?7, wikipedia_summary = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                species.id,
                d.common_name,
                d.scientific_name,
                d.color,
                d.birdweather_url,
                d.ebird_url,
                d.wikipedia_url,
                d.wikipedia_summary,
                to_sql_time(&Utc::now()),
            ],
        )?;
        if species.images.is_some() {
            self.set_species_images(&species.id, species.images.as_ref())?;
        }
        self.update_species_counts(&species.id, species.detection_count, species.latest_detection_at)?;
        Ok(())
    }

    /// Add `added` to the stored count and move the latest detection forward.
    /// A `latest` older than the stored value leaves it unchanged. Returns
    /// false if the species does not exist.
    pub fn update_species_counts(
        &self,
        id: &str,
        added: u64,
        latest: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE species SET
                 detection_count = detection_count + ?2,
                 latest_detection_at = CASE
                     WHEN ?3 IS NULL THEN latest_detection_at
                     WHEN latest_detection_at IS NULL OR ?3 > latest_detection_at THEN ?3
                     ELSE latest_detection_at
                 END,
                 updated_at = ?4
             WHERE id = ?1",
            params![
                id,
                count_to_sql(added)?,
                latest.as_ref().map(to_sql_time),
                to_sql_time(&Utc::now())
            ],
        )?;
        Ok(changed > 0)
    }

    /// Store both image paths, or clear both with `None`.
    pub fn set_species_images(&self, id: &str, images: Option<&ImagePair>) -> Result<bool, StoreError> {
        let (image, thumbnail) = image_columns(images);
        let changed = self.conn.execute(
            "UPDATE species SET image_path = ?2, thumbnail_path = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, image, thumbnail, to_sql_time(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    pub fn set_species_common(&self, id: &str, common: bool) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE species SET common = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, common as i64, to_sql_time(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    pub fn get_species(&self, id: &str) -> Result<Option<Species>, StoreError> {
        let sql = format!("SELECT {} FROM species WHERE id = ?1", SPECIES_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], row_to_species).optional()?)
    }

    /// All species, most recently detected first.
    pub fn list_species(&self) -> Result<Vec<Species>, StoreError> {
        let sql = format!(
            "SELECT {} FROM species ORDER BY latest_detection_at IS NULL, latest_detection_at DESC, id",
            SPECIES_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_species)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_species_missing_images(&self) -> Result<Vec<Species>, StoreError> {
        let sql = format!("SELECT {} FROM species WHERE image_path IS NULL ORDER BY id", SPECIES_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_species)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_species(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM species", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
