//! Species sync pass.
//!
//! A pass pulls per-species statistics for the window since the watermark,
//! fetches metadata and images for species not seen before, and then folds
//! everything into the store in one transaction with a savepoint per species.
//! A species whose metadata fetch or store write fails is counted and left
//! out; the rest of the pass still commits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use birdboard_birdweather::{BirdWeatherClient, Period, SpeciesInfo, SpeciesStats, StationInfo};
use birdboard_store::{ImagePair, NewSpecies, SpeciesDetails, Store, StoreError, StoreTx};
use birdboard_weather::Coordinates;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;
use crate::media::ImageCache;
use crate::retry::{with_retry, RetryConfig};
use crate::{store_read, store_write};

/// Outcome of one [`SpeciesSync::sync`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeciesSyncReport {
    /// Statistics rows returned for the window.
    pub processed: usize,
    pub added: usize,
    pub updated: usize,
    /// Rows with nothing newer than what is stored.
    pub skipped: usize,
    /// Species that could not be stored this pass.
    pub errors: usize,
    /// New species stored without images after a failed download.
    pub image_failures: usize,
    /// Watermark in effect after the pass.
    pub watermark: Option<DateTime<Utc>>,
}

impl SpeciesSyncReport {
    pub fn succeeded(&self) -> usize {
        self.added + self.updated + self.skipped
    }

    /// Turn a pass with per-species failures into [`SyncError::PartialFailure`].
    pub fn into_result(self) -> Result<Self, SyncError> {
        if self.errors > 0 {
            Err(SyncError::PartialFailure {
                failed: self.errors,
                succeeded: self.succeeded(),
            })
        } else {
            Ok(self)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub attempted: usize,
    pub repaired: usize,
    /// Species the remote service has no images for.
    pub unavailable: usize,
    pub errors: usize,
}

/// A change prepared from remote data, applied inside the pass transaction.
#[derive(Debug)]
enum Staged {
    Insert(NewSpecies),
    Update {
        id: String,
        added: u64,
        latest: Option<DateTime<Utc>>,
    },
}

impl Staged {
    fn id(&self) -> &str {
        match self {
            Self::Insert(species) => &species.id,
            Self::Update { id, .. } => id,
        }
    }

    fn latest(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Insert(species) => species.latest_detection_at,
            Self::Update { latest, .. } => *latest,
        }
    }

    fn apply(&self, tx: &StoreTx<'_>) -> Result<(), StoreError> {
        match self {
            Self::Insert(species) => tx.insert_species(species),
            Self::Update { id, added, latest } => {
                if tx.update_species_counts(id, *added, *latest)? {
                    Ok(())
                } else {
                    Err(StoreError::Invalid(format!("species {} no longer exists", id)))
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Committed {
    added: usize,
    updated: usize,
    failed: Vec<(String, Option<DateTime<Utc>>)>,
    watermark: Option<DateTime<Utc>>,
}

pub struct SpeciesSync {
    store: Arc<Store>,
    client: Arc<BirdWeatherClient>,
    images: ImageCache,
    tracked_species: Vec<String>,
    historical_days: u32,
    retry: RetryConfig,
}

impl SpeciesSync {
    pub fn new(store: Arc<Store>, client: Arc<BirdWeatherClient>, images: ImageCache) -> Self {
        Self {
            store,
            client,
            images,
            tracked_species: Vec::new(),
            historical_days: 60,
            retry: RetryConfig::default(),
        }
    }

    /// Query these species individually instead of the top-species list.
    pub fn with_tracked_species(mut self, species: Vec<String>) -> Self {
        self.tracked_species = species;
        self
    }

    pub fn with_historical_days(mut self, days: u32) -> Self {
        self.historical_days = days;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &Arc<BirdWeatherClient> {
        &self.client
    }

    /// Run one species pass.
    ///
    /// Only a failure to read the window, fetch the statistics or open the
    /// pass transaction is an `Err`; per-species failures are counted in the
    /// report.
    #[instrument(skip(self), level = "info")]
    pub async fn sync(&self) -> Result<SpeciesSyncReport, SyncError> {
        let watermark = store_read(&self.store, |tx| Ok(tx.watermark()?)).await?;
        let period = match watermark {
            // Stored timestamps have second resolution.
            Some(ts) => Period::since(ts + Duration::seconds(1)),
            None => Period::days(self.historical_days),
        };
        debug!(?period, "Species sync window");

        let filter = (!self.tracked_species.is_empty()).then(|| self.tracked_species.clone());
        let stats = with_retry(&self.retry, "species stats", || {
            self.client.species_stats(period.clone(), None, filter.clone(), None)
        })
        .await?;

        let mut report = SpeciesSyncReport {
            processed: stats.len(),
            ..Default::default()
        };
        if stats.is_empty() {
            info!("No detections since last species sync");
            report.watermark = watermark;
            return Ok(report);
        }

        let ids: Vec<String> = stats.iter().map(|s| s.species_id.clone()).collect();
        let stored: HashMap<String, Option<DateTime<Utc>>> = store_read(&self.store, move |tx| {
            let mut found = HashMap::new();
            for id in ids {
                if let Some(species) = tx.get_species(&id)? {
                    found.insert(id, species.latest_detection_at);
                }
            }
            Ok(found)
        })
        .await?;

        let mut staged = Vec::with_capacity(stats.len());
        let mut settled = Vec::new();
        let mut failed = Vec::new();
        let mut seen = HashSet::new();

        for stat in stats {
            if !seen.insert(stat.species_id.clone()) {
                debug!(species = %stat.species_id, "Duplicate statistics row ignored");
                report.skipped += 1;
                continue;
            }
            match stored.get(&stat.species_id) {
                Some(stored_latest) => {
                    if !is_newer(stat.latest_detection_at, *stored_latest) {
                        debug!(species = %stat.species_id, "Nothing newer than stored detection");
                        report.skipped += 1;
                        settled.push(stat.latest_detection_at);
                        continue;
                    }
                    let stat = match *stored_latest {
                        Some(counted_through) if already_counted(counted_through, watermark) => {
                            match self.recount(&stat.species_id, counted_through).await {
                                Ok(Some(fresh)) => fresh,
                                Ok(None) => {
                                    debug!(species = %stat.species_id, "Nothing new after stored detection");
                                    report.skipped += 1;
                                    settled.push(Some(counted_through));
                                    continue;
                                }
                                Err(e) => {
                                    warn!(species = %stat.species_id, "Failed to recount species: {}", e);
                                    failed.push(stat.latest_detection_at);
                                    continue;
                                }
                            }
                        }
                        _ => stat,
                    };
                    staged.push(Staged::Update {
                        id: stat.species_id,
                        added: stat.count,
                        latest: stat.latest_detection_at,
                    });
                }
                None => match self.prepare_insert(&stat).await {
                    Ok((species, image_failed)) => {
                        if image_failed {
                            report.image_failures += 1;
                        }
                        staged.push(Staged::Insert(species));
                    }
                    Err(e) => {
                        warn!(species = %stat.species_id, "Failed to prepare new species: {}", e);
                        failed.push(stat.latest_detection_at);
                    }
                },
            }
        }

        let cached: Vec<(String, ImagePair)> = staged
            .iter()
            .filter_map(|change| match change {
                Staged::Insert(species) => species.images.clone().map(|pair| (species.id.clone(), pair)),
                Staged::Update { .. } => None,
            })
            .collect();

        let prepare_failures = failed.clone();
        let committed = store_write(&self.store, move |tx| {
            let mut committed = Committed::default();
            let mut succeeded = settled;
            for change in &staged {
                match tx.savepoint("species", |sp| change.apply(sp)) {
                    Ok(()) => {
                        match change {
                            Staged::Insert(_) => committed.added += 1,
                            Staged::Update { .. } => committed.updated += 1,
                        }
                        succeeded.push(change.latest());
                    }
                    Err(e) => {
                        warn!(species = %change.id(), "Failed to store species: {}", e);
                        committed.failed.push((change.id().to_string(), change.latest()));
                    }
                }
            }

            let mut all_failed = prepare_failures;
            all_failed.extend(committed.failed.iter().map(|(_, latest)| *latest));
            committed.watermark = match watermark_candidate(&succeeded, &all_failed) {
                Some(candidate) => Some(tx.advance_watermark(candidate)?),
                None => tx.watermark()?,
            };
            Ok(committed)
        })
        .await;

        let committed = match committed {
            Ok(committed) => committed,
            Err(e) => {
                for (_, pair) in &cached {
                    self.images.discard(pair).await;
                }
                return Err(e);
            }
        };

        for (id, _) in &committed.failed {
            if let Some((_, pair)) = cached.iter().find(|(cached_id, _)| cached_id == id) {
                self.images.discard(pair).await;
            }
        }

        report.added = committed.added;
        report.updated = committed.updated;
        report.errors = failed.len() + committed.failed.len();
        report.watermark = committed.watermark;

        info!(
            processed = report.processed,
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            image_failures = report.image_failures,
            "Species sync complete"
        );
        Ok(report)
    }

    /// Statistics for one species counting only detections after
    /// `counted_through`, used when the pass window reaches back over
    /// detections already folded into the stored count.
    async fn recount(
        &self,
        species_id: &str,
        counted_through: DateTime<Utc>,
    ) -> Result<Option<SpeciesStats>, SyncError> {
        let period = Period::since(counted_through + Duration::seconds(1));
        let ids = vec![species_id.to_string()];
        let stats = with_retry(&self.retry, "species recount", || {
            self.client.species_stats(period.clone(), None, Some(ids.clone()), None)
        })
        .await?;
        Ok(stats.into_iter().find(|s| s.species_id == species_id && s.count > 0))
    }

    /// Fetch metadata and images for a species not stored yet.
    ///
    /// A failed image download does not fail the species: it is stored
    /// without images and picked up by [`SpeciesSync::repair_images`]. The
    /// flag reports whether that happened.
    async fn prepare_insert(&self, stat: &SpeciesStats) -> Result<(NewSpecies, bool), SyncError> {
        let id = stat.species_id.as_str();
        let info = with_retry(&self.retry, "species info", || self.client.species_info(id)).await?;

        let mut image_failed = false;
        let images = match image_urls(&info) {
            Some((image, thumbnail)) => match self.images.fetch_pair(id, image, thumbnail).await {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!(species = id, "Storing species without images: {}", e);
                    image_failed = true;
                    None
                }
            },
            None => {
                debug!(species = id, "No images published for species");
                None
            }
        };

        let species = NewSpecies {
            id: id.to_string(),
            details: details_from(info),
            images,
            detection_count: stat.count,
            latest_detection_at: stat.latest_detection_at,
        };
        Ok((species, image_failed))
    }

    /// Retry the image pair for every species stored without one.
    #[instrument(skip(self), level = "info")]
    pub async fn repair_images(&self) -> Result<RepairReport, SyncError> {
        let missing = store_read(&self.store, |tx| Ok(tx.list_species_missing_images()?)).await?;
        let mut report = RepairReport::default();

        for species in missing {
            report.attempted += 1;
            let id = species.id;

            let info = match with_retry(&self.retry, "species info", || self.client.species_info(&id)).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(species = %id, "Image repair: metadata fetch failed: {}", e);
                    report.errors += 1;
                    continue;
                }
            };
            let Some((image, thumbnail)) = image_urls(&info) else {
                report.unavailable += 1;
                continue;
            };

            let pair = match self.images.fetch_pair(&id, image, thumbnail).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(species = %id, "Image repair: download failed: {}", e);
                    report.errors += 1;
                    continue;
                }
            };

            let stored_pair = pair.clone();
            let stored_id = id.clone();
            match store_write(&self.store, move |tx| Ok(tx.set_species_images(&stored_id, Some(&stored_pair))?)).await {
                Ok(true) => report.repaired += 1,
                Ok(false) => {
                    warn!(species = %id, "Image repair: species vanished before update");
                    self.images.discard(&pair).await;
                    report.errors += 1;
                }
                Err(e) => {
                    warn!(species = %id, "Image repair: store update failed: {}", e);
                    self.images.discard(&pair).await;
                    report.errors += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                repaired = report.repaired,
                unavailable = report.unavailable,
                errors = report.errors,
                "Image repair complete"
            );
        }
        Ok(report)
    }

    /// Fetch the configured station and record its coordinates and name.
    #[instrument(skip(self), level = "info")]
    pub async fn refresh_station(&self) -> Result<StationInfo, SyncError> {
        let station = with_retry(&self.retry, "station info", || {
            self.client.station_info(None, Period::days(1))
        })
        .await?;

        let coordinates = match (station.latitude, station.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => {
                warn!("Station reports no coordinates");
                None
            }
        };
        let name = station.name.clone();

        store_write(&self.store, move |tx| {
            if let Some(coordinates) = coordinates {
                tx.set_station_coordinates(coordinates)?;
            }
            if let Some(name) = name.as_deref() {
                tx.set_station_name(name)?;
            }
            Ok(())
        })
        .await?;

        debug!(name = ?station.name, ?coordinates, "Station metadata refreshed");
        Ok(station)
    }
}

fn is_newer(candidate: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
    match (candidate, stored) {
        (Some(candidate), Some(stored)) => candidate > stored,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Whether the pass window starts at or before a species' stored latest
/// detection, so the window count includes detections already stored.
fn already_counted(counted_through: DateTime<Utc>, watermark: Option<DateTime<Utc>>) -> bool {
    match watermark {
        Some(watermark) => counted_through > watermark,
        None => true,
    }
}

fn image_urls(info: &SpeciesInfo) -> Option<(&str, &str)> {
    let image = info.image_url.as_deref().filter(|u| !u.trim().is_empty())?;
    let thumbnail = info.thumbnail_url.as_deref().filter(|u| !u.trim().is_empty())?;
    Some((image, thumbnail))
}

fn details_from(info: SpeciesInfo) -> SpeciesDetails {
    SpeciesDetails {
        common_name: info.common_name,
        scientific_name: info.scientific_name,
        color: info.color,
        birdweather_url: info.birdweather_url,
        ebird_url: info.ebird_url,
        wikipedia_url: info.wikipedia_url,
        wikipedia_summary: info.wikipedia_summary,
    }
}

/// Watermark to advance to after a pass: the newest detection among
/// committed species, held one second below the earliest failed species so
/// it is seen again. A failed species without a timestamp blocks advancing.
fn watermark_candidate(
    succeeded: &[Option<DateTime<Utc>>],
    failed: &[Option<DateTime<Utc>>],
) -> Option<DateTime<Utc>> {
    let newest = succeeded.iter().flatten().max().copied()?;
    if failed.iter().any(Option::is_none) {
        return None;
    }
    match failed.iter().flatten().min() {
        Some(earliest_failed) => Some(newest.min(*earliest_failed - Duration::seconds(1))),
        None => Some(newest),
    }
}
