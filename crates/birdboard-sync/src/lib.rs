//! Sync engines that keep the local store in step with the remote services.

use std::sync::Arc;

use birdboard_store::{Store, StoreTx};

pub mod detections;
pub mod error;
pub mod media;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod species;
pub mod weather;

pub use detections::{walk_detections, WalkReport};
pub use error::SyncError;
pub use media::ImageCache;
pub use retry::{with_retry, RetryConfig, Retryable};
pub use scheduler::{Scheduler, TriggerOutcome};
pub use settings::SyncSettings;
pub use species::{RepairReport, SpeciesSync, SpeciesSyncReport};
pub use weather::{WeatherOutcome, WeatherSync};

/// Run a read transaction on the blocking pool.
pub(crate) async fn store_read<T, F>(store: &Arc<Store>, f: F) -> Result<T, SyncError>
where
    F: FnOnce(&StoreTx<'_>) -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.read(f)).await?
}

/// Run a write transaction on the blocking pool.
pub(crate) async fn store_write<T, F>(store: &Arc<Store>, f: F) -> Result<T, SyncError>
where
    F: FnOnce(&StoreTx<'_>) -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.write(f)).await?
}
