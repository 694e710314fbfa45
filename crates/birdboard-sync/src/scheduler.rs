//! Periodic driver for the species and weather passes.
//!
//! Each job runs in its own task on a fixed interval. The first tick fires
//! immediately, so both jobs run once at startup. The station is refreshed
//! before either loop starts so the startup weather run already has the
//! station coordinates. Missed ticks are skipped
//! rather than bunched up. A job never overlaps itself: a manual trigger
//! while a run is in flight is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::species::SpeciesSync;
use crate::weather::{WeatherOutcome, WeatherSync};

/// Result of a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed,
    Failed,
    /// A run of the same job was already in progress.
    AlreadyRunning,
}

pub struct Scheduler {
    species: Arc<SpeciesSync>,
    weather: Arc<WeatherSync>,
    species_interval: Duration,
    weather_interval: Duration,
    species_lock: Mutex<()>,
    weather_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(species: Arc<SpeciesSync>, weather: Arc<WeatherSync>, every: Duration) -> Self {
        Self {
            species,
            weather,
            species_interval: every,
            weather_interval: every,
            species_lock: Mutex::new(()),
            weather_lock: Mutex::new(()),
        }
    }

    pub fn with_weather_interval(mut self, every: Duration) -> Self {
        self.weather_interval = every;
        self
    }

    /// Refresh the station, then spawn both job loops. They stop when
    /// `cancel_token` is cancelled.
    pub async fn start(self: &Arc<Self>, cancel_token: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            species_every = ?self.species_interval,
            weather_every = ?self.weather_interval,
            "Starting scheduler"
        );

        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Scheduler cancelled during startup");
                return Vec::new();
            }
            result = self.species.refresh_station() => {
                if let Err(e) = result {
                    warn!("Startup station refresh failed: {}", e);
                }
            }
        }

        vec![
            self.spawn_loop("species", self.species_interval, cancel_token.clone(), |s| async move {
                s.trigger_species().await
            }),
            self.spawn_loop("weather", self.weather_interval, cancel_token, |s| async move {
                s.trigger_weather().await
            }),
        ]
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        every: Duration,
        cancel_token: CancellationToken,
        job: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = TriggerOutcome> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticks = interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!(job = name, "Scheduler job cancelled, shutting down");
                        break;
                    }
                    _ = ticks.tick() => {
                        let outcome = job(Arc::clone(&scheduler)).await;
                        debug!(job = name, ?outcome, "Scheduled run finished");
                    }
                }
            }
        })
    }

    /// Run the species job now: station refresh, species pass, image repair.
    pub async fn trigger_species(&self) -> TriggerOutcome {
        let Ok(_guard) = self.species_lock.try_lock() else {
            debug!("Species sync already running; trigger skipped");
            return TriggerOutcome::AlreadyRunning;
        };

        if let Err(e) = self.species.refresh_station().await {
            warn!("Station refresh failed: {}", e);
        }

        let outcome = match self.species.sync().await {
            Ok(report) => match report.into_result() {
                Ok(_) => TriggerOutcome::Completed,
                Err(e) => {
                    warn!("{}", e);
                    TriggerOutcome::Failed
                }
            },
            Err(e) => {
                error!("Species sync failed: {}", e);
                TriggerOutcome::Failed
            }
        };

        if let Err(e) = self.species.repair_images().await {
            warn!("Image repair failed: {}", e);
        }
        outcome
    }

    pub async fn trigger_weather(&self) -> TriggerOutcome {
        let Ok(_guard) = self.weather_lock.try_lock() else {
            debug!("Weather sync already running; trigger skipped");
            return TriggerOutcome::AlreadyRunning;
        };

        match self.weather.sync().await {
            Ok(WeatherOutcome::Skipped) => {
                debug!("Weather sync skipped until station coordinates are known");
                TriggerOutcome::Completed
            }
            Ok(WeatherOutcome::Updated { .. }) => TriggerOutcome::Completed,
            Err(e) => {
                error!("Weather sync failed: {}", e);
                TriggerOutcome::Failed
            }
        }
    }
}
