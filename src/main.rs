use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use birdboard_birdweather::BirdWeatherClient;
use birdboard_core::Config;
use birdboard_store::Store;
use birdboard_sync::{ImageCache, Scheduler, SpeciesSync, SyncSettings, WeatherSync};
use birdboard_weather::WeatherProvider;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize core
    birdboard_core::init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let (config, _) = Config::load_validated(config_path.as_deref())?;
    let settings = SyncSettings::from_config(&config)?;

    let store = Arc::new(
        Store::open(&config.database.path)
            .with_context(|| format!("Failed to open store at {}", config.database.path.display()))?,
    );

    let client = Arc::new(BirdWeatherClient::new(settings.birdweather.clone())?);
    let images = ImageCache::new(&settings.images_dir, settings.birdweather.request_timeout)?
        .with_retry(settings.retry.clone());
    let species = SpeciesSync::new(Arc::clone(&store), client, images)
        .with_tracked_species(settings.tracked_species.clone())
        .with_historical_days(settings.historical_days)
        .with_retry(settings.retry.clone());

    let provider = WeatherProvider::new(settings.weather.clone())?;
    let weather = WeatherSync::new(Arc::clone(&store), provider)
        .with_unit_system(settings.unit_system)
        .with_tolerance_km(settings.coordinate_tolerance_km)
        .with_retry(settings.retry.clone());

    let scheduler = Arc::new(Scheduler::new(Arc::new(species), Arc::new(weather), settings.interval));
    let cancel = CancellationToken::new();
    let handles = scheduler.start(cancel.clone()).await;

    tracing::info!("Birdboard sync started");
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;

    // Graceful shutdown
    tracing::info!("Shutting down");
    cancel.cancel();
    for handle in handles {
        handle.await?;
    }

    Ok(())
}
