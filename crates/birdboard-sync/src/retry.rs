//! Retry utilities for remote calls with exponential backoff.
//!
//! Only transient failures are retried: network errors, timeouts, 5xx, 408
//! and 429 responses. GraphQL errors, decode failures and other 4xx
//! responses fail immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use birdboard_birdweather::BirdWeatherError;
use birdboard_weather::WeatherError;

use crate::error::SyncError;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// No retries; used where the caller already isolates failures.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponential backoff: initial_delay * 2^attempt
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

/// Errors that know whether retrying can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for BirdWeatherError {
    fn is_retryable(&self) -> bool {
        BirdWeatherError::is_retryable(self)
    }
}

impl Retryable for WeatherError {
    fn is_retryable(&self) -> bool {
        WeatherError::is_retryable(self)
    }
}

impl Retryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        if self.is_timeout() || self.is_connect() || self.is_request() {
            return true;
        }
        self.status()
            .map(|s| s.is_server_error() || s.as_u16() == 408 || s.as_u16() == 429)
            .unwrap_or(false)
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        SyncError::is_retryable(self)
    }
}

/// Run `operation`, retrying transient failures with capped exponential backoff.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once retries are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} retries", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} failed on attempt {} of {}: {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!("{}: all {} attempts exhausted", what, config.max_retries + 1);
                } else {
                    tracing::debug!("{}: non-retryable error: {}", what, e);
                }
                return Err(e);
            }
        }
    }
}
