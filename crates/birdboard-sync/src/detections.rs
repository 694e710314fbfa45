//! Resumable walk over raw detections.

use std::sync::Arc;

use birdboard_birdweather::{BirdWeatherClient, DetectionPage, DetectionPager, DetectionQuery};
use birdboard_store::Store;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::retry::{with_retry, RetryConfig};
use crate::{store_read, store_write};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub pages: usize,
    pub detections: usize,
    /// Whether the walk picked up from a persisted cursor.
    pub resumed: bool,
}

/// Feed every detection page for `query` to `handler`, in order.
///
/// The walk resumes from the cursor stored for this query's
/// [`DetectionQuery::resume_key`]; a cursor left by a different query is
/// ignored. A page's end cursor is persisted only after `handler` accepted
/// the page, so an interrupted walk hands the same page to the handler again
/// instead of skipping it. The stored cursor is cleared once the last page is
/// done.
pub async fn walk_detections<F>(
    store: &Arc<Store>,
    client: &BirdWeatherClient,
    query: DetectionQuery,
    retry: &RetryConfig,
    mut handler: F,
) -> Result<WalkReport, SyncError>
where
    F: FnMut(&DetectionPage) -> Result<(), SyncError>,
{
    let query_key = query.resume_key();
    let lookup_key = query_key.clone();
    let resume = store_read(store, move |tx| Ok(tx.detections_cursor(&lookup_key)?)).await?;
    let mut report = WalkReport {
        resumed: resume.is_some(),
        ..Default::default()
    };
    if let Some(cursor) = &resume {
        info!(cursor = %cursor, "Resuming detection walk");
    }

    let mut pager = DetectionPager::new(client, query).resume_from(resume);
    loop {
        let Some(page) = with_retry(retry, "detections page", || pager.fetch()).await? else {
            break;
        };

        handler(&page)?;
        pager.advance(&page);
        report.pages += 1;
        report.detections += page.detections.len();

        let cursor = if pager.is_finished() {
            None
        } else {
            pager.cursor().map(str::to_string)
        };
        debug!(page = report.pages, cursor = ?cursor, "Detection page accepted");
        let key = query_key.clone();
        store_write(store, move |tx| Ok(tx.set_detections_cursor(&key, cursor.as_deref())?)).await?;

        if pager.is_finished() {
            break;
        }
    }

    info!(pages = report.pages, detections = report.detections, "Detection walk complete");
    Ok(report)
}
