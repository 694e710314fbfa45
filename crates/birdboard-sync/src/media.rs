//! Species image cache.
//!
//! Each species owns two files under the images directory,
//! `{id}.jpg` and `{id}.thumbnail.jpg`. They are written together or not at
//! all: downloads land in `.part` files and are renamed into place only after
//! both succeeded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use birdboard_store::ImagePair;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::retry::{with_retry, RetryConfig};

pub struct ImageCache {
    client: reqwest::Client,
    dir: PathBuf,
    retry: RetryConfig,
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            dir: dir.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final on-disk locations for a species' image pair.
    pub fn paths_for(&self, species_id: &str) -> ImagePair {
        let stem = sanitize_id(species_id);
        ImagePair {
            image: self.dir.join(format!("{}.jpg", stem)),
            thumbnail: self.dir.join(format!("{}.thumbnail.jpg", stem)),
        }
    }

    /// Download both images for a species.
    ///
    /// On any failure neither final file exists afterwards.
    pub async fn fetch_pair(
        &self,
        species_id: &str,
        image_url: &str,
        thumbnail_url: &str,
    ) -> Result<ImagePair, SyncError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let pair = self.paths_for(species_id);
        let staged = ImagePair {
            image: part_path(&pair.image),
            thumbnail: part_path(&pair.thumbnail),
        };

        let downloaded = async {
            self.download(image_url, &staged.image).await?;
            self.download(thumbnail_url, &staged.thumbnail).await?;
            tokio::fs::rename(&staged.image, &pair.image).await?;
            tokio::fs::rename(&staged.thumbnail, &pair.thumbnail).await?;
            Ok::<_, SyncError>(())
        }
        .await;

        match downloaded {
            Ok(()) => {
                info!(species = species_id, "Cached species images in {}", self.dir.display());
                Ok(pair)
            }
            Err(e) => {
                warn!(species = species_id, "Image download failed: {}", e);
                remove_quietly(&staged).await;
                remove_quietly(&pair).await;
                Err(e)
            }
        }
    }

    /// Delete a cached pair, e.g. after the row that would reference it
    /// failed to commit.
    pub async fn discard(&self, pair: &ImagePair) {
        remove_quietly(pair).await;
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), SyncError> {
        let bytes = with_retry(&self.retry, "image download", || async {
            self.client.get(url).send().await?.error_for_status()?.bytes().await
        })
        .await
        .map_err(|e| SyncError::Image {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if bytes.is_empty() {
            return Err(SyncError::Image {
                url: url.to_string(),
                reason: "empty response body".into(),
            });
        }
        tokio::fs::write(dest, &bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_quietly(pair: &ImagePair) {
    for path in [&pair.image, &pair.thumbnail] {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

/// Species ids come from the remote service; keep them from escaping the
/// images directory. An id that had to be rewritten gets a short hash of the
/// original so distinct ids never share a file.
fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if !cleaned.is_empty() && cleaned == id {
        return cleaned;
    }
    let digest = blake3::hash(id.as_bytes());
    let hex = digest.to_hex();
    format!("{}-{}", cleaned, &hex.as_str()[..8])
}
