//! Listing-photo downloads: direct CDN fetches by image id, a bounded
//! permit pool across listings, and per-item failure isolation so one bad
//! image never sinks a batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{ImagePolicy, SiteProfile};
use crate::models::ApartmentRecord;

/// Aggregate outcome of one download pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub attempted: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Downloads listing photos straight from the CDN, no browser involved.
pub struct ImageFetcher {
    client: Client,
    site: SiteProfile,
    policy: ImagePolicy,
}

impl ImageFetcher {
    pub fn new(site: SiteProfile, policy: ImagePolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            site,
            policy,
        })
    }

    /// Downloads up to `max_per_listing` photos for every record into
    /// `out_dir`, named `{listing_id}_{index}.{ext}`.
    pub async fn fetch_all(
        &self,
        records: &[ApartmentRecord],
        out_dir: &Path,
    ) -> Result<DownloadStats> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("could not create {}", out_dir.display()))?;
        let permits = Arc::new(Semaphore::new(self.policy.concurrency));

        let jobs = records
            .iter()
            .map(|record| self.fetch_listing(record, out_dir, Arc::clone(&permits)));
        let per_listing = join_all(jobs).await;

        let mut stats = DownloadStats::default();
        for listing in per_listing {
            stats.attempted += listing.attempted;
            stats.downloaded += listing.downloaded;
            stats.failed += listing.failed;
        }
        info!(
            "downloaded {}/{} images ({} failed)",
            stats.downloaded, stats.attempted, stats.failed
        );
        Ok(stats)
    }

    async fn fetch_listing(
        &self,
        record: &ApartmentRecord,
        out_dir: &Path,
        permits: Arc<Semaphore>,
    ) -> DownloadStats {
        let mut stats = DownloadStats::default();
        for (index, image_id) in record
            .image_ids
            .iter()
            .take(self.policy.max_per_listing)
            .enumerate()
        {
            stats.attempted += 1;
            let permit = match permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed, shutting down
            };
            let outcome = self.fetch_one(record, image_id, index, out_dir).await;
            drop(permit);

            match outcome {
                Ok(path) => {
                    stats.downloaded += 1;
                    debug!("saved {}", path.display());
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(
                        "{}: image {} failed: {:#}",
                        record.listing_id, image_id, err
                    );
                }
            }
            tokio::time::sleep(self.policy.inter_delay).await;
        }
        stats
    }

    async fn fetch_one(
        &self,
        record: &ApartmentRecord,
        image_id: &str,
        index: usize,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let url = self
            .site
            .image_url(image_id, &self.site.download_size_variant);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request failed for {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {} for {}", response.status(), url);
        }
        let bytes = response.bytes().await.context("failed to read image body")?;
        let path = out_dir.join(image_filename(&record.listing_id, index, &url));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("could not write {}", path.display()))?;
        Ok(path)
    }
}

/// `{listing_id}_{index}.{ext}`, extension taken from the download URL.
fn image_filename(listing_id: &str, index: usize, url: &str) -> String {
    let ext = url
        .rsplit('.')
        .next()
        .filter(|ext| !ext.contains('/'))
        .unwrap_or("webp");
    format!("{}_{}.{}", listing_id, index, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_follow_listing_and_index() {
        assert_eq!(
            image_filename("4521887", 0, "https://cdn.example/fp/abc-cc_ft_1536.webp"),
            "4521887_0.webp"
        );
        assert_eq!(
            image_filename("4521887", 3, "https://cdn.example/fp/abc.jpg"),
            "4521887_3.jpg"
        );
    }

    #[test]
    fn extensionless_urls_fall_back_to_webp() {
        assert_eq!(
            image_filename("1", 0, "https://cdn.example/fp/no-extension"),
            "1_0.webp"
        );
    }
}
