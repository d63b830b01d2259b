//! On-disk crawl state: the URL frontier, scraped-record progress and the
//! per-run failure list. Every write replaces the whole file via a temp
//! file and a rename, so a concurrent reader sees either the old state or
//! the new one, never a torn file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::ApartmentRecord;

/// Listing URLs awaiting a scrape, as collected from the search indexes.
/// Serializes to `{collected_at, total_count, urls}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierFile {
    pub collected_at: DateTime<Utc>,
    pub total_count: usize,
    pub urls: Vec<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl FrontierFile {
    pub fn new() -> Self {
        Self {
            collected_at: Utc::now(),
            total_count: 0,
            urls: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Appends a URL unless it is already present; keeps `total_count` in
    /// sync. Returns whether the URL was new.
    pub fn push_unique(&mut self, url: String) -> bool {
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.urls.push(url);
        self.total_count = self.urls.len();
        true
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let mut frontier: FrontierFile = read_json(path)
            .await
            .with_context(|| format!("could not read frontier file {}", path.display()))?;
        frontier.seen = frontier.urls.iter().cloned().collect();
        frontier.total_count = frontier.urls.len();
        Ok(frontier)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).await
    }
}

impl Default for FrontierFile {
    fn default() -> Self {
        Self::new()
    }
}

/// URLs that permanently failed in the current run.
/// Serializes to `{failed_at, count, urls}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureFile {
    pub failed_at: DateTime<Utc>,
    pub count: usize,
    pub urls: Vec<String>,
}

impl FailureFile {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            failed_at: Utc::now(),
            count: urls.len(),
            urls,
        }
    }
}

/// Paths for one crawl run plus the flush logic around them.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    progress_path: PathBuf,
    failures_path: PathBuf,
}

impl ProgressStore {
    pub fn new(progress_path: PathBuf, failures_path: PathBuf) -> Self {
        Self {
            progress_path,
            failures_path,
        }
    }

    /// Previously scraped records. An absent file means a fresh start; a
    /// present-but-corrupt one is a hard error, because the next flush
    /// would silently overwrite whatever it holds.
    pub async fn load_records(&self) -> Result<Vec<ApartmentRecord>> {
        if !self.progress_path.exists() {
            info!("no progress file yet - starting fresh");
            return Ok(Vec::new());
        }
        load_records(&self.progress_path).await
    }

    /// Rewrites the whole progress file. Called after every recorded unit,
    /// so an interrupt loses at most the unit in flight.
    pub async fn save_records(&self, records: &[ApartmentRecord]) -> Result<()> {
        write_json_atomic(&self.progress_path, &records).await
    }

    /// Rewrites this run's failure file.
    pub async fn save_failures(&self, urls: &[String]) -> Result<()> {
        write_json_atomic(&self.failures_path, &FailureFile::new(urls.to_vec())).await
    }
}

/// Reads a progress file that must exist, e.g. for the image and import
/// passes that run after a scrape.
pub async fn load_records(path: &Path) -> Result<Vec<ApartmentRecord>> {
    read_json(path)
        .await
        .with_context(|| format!("could not read progress file {}", path.display()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Serializes pretty JSON to a temp file, then renames it over `path`.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("could not write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("could not replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(url: &str) -> ApartmentRecord {
        ApartmentRecord {
            listing_url: url.to_string(),
            rent: 3200,
            sqft: Some(750),
            bedrooms: 1,
            bathrooms: 1.0,
            neighborhood: Some("Astoria".to_string()),
            borough: Some("Queens".to_string()),
            address: Some("30-10 Broadway 11106".to_string()),
            floor: None,
            home_features: vec!["Dishwasher".to_string()],
            amenities: vec!["elevator".to_string()],
            year_built: Some(1940),
            photo_count: 8,
            image_ids: vec!["img1".to_string()],
            listing_id: "111".to_string(),
            property_id: None,
        }
    }

    #[test]
    fn frontier_dedupes_urls() {
        let mut frontier = FrontierFile::new();
        assert!(frontier.push_unique("https://a".to_string()));
        assert!(frontier.push_unique("https://b".to_string()));
        assert!(!frontier.push_unique("https://a".to_string()));
        assert_eq!(frontier.total_count, 2);
        assert_eq!(frontier.urls, vec!["https://a", "https://b"]);
    }

    #[tokio::test]
    async fn frontier_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listing_urls.json");

        let mut frontier = FrontierFile::new();
        frontier.push_unique("https://a".to_string());
        frontier.push_unique("https://b".to_string());
        frontier.save(&path).await.unwrap();

        let reloaded = FrontierFile::load(&path).await.unwrap();
        assert_eq!(reloaded.urls, frontier.urls);
        assert_eq!(reloaded.total_count, 2);

        // dedupe state survives the round trip
        let mut reloaded = reloaded;
        assert!(!reloaded.push_unique("https://a".to_string()));
    }

    #[tokio::test]
    async fn records_round_trip_and_leave_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let progress = dir.path().join("scraped_apartments.json");
        let store = ProgressStore::new(progress.clone(), dir.path().join("failed_urls.json"));

        let records = vec![sample_record("https://a"), sample_record("https://b")];
        store.save_records(&records).await.unwrap();

        assert!(!progress.with_extension("tmp").exists());
        let reloaded = store.load_records().await.unwrap();
        assert_eq!(reloaded, records);
    }

    #[tokio::test]
    async fn missing_progress_file_means_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(
            dir.path().join("scraped_apartments.json"),
            dir.path().join("failed_urls.json"),
        );
        assert!(store.load_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_progress_file_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let progress = dir.path().join("scraped_apartments.json");
        tokio::fs::write(&progress, "{ not json").await.unwrap();

        let store = ProgressStore::new(progress, dir.path().join("failed_urls.json"));
        assert!(store.load_records().await.is_err());
    }

    #[tokio::test]
    async fn failure_file_has_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let failures = dir.path().join("failed_urls.json");
        let store = ProgressStore::new(dir.path().join("p.json"), failures.clone());

        store
            .save_failures(&["https://bad".to_string()])
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(&failures).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["urls"][0], "https://bad");
        assert!(value["failed_at"].is_string());
    }
}
