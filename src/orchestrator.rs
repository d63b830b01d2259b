//! The crawl loop: resume bookkeeping, politeness pacing, one fresh browser
//! session per listing, and a full progress flush after every unit of work.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::browser::ChromeSession;
use crate::config::{BrowserConfig, ScrapeConfig};
use crate::models::{ApartmentRecord, ScrapeFailure};
use crate::pacing::Pacing;
use crate::progress::{FrontierFile, ProgressStore};
use crate::scrapers::ListingScraper;

/// Scrapes one listing URL inside its own isolated session. The orchestrator
/// only sees this seam; tests substitute scripted runners.
#[async_trait]
pub trait UnitRunner: Send + Sync {
    async fn run(&self, url: &str) -> Result<ApartmentRecord, ScrapeFailure>;
}

/// Production runner: a fresh Chrome process per URL, torn down when the
/// unit ends, so a wedged or flagged session never outlives one listing.
pub struct ChromeUnitRunner {
    browser: BrowserConfig,
    scrape: ScrapeConfig,
}

impl ChromeUnitRunner {
    pub fn new(browser: BrowserConfig, scrape: ScrapeConfig) -> Self {
        Self { browser, scrape }
    }
}

#[async_trait]
impl UnitRunner for ChromeUnitRunner {
    async fn run(&self, url: &str) -> Result<ApartmentRecord, ScrapeFailure> {
        let session = ChromeSession::launch(&self.browser).map_err(ScrapeFailure::Exception)?;
        let page = session.page().map_err(ScrapeFailure::Exception)?;
        let scraper = ListingScraper::new(&self.scrape);
        scraper.scrape(url, &page).await
        // session drops here and takes the whole browser process with it
    }
}

/// End-of-run accounting. `recorded` and `failed` count this run only;
/// resumed records from earlier runs show up under `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub recorded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.recorded + self.failed
    }

    /// Percentage of attempted units that produced a record.
    pub fn success_rate(&self) -> f64 {
        if self.attempted() == 0 {
            return 0.0;
        }
        self.recorded as f64 / self.attempted() as f64 * 100.0
    }
}

/// Works through a frontier, one listing at a time.
pub struct CrawlOrchestrator<'a> {
    runner: &'a dyn UnitRunner,
    store: ProgressStore,
    pacing: Pacing,
}

impl<'a> CrawlOrchestrator<'a> {
    pub fn new(runner: &'a dyn UnitRunner, store: ProgressStore, pacing: Pacing) -> Self {
        Self {
            runner,
            store,
            pacing,
        }
    }

    /// Scrapes every frontier URL not already recorded. Already-scraped URLs
    /// are skipped, the rest are shuffled and worked through with sampled
    /// delays between units and an extended break every `break_every`-th.
    pub async fn run(&self, frontier: &FrontierFile) -> Result<RunSummary> {
        let mut records = self.store.load_records().await?;
        if !records.is_empty() {
            info!("resuming with {} previously scraped apartments", records.len());
        }

        let mut pending: Vec<String> = {
            let done: HashSet<&str> = records.iter().map(|r| r.listing_url.as_str()).collect();
            frontier
                .urls
                .iter()
                .filter(|url| !done.contains(url.as_str()))
                .cloned()
                .collect()
        };
        let skipped = frontier.urls.len() - pending.len();
        if skipped > 0 {
            info!("skipping {} already scraped URLs", skipped);
        }

        // shuffle so reruns do not replay the same prefix against the site
        fastrand::shuffle(&mut pending);

        let total = pending.len();
        let prior = records.len();
        info!("{} URLs to scrape", total);

        let mut failures: Vec<String> = Vec::new();

        for (index, url) in pending.iter().enumerate() {
            let delay = self.pacing.unit_delay.sample();
            if !delay.is_zero() {
                info!(
                    "waiting {:.1}s before starting a new browser session",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            info!("listing {}/{}: {}", index + 1, total, url);
            match self.runner.run(url).await {
                Ok(record) => {
                    records.push(record);
                    self.store.save_records(&records).await?;
                    info!("recorded ({} total)", records.len());
                }
                Err(reason) => {
                    warn!("failed: {}", reason);
                    failures.push(url.clone());
                    self.store.save_failures(&failures).await?;
                }
            }

            let completed = index + 1;
            if self.pacing.break_every > 0
                && completed % self.pacing.break_every == 0
                && completed < total
            {
                let pause = self.pacing.break_delay.sample();
                info!(
                    "{}/{} processed ({} recorded, {} failed) - taking a {:.1} minute break",
                    completed,
                    total,
                    records.len() - prior,
                    failures.len(),
                    pause.as_secs_f64() / 60.0
                );
                tokio::time::sleep(pause).await;
            }
        }

        let summary = RunSummary {
            recorded: records.len() - prior,
            failed: failures.len(),
            skipped,
        };
        info!(
            "scraping complete: {} recorded, {} failed, {} skipped",
            summary.recorded, summary.failed, summary.skipped
        );
        if summary.attempted() > 0 {
            info!("success rate: {:.1}%", summary.success_rate());
        }
        Ok(summary)
    }
}
