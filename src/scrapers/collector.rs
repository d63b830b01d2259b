//! Search-index pagination: harvests listing URLs region by region into the
//! frontier file.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::CollectorConfig;
use crate::progress::FrontierFile;

/// Anchor tying a search-result card to its listing page.
const LISTING_LINK_SELECTOR: &str =
    r#"a[href*="/building/"][class*="ListingDescription-module__addressTextAction"]"#;

/// Walks the region search indexes and collects listing URLs.
pub struct UrlCollector<'a> {
    config: &'a CollectorConfig,
}

impl<'a> UrlCollector<'a> {
    pub fn new(config: &'a CollectorConfig) -> Self {
        Self { config }
    }

    /// Collects every configured region, persisting the frontier after each
    /// page so an interrupted run keeps what it has.
    pub async fn run(&self, page: &dyn PageDriver, frontier_path: &Path) -> Result<FrontierFile> {
        let mut frontier = FrontierFile::new();

        for region in &self.config.regions {
            info!("collecting listing URLs from {}", region);
            let before = frontier.total_count;
            self.collect_region(page, region, &mut frontier, frontier_path)
                .await;
            info!(
                "{}: {} new URLs ({} total)",
                region,
                frontier.total_count - before,
                frontier.total_count
            );
        }

        frontier.collected_at = Utc::now();
        frontier.save(frontier_path).await?;
        info!(
            "collection complete: {} URLs in {}",
            frontier.total_count,
            frontier_path.display()
        );
        Ok(frontier)
    }

    /// One region, page by page. A page that renders zero listing links ends
    /// the region; a page that fails to load is skipped.
    async fn collect_region(
        &self,
        page: &dyn PageDriver,
        region: &str,
        frontier: &mut FrontierFile,
        frontier_path: &Path,
    ) {
        for page_num in 1..=self.config.max_pages_per_region {
            let url = self.config.site.search_url(region, page_num);
            debug!("page {}: {}", page_num, url);

            if let Err(err) = page.navigate(&url).await {
                warn!("page {} failed to load: {:#} - moving on", page_num, err);
                tokio::time::sleep(self.config.error_delay).await;
                continue;
            }
            tokio::time::sleep(self.config.page_settle).await;

            let rendered = self
                .config
                .link_wait
                .poll_until(|| async move {
                    match page.html().await {
                        Ok(html) => !extract_listing_links(&html).is_empty(),
                        Err(_) => false,
                    }
                })
                .await;
            if !rendered {
                info!("no listings on page {} - end of {} results", page_num, region);
                break;
            }

            let links = match page.html().await {
                Ok(html) => extract_listing_links(&html),
                Err(err) => {
                    warn!("could not read page {}: {:#}", page_num, err);
                    continue;
                }
            };

            let mut added = 0;
            for href in links {
                if frontier.push_unique(href) {
                    added += 1;
                }
            }
            debug!(
                "page {}: {} new URLs (running total {})",
                page_num, added, frontier.total_count
            );

            frontier.collected_at = Utc::now();
            if let Err(err) = frontier.save(frontier_path).await {
                warn!("could not persist frontier: {:#}", err);
            }

            tokio::time::sleep(self.config.page_delay).await;
        }
    }
}

/// Pulls absolute listing URLs out of a search-results snapshot.
fn extract_listing_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(LISTING_LINK_SELECTOR).unwrap();
    document
        .select(&selector)
        .filter_map(|node| node.value().attr("href"))
        .filter(|href| href.starts_with("http"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::TrafficSink;
    use crate::pacing::WaitPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    fn results_page(urls: &[&str]) -> String {
        let cards: String = urls
            .iter()
            .map(|url| {
                format!(
                    r#"<a href="{}" class="ListingDescription-module__addressTextAction_x3">unit</a>"#,
                    url
                )
            })
            .collect();
        format!("<html><body>{}</body></html>", cards)
    }

    /// Serves one canned HTML body per navigation, in order; empty string
    /// once the script runs out.
    struct PagedFake {
        bodies: Vec<String>,
        navigations: Mutex<Vec<String>>,
    }

    impl PagedFake {
        fn new(bodies: Vec<String>) -> Self {
            Self {
                bodies,
                navigations: Mutex::new(Vec::new()),
            }
        }

        fn visit_count(&self) -> usize {
            self.navigations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageDriver for PagedFake {
        async fn navigate(&self, url: &str) -> anyhow::Result<()> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn current_url(&self) -> String {
            self.navigations
                .lock()
                .unwrap()
                .last()
                .cloned()
                .unwrap_or_default()
        }

        async fn html(&self) -> anyhow::Result<String> {
            let index = self.visit_count().saturating_sub(1);
            Ok(self.bodies.get(index).cloned().unwrap_or_default())
        }

        async fn click(&self, _selector: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn query_count(&self, _selector: &str) -> anyhow::Result<usize> {
            Ok(0)
        }

        async fn watch_traffic(&self, _sink: TrafficSink) -> anyhow::Result<()> {
            Ok(())
        }

        async fn response_body(&self, _request_id: &str) -> anyhow::Result<Vec<u8>> {
            Err(anyhow::anyhow!("not used"))
        }

        async fn screenshot(&self, _path: &std::path::Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn fast_config(regions: &[&str]) -> CollectorConfig {
        CollectorConfig {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            max_pages_per_region: 5,
            page_settle: Duration::ZERO,
            link_wait: WaitPolicy::new(Duration::from_millis(1), 2),
            page_delay: Duration::ZERO,
            error_delay: Duration::ZERO,
            ..CollectorConfig::default()
        }
    }

    #[test]
    fn link_extraction_keeps_absolute_listing_urls_only() {
        let html = format!(
            r#"
            <a href="https://streeteasy.com/building/a/1" class="ListingDescription-module__addressTextAction_x3">a</a>
            <a href="/building/b/2" class="ListingDescription-module__addressTextAction_x3">relative</a>
            <a href="https://streeteasy.com/building/c/3" class="OtherClass">wrong class</a>
            {}"#,
            r#"<a href="https://streeteasy.com/rental/d" class="ListingDescription-module__addressTextAction_x3">no building path</a>"#
        );
        let links = extract_listing_links(&html);
        assert_eq!(links, vec!["https://streeteasy.com/building/a/1"]);
    }

    #[tokio::test]
    async fn empty_page_ends_the_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listing_urls.json");

        let page = PagedFake::new(vec![
            results_page(&["https://streeteasy.com/building/a/1"]),
            results_page(&[]),
        ]);
        let config = fast_config(&["manhattan"]);
        let frontier = UrlCollector::new(&config).run(&page, &path).await.unwrap();

        assert_eq!(frontier.urls, vec!["https://streeteasy.com/building/a/1"]);
        // page 1 with results, page 2 empty, then stop
        assert_eq!(page.visit_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_links_across_pages_are_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listing_urls.json");

        let shared = "https://streeteasy.com/building/a/1";
        let page = PagedFake::new(vec![
            results_page(&[shared, "https://streeteasy.com/building/b/2"]),
            results_page(&[shared]),
            results_page(&[]),
        ]);
        let config = fast_config(&["manhattan"]);
        let frontier = UrlCollector::new(&config).run(&page, &path).await.unwrap();

        assert_eq!(frontier.total_count, 2);
    }

    #[tokio::test]
    async fn frontier_is_persisted_after_each_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listing_urls.json");

        let page = PagedFake::new(vec![
            results_page(&["https://streeteasy.com/building/a/1"]),
            results_page(&[]),
        ]);
        let config = fast_config(&["manhattan"]);
        UrlCollector::new(&config).run(&page, &path).await.unwrap();

        let reloaded = FrontierFile::load(&path).await.unwrap();
        assert_eq!(reloaded.total_count, 1);
    }
}
