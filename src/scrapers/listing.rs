//! Drives one listing page end to end: navigate, verify where we landed,
//! provoke the analytics traffic, drain it, and extract a record.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::ScrapeConfig;
use crate::extract;
use crate::models::{ApartmentRecord, ScrapeFailure};
use crate::monitor::{RequestMonitor, TrafficFilter};

/// The carousel advance control. Clicking it provokes the analytics events;
/// its presence doubles as the page-rendered marker.
const NEXT_IMAGE_SELECTOR: &str = r#"button[data-testid="next-image-button"]"#;

/// Scrapes a single listing page through a [`PageDriver`].
pub struct ListingScraper<'a> {
    config: &'a ScrapeConfig,
}

impl<'a> ListingScraper<'a> {
    pub fn new(config: &'a ScrapeConfig) -> Self {
        Self { config }
    }

    /// Scrapes one listing. The typed failures cover every expected way a
    /// page can disappoint; anything else comes back as `Exception` with a
    /// diagnostic screenshot already taken.
    pub async fn scrape(
        &self,
        url: &str,
        page: &dyn PageDriver,
    ) -> Result<ApartmentRecord, ScrapeFailure> {
        let outcome = self.drive(url, page).await;
        if let Err(ScrapeFailure::Exception(err)) = &outcome {
            warn!("scrape blew up: {:#}", err);
            self.snapshot(page, &format!("exception_{}", Utc::now().timestamp()))
                .await;
        }
        outcome
    }

    async fn drive(
        &self,
        url: &str,
        page: &dyn PageDriver,
    ) -> Result<ApartmentRecord, ScrapeFailure> {
        info!("scraping {}", url);
        page.navigate(url).await?;
        tokio::time::sleep(self.config.post_nav_delay).await;

        let landed = page.current_url().await;
        if !self.on_expected_site(&landed) {
            warn!("redirected to unexpected domain: {}", landed);
            self.snapshot(page, "unexpected_redirect").await;
            return Err(ScrapeFailure::Redirected { landed });
        }

        let monitor = RequestMonitor::new(TrafficFilter::AnalyticsPost {
            endpoint_prefix: self.config.site.analytics_endpoint.clone(),
        });
        monitor.arm(page).await?;

        let appeared = self
            .config
            .control_wait
            .poll_until(|| async move {
                page.query_count(NEXT_IMAGE_SELECTOR)
                    .await
                    .map(|n| n > 0)
                    .unwrap_or(false)
            })
            .await;
        if !appeared {
            self.note_missing_control(page).await;
            return Err(ScrapeFailure::ControlNotFound);
        }

        monitor.start_capturing();
        if !page.click(NEXT_IMAGE_SELECTOR).await? {
            // present a moment ago; the page must still be shifting under us
            self.note_missing_control(page).await;
            return Err(ScrapeFailure::ControlNotFound);
        }

        let captured = monitor.drain(page, self.config.drain_wait).await?;
        debug!("captured {} candidate payloads", captured.len());

        let html = page.html().await?;
        let fields = extract::html_fields(&html, &self.config.site.cdn_host_marker);
        debug!(
            "html fields: sqft={:?}, {} features, {} image ids",
            fields.sqft,
            fields.home_features.len(),
            fields.image_ids.len()
        );

        if captured.is_empty() {
            return Err(ScrapeFailure::EmptyCapture);
        }

        // payloads arrive newest last; the first one that validates wins
        for hit in &captured {
            if let Some(payload) = hit.payload.as_deref() {
                if let Some(record) = extract::extract(payload, url, &fields) {
                    info!("extracted listing {}", record.listing_id);
                    return Ok(record);
                }
            }
        }

        Err(ScrapeFailure::NoValidPayload {
            captured: captured.len(),
        })
    }

    fn on_expected_site(&self, landed: &str) -> bool {
        let domain = self.config.site.expected_domain.as_str();
        match url::Url::parse(landed) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => host == domain || host.ends_with(&format!(".{}", domain)),
                None => false,
            },
            Err(_) => false,
        }
    }

    async fn note_missing_control(&self, page: &dyn PageDriver) {
        warn!("could not find the next-image control");
        self.snapshot(page, &format!("no_button_{}", Utc::now().timestamp()))
            .await;
        if let Ok(html) = page.html().await {
            if !html.to_lowercase().contains("listing") {
                debug!("page does not look like a listing at all");
            }
        }
    }

    /// Best effort: diagnostics must never turn into fresh failures.
    async fn snapshot(&self, page: &dyn PageDriver, name: &str) {
        let path: PathBuf = self.config.snapshot_dir.join(format!("{}.png", name));
        if let Err(err) = page.screenshot(&path).await {
            warn!("screenshot failed: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::TrafficSink;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A page whose click feeds scripted payloads into the armed sink, the
    /// way a real carousel click provokes analytics POSTs.
    struct ScriptedPage {
        landed_url: String,
        html: String,
        control_present: bool,
        click_payloads: Vec<String>,
        sink: Mutex<Option<TrafficSink>>,
        snapshots: Mutex<Vec<String>>,
    }

    impl ScriptedPage {
        fn new(landed_url: &str) -> Self {
            Self {
                landed_url: landed_url.to_string(),
                html: "<html><body>listing</body></html>".to_string(),
                control_present: true,
                click_payloads: Vec::new(),
                sink: Mutex::new(None),
                snapshots: Mutex::new(Vec::new()),
            }
        }

        fn snapshot_names(&self) -> Vec<String> {
            self.snapshots.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedPage {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn current_url(&self) -> String {
            self.landed_url.clone()
        }

        async fn html(&self) -> Result<String> {
            Ok(self.html.clone())
        }

        async fn click(&self, _selector: &str) -> Result<bool> {
            if !self.control_present {
                return Ok(false);
            }
            if let Some(sink) = self.sink.lock().unwrap().as_ref() {
                for payload in &self.click_payloads {
                    sink.offer(
                        "https://cs.zg-api.com/click/se_prod_web_nl/event",
                        None,
                        Some(payload.clone()),
                    );
                }
            }
            Ok(true)
        }

        async fn query_count(&self, _selector: &str) -> Result<usize> {
            Ok(usize::from(self.control_present))
        }

        async fn watch_traffic(&self, sink: TrafficSink) -> Result<()> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        async fn response_body(&self, _request_id: &str) -> Result<Vec<u8>> {
            Err(anyhow::anyhow!("no bodies in this fake"))
        }

        async fn screenshot(&self, path: &Path) -> Result<()> {
            self.snapshots
                .lock()
                .unwrap()
                .push(path.file_name().unwrap().to_string_lossy().into_owned());
            Ok(())
        }
    }

    fn fast_config(dir: &Path) -> ScrapeConfig {
        ScrapeConfig {
            post_nav_delay: Duration::ZERO,
            control_wait: crate::pacing::WaitPolicy::new(Duration::from_millis(5), 2),
            drain_wait: crate::pacing::WaitPolicy::new(Duration::from_millis(20), 3),
            snapshot_dir: dir.to_path_buf(),
            ..ScrapeConfig::default()
        }
    }

    fn valid_payload(listing_id: &str) -> String {
        json!({
            "listing_info": { "price_amt": 2800, "listing_id": listing_id },
            "property_info": { "bedroom_cnt": 1 }
        })
        .to_string()
    }

    #[tokio::test]
    async fn happy_path_takes_first_valid_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = ScriptedPage::new("https://streeteasy.com/building/foo/1a");
        page.click_payloads = vec![
            "junk".to_string(),
            valid_payload("first"),
            valid_payload("second"),
        ];

        let config = fast_config(dir.path());
        let record = ListingScraper::new(&config)
            .scrape("https://streeteasy.com/building/foo/1a", &page)
            .await
            .unwrap();
        assert_eq!(record.listing_id, "first");
        assert!(page.snapshot_names().is_empty());
    }

    #[tokio::test]
    async fn offsite_landing_is_redirected_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let page = ScriptedPage::new("https://captcha.example.net/blocked");

        let config = fast_config(dir.path());
        let err = ListingScraper::new(&config)
            .scrape("https://streeteasy.com/building/foo/1a", &page)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeFailure::Redirected { .. }));
        assert_eq!(page.snapshot_names(), vec!["unexpected_redirect.png"]);
    }

    #[tokio::test]
    async fn subdomain_landing_is_not_a_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = ScriptedPage::new("https://www.streeteasy.com/building/foo/1a");
        page.click_payloads = vec![valid_payload("42")];

        let config = fast_config(dir.path());
        let record = ListingScraper::new(&config)
            .scrape("https://streeteasy.com/building/foo/1a", &page)
            .await
            .unwrap();
        assert_eq!(record.listing_id, "42");
    }

    #[tokio::test]
    async fn missing_control_fails_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = ScriptedPage::new("https://streeteasy.com/building/foo/1a");
        page.control_present = false;

        let config = fast_config(dir.path());
        let err = ListingScraper::new(&config)
            .scrape("https://streeteasy.com/building/foo/1a", &page)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeFailure::ControlNotFound));
        let names = page.snapshot_names();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("no_button_"));
    }

    #[tokio::test]
    async fn silent_click_yields_empty_capture() {
        let dir = tempfile::tempdir().unwrap();
        let page = ScriptedPage::new("https://streeteasy.com/building/foo/1a");

        let config = fast_config(dir.path());
        let err = ListingScraper::new(&config)
            .scrape("https://streeteasy.com/building/foo/1a", &page)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeFailure::EmptyCapture));
    }

    #[tokio::test]
    async fn junk_only_payloads_yield_no_valid_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = ScriptedPage::new("https://streeteasy.com/building/foo/1a");
        page.click_payloads = vec!["junk".to_string(), "{}".to_string()];

        let config = fast_config(dir.path());
        let err = ListingScraper::new(&config)
            .scrape("https://streeteasy.com/building/foo/1a", &page)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeFailure::NoValidPayload { captured: 2 }));
    }
}
