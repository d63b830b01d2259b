//! Runtime configuration: site constants, browser launch knobs and the
//! politeness tunables that operators actually turn.

use std::path::PathBuf;
use std::time::Duration;

use crate::pacing::WaitPolicy;

/// Everything about the target site in one place: URLs, the traffic markers
/// the monitor filters on, and the image size variants.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Root used to build region search URLs.
    pub base_url: String,
    /// Host a listing navigation must land on; anything else is a redirect.
    pub expected_domain: String,
    /// Prefix of the client-side analytics endpoint whose POST bodies carry
    /// the structured listing data.
    pub analytics_endpoint: String,
    /// Host-plus-path marker identifying listing-photo CDN traffic.
    pub cdn_host_marker: String,
    /// Size variant the carousel requests in-page.
    pub monitor_size_variant: String,
    /// Size variant fetched when downloading photos for storage.
    pub download_size_variant: String,
}

impl SiteProfile {
    /// Search index URL for one region page.
    pub fn search_url(&self, region: &str, page: u32) -> String {
        format!("{}/for-rent/{}?page={}", self.base_url, region, page)
    }

    /// Direct CDN URL for one image id at the given size variant.
    pub fn image_url(&self, image_id: &str, variant: &str) -> String {
        format!("https://{}{}-{}.webp", self.cdn_host_marker, image_id, variant)
    }
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            base_url: "https://streeteasy.com".to_string(),
            expected_domain: "streeteasy.com".to_string(),
            analytics_endpoint: "https://cs.zg-api.com/click/se_prod_web_nl/".to_string(),
            cdn_host_marker: "photos.zillowstatic.com/fp/".to_string(),
            monitor_size_variant: "se_large_800_400".to_string(),
            download_size_variant: "cc_ft_1536".to_string(),
        }
    }
}

/// Browser launch knobs.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Chromium sandbox; disabled by default so the crawler runs in
    /// containers without extra privileges.
    pub sandbox: bool,
    /// How long the browser may sit idle before the driver gives up on it.
    pub idle_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Tunables for scraping a single listing page.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub site: SiteProfile,
    /// Fixed settle after navigation, before the landed-URL check.
    pub post_nav_delay: Duration,
    /// Poll for the carousel control; doubles as the render-settle budget.
    pub control_wait: WaitPolicy,
    /// Quiescence policy for draining captured analytics traffic.
    pub drain_wait: WaitPolicy,
    /// Where diagnostic screenshots go.
    pub snapshot_dir: PathBuf,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            site: SiteProfile::default(),
            post_nav_delay: Duration::from_secs(5),
            control_wait: WaitPolicy::new(Duration::from_secs(1), 8),
            drain_wait: WaitPolicy::new(Duration::from_secs(2), 5),
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

/// Tunables for the URL collection pass.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub site: SiteProfile,
    /// Regions walked in order.
    pub regions: Vec<String>,
    /// Pagination cap per region; collection stops earlier on an empty page.
    pub max_pages_per_region: u32,
    /// Fixed settle after each search page loads.
    pub page_settle: Duration,
    /// Poll for listing links to render.
    pub link_wait: WaitPolicy,
    /// Pause between search pages.
    pub page_delay: Duration,
    /// Pause after a failed page load before moving on.
    pub error_delay: Duration,
}

impl CollectorConfig {
    pub fn default_regions() -> Vec<String> {
        ["manhattan", "brooklyn", "queens", "bronx"]
            .map(String::from)
            .to_vec()
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            site: SiteProfile::default(),
            regions: Self::default_regions(),
            max_pages_per_region: 10,
            page_settle: Duration::from_secs(5),
            link_wait: WaitPolicy::new(Duration::from_secs(2), 3),
            page_delay: Duration::from_secs(2),
            error_delay: Duration::from_secs(3),
        }
    }
}

/// Tunables for the photo download pass.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    /// Cap on photos fetched per listing.
    pub max_per_listing: usize,
    /// Concurrent downloads across all listings.
    pub concurrency: usize,
    /// Pause between downloads within one listing.
    pub inter_delay: Duration,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_per_listing: 5,
            concurrency: 5,
            inter_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_carries_region_and_page() {
        let site = SiteProfile::default();
        assert_eq!(
            site.search_url("brooklyn", 3),
            "https://streeteasy.com/for-rent/brooklyn?page=3"
        );
    }

    #[test]
    fn image_url_uses_marker_and_variant() {
        let site = SiteProfile::default();
        assert_eq!(
            site.image_url("abc123", "cc_ft_1536"),
            "https://photos.zillowstatic.com/fp/abc123-cc_ft_1536.webp"
        );
    }
}
