//! headless_chrome-backed implementation of the browser boundary.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use super::PageDriver;
use crate::config::BrowserConfig;
use crate::monitor::{TrafficFilter, TrafficSink};

/// One isolated browser process. Dropping the session kills the process,
/// which is what gives the crawl its session-per-listing isolation.
pub struct ChromeSession {
    browser: Browser,
}

impl ChromeSession {
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        info!("launching chrome (headless: {})", config.headless);
        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(config.sandbox)
            .idle_browser_timeout(config.idle_timeout)
            .build()
            .context("Failed to build launch options")?;
        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        Ok(Self { browser })
    }

    /// Opens a fresh tab in this session.
    pub fn page(&self) -> Result<ChromePage> {
        let tab = self.browser.new_tab().context("Failed to open a tab")?;
        Ok(ChromePage { tab })
    }
}

/// [`PageDriver`] over one Chrome tab.
pub struct ChromePage {
    tab: Arc<Tab>,
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .with_context(|| format!("Failed to navigate to {}", url))?;
        self.tab
            .wait_until_navigated()
            .context("Navigation did not settle")?;
        Ok(())
    }

    async fn current_url(&self) -> String {
        self.tab.get_url()
    }

    async fn html(&self) -> Result<String> {
        self.tab.get_content().context("Failed to read page content")
    }

    async fn click(&self, selector: &str) -> Result<bool> {
        match self.tab.find_element(selector) {
            Ok(element) => {
                element
                    .click()
                    .with_context(|| format!("Failed to click {}", selector))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn query_count(&self, selector: &str) -> Result<usize> {
        Ok(self
            .tab
            .find_elements(selector)
            .map(|elements| elements.len())
            .unwrap_or(0))
    }

    async fn watch_traffic(&self, sink: TrafficSink) -> Result<()> {
        match sink.filter().clone() {
            TrafficFilter::AnalyticsPost { endpoint_prefix } => {
                // pause matching requests just long enough to read the POST
                // body, then let them continue untouched
                let patterns = vec![RequestPattern {
                    url_pattern: Some(format!("{}*", endpoint_prefix)),
                    resource_Type: None,
                    request_stage: Some(RequestStage::Request),
                }];
                self.tab
                    .enable_fetch(Some(&patterns), None)
                    .context("Failed to enable request interception")?;
                self.tab.enable_request_interception(Arc::new(
                    move |_transport: Arc<Transport>,
                          _session_id: SessionId,
                          event: RequestPausedEvent| {
                        let request = &event.params.request;
                        sink.offer(&request.url, None, request.post_data.clone());
                        RequestPausedDecision::Continue(None)
                    },
                ))?;
            }
            TrafficFilter::CdnImage { .. } => {
                self.tab.register_response_handling(
                    "traffic-monitor",
                    Box::new(move |params, _fetch_body| {
                        sink.offer(&params.response.url, Some(params.request_id.clone()), None);
                    }),
                )?;
            }
        }
        debug!("traffic watch installed");
        Ok(())
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        let returned = self
            .tab
            .call_method(Network::GetResponseBody {
                request_id: request_id.to_string(),
            })
            .context("Response body unavailable")?;
        if returned.base_64_encoded {
            Ok(BASE64.decode(returned.body.as_bytes())?)
        } else {
            Ok(returned.body.into_bytes())
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let png_data = self.tab.capture_screenshot(
            Page::CaptureScreenshotFormatOption::Png,
            None,
            None,
            true,
        )?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, png_data)
            .with_context(|| format!("Failed to save screenshot to {}", path.display()))?;
        debug!("saved screenshot to {}", path.display());
        Ok(())
    }
}
