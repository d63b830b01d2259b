//! Network-traffic capture for one tab: an explicit filter, a capture flag
//! armed right before the provoking UI action, and a quiescence drain whose
//! total wait is always bounded.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use crate::browser::PageDriver;
use crate::pacing::WaitPolicy;

/// The only place traffic predicates live. Adding a capture kind means
/// adding a variant here, not scattering URL checks around the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficFilter {
    /// Outgoing requests whose URL starts with the analytics endpoint
    /// prefix; the POST body is the payload of interest.
    AnalyticsPost { endpoint_prefix: String },
    /// Finished responses for listing photos: the URL must carry both the
    /// CDN host marker and the size variant. Bodies are fetched at drain
    /// time, once the events have gone quiet.
    CdnImage {
        host_marker: String,
        size_variant: String,
    },
}

impl TrafficFilter {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            TrafficFilter::AnalyticsPost { endpoint_prefix } => url.starts_with(endpoint_prefix),
            TrafficFilter::CdnImage {
                host_marker,
                size_variant,
            } => url.contains(host_marker.as_str()) && url.contains(size_variant.as_str()),
        }
    }

    /// Whether drained items should have their response bodies fetched.
    pub fn wants_bodies(&self) -> bool {
        matches!(self, TrafficFilter::CdnImage { .. })
    }
}

/// One matching network event.
#[derive(Debug, Clone)]
pub struct CapturedTraffic {
    pub url: String,
    /// Protocol request id; present for response captures.
    pub request_id: Option<String>,
    /// POST body, for request captures.
    pub payload: Option<String>,
    /// Response body, filled in during drain when the filter wants it.
    pub body: Option<Vec<u8>>,
    pub seen_at: Instant,
}

#[derive(Debug)]
struct MonitorState {
    capturing: bool,
    hits: Vec<CapturedTraffic>,
    last_hit: Option<Instant>,
}

/// Write side handed to the page driver. The browser appends events from its
/// own transport thread, so the buffer sits behind a plain std mutex that is
/// never held across an await.
#[derive(Clone)]
pub struct TrafficSink {
    filter: TrafficFilter,
    state: Arc<Mutex<MonitorState>>,
}

impl TrafficSink {
    pub fn filter(&self) -> &TrafficFilter {
        &self.filter
    }

    /// Called for every network event the driver sees. The filter and the
    /// capture flag decide whether anything is kept; events from before
    /// `start_capturing` never enter the buffer.
    pub fn offer(&self, url: &str, request_id: Option<String>, payload: Option<String>) {
        if !self.filter.matches(url) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if !state.capturing {
            return;
        }
        debug!("captured {}", url);
        let now = Instant::now();
        state.hits.push(CapturedTraffic {
            url: url.to_string(),
            request_id,
            payload,
            body: None,
            seen_at: now,
        });
        state.last_hit = Some(now);
    }
}

/// Watches one tab's network traffic for events matching a single filter.
pub struct RequestMonitor {
    filter: TrafficFilter,
    state: Arc<Mutex<MonitorState>>,
}

impl RequestMonitor {
    pub fn new(filter: TrafficFilter) -> Self {
        Self {
            filter,
            state: Arc::new(Mutex::new(MonitorState {
                capturing: false,
                hits: Vec::new(),
                last_hit: None,
            })),
        }
    }

    /// Subscribes the page's network events into this monitor. Capture stays
    /// off until [`start_capturing`](Self::start_capturing).
    pub async fn arm(&self, page: &dyn PageDriver) -> Result<()> {
        page.watch_traffic(self.sink()).await
    }

    pub fn sink(&self) -> TrafficSink {
        TrafficSink {
            filter: self.filter.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Flips capture on. Call immediately before the UI action that provokes
    /// the traffic, so page-load noise stays out of the buffer.
    pub fn start_capturing(&self) {
        self.state.lock().unwrap().capturing = true;
    }

    /// Waits until matching traffic has been quiet for one full cooldown
    /// window, then returns everything captured. Gives up after
    /// `policy.max_retries` windows whether or not anything arrived, so the
    /// worst case is bounded by `policy.budget()`. An empty result is a
    /// normal outcome, not an error.
    pub async fn drain(
        &self,
        page: &dyn PageDriver,
        policy: WaitPolicy,
    ) -> Result<Vec<CapturedTraffic>> {
        let mut windows = 0u32;
        loop {
            tokio::time::sleep(policy.cooldown).await;
            let (hit_count, quiet) = {
                let state = self.state.lock().unwrap();
                let quiet = state
                    .last_hit
                    .map(|at| at.elapsed() >= policy.cooldown)
                    .unwrap_or(false);
                (state.hits.len(), quiet)
            };
            if hit_count > 0 && quiet {
                break;
            }
            windows += 1;
            if windows >= policy.max_retries {
                if hit_count == 0 {
                    debug!("drain gave up after {} empty windows", windows);
                } else {
                    warn!(
                        "drain cut off after {} windows with traffic still arriving",
                        windows
                    );
                }
                break;
            }
        }

        let hits = self.state.lock().unwrap().hits.clone();
        if self.filter.wants_bodies() {
            return Ok(self.fetch_bodies(page, hits).await);
        }
        Ok(hits)
    }

    /// Resolves response bodies for drained hits. A hit whose body cannot be
    /// fetched (evicted from the browser cache, tab gone) is dropped with a
    /// warning rather than failing the drain.
    async fn fetch_bodies(
        &self,
        page: &dyn PageDriver,
        hits: Vec<CapturedTraffic>,
    ) -> Vec<CapturedTraffic> {
        let mut kept = Vec::with_capacity(hits.len());
        for mut hit in hits {
            let request_id = match hit.request_id.clone() {
                Some(id) => id,
                None => {
                    warn!("dropping {}: no request id", hit.url);
                    continue;
                }
            };
            match page.response_body(&request_id).await {
                Ok(body) => {
                    hit.body = Some(body);
                    kept.push(hit);
                }
                Err(err) => warn!("dropping {}: body fetch failed: {:#}", hit.url, err),
            }
        }
        kept
    }
}
