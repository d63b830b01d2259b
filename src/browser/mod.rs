//! The browser boundary: everything the pipeline needs from a live page,
//! behind one trait so scraping logic stays testable without Chrome.

pub mod chrome;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::monitor::TrafficSink;

pub use chrome::{ChromePage, ChromeSession};

/// One live page in one browser session.
///
/// The production implementation is [`ChromePage`]; tests substitute
/// scripted fakes.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigates and waits for the navigation to commit.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// URL the page actually landed on, redirects included.
    async fn current_url(&self) -> String;

    /// Full serialized snapshot of the current DOM.
    async fn html(&self) -> Result<String>;

    /// Clicks the first element matching `selector`; `Ok(false)` when the
    /// element is absent.
    async fn click(&self, selector: &str) -> Result<bool>;

    /// Number of elements currently matching `selector`.
    async fn query_count(&self, selector: &str) -> Result<usize>;

    /// Routes matching network events into `sink` for the rest of the tab's
    /// life.
    async fn watch_traffic(&self, sink: TrafficSink) -> Result<()>;

    /// Fetches a finished response body by protocol request id.
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>>;

    /// Best-effort page screenshot for diagnostics.
    async fn screenshot(&self, path: &Path) -> Result<()>;
}
