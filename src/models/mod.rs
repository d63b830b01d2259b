use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One normalized apartment listing, as persisted in the progress file and
/// handed to the catalog store.
///
/// Field names are the on-disk JSON contract; do not rename them without
/// migrating existing progress files and the catalog schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApartmentRecord {
    /// Canonical listing URL; unique key across a crawl and in the catalog.
    pub listing_url: String,
    /// Advertised monthly rent. Always positive.
    pub rent: i64,
    /// Square footage, preferring the rendered page over the payload.
    pub sqft: Option<i64>,
    /// Bedroom count; zero means studio.
    pub bedrooms: i64,
    /// Full baths plus 0.5 per half bath.
    pub bathrooms: f64,
    pub neighborhood: Option<String>,
    pub borough: Option<String>,
    /// Street address with postal code appended.
    pub address: Option<String>,
    pub floor: Option<i64>,
    pub home_features: Vec<String>,
    pub amenities: Vec<String>,
    pub year_built: Option<i64>,
    pub photo_count: i64,
    /// CDN image identifiers in carousel order.
    pub image_ids: Vec<String>,
    /// Site-assigned listing identifier; never empty.
    pub listing_id: String,
    pub property_id: Option<String>,
}

/// Why a single listing failed to scrape.
///
/// Every variant is terminal for its URL within the run: the orchestrator
/// records the failure and moves on, never retrying automatically.
#[derive(Debug, Error)]
pub enum ScrapeFailure {
    /// The browser landed on a different site. Usually means the session was
    /// flagged and bounced.
    #[error("redirected off-site to {landed}")]
    Redirected { landed: String },
    /// The carousel advance control never appeared; page structure changed
    /// or never finished loading.
    #[error("advance control not found on page")]
    ControlNotFound,
    /// Traffic was captured but no payload produced a complete record.
    #[error("no valid payload among {captured} captured")]
    NoValidPayload { captured: usize },
    /// The monitor drained without a single matching event.
    #[error("no matching traffic captured")]
    EmptyCapture,
    /// Anything unexpected mid-scrape.
    #[error(transparent)]
    Exception(#[from] anyhow::Error),
}
