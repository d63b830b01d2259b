//! Pure extraction: one captured analytics payload plus one HTML snapshot
//! in, one normalized [`ApartmentRecord`] out. No IO, no browser.

use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;

use crate::models::ApartmentRecord;

const PROPERTY_DETAILS_SELECTOR: &str = r#"[data-testid="propertyDetails"] p"#;
const HOME_FEATURES_SELECTOR: &str =
    r#"[data-testid="home-features-section"] li p[class*="Body_base"]"#;
const IMAGE_SELECTOR: &str = "img[src]";

/// Fields scraped out of the rendered listing page, independent of any
/// captured traffic. These win over payload values where both exist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlFields {
    pub sqft: Option<i64>,
    pub home_features: Vec<String>,
    pub image_ids: Vec<String>,
}

/// Scrapes square footage, the home-feature list and carousel image ids out
/// of a full page snapshot.
pub fn html_fields(html: &str, cdn_marker: &str) -> HtmlFields {
    let document = Html::parse_document(html);
    let mut fields = HtmlFields::default();

    let details = Selector::parse(PROPERTY_DETAILS_SELECTOR).unwrap();
    for node in document.select(&details) {
        let text = node.text().collect::<String>();
        let text = text.trim();
        // price-per-sqft strings ("$3/ft²") also mention ft², skip those
        if text.contains("ft²") && !text.contains('$') {
            fields.sqft = parse_sqft(text);
            break;
        }
    }

    let features = Selector::parse(HOME_FEATURES_SELECTOR).unwrap();
    for node in document.select(&features) {
        let feature = node.text().collect::<String>().trim().to_string();
        if !feature.is_empty() {
            fields.home_features.push(feature);
        }
    }

    let images = Selector::parse(IMAGE_SELECTOR).unwrap();
    for node in document.select(&images) {
        if let Some(src) = node.value().attr("src") {
            if let Some(id) = image_id_from_src(src, cdn_marker) {
                if !fields.image_ids.iter().any(|seen| seen == id) {
                    fields.image_ids.push(id.to_string());
                }
            }
        }
    }

    fields
}

/// "2,991 ft²" -> 2991.
fn parse_sqft(text: &str) -> Option<i64> {
    text.replace("ft²", "").replace(',', "").trim().parse().ok()
}

/// Pulls the image id out of a CDN src: the segment between the host marker
/// and the first size-variant dash.
fn image_id_from_src<'a>(src: &'a str, cdn_marker: &str) -> Option<&'a str> {
    let tail = src.split(cdn_marker).nth(1)?;
    let id = tail.split('-').next().unwrap_or("");
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Wire schema of one analytics payload. Every field is optional with an
/// explicit default; whether a payload is usable is decided exactly once,
/// in [`extract`].
#[derive(Debug, Default, Deserialize)]
struct AnalyticsPayload {
    #[serde(default)]
    listing_info: ListingInfo,
    #[serde(default)]
    property_info: PropertyInfo,
    #[serde(default)]
    building_info: BuildingInfo,
    #[serde(default)]
    media: Media,
}

#[derive(Debug, Default, Deserialize)]
struct ListingInfo {
    price_amt: Option<i64>,
    #[serde(default)]
    amenities: Vec<String>,
    photo_cnt: Option<i64>,
    #[serde(default, deserialize_with = "string_or_number")]
    listing_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PropertyInfo {
    bedroom_cnt: Option<i64>,
    full_bath_cnt: Option<i64>,
    half_bath_cnt: Option<i64>,
    square_feet_amt: Option<i64>,
    area_short_nm: Option<String>,
    borough_nm: Option<String>,
    street_address: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    zip_code_nb: Option<String>,
    floor_nb: Option<i64>,
    #[serde(default, deserialize_with = "string_or_number")]
    property_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BuildingInfo {
    year_built_amt: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct Media {
    /// Pipe-separated image id list.
    media_id: Option<String>,
}

/// Ids arrive as strings or bare numbers depending on the payload revision;
/// accept both.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Turns one captured payload into a record, or `None` when the payload is
/// not a usable listing event. A record needs a positive rent, a bedroom
/// count and a non-empty listing id; everything else degrades gracefully.
pub fn extract(payload: &str, listing_url: &str, html: &HtmlFields) -> Option<ApartmentRecord> {
    let data: AnalyticsPayload = match serde_json::from_str(payload) {
        Ok(data) => data,
        Err(err) => {
            debug!("payload rejected: {}", err);
            return None;
        }
    };

    let rent = data.listing_info.price_amt?;
    if rent <= 0 {
        debug!("payload rejected: non-positive rent {}", rent);
        return None;
    }
    let bedrooms = data.property_info.bedroom_cnt?;
    let listing_id = data.listing_info.listing_id.filter(|id| !id.is_empty())?;

    let full = data.property_info.full_bath_cnt.unwrap_or(0);
    let half = data.property_info.half_bath_cnt.unwrap_or(0);
    let bathrooms = full as f64 + half as f64 * 0.5;

    let street = data.property_info.street_address.unwrap_or_default();
    let zip = data.property_info.zip_code_nb.unwrap_or_default();
    let address = format!("{} {}", street, zip).trim().to_string();
    let address = if address.is_empty() { None } else { Some(address) };

    let mut image_ids: Vec<String> = data
        .media
        .media_id
        .as_deref()
        .map(|ids| {
            ids.split('|')
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if image_ids.is_empty() {
        image_ids = html.image_ids.clone();
    }

    Some(ApartmentRecord {
        listing_url: listing_url.to_string(),
        rent,
        sqft: html.sqft.or(data.property_info.square_feet_amt),
        bedrooms,
        bathrooms,
        neighborhood: data.property_info.area_short_nm,
        borough: data.property_info.borough_nm,
        address,
        floor: data.property_info.floor_nb,
        home_features: html.home_features.clone(),
        amenities: data.listing_info.amenities,
        year_built: data.building_info.year_built_amt,
        photo_count: data.listing_info.photo_cnt.unwrap_or(0),
        image_ids,
        listing_id,
        property_id: data.property_info.property_id,
    })
}
