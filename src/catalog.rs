//! Downstream catalog: the SQLite table the trivia backend reads. Inserts
//! are keyed on the listing URL, so re-importing the same progress file is
//! always safe.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::models::ApartmentRecord;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS apartments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_url TEXT NOT NULL UNIQUE,
    rent INTEGER NOT NULL CHECK (rent > 0),
    sqft INTEGER,
    bedrooms INTEGER NOT NULL,
    bathrooms REAL NOT NULL,
    neighborhood TEXT,
    borough TEXT,
    address TEXT,
    floor INTEGER,
    home_features TEXT NOT NULL DEFAULT '[]',
    amenities TEXT NOT NULL DEFAULT '[]',
    year_built INTEGER,
    photo_count INTEGER NOT NULL DEFAULT 0,
    image_ids TEXT NOT NULL DEFAULT '[]',
    listing_id TEXT NOT NULL,
    property_id TEXT
)
"#;

/// Import accounting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub skipped: usize,
}

/// Handle on the apartments catalog database.
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Opens the catalog at `path`, creating file and table as needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("could not open catalog at {}", path.display()))?;
        Self::init(pool).await
    }

    /// In-memory catalog, for tests. Pinned to one connection because every
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("could not open in-memory catalog")?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("could not create apartments table")?;
        Ok(Self { pool })
    }

    /// Inserts one record. Returns false when the listing URL is already
    /// present; a duplicate is a skip, not an error.
    pub async fn insert(&self, record: &ApartmentRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO apartments
            (listing_url, rent, sqft, bedrooms, bathrooms, neighborhood, borough,
             address, floor, home_features, amenities, year_built, photo_count,
             image_ids, listing_id, property_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.listing_url)
        .bind(record.rent)
        .bind(record.sqft)
        .bind(record.bedrooms)
        .bind(record.bathrooms)
        .bind(&record.neighborhood)
        .bind(&record.borough)
        .bind(&record.address)
        .bind(record.floor)
        .bind(serde_json::to_string(&record.home_features)?)
        .bind(serde_json::to_string(&record.amenities)?)
        .bind(record.year_built)
        .bind(record.photo_count)
        .bind(serde_json::to_string(&record.image_ids)?)
        .bind(&record.listing_id)
        .bind(&record.property_id)
        .execute(&self.pool)
        .await
        .context("insert failed")?;
        Ok(result.rows_affected() == 1)
    }

    /// Imports a whole progress file worth of records.
    pub async fn import_all(&self, records: &[ApartmentRecord]) -> Result<ImportStats> {
        let mut stats = ImportStats::default();
        for record in records {
            if self.insert(record).await? {
                stats.inserted += 1;
            } else {
                stats.skipped += 1;
            }
        }
        info!(
            "imported {} apartments ({} duplicates skipped)",
            stats.inserted, stats.skipped
        );
        Ok(stats)
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM apartments")
            .fetch_one(&self.pool)
            .await
            .context("count failed")?;
        Ok(count)
    }
}
