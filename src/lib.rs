//! Scrape pipeline behind a "guess the rent" apartment trivia game.
//!
//! Three passes, each resumable on its own: collect listing URLs from the
//! region search indexes, scrape every listing through a fresh headless
//! browser session, then fan the results out to photos and the catalog
//! database.

pub mod browser;
pub mod catalog;
pub mod config;
pub mod extract;
pub mod images;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod pacing;
pub mod progress;
pub mod scrapers;
