pub mod collector;
pub mod listing;

pub use collector::UrlCollector;
pub use listing::ListingScraper;
