pub mod alert;
pub mod cache;
pub mod config;
pub mod db;
pub mod history;
pub mod parse;
pub mod portal;
pub mod scheduler;
pub mod scraper;

pub use cache::DamCache;
pub use config::Config;
pub use db::Database;
pub use scraper::{fallback_reading, LiveScraper, Reading};
