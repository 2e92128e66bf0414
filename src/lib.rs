//! CVSS severity prediction for scraped security advisories.
//!
//! Advisories are scraped into CSV tables of `(cwe_name, summary)`, scored by
//! a random forest trained on historical CVSS data, and served over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod scraper;
pub mod storage;

pub use error::{AppError, Result};
