pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::config::Config;
use crate::error::Result;
use crate::ml::SeverityPipeline;
use crate::scraper::ScraperRegistry;
use crate::storage::DataStore;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SeverityPipeline>,
    pub data: Arc<DataStore>,
    pub scrapers: Arc<ScraperRegistry>,
}

impl AppState {
    pub fn new(pipeline: SeverityPipeline, data: DataStore, scrapers: ScraperRegistry) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            data: Arc::new(data),
            scrapers: Arc::new(scrapers),
        }
    }

    /// Build every collaborator from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            SeverityPipeline::from_config(config),
            DataStore::from_config(&config.storage),
            ScraperRegistry::from_config(&config.scraper)?,
        ))
    }
}
