//! CSV persistence for scraped, predicted and historical advisory tables

pub mod schema;
pub mod table;

pub use schema::{batch_advisories, training_records};
pub use table::{AdvisoryTable, CVSS_COLUMN, CWE_NAME_COLUMN, SUMMARY_COLUMN};

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::models::Advisory;
use std::path::{Path, PathBuf};
use tracing::info;

/// Locations of the three CSV files the service works with
#[derive(Debug, Clone)]
pub struct DataStore {
    scraped_path: PathBuf,
    predicted_path: PathBuf,
    training_path: PathBuf,
}

impl DataStore {
    pub fn new(
        scraped_path: impl Into<PathBuf>,
        predicted_path: impl Into<PathBuf>,
        training_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scraped_path: scraped_path.into(),
            predicted_path: predicted_path.into(),
            training_path: training_path.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            &config.scraped_data_path,
            &config.predicted_data_path,
            &config.training_data_path,
        )
    }

    pub fn scraped_path(&self) -> &Path {
        &self.scraped_path
    }

    pub fn predicted_path(&self) -> &Path {
        &self.predicted_path
    }

    pub fn training_path(&self) -> &Path {
        &self.training_path
    }

    /// Replace the scraped table with freshly scraped advisories
    pub fn save_scraped(&self, advisories: &[Advisory]) -> Result<()> {
        AdvisoryTable::from_advisories(advisories).write(&self.scraped_path)?;
        info!(
            path = %self.scraped_path.display(),
            rows = advisories.len(),
            "Saved scraped advisories"
        );
        Ok(())
    }

    /// Scraped table, or `MissingPrerequisite` when nothing was scraped yet
    pub fn load_scraped(&self) -> Result<AdvisoryTable> {
        if !self.scraped_path.exists() {
            return Err(AppError::MissingPrerequisite(
                "No scraped data available for prediction".to_string(),
            ));
        }
        AdvisoryTable::read(&self.scraped_path)
    }

    pub fn save_predicted(&self, table: &AdvisoryTable) -> Result<()> {
        table.write(&self.predicted_path)?;
        info!(
            path = %self.predicted_path.display(),
            rows = table.len(),
            "Saved predicted advisories"
        );
        Ok(())
    }

    /// Historical dataset, or a configuration error when it is absent
    pub fn load_training(&self) -> Result<AdvisoryTable> {
        if !self.training_path.exists() {
            return Err(AppError::Configuration(format!(
                "no training data at {}",
                self.training_path.display()
            )));
        }
        AdvisoryTable::read(&self.training_path)
    }

    /// Scraped rows as JSON objects, empty when nothing was scraped yet
    pub fn view_scraped(&self) -> Result<Vec<serde_json::Value>> {
        view(&self.scraped_path)
    }

    /// Predicted rows as JSON objects, empty when nothing was predicted yet
    pub fn view_predicted(&self) -> Result<Vec<serde_json::Value>> {
        view(&self.predicted_path)
    }
}

fn view(path: &Path) -> Result<Vec<serde_json::Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(AdvisoryTable::read(path)?.to_json_records())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> DataStore {
        DataStore::new(
            dir.join("new_data.csv"),
            dir.join("predicted_data.csv"),
            dir.join("cve1.csv"),
        )
    }

    #[test]
    fn test_views_are_empty_before_any_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(store.view_scraped().unwrap().is_empty());
        assert!(store.view_predicted().unwrap().is_empty());
    }

    #[test]
    fn test_load_scraped_requires_prior_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(matches!(
            store.load_scraped(),
            Err(AppError::MissingPrerequisite(_))
        ));
        assert!(matches!(
            store.load_training(),
            Err(AppError::Configuration(_))
        ));

        store
            .save_scraped(&[Advisory::new("CWE-79", "XSS vuln")])
            .unwrap();
        let table = store.load_scraped().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(store.view_scraped().unwrap().len(), 1);
    }
}
