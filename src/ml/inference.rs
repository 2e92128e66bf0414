use crate::config::Config;
use crate::error::{AppError, Result};
use crate::metrics::{GUARDRAIL_REJECTIONS_TOTAL, PREDICTIONS_TOTAL, PREDICTION_DURATION};
use crate::ml::artifact::{ArtifactStore, ModelArtifact};
use crate::ml::guardrail::{GuardrailVerdict, KeywordFilter};
use crate::models::{Advisory, FeatureSet};
use crate::storage::{batch_advisories, AdvisoryTable, CVSS_COLUMN};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Result of scoring one free-text description
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TextAssessment {
    /// The guardrail judged the text out of domain; no model was consulted
    Rejected { message: String },

    /// The text-only model produced a score
    Scored { score: f64, message: String },
}

impl TextAssessment {
    pub fn message(&self) -> &str {
        match self {
            TextAssessment::Rejected { message } | TextAssessment::Scored { message, .. } => message,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            TextAssessment::Scored { score, .. } => Some(*score),
            TextAssessment::Rejected { .. } => None,
        }
    }
}

/// Inference entry points over the two trained models.
///
/// Built once at startup and shared by reference. Artifacts are loaded on
/// first use and reloaded whenever a training run replaces them on disk.
pub struct SeverityPipeline {
    batch_model: ArtifactStore,
    text_model: ArtifactStore,
    guardrail: KeywordFilter,
}

impl SeverityPipeline {
    pub fn new(batch_model: ArtifactStore, text_model: ArtifactStore, guardrail: KeywordFilter) -> Self {
        Self {
            batch_model,
            text_model,
            guardrail,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let models = &config.models;
        Self::new(
            ArtifactStore::new(&models.batch_model_path, models.replacement),
            ArtifactStore::new(&models.text_model_path, models.replacement),
            KeywordFilter::new(&config.guardrail),
        )
    }

    /// Store holding the artifact for `feature_set`
    pub fn store(&self, feature_set: FeatureSet) -> &ArtifactStore {
        match feature_set {
            FeatureSet::CategoryAndSummary => &self.batch_model,
            FeatureSet::SummaryOnly => &self.text_model,
        }
    }

    pub fn guardrail(&self) -> &KeywordFilter {
        &self.guardrail
    }

    /// Score advisories with the two-feature model, one score per input in order
    pub fn predict_records(&self, advisories: &[Advisory]) -> Result<Vec<f64>> {
        let artifact = self.load(FeatureSet::CategoryAndSummary)?;
        let refs: Vec<&Advisory> = advisories.iter().collect();

        let timer = Instant::now();
        let scores = artifact.predict(&refs)?;
        record_prediction(FeatureSet::CategoryAndSummary, scores.len(), timer);

        Ok(scores)
    }

    /// Validate a scraped table and return it with the `cvss` column set.
    ///
    /// Validation runs before the model is touched; any invalid row rejects the
    /// whole table.
    pub fn predict_table(&self, table: &AdvisoryTable) -> Result<AdvisoryTable> {
        let advisories = batch_advisories(table)?;
        let scores = self.predict_records(&advisories)?;

        let mut predicted = table.clone();
        predicted.set_column(CVSS_COLUMN, scores.iter().map(|s| s.to_string()).collect())?;

        info!(rows = predicted.len(), "Batch prediction completed");
        Ok(predicted)
    }

    /// Guardrail check, then text-only scoring when the text is in domain
    pub fn assess_text(&self, description: &str) -> Result<TextAssessment> {
        match self.guardrail.check(description) {
            GuardrailVerdict::Rejected => {
                GUARDRAIL_REJECTIONS_TOTAL.inc();
                debug!("Description rejected by keyword guardrail");
                Ok(TextAssessment::Rejected {
                    message: self.guardrail.rejection_message().to_string(),
                })
            }
            GuardrailVerdict::Accepted { matched } => {
                debug!(keywords = ?matched, "Description accepted by keyword guardrail");
                let artifact = self.load(FeatureSet::SummaryOnly)?;

                let timer = Instant::now();
                let score = artifact.predict_one(&Advisory::from_description(description))?;
                record_prediction(FeatureSet::SummaryOnly, 1, timer);

                Ok(TextAssessment::Scored {
                    score,
                    message: format!("Predicted CVSS score for the incident: {}", score),
                })
            }
        }
    }

    fn load(&self, feature_set: FeatureSet) -> Result<Arc<ModelArtifact>> {
        let store = self.store(feature_set);
        let artifact = store.load()?;
        if artifact.feature_set() != feature_set {
            return Err(AppError::Configuration(format!(
                "Model file at {} holds a {} model, expected {}",
                store.path().display(),
                artifact.feature_set(),
                feature_set
            )));
        }
        Ok(artifact)
    }
}

fn record_prediction(feature_set: FeatureSet, count: usize, timer: Instant) {
    let label = feature_set.to_string();
    PREDICTIONS_TOTAL
        .with_label_values(&[&label])
        .inc_by(count as f64);
    PREDICTION_DURATION
        .with_label_values(&[&label])
        .observe(timer.elapsed().as_secs_f64());
}
