use crate::error::{AppError, Result};
use crate::ml::forest::ForestParams;
use crate::models::FeatureSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on the text vocabulary size
pub const MAX_TEXT_FEATURES: usize = 1000;

/// Training procedure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of rows held out for the final evaluation
    #[serde(default = "default_test_size")]
    pub test_size: f64,

    /// Seed for the split and for every ensemble fit
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of cross-validation folds
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,

    /// Ensemble hyperparameter grid
    #[serde(default)]
    pub grid: HyperparameterGrid,

    /// Text feature extraction
    #[serde(default)]
    pub text: TextFeatureConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            seed: default_seed(),
            cv_folds: default_cv_folds(),
            grid: HyperparameterGrid::default(),
            text: TextFeatureConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Reject settings the training protocol cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(AppError::Configuration(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if self.cv_folds < 2 {
            return Err(AppError::Configuration(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        self.grid.validate()?;
        self.text.validate()
    }
}

/// Candidate values for each ensemble hyperparameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperparameterGrid {
    #[serde(default = "default_n_trees")]
    pub n_trees: Vec<usize>,

    #[serde(default = "default_max_depth")]
    pub max_depth: Vec<u16>,

    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: Vec<usize>,
}

impl Default for HyperparameterGrid {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
        }
    }
}

impl HyperparameterGrid {
    /// Every combination, `n_trees` varying slowest
    pub fn candidates(&self) -> Vec<ForestParams> {
        let mut out = Vec::with_capacity(
            self.n_trees.len() * self.max_depth.len() * self.min_samples_split.len(),
        );
        for &n_trees in &self.n_trees {
            for &max_depth in &self.max_depth {
                for &min_samples_split in &self.min_samples_split {
                    out.push(ForestParams {
                        n_trees,
                        max_depth,
                        min_samples_split,
                    });
                }
            }
        }
        out
    }

    fn validate(&self) -> Result<()> {
        if self.n_trees.is_empty() || self.max_depth.is_empty() || self.min_samples_split.is_empty()
        {
            return Err(AppError::Configuration(
                "hyperparameter grid must list at least one value per parameter".to_string(),
            ));
        }
        if self.n_trees.contains(&0) {
            return Err(AppError::Configuration("n_trees must be positive".to_string()));
        }
        if self.max_depth.contains(&0) {
            return Err(AppError::Configuration("max_depth must be positive".to_string()));
        }
        if self.min_samples_split.iter().any(|&m| m < 2) {
            return Err(AppError::Configuration(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Text feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFeatureConfig {
    /// Maximum vocabulary size (at most [`MAX_TEXT_FEATURES`])
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    /// Minimum number of documents a term must appear in
    #[serde(default = "default_min_doc_freq")]
    pub min_doc_freq: usize,

    /// Inclusive n-gram range
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),

    /// Replace raw counts with `1 + ln(count)`
    #[serde(default)]
    pub sublinear_tf: bool,
}

impl Default for TextFeatureConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
            min_doc_freq: default_min_doc_freq(),
            ngram_range: default_ngram_range(),
            sublinear_tf: false,
        }
    }
}

impl TextFeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 || self.max_features > MAX_TEXT_FEATURES {
            return Err(AppError::Configuration(format!(
                "max_features must be in 1..={}, got {}",
                MAX_TEXT_FEATURES, self.max_features
            )));
        }
        let (lo, hi) = self.ngram_range;
        if lo == 0 || lo > hi {
            return Err(AppError::Configuration(format!(
                "invalid ngram_range ({}, {})",
                lo, hi
            )));
        }
        Ok(())
    }
}

/// How the reported quality signal was measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    /// Held-out split never seen during fitting
    HeldOut,

    /// Dataset too small to hold anything out; error on the fitted rows
    Resubstitution,
}

/// Mean cross-validation error of one grid candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    pub mean_mse: f64,
    pub fold_mse: Vec<f64>,
}

/// Outcome of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub feature_set: FeatureSet,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub n_records: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub n_features: usize,
    pub seed: u64,
    pub best_params: ForestParams,
    pub candidates: Vec<CandidateScore>,
    pub evaluation: EvaluationKind,

    /// Mean squared error reported as the quality signal of the run
    pub mse: f64,
}

/// Metadata embedded in every model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub run_id: Uuid,
    pub feature_set: FeatureSet,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub params: ForestParams,
    pub seed: u64,
    pub n_training_samples: usize,
    pub n_features: usize,
    pub evaluation: EvaluationKind,
    pub mse: f64,
}

impl From<&TrainingReport> for ModelMetadata {
    fn from(report: &TrainingReport) -> Self {
        Self {
            run_id: report.run_id,
            feature_set: report.feature_set,
            trained_at: report.trained_at,
            params: report.best_params,
            seed: report.seed,
            n_training_samples: report.n_train,
            n_features: report.n_features,
            evaluation: report.evaluation,
            mse: report.mse,
        }
    }
}

fn default_test_size() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_cv_folds() -> usize {
    3
}

fn default_n_trees() -> Vec<usize> {
    vec![50, 100]
}

fn default_max_depth() -> Vec<u16> {
    vec![10, 20]
}

fn default_min_samples_split() -> Vec<usize> {
    vec![2, 5]
}

fn default_max_features() -> usize {
    MAX_TEXT_FEATURES
}

fn default_min_doc_freq() -> usize {
    1
}

fn default_ngram_range() -> (usize, usize) {
    (1, 1)
}
