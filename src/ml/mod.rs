/// Severity prediction for security advisories
///
/// This module provides:
/// - Feature encoding of category labels and summary text
/// - A bagged regression-tree ensemble
/// - The training procedure with grid search and cross-validation
/// - Atomic, checksummed model artifacts
/// - Batch and free-text inference behind a keyword guardrail

pub mod artifact;
pub mod features;
pub mod forest;
pub mod guardrail;
pub mod inference;
pub mod models;
pub mod training;

pub use artifact::{ArtifactStore, ModelArtifact, ReplacementPolicy};
pub use features::{CategoryEncoder, FeatureEncoder, TfidfVectorizer};
pub use forest::{mean_squared_error, ForestParams, RandomForestRegressor};
pub use guardrail::{GuardrailConfig, GuardrailVerdict, KeywordFilter};
pub use inference::{SeverityPipeline, TextAssessment};
pub use models::{
    CandidateScore, EvaluationKind, HyperparameterGrid, ModelMetadata, TextFeatureConfig,
    TrainingConfig, TrainingReport,
};
pub use training::{k_fold, train_test_split, Trainer, TrainingOutcome};
