use crate::error::{AppError, Result};
use crate::metrics::{TRAINING_HOLDOUT_MSE, TRAINING_RUNS_TOTAL};
use crate::ml::artifact::ModelArtifact;
use crate::ml::features::FeatureEncoder;
use crate::ml::forest::{mean_squared_error, ForestParams, RandomForestRegressor};
use crate::ml::models::{
    CandidateScore, EvaluationKind, ModelMetadata, TrainingConfig, TrainingReport,
};
use crate::models::{Advisory, FeatureSet, LabeledAdvisory};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shuffled train/test partition of `0..n`.
///
/// The test split takes `ceil(test_size * n)` rows. Deterministic for a seed.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64) * test_size).ceil() as usize;
    let n_test = n_test.min(n);
    let train = indices.split_off(n_test);
    (train, indices)
}

/// Contiguous k-fold partition of `0..n` as `(train, validation)` pairs.
///
/// The first `n % k` folds hold one extra row.
pub fn k_fold(n: usize, k: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;

    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        let validation: Vec<usize> = (start..end).collect();
        let train: Vec<usize> = (0..start).chain(end..n).collect();
        folds.push((train, validation));
        start = end;
    }
    folds
}

/// Trained artifact together with the report of the run that produced it
#[derive(Debug)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub report: TrainingReport,
}

/// Training procedure: split, grid search with k-fold CV, refit, evaluate.
///
/// The encoder is always fitted on the rows the model is fitted on (per fold
/// during the search, the whole training split for the final refit), so the
/// held-out rows never shape the vocabulary.
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Run the full protocol for one feature set
    pub fn train(
        &self,
        feature_set: FeatureSet,
        records: &[LabeledAdvisory],
    ) -> Result<TrainingOutcome> {
        if records.is_empty() {
            return Err(AppError::Configuration(
                "no training data: the historical dataset is empty".to_string(),
            ));
        }

        let seed = self.config.seed;
        let folds = self.config.cv_folds;
        let candidates = self.config.grid.candidates();
        let (train_idx, test_idx) = train_test_split(records.len(), self.config.test_size, seed);

        info!(
            feature_set = %feature_set,
            n_records = records.len(),
            n_train = train_idx.len(),
            n_test = test_idx.len(),
            n_candidates = candidates.len(),
            cv_folds = folds,
            "Starting training run"
        );

        let outcome = if train_idx.len() < folds {
            self.train_small(feature_set, records, &candidates)?
        } else {
            let train: Vec<&LabeledAdvisory> = train_idx.iter().map(|&i| &records[i]).collect();
            let test: Vec<&LabeledAdvisory> = test_idx.iter().map(|&i| &records[i]).collect();

            let scores = self.grid_search(feature_set, &train, &candidates)?;
            let best = select_best(&scores)?;
            info!(params = %best.params, mean_cv_mse = best.mean_mse, "Selected hyperparameters");

            let (encoder, model) = self.fit_pipeline(feature_set, &train, best.params, true)?;

            let test_advisories: Vec<&Advisory> = test.iter().map(|r| &r.advisory).collect();
            let predictions = model.predict(&encoder.transform(&test_advisories))?;
            let mse = mean_squared_error(&targets(&test), &predictions);

            self.finish(
                feature_set,
                records.len(),
                train.len(),
                test.len(),
                encoder,
                model,
                scores,
                EvaluationKind::HeldOut,
                mse,
            )
        };

        TRAINING_RUNS_TOTAL
            .with_label_values(&[&feature_set.to_string()])
            .inc();
        TRAINING_HOLDOUT_MSE
            .with_label_values(&[&feature_set.to_string()])
            .set(outcome.report.mse);

        info!(
            feature_set = %feature_set,
            run_id = %outcome.report.run_id,
            evaluation = ?outcome.report.evaluation,
            mse = outcome.report.mse,
            "Mean Squared Error on Test Data: {}",
            outcome.report.mse
        );

        Ok(outcome)
    }

    /// Too few rows to hold out and cross-validate: fit everything once,
    /// without resampling, and report the error on the fitted rows.
    fn train_small(
        &self,
        feature_set: FeatureSet,
        records: &[LabeledAdvisory],
        candidates: &[ForestParams],
    ) -> Result<TrainingOutcome> {
        let params = *candidates
            .first()
            .ok_or_else(|| AppError::Configuration("hyperparameter grid is empty".to_string()))?;

        warn!(
            n_records = records.len(),
            cv_folds = self.config.cv_folds,
            params = %params,
            "Dataset too small for hold-out and cross-validation; fitting all rows"
        );

        let all: Vec<&LabeledAdvisory> = records.iter().collect();
        let (encoder, model) = self.fit_pipeline(feature_set, &all, params, false)?;

        let advisories: Vec<&Advisory> = all.iter().map(|r| &r.advisory).collect();
        let predictions = model.predict(&encoder.transform(&advisories))?;
        let mse = mean_squared_error(&targets(&all), &predictions);

        Ok(self.finish(
            feature_set,
            records.len(),
            all.len(),
            0,
            encoder,
            model,
            Vec::new(),
            EvaluationKind::Resubstitution,
            mse,
        ))
    }

    /// Mean k-fold MSE for every candidate, in candidate order
    fn grid_search(
        &self,
        feature_set: FeatureSet,
        train: &[&LabeledAdvisory],
        candidates: &[ForestParams],
    ) -> Result<Vec<CandidateScore>> {
        let folds = k_fold(train.len(), self.config.cv_folds);
        let mut scores = Vec::with_capacity(candidates.len());

        for &params in candidates {
            let mut fold_mse = Vec::with_capacity(folds.len());

            for (fit_idx, val_idx) in &folds {
                let fit_rows: Vec<&LabeledAdvisory> = fit_idx.iter().map(|&i| train[i]).collect();
                let val_rows: Vec<&LabeledAdvisory> = val_idx.iter().map(|&i| train[i]).collect();

                // A fold that cannot be fitted scores NaN; the candidate stays in the search
                let (encoder, model) = match self.fit_pipeline(feature_set, &fit_rows, params, true) {
                    Ok(fitted) => fitted,
                    Err(e) => {
                        warn!(params = %params, error = %e, "Fold fit failed; scoring it as NaN");
                        fold_mse.push(f64::NAN);
                        continue;
                    }
                };
                let val_advisories: Vec<&Advisory> = val_rows.iter().map(|r| &r.advisory).collect();
                let predictions = model.predict(&encoder.transform(&val_advisories))?;
                fold_mse.push(mean_squared_error(&targets(&val_rows), &predictions));
            }

            let mean_mse = fold_mse.iter().sum::<f64>() / fold_mse.len() as f64;
            debug!(params = %params, mean_mse, "Cross-validated candidate");
            scores.push(CandidateScore {
                params,
                mean_mse,
                fold_mse,
            });
        }

        Ok(scores)
    }

    fn fit_pipeline(
        &self,
        feature_set: FeatureSet,
        rows: &[&LabeledAdvisory],
        params: ForestParams,
        bootstrap: bool,
    ) -> Result<(FeatureEncoder, RandomForestRegressor)> {
        let advisories: Vec<&Advisory> = rows.iter().map(|r| &r.advisory).collect();
        let encoder = FeatureEncoder::fit(feature_set, &self.config.text, &advisories)?;
        let x = encoder.transform(&advisories);
        let model =
            RandomForestRegressor::fit_with(&x, &targets(rows), params, self.config.seed, bootstrap)?;
        Ok((encoder, model))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        feature_set: FeatureSet,
        n_records: usize,
        n_train: usize,
        n_test: usize,
        encoder: FeatureEncoder,
        model: RandomForestRegressor,
        candidates: Vec<CandidateScore>,
        evaluation: EvaluationKind,
        mse: f64,
    ) -> TrainingOutcome {
        let report = TrainingReport {
            run_id: Uuid::new_v4(),
            feature_set,
            trained_at: chrono::Utc::now(),
            n_records,
            n_train,
            n_test,
            n_features: encoder.n_features(),
            seed: self.config.seed,
            best_params: model.params(),
            candidates,
            evaluation,
            mse,
        };

        let artifact = ModelArtifact {
            metadata: ModelMetadata::from(&report),
            encoder,
            model,
        };

        TrainingOutcome { artifact, report }
    }
}

/// Lowest finite mean error wins; ties go to the earliest candidate.
/// When no candidate has a finite error the first one is used.
fn select_best(scores: &[CandidateScore]) -> Result<&CandidateScore> {
    let best = scores
        .iter()
        .filter(|s| s.mean_mse.is_finite())
        .fold(None, |best: Option<&CandidateScore>, s| match best {
            Some(b) if b.mean_mse <= s.mean_mse => Some(b),
            _ => Some(s),
        });

    match best {
        Some(best) => Ok(best),
        None => {
            let first = scores
                .first()
                .ok_or_else(|| AppError::Training("hyperparameter grid is empty".to_string()))?;
            warn!(params = %first.params, "No candidate has a finite CV error; using the first");
            Ok(first)
        }
    }
}

fn targets(rows: &[&LabeledAdvisory]) -> Array1<f64> {
    rows.iter().map(|r| r.cvss).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::models::HyperparameterGrid;

    fn small_grid_config() -> TrainingConfig {
        TrainingConfig {
            grid: HyperparameterGrid {
                n_trees: vec![5, 10],
                max_depth: vec![4],
                min_samples_split: vec![2],
            },
            ..TrainingConfig::default()
        }
    }

    fn synthetic(n: usize) -> Vec<LabeledAdvisory> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    LabeledAdvisory::new("CWE-79", format!("stored xss in widget {}", i), 6.1)
                } else {
                    LabeledAdvisory::new("CWE-89", format!("sql injection in report {}", i), 8.5)
                }
            })
            .collect()
    }

    #[test]
    fn test_train_test_split_sizes_and_determinism() {
        let (train, test) = train_test_split(10, 0.2, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());

        assert_eq!(train_test_split(10, 0.2, 42), (train, test));
        assert_eq!(train_test_split(2, 0.2, 42).1.len(), 1);
    }

    #[test]
    fn test_k_fold_partitions() {
        let folds = k_fold(10, 3);
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0].1, vec![0, 1, 2, 3]);
        assert_eq!(folds[1].1, vec![4, 5, 6]);
        assert_eq!(folds[2].1, vec![7, 8, 9]);

        for (train, validation) in &folds {
            assert_eq!(train.len() + validation.len(), 10);
            assert!(validation.iter().all(|v| !train.contains(v)));
        }
    }

    #[test]
    fn test_select_best_prefers_earliest_tie() {
        let p = |n| ForestParams {
            n_trees: n,
            max_depth: 10,
            min_samples_split: 2,
        };
        let scores = vec![
            CandidateScore { params: p(1), mean_mse: 0.5, fold_mse: vec![] },
            CandidateScore { params: p(2), mean_mse: 0.2, fold_mse: vec![] },
            CandidateScore { params: p(3), mean_mse: 0.2, fold_mse: vec![] },
            CandidateScore { params: p(4), mean_mse: f64::NAN, fold_mse: vec![] },
        ];
        assert_eq!(select_best(&scores).unwrap().params.n_trees, 2);
        assert!(select_best(&[]).is_err());

        let all_nan = vec![
            CandidateScore { params: p(7), mean_mse: f64::NAN, fold_mse: vec![f64::NAN] },
            CandidateScore { params: p(8), mean_mse: f64::NAN, fold_mse: vec![f64::NAN] },
        ];
        assert_eq!(select_best(&all_nan).unwrap().params.n_trees, 7);
    }

    #[test]
    fn test_fold_without_text_is_scored_nan() {
        // Summary text only on the rows forming the first validation fold, so
        // that fold's fit rows have no vocabulary at all
        let n = 30;
        let config = small_grid_config();
        let (train_idx, _) = train_test_split(n, config.test_size, config.seed);
        let folds = k_fold(train_idx.len(), config.cv_folds);
        let with_text: Vec<usize> = folds[0].1.iter().map(|&i| train_idx[i]).collect();

        let records: Vec<LabeledAdvisory> = (0..n)
            .map(|i| {
                if with_text.contains(&i) {
                    LabeledAdvisory::new("CWE-79", format!("stored xss in widget {}", i), 6.1)
                } else {
                    LabeledAdvisory::new("CWE-89", "", 8.5)
                }
            })
            .collect();

        let outcome = Trainer::new(config)
            .unwrap()
            .train(FeatureSet::SummaryOnly, &records)
            .unwrap();

        let report = &outcome.report;
        assert_eq!(report.evaluation, EvaluationKind::HeldOut);
        assert_eq!(report.candidates.len(), 2);
        for candidate in &report.candidates {
            assert!(candidate.fold_mse[0].is_nan());
            assert!(candidate.fold_mse[1..].iter().all(|m| m.is_finite()));
        }
        assert_eq!(report.best_params, report.candidates[0].params);
        assert!(report.mse.is_finite());
    }

    #[test]
    fn test_full_protocol_reports_every_candidate() {
        let trainer = Trainer::new(small_grid_config()).unwrap();
        let outcome = trainer.train(FeatureSet::CategoryAndSummary, &synthetic(30)).unwrap();

        let report = &outcome.report;
        assert_eq!(report.evaluation, EvaluationKind::HeldOut);
        assert_eq!(report.n_test, 6);
        assert_eq!(report.n_train, 24);
        assert_eq!(report.candidates.len(), 2);
        assert!(report.candidates.iter().all(|c| c.fold_mse.len() == 3));
        assert!(report.mse.is_finite());
        assert_eq!(outcome.artifact.metadata.run_id, report.run_id);
        assert_eq!(outcome.artifact.encoder.n_features(), report.n_features);
    }

    #[test]
    fn test_two_record_dataset_fits_exactly() {
        let records = vec![
            LabeledAdvisory::new("CWE-79", "XSS vuln", 6.1),
            LabeledAdvisory::new("CWE-89", "SQL injection", 8.5),
        ];
        let trainer = Trainer::new(TrainingConfig::default()).unwrap();
        let outcome = trainer.train(FeatureSet::CategoryAndSummary, &records).unwrap();

        assert_eq!(outcome.report.evaluation, EvaluationKind::Resubstitution);
        let score = outcome
            .artifact
            .predict_one(&Advisory::new("CWE-79", "XSS vuln"))
            .unwrap();
        assert!((score - 6.1).abs() < 1e-6);
    }

    #[test]
    fn test_empty_dataset_is_configuration_error() {
        let trainer = Trainer::new(TrainingConfig::default()).unwrap();
        let result = trainer.train(FeatureSet::SummaryOnly, &[]);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_training_is_reproducible() {
        let trainer = Trainer::new(small_grid_config()).unwrap();
        let data = synthetic(20);

        let a = trainer.train(FeatureSet::SummaryOnly, &data).unwrap();
        let b = trainer.train(FeatureSet::SummaryOnly, &data).unwrap();

        assert_eq!(a.report.best_params, b.report.best_params);
        assert_eq!(a.report.mse, b.report.mse);
        let sample = Advisory::from_description("sql injection in the billing report");
        assert_eq!(
            a.artifact.predict_one(&sample).unwrap(),
            b.artifact.predict_one(&sample).unwrap()
        );
    }
}
