/// Integration tests for the severity prediction pipeline
///
/// These tests cover the path from a historical CSV to scored advisories:
/// - Schema validation of training and batch tables
/// - Training with grid search and hold-out evaluation
/// - Artifact persistence and reload
/// - Batch and free-text inference

use cvss_predictor::{
    error::AppError,
    ml::{
        mean_squared_error, train_test_split, ArtifactStore, EvaluationKind, HyperparameterGrid,
        KeywordFilter, ReplacementPolicy, SeverityPipeline, TextAssessment, Trainer,
        TrainingConfig,
    },
    models::{Advisory, FeatureSet, LabeledAdvisory},
    storage::{training_records, AdvisoryTable},
};
use ndarray::Array1;
use std::path::Path;

const REJECTION: &str = "The entered content does not appear to describe a cyber incident. Please provide a valid incident description.";

fn quick_config() -> TrainingConfig {
    TrainingConfig {
        grid: HyperparameterGrid {
            n_trees: vec![10, 20],
            max_depth: vec![10],
            min_samples_split: vec![2],
        },
        ..TrainingConfig::default()
    }
}

/// Four weakness families with a per-row reference token and bounded noise
fn synthetic_history(n: usize) -> Vec<LabeledAdvisory> {
    let families = [
        ("CWE-79", "cross site scripting in", 6.1),
        ("CWE-89", "sql injection in", 8.8),
        ("CWE-22", "path traversal in", 7.5),
        ("CWE-400", "resource exhaustion in", 5.3),
    ];

    (0..n)
        .map(|i| {
            let (cwe, text, base) = families[i % families.len()];
            let noise = ((i * 7919) % 11) as f64 / 10.0 - 0.5;
            LabeledAdvisory::new(cwe, format!("{} component{} ref{}", text, i % 5, i), base + noise)
        })
        .collect()
}

fn pipeline_in(dir: &Path) -> SeverityPipeline {
    SeverityPipeline::new(
        ArtifactStore::new(dir.join("batch.model"), ReplacementPolicy::Overwrite),
        ArtifactStore::new(dir.join("text.model"), ReplacementPolicy::Overwrite),
        KeywordFilter::default(),
    )
}

fn write_history(path: &Path, records: &[LabeledAdvisory]) {
    let mut table = AdvisoryTable::new(vec![
        "cwe_name".to_string(),
        "summary".to_string(),
        "cvss".to_string(),
    ]);
    for record in records {
        table
            .push_row(vec![
                record.advisory.cwe_name.clone(),
                record.advisory.summary.clone(),
                record.cvss.to_string(),
            ])
            .unwrap();
    }
    table.write(path).unwrap();
}

#[test]
fn test_two_record_history_reproduces_known_score() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("cve1.csv");
    std::fs::write(&csv_path, "cwe_name,summary,cvss\nCWE-79,XSS vuln,6.1\nCWE-89,SQL injection,8.5\n").unwrap();

    let table = AdvisoryTable::read(&csv_path).unwrap();
    let records = training_records(&table, FeatureSet::CategoryAndSummary).unwrap();
    let outcome = Trainer::new(TrainingConfig::default())
        .unwrap()
        .train(FeatureSet::CategoryAndSummary, &records)
        .unwrap();
    assert_eq!(outcome.report.evaluation, EvaluationKind::Resubstitution);

    let pipeline = pipeline_in(dir.path());
    pipeline
        .store(FeatureSet::CategoryAndSummary)
        .save(outcome.artifact)
        .unwrap();

    let scores = pipeline
        .predict_records(&[Advisory::new("CWE-79", "XSS vuln")])
        .unwrap();
    assert_eq!(scores.len(), 1);
    assert!((scores[0] - 6.1).abs() < 1e-6, "got {}", scores[0]);
}

#[test]
fn test_training_rows_score_within_held_out_error() {
    let dir = tempfile::tempdir().unwrap();
    let history = synthetic_history(60);

    let outcome = Trainer::new(quick_config())
        .unwrap()
        .train(FeatureSet::CategoryAndSummary, &history)
        .unwrap();
    assert_eq!(outcome.report.evaluation, EvaluationKind::HeldOut);
    assert_eq!(outcome.report.n_test, 12);
    assert_eq!(outcome.report.candidates.len(), 2);
    let held_out_mse = outcome.report.mse;

    let pipeline = pipeline_in(dir.path());
    pipeline
        .store(FeatureSet::CategoryAndSummary)
        .save(outcome.artifact)
        .unwrap();

    let advisories: Vec<Advisory> = history.iter().map(|r| r.advisory.clone()).collect();
    let truth: Array1<f64> = history.iter().map(|r| r.cvss).collect();
    let predicted = Array1::from(pipeline.predict_records(&advisories).unwrap());

    let resubstitution_mse = mean_squared_error(&truth, &predicted);
    assert!(
        resubstitution_mse <= held_out_mse,
        "resubstitution {} exceeds held-out {}",
        resubstitution_mse,
        held_out_mse
    );
}

#[test]
fn test_held_out_rows_never_shape_vocabulary() {
    let history = synthetic_history(40);
    let (train_idx, test_idx) = train_test_split(history.len(), 0.2, 42);

    let outcome = Trainer::new(quick_config())
        .unwrap()
        .train(FeatureSet::SummaryOnly, &history)
        .unwrap();
    let vectorizer = outcome.artifact.encoder.text_vectorizer();

    for &i in &test_idx {
        assert!(!vectorizer.contains(&format!("ref{}", i)), "held-out row {} leaked", i);
    }
    for &i in &train_idx {
        assert!(vectorizer.contains(&format!("ref{}", i)));
    }
}

#[test]
fn test_batch_inference_is_deterministic_and_order_preserving() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("cve1.csv");
    write_history(&csv_path, &synthetic_history(30));

    let table = AdvisoryTable::read(&csv_path).unwrap();
    let records = training_records(&table, FeatureSet::CategoryAndSummary).unwrap();
    let outcome = Trainer::new(quick_config())
        .unwrap()
        .train(FeatureSet::CategoryAndSummary, &records)
        .unwrap();

    let pipeline = pipeline_in(dir.path());
    pipeline
        .store(FeatureSet::CategoryAndSummary)
        .save(outcome.artifact)
        .unwrap();

    let scraped = AdvisoryTable::from_reader(
        "cwe_name,summary,source\n\
         CWE-89,sql injection in billing,nciipc\n\
         CWE-79,cross site scripting in portal,nciipc\n\
         CWE-1021,clickjacking in dashboard,cyware\n\
         CWE-89,sql injection in billing,nciipc\n"
            .as_bytes(),
    )
    .unwrap();

    let first = pipeline.predict_table(&scraped).unwrap();
    let second = pipeline.predict_table(&scraped).unwrap();
    assert_eq!(first, second);

    assert_eq!(first.headers(), ["cwe_name", "summary", "source", "cvss"]);
    assert_eq!(first.len(), 4);
    assert_eq!(first.cell(2, 2), Some("cyware"));
    // Identical rows get identical scores
    assert_eq!(first.cell(0, 3), first.cell(3, 3));
}

#[test]
fn test_batch_without_summary_column_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = Trainer::new(quick_config())
        .unwrap()
        .train(FeatureSet::CategoryAndSummary, &synthetic_history(30))
        .unwrap();

    let pipeline = pipeline_in(dir.path());
    pipeline
        .store(FeatureSet::CategoryAndSummary)
        .save(outcome.artifact)
        .unwrap();

    let scraped = AdvisoryTable::from_reader("cwe_name\nCWE-79\nCWE-89\nCWE-999\n".as_bytes()).unwrap();
    let predicted = pipeline.predict_table(&scraped).unwrap();

    assert_eq!(predicted.len(), 3);
    for row in 0..3 {
        let score: f64 = predicted.cell(row, 1).unwrap().parse().unwrap();
        assert!(score.is_finite());
    }
}

#[test]
fn test_batch_without_category_column_is_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    // No model on disk: validation must fail before any model is loaded
    let pipeline = pipeline_in(dir.path());

    let scraped = AdvisoryTable::from_reader("summary\nXSS vuln\n".as_bytes()).unwrap();
    match pipeline.predict_table(&scraped) {
        Err(AppError::Validation(message)) => assert!(message.contains("cwe_name")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_missing_model_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path());

    let result = pipeline.predict_records(&[Advisory::new("CWE-79", "XSS vuln")]);
    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[test]
fn test_free_text_guardrail_scenarios() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path());

    // Rejected text never touches the (absent) model
    let rejected = pipeline.assess_text("The weather is nice today").unwrap();
    assert_eq!(
        rejected,
        TextAssessment::Rejected {
            message: REJECTION.to_string()
        }
    );

    let mut history = synthetic_history(30);
    history.push(LabeledAdvisory::new("CWE-506", "ransomware attack encrypted files", 9.8));
    let outcome = Trainer::new(quick_config())
        .unwrap()
        .train(FeatureSet::SummaryOnly, &history)
        .unwrap();
    pipeline
        .store(FeatureSet::SummaryOnly)
        .save(outcome.artifact)
        .unwrap();

    let scored = pipeline
        .assess_text("A ransomware attack encrypted all files")
        .unwrap();
    let score = scored.score().expect("accepted text is scored");
    assert!(scored
        .message()
        .starts_with("Predicted CVSS score for the incident: "));
    let embedded: f64 = scored
        .message()
        .trim_start_matches("Predicted CVSS score for the incident: ")
        .parse()
        .unwrap();
    assert_eq!(embedded, score);
}

#[test]
fn test_retrain_is_picked_up_by_running_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_in(dir.path());
    let trainer = Trainer::new(TrainingConfig::default()).unwrap();
    let sample = Advisory::new("CWE-79", "XSS vuln");

    let first = trainer
        .train(
            FeatureSet::CategoryAndSummary,
            &[
                LabeledAdvisory::new("CWE-79", "XSS vuln", 6.1),
                LabeledAdvisory::new("CWE-89", "SQL injection", 8.5),
            ],
        )
        .unwrap();
    pipeline
        .store(FeatureSet::CategoryAndSummary)
        .save(first.artifact)
        .unwrap();
    let before = pipeline.predict_records(&[sample.clone()]).unwrap()[0];

    // A separate writer replaces the artifact on disk
    let second = trainer
        .train(
            FeatureSet::CategoryAndSummary,
            &[
                LabeledAdvisory::new("CWE-79", "XSS vuln", 4.0),
                LabeledAdvisory::new("CWE-89", "SQL injection", 8.5),
            ],
        )
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));
    ArtifactStore::new(dir.path().join("batch.model"), ReplacementPolicy::Overwrite)
        .save(second.artifact)
        .unwrap();
    let after = pipeline.predict_records(&[sample]).unwrap()[0];

    assert!((before - 6.1).abs() < 1e-6);
    assert!((after - 4.0).abs() < 1e-6);
}
