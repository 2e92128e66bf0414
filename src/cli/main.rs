use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use cvss_predictor::{
    config::Config,
    ml::{ArtifactStore, Trainer, TrainingReport},
    models::FeatureSet,
    storage::{training_records, AdvisoryTable},
};
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cvss-cli")]
#[command(about = "CVSS Predictor CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "CVSS_ENDPOINT")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train model artifacts from the historical dataset
    Train {
        /// Which model to train
        #[arg(short, long, value_enum, default_value = "all")]
        feature_set: TrainTarget,

        /// Historical CSV (defaults to the configured training data path)
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Scrape an advisory site into the scraped table
    Scrape {
        #[arg(short, long)]
        url: String,
    },

    /// Score the scraped table
    Predict,

    /// Score one incident description
    Assess {
        #[arg(value_name = "DESCRIPTION")]
        description: String,
    },

    /// Show the scraped table
    ViewScraped,

    /// Show the predicted table
    ViewPredicted,

    /// Check server health
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum TrainTarget {
    CategoryAndSummary,
    SummaryOnly,
    All,
}

impl TrainTarget {
    fn feature_sets(self) -> Vec<FeatureSet> {
        match self {
            TrainTarget::CategoryAndSummary => vec![FeatureSet::CategoryAndSummary],
            TrainTarget::SummaryOnly => vec![FeatureSet::SummaryOnly],
            TrainTarget::All => vec![FeatureSet::CategoryAndSummary, FeatureSet::SummaryOnly],
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cvss_predictor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Train { feature_set, data } => {
            let config = Config::load().context("failed to load configuration")?;
            let path = data.unwrap_or_else(|| config.storage.training_data_path.clone());
            let table = AdvisoryTable::read(&path)
                .with_context(|| format!("failed to read training data at {}", path.display()))?;
            let trainer = Trainer::new(config.training.clone())?;

            let mut reports = Vec::new();
            for feature_set in feature_set.feature_sets() {
                let records = training_records(&table, feature_set)?;
                let outcome = trainer.train(feature_set, &records)?;

                let model_path = match feature_set {
                    FeatureSet::CategoryAndSummary => &config.models.batch_model_path,
                    FeatureSet::SummaryOnly => &config.models.text_model_path,
                };
                ArtifactStore::new(model_path, config.models.replacement).save(outcome.artifact)?;

                eprintln!("{}", summarize(&outcome.report, model_path));
                reports.push(outcome.report);
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }

        Commands::Scrape { url } => {
            let response = client
                .post(format!("{}/scrape", cli.endpoint))
                .json(&json!({ "url": url }))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Predict => {
            let response = client
                .post(format!("{}/predict", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Assess { description } => {
            let response = client
                .post(format!("{}/predict-input", cli.endpoint))
                .json(&json!({ "description": description }))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::ViewScraped => {
            let response = client
                .get(format!("{}/view-scraped", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::ViewPredicted => {
            let response = client
                .get(format!("{}/view-predicted", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn summarize(report: &TrainingReport, model_path: &std::path::Path) -> String {
    format!(
        "{}: {} rows ({} train / {} test), best {}, {:?} MSE {:.4} -> {}",
        report.feature_set,
        report.n_records,
        report.n_train,
        report.n_test,
        report.best_params,
        report.evaluation,
        report.mse,
        model_path.display()
    )
}
