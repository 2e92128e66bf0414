use crate::ml::{GuardrailConfig, ReplacementPolicy, TrainingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// CSV file locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Model artifact locations
    #[serde(default)]
    pub models: ModelsConfig,

    /// Training procedure
    #[serde(default)]
    pub training: TrainingConfig,

    /// Free-text keyword guardrail
    #[serde(default)]
    pub guardrail: GuardrailConfig,

    /// Advisory scraping
    #[serde(default)]
    pub scraper: ScraperConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: CVSS__)
            .add_source(
                config::Environment::with_prefix("CVSS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output of the latest scrape
    #[serde(default = "default_scraped_data_path")]
    pub scraped_data_path: PathBuf,

    /// Output of the latest batch prediction
    #[serde(default = "default_predicted_data_path")]
    pub predicted_data_path: PathBuf,

    /// Historical labeled advisories
    #[serde(default = "default_training_data_path")]
    pub training_data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scraped_data_path: default_scraped_data_path(),
            predicted_data_path: default_predicted_data_path(),
            training_data_path: default_training_data_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Category-and-summary model used for batch scoring
    #[serde(default = "default_batch_model_path")]
    pub batch_model_path: PathBuf,

    /// Summary-only model used for free-text scoring
    #[serde(default = "default_text_model_path")]
    pub text_model_path: PathBuf,

    /// What a new training run does with the previous artifact
    #[serde(default)]
    pub replacement: ReplacementPolicy,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            batch_model_path: default_batch_model_path(),
            text_model_path: default_text_model_path(),
            replacement: ReplacementPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// HTTP timeout per page (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header sent to advisory sites
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Refuse URLs that are not `https://`
    #[serde(default = "default_true")]
    pub require_https: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            require_https: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "cvss-predictor".to_string()
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("cvss-predictor/{}", env!("CARGO_PKG_VERSION"))
}

fn default_scraped_data_path() -> PathBuf {
    PathBuf::from("new_data.csv")
}

fn default_predicted_data_path() -> PathBuf {
    PathBuf::from("predicted_data.csv")
}

fn default_training_data_path() -> PathBuf {
    PathBuf::from("cve1.csv")
}

fn default_batch_model_path() -> PathBuf {
    PathBuf::from("models/random_forest_cvss.model")
}

fn default_text_model_path() -> PathBuf {
    PathBuf::from("models/incident_text_cvss.model")
}
