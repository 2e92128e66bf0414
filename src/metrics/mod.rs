/// Prometheus metrics for the severity prediction service.
///
/// Covers HTTP traffic, model inference, the keyword guardrail, training runs
/// and scraping. Everything registers into [`PROMETHEUS_REGISTRY`] and is
/// exported in text format by [`gather_metrics`].
///
/// # Example
/// ```no_run
/// use cvss_predictor::metrics::PREDICTIONS_TOTAL;
///
/// PREDICTIONS_TOTAL
///     .with_label_values(&["category-and-summary"])
///     .inc();
/// ```

mod middleware;

pub use middleware::track_http_metrics;

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};

const NAMESPACE: &str = "cvss_predictor";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Inference Metrics
    // ============================================================================

    /// Advisories scored
    ///
    /// Labels: model (feature set)
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of advisories scored")
            .namespace(NAMESPACE),
        &["model"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Time spent encoding and scoring one call
    ///
    /// Labels: model (feature set)
    pub static ref PREDICTION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Duration of a prediction call in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["model"]
    ).expect("Failed to create PREDICTION_DURATION metric");

    /// Free-text descriptions turned away by the keyword guardrail
    pub static ref GUARDRAIL_REJECTIONS_TOTAL: Counter = Counter::with_opts(
        Opts::new(
            "guardrail_rejections_total",
            "Descriptions rejected as not describing a cyber incident"
        )
        .namespace(NAMESPACE)
    ).expect("Failed to create GUARDRAIL_REJECTIONS_TOTAL metric");

    // ============================================================================
    // Training Metrics
    // ============================================================================

    /// Completed training runs
    ///
    /// Labels: feature_set
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Total number of completed training runs")
            .namespace(NAMESPACE),
        &["feature_set"]
    ).expect("Failed to create TRAINING_RUNS_TOTAL metric");

    /// Quality signal of the latest run
    ///
    /// Labels: feature_set
    pub static ref TRAINING_HOLDOUT_MSE: GaugeVec = GaugeVec::new(
        Opts::new("training_holdout_mse", "Mean squared error reported by the latest training run")
            .namespace(NAMESPACE),
        &["feature_set"]
    ).expect("Failed to create TRAINING_HOLDOUT_MSE metric");

    // ============================================================================
    // Scraper Metrics
    // ============================================================================

    /// Scrape attempts
    ///
    /// Labels: source, status (success, error)
    pub static ref SCRAPE_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("scrape_runs_total", "Total number of scrape runs")
            .namespace(NAMESPACE),
        &["source", "status"]
    ).expect("Failed to create SCRAPE_RUNS_TOTAL metric");
}

/// Register all metrics with the global registry
///
/// Must be called once at startup. A second call returns an
/// `AlreadyReg` error.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTION_DURATION.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(GUARDRAIL_REJECTIONS_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(TRAINING_RUNS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(TRAINING_HOLDOUT_MSE.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(SCRAPE_RUNS_TOTAL.clone()))?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
