use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics::gather_metrics;
use crate::models::FeatureSet;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        batch_model_present: state.pipeline.store(FeatureSet::CategoryAndSummary).exists(),
        text_model_present: state.pipeline.store(FeatureSet::SummaryOnly).exists(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub batch_model_present: bool,
    pub text_model_present: bool,
}

/// Prometheus metrics in text exposition format
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Scrape the site behind `url` and replace the stored scraped table
pub async fn scrape(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let advisories = state.scrapers.scrape(&request.url).await?;
    let records = advisories.len();

    let data = state.data.clone();
    blocking(move || data.save_scraped(&advisories)).await?;

    Ok(Json(OperationResponse {
        message: "Scraping completed successfully".to_string(),
        records,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ScrapeRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "No URL provided"))]
    pub url: String,
}

/// Score the stored scraped table and store the predicted table
pub async fn predict(State(state): State<AppState>) -> Result<Json<OperationResponse>> {
    let records = blocking(move || {
        let table = state.data.load_scraped()?;
        let predicted = state.pipeline.predict_table(&table)?;
        state.data.save_predicted(&predicted)?;
        Ok(predicted.len())
    })
    .await?;

    Ok(Json(OperationResponse {
        message: "Predictions completed successfully".to_string(),
        records,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse {
    pub message: String,
    pub records: usize,
}

/// Scraped rows, `[]` before the first scrape
pub async fn view_scraped(State(state): State<AppState>) -> Result<Json<Vec<Value>>> {
    let rows = blocking(move || state.data.view_scraped()).await?;
    Ok(Json(rows))
}

/// Predicted rows, `[]` before the first prediction
pub async fn view_predicted(State(state): State<AppState>) -> Result<Json<Vec<Value>>> {
    let rows = blocking(move || state.data.view_predicted()).await?;
    Ok(Json(rows))
}

/// Score one free-text incident description
pub async fn predict_input(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictInputRequest>, JsonRejection>,
) -> Result<Json<PredictInputResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let assessment = blocking(move || state.pipeline.assess_text(&request.description)).await?;

    Ok(Json(PredictInputResponse {
        message: "Prediction successful".to_string(),
        result: assessment.message().to_string(),
        score: assessment.score(),
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PredictInputRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Incident description is required"))]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictInputResponse {
    pub message: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Run file and model work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {}", e)))?
}
