use crate::api::{handlers, AppState};
use crate::metrics::track_http_metrics;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health & metrics
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Scraping
        .route("/scrape", post(handlers::scrape))
        .route("/view-scraped", get(handlers::view_scraped))
        // Prediction
        .route("/predict", post(handlers::predict))
        .route("/view-predicted", get(handlers::view_predicted))
        .route("/predict-input", post(handlers::predict_input))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(middleware::from_fn(track_http_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
