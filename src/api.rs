use std::collections::HashMap;
use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::metrics::Metrics;
use crate::pipeline::{NewsItem, Pipeline};
use crate::window::TimeFilter;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/news", get(news))
        .route("/debug/last-run", get(debug_last_run))
        .route("/debug/domain-weight", get(debug_domain_weight))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Router plus `/metrics` from an installed recorder.
pub fn router_with_metrics(state: AppState, metrics: &Metrics) -> Router {
    router(state).merge(metrics.router())
}

/// JSON error body: `{"error": "..."}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(serde::Deserialize)]
struct NewsQuery {
    since: Option<String>,
    limit: Option<usize>,
}

async fn news(
    State(state): State<AppState>,
    Query(q): Query<NewsQuery>,
) -> Result<Response, ApiError> {
    let api = &state.pipeline.config().api;
    let raw = q.since.as_deref().unwrap_or(&api.default_since);
    let filter =
        TimeFilter::parse(raw).map_err(|e| ApiError::bad_request(format!("since: {e}")))?;
    let limit = q.limit.unwrap_or(api.max_limit).min(api.max_limit);

    let page = state.pipeline.news(filter).await;
    let items: Vec<NewsItem> = page.items.into_iter().take(limit).collect();

    let headers = [
        ("x-cache", if page.cache_hit { "HIT" } else { "MISS" }.to_string()),
        ("x-generated-at", crate::iso_utc::format(&page.generated_at)),
    ];
    Ok((headers, Json(items)).into_response())
}

async fn debug_last_run(State(state): State<AppState>) -> Response {
    match state.pipeline.last_report() {
        Some(report) => Json(report.as_ref().clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(serde_json::Value::Null)).into_response(),
    }
}

async fn debug_domain_weight(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> String {
    let d = q.get("domain").cloned().unwrap_or_default();
    let w = state.pipeline.config().domains.weight_for(&d);
    format!("domain='{}' -> weight={:.2}", d, w)
}
