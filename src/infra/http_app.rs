use std::sync::Arc;

use axum::response::Html;
use axum::{
    routing::{get, post},
    Router,
};

use crate::orchestrator::Orchestrator;

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// `/healthz`, the demo page at `/` and the streaming `POST /query`.
pub fn build_app(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/query", post(crate::api::query::query))
        .with_state(orchestrator)
}
