use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::error::GatewayError;
use crate::infra::http::headers::generate_request_id;
use crate::infra::http::json::{error_response, from_gateway_error};
use crate::orchestrator::{Orchestrator, QueryEvent};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<String>,
}

/// `POST /query`. The status is decided by the first event: an error before
/// any text is a JSON error, otherwise the answer streams as plain text and
/// a later failure aborts the body.
pub async fn query(
    State(orchestrator): State<Arc<Orchestrator>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            tracing::debug!(reason = %rejection.body_text(), "rejected query payload");
            return error_response(StatusCode::BAD_REQUEST, "request body must be JSON like {\"query\": \"...\"}");
        }
    };
    let query = req.query.unwrap_or_default();
    if query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query is required");
    }

    let rid = generate_request_id();
    tracing::info!(request_id = %rid, chars = query.chars().count(), "query received");
    let mut events = orchestrator.spawn_query(query);

    match events.recv().await {
        None => text_response(Body::empty()),
        Some(QueryEvent::Failed(e)) => {
            tracing::warn!(request_id = %rid, error = %e, "query failed");
            from_gateway_error(&e)
        }
        Some(QueryEvent::Chunk(first)) => {
            let rest = ReceiverStream::new(events).map(move |ev| match ev {
                QueryEvent::Chunk(text) => Ok(text),
                QueryEvent::Failed(e) => {
                    tracing::warn!(request_id = %rid, error = %e, "query failed mid-stream");
                    Err(e)
                }
            });
            let body = stream::once(async move { Ok::<_, GatewayError>(first) }).chain(rest);
            text_response(Body::from_stream(body))
        }
    }
}

fn text_response(body: Body) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
}
