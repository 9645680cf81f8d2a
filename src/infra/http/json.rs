use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::error::GatewayError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// Validation failures go back verbatim as 400; everything else is a 500
/// with a generic message, details stay in the log.
pub fn from_gateway_error(err: &GatewayError) -> Response {
    if err.is_validation() {
        return error_response(StatusCode::BAD_REQUEST, err.to_string());
    }
    tracing::error!(error = %err, "query failed before streaming");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to process query")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(resp: Response) -> ErrorBody {
        let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_is_bad_request_with_message() {
        let resp = from_gateway_error(&GatewayError::Validation("query is required".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(resp).await.error, "query is required");
    }

    #[tokio::test]
    async fn internal_failures_hide_details() {
        let resp = from_gateway_error(&GatewayError::UnknownTool("ghost".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(resp).await;
        assert!(!body.error.contains("ghost"));
    }
}
