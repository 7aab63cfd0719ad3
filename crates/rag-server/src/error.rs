//! Mapping of pipeline failures to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use rag_core::{Fault, RagError};

/// A failure rendered as `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: &'a str,
}

impl ApiError {
    /// Malformed or out-of-range request parameters.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "INVALID_ARGUMENT",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// HTTP status for a pipeline failure.
pub fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::ProviderRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RagError::ProviderConnectivity { .. } | RagError::ProviderTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        RagError::RerankFailure { .. } => StatusCode::BAD_GATEWAY,
        RagError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        e if e.fault() == Fault::Client => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() && err.fault() == Fault::Server {
            error!("Request failed: {}", err);
        } else {
            warn!("Request failed: {}", err);
        }

        Self {
            status,
            kind: err.error_code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                kind: self.kind,
                message: &self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
