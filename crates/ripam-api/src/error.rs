use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use ripam_core::RipamError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// Error raised by the ledger or coordinator
    Ledger(RipamError),
    /// Request body or query could not be used
    InvalidRequest(String),
    /// Extractor rejection, keeping axum's status (400, 415 or 422)
    Rejected(StatusCode, String),
    InternalError(String),
}

impl From<RipamError> for ApiError {
    fn from(err: RipamError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::InternalError(format!("worker task failed: {err}"))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Ledger(err) if err.is_client_error() => write!(f, "{err}"),
            ApiError::Ledger(RipamError::PartialGeneration { .. }) => {
                f.write_str("Address generation stopped before completion")
            }
            ApiError::Ledger(_) | ApiError::InternalError(_) => f.write_str("Internal Server Error"),
            ApiError::InvalidRequest(reason) | ApiError::Rejected(_, reason) => {
                f.write_str(reason)
            }
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(RipamError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ledger(RipamError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Ledger(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(status, _) => *status,
            ApiError::Ledger(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Ledger(err) => err.kind(),
            ApiError::InvalidRequest(_) | ApiError::Rejected(..) => "invalid_request",
            ApiError::InternalError(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            ApiError::InternalError(e) => tracing::error!("internal server error: {e}"),
            ApiError::Ledger(err) if !err.is_client_error() => {
                tracing::error!(kind = err.kind(), "request failed: {err}")
            }
            _ => {}
        }

        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        match &self {
            ApiError::Ledger(RipamError::InvalidCidr {
                suggestion: Some(suggestion),
                ..
            }) => body["suggestion"] = json!(suggestion),
            ApiError::Ledger(RipamError::OverlapConflict(conflicts)) => {
                body["conflicts"] = json!(conflicts)
            }
            ApiError::Ledger(RipamError::PartialGeneration {
                committed,
                expected,
                ..
            }) => {
                body["committed"] = json!(committed);
                body["expected"] = json!(expected);
            }
            _ => {}
        }

        (self.status(), Json(body)).into_response()
    }
}
