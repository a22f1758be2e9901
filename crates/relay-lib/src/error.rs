// crates/relay-lib/src/error.rs

//! Central error type + Axum integration for the HTTP sidecar.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Relay error types. Client misbehavior on the WebSocket side is answered
/// in-band with `error` messages and never reaches this type; `RelayError`
/// covers the HTTP sidecar and startup paths.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingField(_) | RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RelayError::MissingField("meetingId").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::BadRequest("nope".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_field_display() {
        let err = RelayError::MissingField("focusScore");
        assert_eq!(err.to_string(), "missing required field: focusScore");
    }

    #[test]
    fn test_into_response() {
        let response = RelayError::MissingField("meetingId").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
