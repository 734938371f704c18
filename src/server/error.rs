//! Translation of library errors into HTTP responses
//!
//! The only place that decides status codes. Errors outside the known
//! taxonomy are logged in full and answered with a fixed message.

use super::responses::ErrorResponse;
use crate::error::InpaintError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Message sent for every unexpected failure
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// An error ready to be sent to the client
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error_code: &'static str,
}

impl ApiError {
    /// Readiness failure while models are still loading
    #[must_use]
    pub fn not_ready() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "Service not ready - models still loading".to_string(),
            error_code: "ModelNotLoaded",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        self.error_code
    }
}

impl From<InpaintError> for ApiError {
    fn from(err: InpaintError) -> Self {
        let error_code = err.error_code();
        if !err.is_domain_error() {
            tracing::error!(
                error = %err,
                error_debug = ?err,
                "Unexpected error while handling request"
            );
            return Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: INTERNAL_ERROR_MESSAGE.to_string(),
                error_code,
            };
        }

        tracing::warn!(error = %err, error_code, "Request rejected");
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
            error_code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.message, self.error_code);
        (self.status, Json(body)).into_response()
    }
}
