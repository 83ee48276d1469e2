//! HTTP error response handling for the API
//!
//! Domain errors become JSON [`ApiError`] bodies with the status code from
//! [`ToHttpStatus`]. An empty job is the exception: its diagnostic is the job
//! log, returned verbatim as plain text.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if let Error::NoArtifacts { diagnostic } = self {
            return (
                status_code,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                diagnostic,
            )
                .into_response();
        }

        if status_code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let api_error: ApiError = self.into();
        (status_code, Json(api_error)).into_response()
    }
}

/// Explicit ApiError responses default to 500
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
