//! Error types for catalog-export
//!
//! This module provides the error taxonomy shared by the export driver, the
//! artifact responder and the HTTP layer:
//! - A top-level [`Error`] whose variants correspond to client-visible outcomes
//! - [`DownloaderError`] for the typed failures the downloader capability raises
//! - HTTP status code mapping via [`ToHttpStatus`]
//! - Structured JSON error bodies ([`ApiError`])

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for catalog-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for catalog-export
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing export specification fields, or an ambiguous retrieval
    #[error("{0}")]
    BadRequest(String),

    /// Authentication is mandated but identity, wallet or token is missing or invalid
    #[error("{0}")]
    Unauthorized(String),

    /// The access descriptor does not admit the requester
    #[error("{0}")]
    Forbidden(String),

    /// Another export holds the requester's staging lock
    #[error("multiple concurrent exports not supported")]
    ConcurrentExport {
        /// Staging root whose lock could not be acquired
        staging_root: PathBuf,
        /// How long acquisition was attempted
        waited: Duration,
    },

    /// Unknown job key or unknown requested file
    #[error("{0}")]
    NotFound(String),

    /// The job directory holds no artifacts; carries the job log (or a fixed
    /// message) as diagnostic body
    #[error("{diagnostic}")]
    NoArtifacts {
        /// Contents of the job's `.log`, verbatim
        diagnostic: String,
    },

    /// Any other downstream failure, including downloader timeouts
    #[error("{0}")]
    BadGateway(String),

    /// Typed failure raised by the downloader capability
    #[error(transparent)]
    Downloader(#[from] DownloaderError),

    /// Service configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage_path")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures raised by a [`Downloader`](crate::downloader::Downloader)
///
/// Only the first three variants carry distinct meaning to the HTTP layer;
/// everything else surfaces as a gateway failure.
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// The catalog rejected the supplied credentials
    #[error("catalog authentication failed: {0}")]
    Authentication(String),

    /// The credentials are valid but lack permission
    #[error("catalog authorization failed: {0}")]
    Authorization(String),

    /// The export specification does not fit the catalog
    #[error("export configuration error: {0}")]
    Configuration(String),

    /// Output exceeded the configured payload ceiling
    #[error("export payload exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// Any other failure while producing output
    #[error("export failed: {0}")]
    Failed(String),
}

impl From<zip::result::ZipError> for DownloaderError {
    fn from(e: zip::result::ZipError) -> Self {
        DownloaderError::Failed(format!("archive creation failed: {e}"))
    }
}

impl From<std::io::Error> for DownloaderError {
    fn from(e: std::io::Error) -> Self {
        DownloaderError::Failed(e.to_string())
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "concurrent_export",
///     "message": "multiple concurrent exports not supported ...",
///     "details": { "waited_ms": 5000 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "bad_request")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::ConcurrentExport { .. } => 403,
            Error::NotFound(_) => 404,
            Error::NoArtifacts { .. } => 404,
            Error::BadGateway(_) => 502,

            Error::Downloader(e) => match e {
                DownloaderError::Authentication(_) => 401,
                DownloaderError::Authorization(_) => 403,
                DownloaderError::Configuration(_) => 409,
                DownloaderError::PayloadTooLarge { .. } => 502,
                DownloaderError::Failed(_) => 502,
            },

            // 502 Bad Gateway - External service errors
            Error::Network(_) => 502,

            // 500 Internal Server Error - Server-side issues
            Error::Config { .. } => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::ConcurrentExport { .. } => "concurrent_export",
            Error::NotFound(_) => "not_found",
            Error::NoArtifacts { .. } => "no_artifacts",
            Error::BadGateway(_) => "bad_gateway",
            Error::Downloader(e) => match e {
                DownloaderError::Authentication(_) => "catalog_authentication",
                DownloaderError::Authorization(_) => "catalog_authorization",
                DownloaderError::Configuration(_) => "catalog_configuration",
                DownloaderError::PayloadTooLarge { .. } => "payload_too_large",
                DownloaderError::Failed(_) => "bad_gateway",
            },
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::ConcurrentExport { waited, .. } => Some(serde_json::json!({
                "waited_ms": waited.as_millis() as u64,
            })),
            Error::Downloader(DownloaderError::PayloadTooLarge { limit }) => {
                Some(serde_json::json!({
                    "limit_bytes": limit,
                }))
            }
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
