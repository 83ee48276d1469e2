//! # catalog-export
//!
//! REST front-end for running catalog exports on behalf of authenticated
//! clients and serving the results back.
//!
//! A client posts an export specification to `/export/bag` or `/export/file`.
//! The service resolves who is asking, takes that requester's staging lock,
//! runs the export into a fresh job directory and answers with a
//! `text/uri-list` of where the output can be fetched. Results stay on disk,
//! guarded by a per-job access descriptor, until retention removes them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_export::api::{AppState, start_api_server};
//! use catalog_export::auth::{AnonymousProvider, SessionTokenProbe};
//! use catalog_export::downloader::CatalogDownloader;
//! use catalog_export::{Config, ExportService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::from_file("catalog-export.json")?);
//!
//!     let downloader = CatalogDownloader::new(&config.auth.cookie_name)?;
//!     let probe = SessionTokenProbe::new(&config.auth.cookie_name, config.auth.request_timeout)?;
//!     let service = ExportService::new(config.clone(), Arc::new(downloader), Arc::new(probe));
//!
//!     let state = AppState::new(service, config, Arc::new(AnonymousProvider));
//!     start_api_server(state, catalog_export::wait_for_signal()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Requester identity and catalog credentials
pub mod auth;
/// Configuration types
pub mod config;
/// Export downloaders
pub mod downloader;
/// Error types
pub mod error;
/// Export specification parsing
pub mod export_spec;
/// Per-job log file
pub mod job_log;
/// Choosing which job file to return
pub mod retrieval;
/// Export job orchestration
pub mod service;
/// Staging directories, locks, retention and access descriptors
pub mod staging;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{AuthMode, Config};
pub use downloader::{CatalogDownloader, DownloadRequest, Downloader};
pub use error::{ApiError, DownloaderError, Error, ErrorDetail, Result, ToHttpStatus};
pub use service::{ExportOutcome, ExportService};
pub use types::{
    Artifact, AuthContext, Credential, ExportKind, Identity, JobKey, RequestContext,
    ServerCoords, Wallet,
};

/// Wait for a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Pass it to [`api::start_api_server`] to stop serving on shutdown.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Wait for a termination signal (Ctrl+C).
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
