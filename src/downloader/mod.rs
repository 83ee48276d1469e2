//! Downloader capability
//!
//! The export driver never produces output itself. It hands a prepared job
//! directory and a validated specification to a [`Downloader`], which queries the
//! catalog and writes artifacts into that directory.
//!
//! ## Implementations
//!
//! - [`CatalogDownloader`]: runs the specification's query processors against
//!   the catalog's REST interface and optionally archives the output as a bag
//!
//! Custom implementations plug in through [`ExportService::new`](crate::ExportService::new).

use crate::error::DownloaderError;
use crate::job_log::JobLog;
use crate::types::{Artifact, Credential, Identity, ServerCoords, Wallet};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

mod catalog;

pub use catalog::CatalogDownloader;

/// Everything a downloader needs for one job
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Catalog server coordinates
    pub server: ServerCoords,
    /// Job directory to write into; exists and is empty apart from `.access` and `.log`
    pub output_dir: PathBuf,
    /// Validated specification document
    pub spec: serde_json::Value,
    /// Credential to present to the catalog
    pub credential: Credential,
    /// Resolved requester identity, if any
    pub identity: Option<Identity>,
    /// Requester's credential wallet, if any
    pub wallet: Option<Wallet>,
    /// Whether anonymous catalog access is acceptable
    pub allow_anonymous: bool,
    /// Ceiling on total bytes written (None = unlimited)
    pub max_payload_bytes: Option<u64>,
    /// Absolute deadline for the whole job
    pub timeout: Duration,
    /// Correlation id for downstream logs
    pub context_id: String,
    /// Sink for the job's `.log`
    pub log: JobLog,
}

/// Produces export output into a job directory
///
/// Errors other than [`DownloaderError::Authentication`],
/// [`DownloaderError::Authorization`] and [`DownloaderError::Configuration`]
/// are reported to clients as gateway failures.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Run one export job, returning the produced artifacts in order
    async fn download(&self, request: DownloadRequest) -> Result<Vec<Artifact>, DownloaderError>;
}
