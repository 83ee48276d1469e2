//! Export job orchestration
//!
//! [`ExportService::submit`] runs one export from start to finish:
//!
//! 1. validate the specification and the requester's credentials
//! 2. take the requester's staging lock
//! 3. apply retention to the staging root
//! 4. allocate the job directory, open its log, write its access descriptor
//! 5. resolve the catalog credential and run the downloader under a deadline
//!
//! The job runs on its own task and owns the lock until it finishes. A client
//! that disconnects does not cancel it; the downloader deadline is the only
//! bound on how long a job holds the lock.
//!
//! [`ExportService::retrieve`] locates a finished job, enforces its access
//! descriptor and picks the file to stream back.

use crate::auth::{TokenProbe, resolve_credential};
use crate::config::Config;
use crate::downloader::{DownloadRequest, Downloader};
use crate::error::{Error, Result};
use crate::export_spec::ValidatedSpec;
use crate::job_log::JobLog;
use crate::retrieval::{self, RetrievedFile, Selection};
use crate::staging::{self, AccessDescriptor, ExportLock, LockMode, StagingArea};
use crate::types::{Artifact, ExportKind, JobKey, RequestContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a successful export
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    /// Key of the job
    pub key: JobKey,
    /// What was requested
    pub kind: ExportKind,
    /// Where the output lives
    pub job_dir: PathBuf,
    /// What the downloader produced, in order
    pub artifacts: Vec<Artifact>,
}

/// Drives export jobs and serves their output
#[derive(Clone)]
pub struct ExportService {
    config: Arc<Config>,
    staging: StagingArea,
    downloader: Arc<dyn Downloader>,
    probe: Arc<dyn TokenProbe>,
}

impl ExportService {
    /// Create a service storing jobs under `config.storage_path`
    pub fn new(
        config: Arc<Config>,
        downloader: Arc<dyn Downloader>,
        probe: Arc<dyn TokenProbe>,
    ) -> Self {
        let staging = StagingArea::new(config.export_root());
        Self {
            config,
            staging,
            downloader,
            probe,
        }
    }

    /// Service configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Staging area the service writes into
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Run one export job for the requester described by `ctx`
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        kind: ExportKind,
        public: bool,
        body: serde_json::Value,
    ) -> Result<ExportOutcome> {
        let spec = ValidatedSpec::parse(body, kind)?;
        self.require_identity(ctx)?;

        let service = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { service.run_locked(&ctx, kind, public, spec).await })
            .await
            .map_err(|e| Error::Other(format!("export task failed: {e}")))?
    }

    /// Reject anonymous or wallet-less requesters when authentication is required
    ///
    /// The downloader may silently fall back to anonymous access, so this has to
    /// happen before it is ever called.
    fn require_identity(&self, ctx: &RequestContext) -> Result<()> {
        if !self.config.auth_required() {
            return Ok(());
        }
        let Some(identity) = ctx.identity() else {
            return Err(Error::Unauthorized(
                "authentication is required to create an export".into(),
            ));
        };
        if ctx.auth.wallet.is_none() {
            return Err(Error::Unauthorized(format!(
                "no credential wallet is available for {}",
                identity.label()
            )));
        }
        Ok(())
    }

    async fn run_locked(
        &self,
        ctx: &RequestContext,
        kind: ExportKind,
        public: bool,
        spec: ValidatedSpec,
    ) -> Result<ExportOutcome> {
        let export = &self.config.export;
        let staging_root = self
            .staging
            .resolve_staging_root(ctx.identity(), ctx.client_ip);

        let _lock = ExportLock::acquire(
            &StagingArea::lock_path(&staging_root),
            LockMode::for_concurrency(export.allow_concurrent),
            export.lock_timeout,
        )
        .await?;

        staging::purge(&staging_root, export.purge_threshold, export.purge_batch).await;

        let (key, job_dir) = staging::allocate(&staging_root).await?;
        let log = JobLog::create(
            &job_dir,
            &key,
            ctx.request_id.clone(),
            export.quiet,
            export.propagate_logs,
        )?;
        AccessDescriptor::for_job(
            ctx.identity().map(|i| i.id.as_str()),
            public,
            self.config.auth_required(),
        )
        .write(&job_dir)
        .await?;

        tracing::info!(
            key = %key,
            kind = %kind,
            request_id = %ctx.request_id,
            user = %ctx.user_label(),
            job_dir = %job_dir.display(),
            "creating export"
        );
        log.info(format!(
            "Creating {kind} export at [{}] on behalf of user: {}",
            job_dir.display(),
            ctx.user_label()
        ));

        match self.run_job(ctx, spec, &job_dir, &log).await {
            Ok(artifacts) => {
                log.info(format!("Export complete: {} artifact(s)", artifacts.len()));
                tracing::info!(key = %key, artifacts = artifacts.len(), "export complete");
                Ok(ExportOutcome {
                    key,
                    kind,
                    job_dir,
                    artifacts,
                })
            }
            Err(e) => {
                log.error(e.to_string());
                tracing::warn!(key = %key, request_id = %ctx.request_id, error = %e, "export failed");
                Err(e)
            }
        }
    }

    async fn run_job(
        &self,
        ctx: &RequestContext,
        spec: ValidatedSpec,
        job_dir: &Path,
        log: &JobLog,
    ) -> Result<Vec<Artifact>> {
        let auth_required = self.config.auth_required();
        let credential = resolve_credential(
            &spec.catalog,
            &spec.server,
            ctx,
            self.probe.as_ref(),
            auth_required,
        )
        .await?;
        log.info(format!(
            "Using {} credential for {}",
            credential.kind(),
            spec.server.base_url()
        ));

        let timeout = self.config.export.timeout;
        let request = DownloadRequest {
            server: spec.server,
            output_dir: job_dir.to_path_buf(),
            spec: spec.document,
            credential,
            identity: ctx.identity().cloned(),
            wallet: ctx.auth.wallet.clone(),
            allow_anonymous: !auth_required,
            max_payload_bytes: self.config.export.max_payload_bytes(),
            timeout,
            context_id: ctx.request_id.clone(),
            log: log.clone(),
        };

        match tokio::time::timeout(timeout, self.downloader.download(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::BadGateway(format!(
                "export did not complete within the {}s timeout",
                timeout.as_secs()
            ))),
        }
    }

    /// Pick the file to return for job `key`
    ///
    /// Malformed keys are reported as not found without touching the filesystem.
    pub async fn retrieve(
        &self,
        ctx: &RequestContext,
        key: &str,
        requested: Option<&str>,
    ) -> Result<RetrievedFile> {
        let not_found = || {
            Error::NotFound(format!(
                "The resource {key} does not exist. It was never created or has been deleted."
            ))
        };
        let key: JobKey = key.parse().map_err(|_| not_found())?;

        let own_root = self
            .staging
            .resolve_staging_root(ctx.identity(), ctx.client_ip);
        let job_dir = self
            .staging
            .locate_job(&own_root, &key)
            .await
            .ok_or_else(not_found)?;

        if !staging::check_access(&job_dir, &ctx.auth, self.config.auth_required()).await {
            tracing::info!(key = %key, user = %ctx.user_label(), "export access denied");
            return Err(Error::Forbidden(
                "The currently authenticated user is not permitted to access the specified resource."
                    .into(),
            ));
        }

        let requested = requested.map(str::to_string);
        let selection = tokio::task::spawn_blocking(move || {
            retrieval::select(&job_dir, &key, requested.as_deref())
        })
        .await
        .map_err(|e| Error::Other(format!("retrieval task failed: {e}")))??;

        let (path, is_log) = match selection {
            Selection::Log(path) => (path, true),
            Selection::Artifact(path) => (path, false),
        };
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(if is_log {
            RetrievedFile::log(path, size)
        } else {
            RetrievedFile::artifact(path, size)
        })
    }
}
