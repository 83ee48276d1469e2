//! Per-job diagnostic log (`.log`)
//!
//! Every export job gets a log file inside its job directory. The driver and the
//! downloader append to it while the job runs; the retrieval side serves it back
//! as the diagnostic body when a job produced nothing.

use crate::types::JobKey;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File name of the job log inside a job directory
pub const LOG_FILE: &str = ".log";

/// Severity of a job log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Progress information, suppressed in quiet mode
    Info,
    /// Something unexpected that did not stop the job
    Warn,
    /// The job failed
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Append-only sink for one job's `.log`
///
/// Cheap to clone; clones share the underlying file handle.
#[derive(Clone, Debug)]
pub struct JobLog {
    file: Arc<Mutex<File>>,
    path: PathBuf,
    key: String,
    request_id: String,
    quiet: bool,
    propagate: bool,
}

impl JobLog {
    /// Create (or truncate) the log inside `job_dir`
    pub fn create(
        job_dir: &Path,
        key: &JobKey,
        request_id: impl Into<String>,
        quiet: bool,
        propagate: bool,
    ) -> std::io::Result<Self> {
        let path = job_dir.join(LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
            key: key.to_string(),
            request_id: request_id.into(),
            quiet,
            propagate,
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a progress line
    pub fn info(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Info, message.as_ref());
    }

    /// Record a warning
    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Warn, message.as_ref());
    }

    /// Record an error
    pub fn error(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Error, message.as_ref());
    }

    /// Append one line at `level`
    ///
    /// Write failures are reported through `tracing` and otherwise ignored; a
    /// broken log must not fail the export.
    pub fn write(&self, level: LogLevel, message: &str) {
        if self.propagate {
            match level {
                LogLevel::Info => {
                    tracing::info!(key = %self.key, request_id = %self.request_id, "{message}")
                }
                LogLevel::Warn => {
                    tracing::warn!(key = %self.key, request_id = %self.request_id, "{message}")
                }
                LogLevel::Error => {
                    tracing::error!(key = %self.key, request_id = %self.request_id, "{message}")
                }
            }
        }

        if self.quiet && level < LogLevel::Warn {
            return;
        }

        let line = format!(
            "{} {} {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level.as_str(),
            message.trim_end()
        );

        let result = match self.file.lock() {
            Ok(mut file) => file.write_all(line.as_bytes()).and_then(|()| file.flush()),
            Err(poisoned) => {
                let mut file = poisoned.into_inner();
                file.write_all(line.as_bytes()).and_then(|()| file.flush())
            }
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write job log");
        }
    }
}
