//! Access descriptors (`.access`)
//!
//! A single text line naming the identity allowed to retrieve a job's output,
//! or `*` for everyone.

use crate::error::Result;
use crate::types::AuthContext;
use std::path::{Path, PathBuf};

/// File name of the access descriptor inside a job directory
pub const ACCESS_FILE: &str = ".access";

/// Descriptor line granting access to every requester
pub const WILDCARD: &str = "*";

/// Who may retrieve a job's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDescriptor {
    /// Anyone
    Public,
    /// Only clients holding this identity or attribute id
    Owner(String),
}

impl AccessDescriptor {
    /// Descriptor for a job
    ///
    /// Public when requested, when the deployment does not require
    /// authentication, or when there is no owner to record.
    pub fn for_job(owner: Option<&str>, public: bool, auth_required: bool) -> Self {
        match owner {
            Some(id) if !public && auth_required => AccessDescriptor::Owner(id.to_string()),
            _ => AccessDescriptor::Public,
        }
    }

    /// Descriptor text without the trailing newline
    pub fn as_line(&self) -> &str {
        match self {
            AccessDescriptor::Public => WILDCARD,
            AccessDescriptor::Owner(id) => id,
        }
    }

    /// Path of the descriptor inside `job_dir`
    pub fn path(job_dir: &Path) -> PathBuf {
        job_dir.join(ACCESS_FILE)
    }

    /// Write the descriptor into `job_dir`
    pub async fn write(&self, job_dir: &Path) -> Result<()> {
        let line = format!("{}\n", self.as_line());
        tokio::fs::write(Self::path(job_dir), line).await?;
        Ok(())
    }

    /// Read the descriptor from `job_dir`
    ///
    /// Returns every non-empty line; more than one entry is tolerated so that
    /// hand-edited descriptors listing several ids keep working.
    pub async fn read(job_dir: &Path) -> Result<Vec<AccessDescriptor>> {
        let raw = tokio::fs::read_to_string(Self::path(job_dir)).await?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                if line == WILDCARD {
                    AccessDescriptor::Public
                } else {
                    AccessDescriptor::Owner(line.to_string())
                }
            })
            .collect())
    }

    /// Whether `auth` is admitted by this descriptor
    pub fn admits(&self, auth: &AuthContext) -> bool {
        auth.has_identity(self.as_line())
    }
}

/// Whether the requester may read `job_dir`
///
/// Always true when authentication is disabled. Otherwise a missing or
/// unreadable descriptor denies access.
pub async fn check_access(job_dir: &Path, auth: &AuthContext, auth_required: bool) -> bool {
    if !auth_required {
        return true;
    }
    match AccessDescriptor::read(job_dir).await {
        Ok(entries) => entries.iter().any(|entry| entry.admits(auth)),
        Err(e) => {
            tracing::warn!(path = %job_dir.display(), error = %e, "cannot read access descriptor");
            false
        }
    }
}
