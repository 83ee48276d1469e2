//! Offline retention over every staging root
//!
//! Each root is pruned under its own exclusive lock. A root with an export in
//! flight is skipped, and a root whose lock cannot even be opened is counted
//! as failed; neither stops the pass.

use super::{ExportLock, LockMode, PurgeReport, StagingArea, purge, purge_older_than};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Totals of one [`prune_all`] pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneSummary {
    /// Staging roots visited
    pub roots: usize,
    /// Roots skipped because an export held the lock
    pub skipped: usize,
    /// Job directories removed
    pub removed: usize,
    /// Job directories or whole roots that could not be processed
    pub failed: usize,
}

impl PruneSummary {
    fn add(&mut self, report: &PurgeReport) {
        self.removed += report.removed.len();
        self.failed += report.failed.len();
    }
}

/// Apply count retention, and age retention when `max_age` is set, to every
/// staging root under `export_root`
///
/// A missing export root is an empty pass. Only failing to list the export
/// root itself is an error.
pub async fn prune_all(
    export_root: &Path,
    threshold: usize,
    batch: usize,
    max_age: Option<Duration>,
) -> Result<PruneSummary> {
    let mut summary = PruneSummary::default();
    for root in staging_roots(export_root).await? {
        summary.roots += 1;
        let lock = match ExportLock::try_acquire(&StagingArea::lock_path(&root), LockMode::Exclusive)
        {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!(root = %root.display(), "export in progress, skipping");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "cannot lock staging root, skipping");
                summary.failed += 1;
                continue;
            }
        };

        summary.add(&purge(&root, threshold, batch).await);
        if let Some(max_age) = max_age {
            summary.add(&purge_older_than(&root, max_age).await);
        }
        drop(lock);
    }

    tracing::info!(
        roots = summary.roots,
        skipped = summary.skipped,
        removed = summary.removed,
        failed = summary.failed,
        "retention pass complete"
    );
    Ok(summary)
}

async fn staging_roots(export_root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    let mut entries = match tokio::fs::read_dir(export_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(roots),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            roots.push(entry.path());
        }
    }
    roots.sort();
    Ok(roots)
}
