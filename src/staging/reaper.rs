//! Retention for job directories
//!
//! The count-based [`purge`] runs inside every export, under the staging lock.
//! [`purge_older_than`] backs the offline prune tool. Neither ever fails the
//! caller because of a single undeletable directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Outcome of a retention pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    /// Directories that were removed
    pub removed: Vec<PathBuf>,
    /// Directories whose removal failed
    pub failed: Vec<PathBuf>,
}

/// Remove the `batch` oldest job directories once `threshold` is reached
///
/// No-op when `threshold < 1` or `staging_root` does not exist. Only immediate
/// child directories count; the lock sentinel and other files are ignored.
/// Directories are ordered by creation time (modification time where the
/// filesystem does not record creation).
pub async fn purge(staging_root: &Path, threshold: usize, batch: usize) -> PurgeReport {
    let mut report = PurgeReport::default();
    if threshold < 1 {
        return report;
    }

    let mut jobs = match list_job_dirs(staging_root).await {
        Some(jobs) => jobs,
        None => return report,
    };
    if jobs.len() < threshold {
        return report;
    }

    // Newest first; the oldest sit at the tail
    jobs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let doomed = jobs.len().saturating_sub(batch);
    for (path, _) in jobs.into_iter().skip(doomed) {
        remove_job_dir(path, &mut report).await;
    }

    tracing::info!(
        staging_root = %staging_root.display(),
        removed = report.removed.len(),
        failed = report.failed.len(),
        "purged old export jobs"
    );
    report
}

/// Remove job directories last modified more than `max_age` ago
pub async fn purge_older_than(staging_root: &Path, max_age: Duration) -> PurgeReport {
    let mut report = PurgeReport::default();
    let Some(jobs) = list_job_dirs(staging_root).await else {
        return report;
    };

    let now = SystemTime::now();
    for (path, _) in jobs {
        let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat job directory");
                continue;
            }
        };
        if let Ok(age) = now.duration_since(modified)
            && age > max_age
        {
            tracing::info!(
                path = %path.display(),
                age_hours = age.as_secs() / 3600,
                "removing expired export job"
            );
            remove_job_dir(path, &mut report).await;
        }
    }
    report
}

async fn remove_job_dir(path: PathBuf, report: &mut PurgeReport) {
    match tokio::fs::remove_dir_all(&path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed job directory");
            report.removed.push(path);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove job directory");
            report.failed.push(path);
        }
    }
}

/// Immediate child directories with their creation (or modification) time,
/// or None when the root cannot be read
async fn list_job_dirs(staging_root: &Path) -> Option<Vec<(PathBuf, SystemTime)>> {
    let mut entries = match tokio::fs::read_dir(staging_root).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    staging_root = %staging_root.display(),
                    error = %e,
                    "cannot list staging root"
                );
            }
            return None;
        }
    };

    let mut jobs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(staging_root = %staging_root.display(), error = %e, "error while listing staging root");
                break;
            }
        };
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let stamp = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        jobs.push((entry.path(), stamp));
    }
    Some(jobs)
}
