//! Artifact selection inside a finished job directory
//!
//! The job directory is walked top-down one directory level at a time. The
//! access descriptor is never a candidate; the job log is a candidate only when
//! asked for by its reserved name.

use crate::error::{Error, Result};
use crate::job_log::LOG_FILE;
use crate::staging::access::ACCESS_FILE;
use crate::types::JobKey;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Reserved file name that selects the job log
pub const LOG_PSEUDO_FILE: &str = "log";

/// Diagnostic body used when an empty job left no log behind
pub const NO_DIAGNOSTIC: &str = "No additional diagnostic information available.\n";

/// A file chosen for streaming back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedFile {
    /// Absolute location of the file
    pub path: PathBuf,
    /// Value for the `Content-Type` header
    pub content_type: String,
    /// Value for the `Content-Disposition` header, if one should be sent
    pub content_disposition: Option<String>,
    /// File size in bytes
    pub size: u64,
}

impl RetrievedFile {
    /// Describe the job log at `path`
    pub fn log(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            content_type: "text/plain".to_string(),
            content_disposition: None,
            size,
        }
    }

    /// Describe an artifact at `path`, guessing its type from the extension
    pub fn artifact(path: PathBuf, size: u64) -> Self {
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let content_disposition = path
            .file_name()
            .map(|name| content_disposition(&name.to_string_lossy()));
        Self {
            path,
            content_type,
            content_disposition,
            size,
        }
    }
}

/// `Content-Disposition` value carrying a percent-encoded file name
pub fn content_disposition(file_name: &str) -> String {
    format!("filename*=UTF-8''{}", urlencoding::encode(file_name))
}

/// What the walk selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The job log, requested explicitly
    Log(PathBuf),
    /// An artifact
    Artifact(PathBuf),
}

/// Choose the file to return from `job_dir`
///
/// Blocking; run it off the async runtime.
pub fn select(job_dir: &Path, key: &JobKey, requested: Option<&str>) -> Result<Selection> {
    for entry in WalkDir::new(job_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        let mut files = list_files(dir)?;
        files.retain(|(name, _)| name != ACCESS_FILE);

        let log_path = dir.join(LOG_FILE);
        if files.iter().any(|(name, _)| name == LOG_FILE) {
            if requested == Some(LOG_PSEUDO_FILE) {
                return Ok(Selection::Log(log_path));
            }
            files.retain(|(name, _)| name != LOG_FILE);
        }

        if files.is_empty() {
            let diagnostic =
                std::fs::read_to_string(&log_path).unwrap_or_else(|_| NO_DIAGNOSTIC.to_string());
            return Err(Error::NoArtifacts { diagnostic });
        }

        match requested {
            None if files.len() > 1 => {
                return Err(Error::BadRequest(format!(
                    "The resource {key} contains more than one file, it is therefore necessary \
                     to specify a filename in the request URL."
                )));
            }
            None => {
                let (_, path) = files.swap_remove(0);
                return Ok(Selection::Artifact(path));
            }
            Some(wanted) => {
                if let Some((_, path)) = files.into_iter().find(|(name, _)| name == wanted) {
                    return Ok(Selection::Artifact(path));
                }
            }
        }
    }

    Err(Error::NotFound(format!(
        "The requested file \"{}\" does not exist.",
        requested.unwrap_or_default()
    )))
}

/// Regular files directly inside `dir`, sorted by name
///
/// Symlinks are not followed and not listed.
fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}
