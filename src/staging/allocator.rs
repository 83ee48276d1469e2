//! Job directory allocation

use crate::error::Result;
use crate::types::JobKey;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Create a fresh, uniquely-keyed job directory under `staging_root`
///
/// Parent directories are created as needed. A directory that already exists
/// for the generated key is treated as success; any other creation failure is
/// returned to the caller.
pub async fn allocate(staging_root: &Path) -> Result<(JobKey, PathBuf)> {
    let key = JobKey::generate();
    let directory = staging_root.join(key.to_string());

    match tokio::fs::create_dir_all(&directory).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::debug!(path = %directory.display(), "job directory already exists");
        }
        Err(e) => return Err(e.into()),
    }

    tracing::debug!(key = %key, path = %directory.display(), "allocated job directory");
    Ok((key, directory))
}
