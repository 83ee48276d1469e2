//! Per-requester staging storage for export jobs
//!
//! Layout under the storage root:
//!
//! ```text
//! <storage_path>/export/
//!     <segment>~<digest>/        staging root of an authenticated requester
//!         .lock                  export mutex sentinel
//!         <job-key>/             one job directory per export
//!             .access            access descriptor
//!             .log               job log
//!             ...                artifacts
//!     anon-<client-ip>/          staging root of an anonymous requester
//! ```
//!
//! All coordination between concurrent requests happens through this tree;
//! there is no in-memory shared state.

use crate::types::{Identity, JobKey};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub mod access;
pub mod allocator;
pub mod lock;
pub mod prune;
pub mod reaper;

pub use access::{AccessDescriptor, check_access};
pub use allocator::allocate;
pub use lock::{ExportLock, LockMode};
pub use prune::{PruneSummary, prune_all};
pub use reaper::{PurgeReport, purge, purge_older_than};

/// Name of the lock sentinel inside a staging root
pub const LOCK_FILE: &str = ".lock";

/// Prefix reserved for anonymous staging roots
const ANON_PREFIX: &str = "anon-";

/// Separator in front of the identity digest in hashed staging roots
const HASHED_PREFIX: &str = "~";

/// Bucket used when neither identity nor client address is known
const UNKNOWN_CLIENT: &str = "unknown";

/// Resolves requesters to staging roots under one export root
#[derive(Clone, Debug)]
pub struct StagingArea {
    export_root: PathBuf,
}

impl StagingArea {
    /// Create a staging area rooted at `export_root` (`<storage_path>/export`)
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
        }
    }

    /// Directory that holds every staging root
    pub fn export_root(&self) -> &Path {
        &self.export_root
    }

    /// Map a requester to its staging root
    ///
    /// Authenticated requesters get `<export_root>/<last path segment of id>`;
    /// anonymous requesters get `<export_root>/anon-<ip>`, or `anon-unknown`
    /// when the address is unknown. Pure: equal inputs give equal paths.
    pub fn resolve_staging_root(
        &self,
        identity: Option<&Identity>,
        client_ip: Option<IpAddr>,
    ) -> PathBuf {
        let bucket = match identity.and_then(|i| identity_bucket(&i.id)) {
            Some(bucket) => bucket,
            None => anonymous_bucket(client_ip),
        };
        self.export_root.join(bucket)
    }

    /// Path of the lock sentinel for `staging_root`
    pub fn lock_path(staging_root: &Path) -> PathBuf {
        staging_root.join(LOCK_FILE)
    }

    /// Find the directory of job `key`
    ///
    /// Looks in `preferred_root` first, then in every other staging root.
    /// Keys are UUIDs, so at most one directory matches.
    pub async fn locate_job(&self, preferred_root: &Path, key: &JobKey) -> Option<PathBuf> {
        let name = key.to_string();

        let candidate = preferred_root.join(&name);
        if is_dir(&candidate).await {
            return Some(candidate);
        }

        let mut entries = tokio::fs::read_dir(&self.export_root).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let root = entry.path();
            if root == preferred_root {
                continue;
            }
            let candidate = root.join(&name);
            if is_dir(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Directory name for an authenticated identity
///
/// A bare id that is a safe file name is used as-is. A longer id keeps its
/// last segment for readability and gets `~<digest of the full id>` appended,
/// so ids from different issuers sharing a segment stay apart. Unsafe
/// segments are replaced entirely by `~<digest>`. Safe names never contain
/// `~` or start with `anon-`, so no two kinds of bucket can meet.
fn identity_bucket(id: &str) -> Option<String> {
    let trimmed = id.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let safe = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.starts_with('.')
        && !segment.starts_with(ANON_PREFIX)
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));

    let bucket = match (safe, segment == trimmed) {
        (true, true) => segment.to_string(),
        (true, false) => format!("{segment}{HASHED_PREFIX}{}", id_digest(trimmed)),
        (false, _) => format!("{HASHED_PREFIX}{}", id_digest(trimmed)),
    };
    Some(bucket)
}

fn id_digest(id: &str) -> String {
    Sha256::digest(id.as_bytes())
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Directory name for an anonymous requester
fn anonymous_bucket(client_ip: Option<IpAddr>) -> String {
    match client_ip {
        // IPv6 colons are not portable in file names; IPv4 never contains '-'
        Some(ip) => format!("{ANON_PREFIX}{}", ip.to_string().replace(':', "-")),
        None => format!("{ANON_PREFIX}{UNKNOWN_CLIENT}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tempfile::tempdir;

    fn area() -> StagingArea {
        StagingArea::new("/data/export")
    }

    #[test]
    fn identity_keeps_last_path_segment_readable() {
        let identity = Identity::new("https://auth.example.org/3b9c1e2a-0d4f-4e55-9a1b-7f0c2d3e4f5a");
        let root = area().resolve_staging_root(Some(&identity), None);
        assert_eq!(root.parent().unwrap(), Path::new("/data/export"));
        let name = root.file_name().unwrap().to_string_lossy().into_owned();
        let (segment, digest) = name.split_once('~').unwrap();
        assert_eq!(segment, "3b9c1e2a-0d4f-4e55-9a1b-7f0c2d3e4f5a");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn bare_identity_is_used_as_is() {
        assert_eq!(
            area().resolve_staging_root(Some(&Identity::new("u1")), None),
            PathBuf::from("/data/export/u1")
        );
    }

    #[test]
    fn anonymous_requesters_are_bucketed_by_ip() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(
            area().resolve_staging_root(None, Some(ip)),
            PathBuf::from("/data/export/anon-10.1.2.3")
        );

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(
            area().resolve_staging_root(None, Some(v6)),
            PathBuf::from("/data/export/anon---1")
        );
    }

    #[test]
    fn unknown_requester_falls_back_to_unknown_bucket() {
        assert_eq!(
            area().resolve_staging_root(None, None),
            PathBuf::from("/data/export/anon-unknown")
        );
        let blank = Identity::new("   ");
        assert_eq!(
            area().resolve_staging_root(Some(&blank), None),
            PathBuf::from("/data/export/anon-unknown")
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let identity = Identity::new("https://auth.example.org/u1");
        let ip = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 9)));
        assert_eq!(
            area().resolve_staging_root(Some(&identity), ip),
            area().resolve_staging_root(Some(&identity), ip)
        );
    }

    #[test]
    fn distinct_identities_get_distinct_roots() {
        let ids = [
            "https://auth.example.org/u1",
            "https://auth.example.org/u2",
            "u3",
            "https://auth.example.org/anon-10.0.0.1",
            "https://auth.example.org/..",
            "https://auth.example.org/has space",
            "https://auth.example.org/~deadbeef",
            "https://auth-a.example.org/u1",
            "https://auth-b.example.org/u1",
            "u1",
            "u1~0123456789abcdef0123456789abcdef",
        ];
        let roots: HashSet<PathBuf> = ids
            .iter()
            .map(|id| area().resolve_staging_root(Some(&Identity::new(*id)), None))
            .collect();
        assert_eq!(roots.len(), ids.len());
    }

    #[test]
    fn authenticated_buckets_never_collide_with_anonymous_ones() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let anon = area().resolve_staging_root(None, Some(ip));
        let spoof = Identity::new("https://auth.example.org/anon-10.0.0.1");
        let auth = area().resolve_staging_root(Some(&spoof), Some(ip));

        assert_ne!(anon, auth);
        let name = auth.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.starts_with("anon-"));
    }

    #[test]
    fn unsafe_segments_stay_inside_export_root() {
        for id in ["..", "https://x/..", "a/.hidden", "https://x/a\\b"] {
            let root = area().resolve_staging_root(Some(&Identity::new(id)), None);
            assert_eq!(root.parent().unwrap(), Path::new("/data/export"), "id {id}");
            let name = root.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with('~'), "id {id} should be hashed, got {name}");
        }
    }

    #[tokio::test]
    async fn locate_job_prefers_own_root_then_searches_others() {
        let dir = tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let key = JobKey::generate();

        let own = dir.path().join("u1");
        let other = dir.path().join("u2");
        tokio::fs::create_dir_all(&own).await.unwrap();
        tokio::fs::create_dir_all(other.join(key.to_string()))
            .await
            .unwrap();

        assert_eq!(
            area.locate_job(&own, &key).await,
            Some(other.join(key.to_string()))
        );

        tokio::fs::create_dir_all(own.join(key.to_string()))
            .await
            .unwrap();
        assert_eq!(
            area.locate_job(&own, &key).await,
            Some(own.join(key.to_string()))
        );

        assert_eq!(area.locate_job(&own, &JobKey::generate()).await, None);
    }

    #[tokio::test]
    async fn locate_job_handles_missing_export_root() {
        let dir = tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("missing"));
        assert_eq!(
            area.locate_job(&dir.path().join("missing/u1"), &JobKey::generate())
                .await,
            None
        );
    }
}
