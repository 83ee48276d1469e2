//! Configuration types for catalog-export

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Main configuration for the export service
///
/// Fields are organized into sub-configs:
/// - [`auth`](AuthConfig): how requester identity is established
/// - [`export`](ExportConfig): locking, deadlines, retention and response shaping
/// - [`api`](ApiConfig): HTTP listener and proxy trust
///
/// The value is constructed once and threaded into each component; nothing
/// reads configuration from global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root of all service storage; export jobs live under `<storage_path>/export`
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Export job settings
    #[serde(default)]
    pub export: ExportConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            auth: AuthConfig::default(),
            export: ExportConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing sections and fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("cannot parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.storage_path.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "storage_path must not be empty".into(),
                key: Some("storage_path".into()),
            });
        }
        if self.export.purge_batch == 0 {
            return Err(Error::Config {
                message: "purge_batch must be at least 1".into(),
                key: Some("export.purge_batch".into()),
            });
        }
        if self.export.lock_timeout.is_zero() {
            return Err(Error::Config {
                message: "lock_timeout must be greater than zero".into(),
                key: Some("export.lock_timeout".into()),
            });
        }
        if self.auth.mode == AuthMode::Webauthn && self.auth.session_url.is_none() {
            return Err(Error::Config {
                message: "webauthn authentication requires a session_url".into(),
                key: Some("auth.session_url".into()),
            });
        }
        Ok(())
    }

    /// Directory that holds every staging root
    pub fn export_root(&self) -> PathBuf {
        self.storage_path.join("export")
    }

    /// Whether the deployment mandates authentication
    pub fn auth_required(&self) -> bool {
        self.auth.mode != AuthMode::None
    }
}

/// How requester identity is established
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No authentication; every requester is anonymous (default)
    #[default]
    None,
    /// Resolve identity from a webauthn session endpoint
    Webauthn,
}

/// Authentication configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authentication mode (default: none)
    #[serde(default)]
    pub mode: AuthMode,

    /// Session endpoint queried with the caller's cookies, e.g.
    /// `https://catalog.example.org/authn/session`
    #[serde(default)]
    pub session_url: Option<String>,

    /// Name of the session cookie (default: "webauthn")
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Timeout for session lookups and token probes (default: 10 seconds)
    #[serde(default = "default_auth_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            session_url: None,
            cookie_name: default_cookie_name(),
            request_timeout: default_auth_timeout(),
        }
    }
}

/// Export job configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Permit parallel exports for one requester via a shared lock (default: false)
    #[serde(default)]
    pub allow_concurrent: bool,

    /// How long to wait for the requester's staging lock (default: 5 seconds)
    #[serde(default = "default_lock_timeout", with = "duration_serde")]
    pub lock_timeout: Duration,

    /// Absolute deadline for one downloader invocation (default: 600 seconds)
    #[serde(default = "default_export_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Payload ceiling in megabytes (None = unlimited)
    #[serde(default)]
    pub max_payload_size_mb: Option<u64>,

    /// Job directory count at which the oldest jobs are purged (0 disables purging)
    #[serde(default = "default_purge_threshold")]
    pub purge_threshold: usize,

    /// Number of job directories removed per purge (default: 1)
    #[serde(default = "default_purge_batch")]
    pub purge_batch: usize,

    /// Mirror job log lines into the service log (default: false)
    #[serde(default)]
    pub propagate_logs: bool,

    /// Only record warnings and errors in job logs (default: false)
    #[serde(default)]
    pub quiet: bool,

    /// Resolver prefixes used to turn a persistent identifier into URLs
    #[serde(default = "default_identifier_resolvers")]
    pub identifier_resolvers: Vec<String>,
}

impl ExportConfig {
    /// Payload ceiling in bytes, if any
    pub fn max_payload_bytes(&self) -> Option<u64> {
        self.max_payload_size_mb
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            allow_concurrent: false,
            lock_timeout: default_lock_timeout(),
            timeout: default_export_timeout(),
            max_payload_size_mb: None,
            purge_threshold: default_purge_threshold(),
            purge_batch: default_purge_batch(),
            propagate_logs: false,
            quiet: false,
            identifier_resolvers: default_identifier_resolvers(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Externally visible base URL used when composing result URLs
    /// (default: derived from the Host header)
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Honor X-Forwarded-For / X-Forwarded-Proto (default: false)
    #[serde(default)]
    pub trust_proxy_headers: bool,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_base_url: None,
            trust_proxy_headers: false,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_cookie_name() -> String {
    "webauthn".to_string()
}

fn default_auth_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_purge_threshold() -> usize {
    100
}

fn default_purge_batch() -> usize {
    1
}

fn default_identifier_resolvers() -> Vec<String> {
    vec![
        "https://n2t.net/".to_string(),
        "https://identifiers.org/".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.storage_path, PathBuf::from("./data"));
        assert_eq!(config.auth.mode, AuthMode::None);
        assert_eq!(config.auth.cookie_name, "webauthn");
        assert!(!config.export.allow_concurrent);
        assert_eq!(config.export.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.export.purge_batch, 1);
        assert_eq!(config.export.identifier_resolvers.len(), 2);
        assert!(!config.auth_required());
    }

    #[test]
    fn durations_deserialize_from_seconds() {
        let json = r#"{"export": {"lock_timeout": 2, "timeout": 30}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.export.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.export.timeout, Duration::from_secs(30));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(ExportConfig::default()).unwrap();
        assert_eq!(json["lock_timeout"], 5);
        assert_eq!(json["timeout"], 600);
    }

    #[test]
    fn duration_rejects_string_value() {
        let json = r#"{"export": {"lock_timeout": "5s"}}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn webauthn_mode_requires_session_url() {
        let mut config = Config::default();
        config.auth.mode = AuthMode::Webauthn;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "auth.session_url"));

        config.auth.session_url = Some("https://catalog.example.org/authn/session".into());
        config.validate().unwrap();
        assert!(config.auth_required());
    }

    #[test]
    fn zero_purge_batch_is_rejected() {
        let mut config = Config::default();
        config.export.purge_batch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn payload_ceiling_converts_megabytes_to_bytes() {
        let config = ExportConfig {
            max_payload_size_mb: Some(3),
            ..ExportConfig::default()
        };
        assert_eq!(config.max_payload_bytes(), Some(3 * 1024 * 1024));
        assert_eq!(ExportConfig::default().max_payload_bytes(), None);
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"storage_path": "/srv/export-data", "export": {"allow_concurrent": true}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/srv/export-data"));
        assert!(config.export.allow_concurrent);
        assert_eq!(
            config.export_root(),
            PathBuf::from("/srv/export-data/export")
        );
    }

    #[test]
    fn from_file_reports_missing_file_as_config_error() {
        let err = Config::from_file("/nonexistent/catalog-export.json").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
