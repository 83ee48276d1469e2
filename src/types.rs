//! Core types for catalog-export

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier for an export job
///
/// Wraps a version-4 UUID. The textual form is the job directory name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(pub Uuid);

impl JobKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for JobKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What an export produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// A single archived bag
    Bag,
    /// A flat set of files
    File,
}

impl ExportKind {
    /// Files-only mode strips any bag directive from the export specification
    pub fn files_only(&self) -> bool {
        matches!(self, ExportKind::File)
    }

    /// URL path segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Bag => "bag",
            ExportKind::File => "file",
        }
    }
}

impl std::str::FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bag" => Ok(ExportKind::Bag),
            "file" => Ok(ExportKind::File),
            other => Err(format!("unknown export kind: {other}")),
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated client identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque identity id, frequently a URL such as `https://auth.example.org/8f3c...`
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    /// Create an identity with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    /// Name used in log lines: display name when known, else the id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Opaque credential bundle associated with an identity, consumed by the downloader
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wallet(pub serde_json::Value);

/// Result of authenticating one request
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    /// Resolved identity, or None when anonymous
    pub identity: Option<Identity>,
    /// Attribute ids (identity plus group memberships) held by the client
    pub attributes: Vec<String>,
    /// Credential wallet, if the identity provider supplies one
    pub wallet: Option<Wallet>,
}

impl AuthContext {
    /// An anonymous context
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A context for `identity` whose only attribute is the identity itself
    pub fn for_identity(identity: Identity) -> Self {
        Self {
            attributes: vec![identity.id.clone()],
            identity: Some(identity),
            wallet: None,
        }
    }

    /// Attach a wallet
    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Whether the client holds `id`, either as its identity or as an attribute.
    /// The wildcard `*` matches every client.
    pub fn has_identity(&self, id: &str) -> bool {
        if id == "*" {
            return true;
        }
        self.identity.as_ref().is_some_and(|identity| identity.id == id)
            || self.attributes.iter().any(|attr| attr == id)
    }
}

/// Request-scoped context threaded through the driver and responder
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// Correlation id for logs and downstream calls
    pub request_id: String,
    /// When request processing began
    pub started_at: Instant,
    /// Network address of the client, if known
    pub client_ip: Option<IpAddr>,
    /// Authentication outcome
    pub auth: AuthContext,
    /// Session token from the inbound session cookie
    pub session_token: Option<String>,
    /// Token from an inbound `Authorization: Bearer` header
    pub bearer_token: Option<String>,
}

impl RequestContext {
    /// A context with a fresh request id and nothing else resolved
    pub fn new(client_ip: Option<IpAddr>, auth: AuthContext) -> Self {
        Self {
            request_id: Uuid::new_v4().simple().to_string(),
            started_at: Instant::now(),
            client_ip,
            auth,
            session_token: None,
            bearer_token: None,
        }
    }

    /// Resolved identity, if any
    pub fn identity(&self) -> Option<&Identity> {
        self.auth.identity.as_ref()
    }

    /// Label for audit logs
    pub fn user_label(&self) -> &str {
        self.identity().map(Identity::label).unwrap_or("anonymous")
    }
}

/// Coordinates of the catalog server an export reads from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCoords {
    /// URL scheme, `https` unless the host said otherwise
    pub protocol: String,
    /// Host, with port when one was given
    pub host: String,
    /// Catalog identifier (default "1")
    pub catalog_id: String,
}

impl ServerCoords {
    /// `protocol://host`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host)
    }
}

/// Credential handed to the downloader
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// Catalog session token, sent as a cookie
    Session(String),
    /// OAuth2 bearer token
    Bearer(String),
    /// Username and password
    Basic {
        /// Account name
        username: String,
        /// Account password
        password: String,
    },
    /// No credential
    Anonymous,
}

impl Credential {
    /// Short description for logs; never includes secrets
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Session(_) => "session",
            Credential::Bearer(_) => "bearer",
            Credential::Basic { .. } => "basic",
            Credential::Anonymous => "anonymous",
        }
    }
}

/// One produced artifact, as reported by the downloader
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Downloader-assigned identifier
    pub artifact_id: String,
    /// Location inside the job directory, when staged locally
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// URLs where the artifact is hosted remotely
    #[serde(default)]
    pub remote_urls: Vec<String>,
    /// Public landing page for the artifact
    #[serde(default)]
    pub landing_page: Option<String>,
    /// Persistent identifier (e.g. `ark:/...` or `minid:...`)
    #[serde(default)]
    pub persistent_id: Option<String>,
}

impl Artifact {
    /// An artifact staged at `path`
    pub fn local(artifact_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            local_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Basename of the local file, if any
    pub fn file_name(&self) -> Option<String> {
        self.local_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}
