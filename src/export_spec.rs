//! Export specification parsing and validation
//!
//! The request body is an arbitrary JSON document; only the `catalog` section
//! and the optional `bag` directive are interpreted here. Everything else is
//! passed through to the downloader untouched.

use crate::error::{Error, Result};
use crate::types::{ExportKind, ServerCoords};
use serde_json::Value;

/// Archiver filled in when a bag directive names none
pub const DEFAULT_BAG_ARCHIVER: &str = "zip";

/// Catalog used when the specification names none
pub const DEFAULT_CATALOG_ID: &str = "1";

/// Username that means "no account"
pub const ANONYMOUS_USER: &str = "anonymous";

/// Credential hints carried in the `catalog` section
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CatalogParams {
    /// Catalog session token to probe and forward
    pub token: Option<String>,
    /// OAuth2 bearer token
    pub oauth2_token: Option<String>,
    /// Account name (default "anonymous")
    pub username: String,
    /// Account password
    pub password: Option<String>,
}

impl std::fmt::Debug for CatalogParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogParams")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("oauth2_token", &self.oauth2_token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A parsed, validated export specification
#[derive(Clone, Debug)]
pub struct ValidatedSpec {
    /// Catalog server the export reads from
    pub server: ServerCoords,
    /// Credential hints
    pub catalog: CatalogParams,
    /// The full document after normalization of the bag directive
    pub document: Value,
}

impl ValidatedSpec {
    /// Parse `document` for an export of `kind`
    ///
    /// Files-only exports drop any `bag` directive. Bag exports get a default
    /// `bag_archiver` when the directive omits one.
    pub fn parse(mut document: Value, kind: ExportKind) -> Result<Self> {
        let root = document
            .as_object_mut()
            .ok_or_else(|| parse_error("the export specification must be a JSON object"))?;

        let catalog = root
            .get("catalog")
            .ok_or_else(|| parse_error("missing required section 'catalog'"))?
            .as_object()
            .ok_or_else(|| parse_error("'catalog' must be an object"))?;

        let host = match catalog.get("host") {
            Some(Value::String(host)) if !host.trim().is_empty() => host.trim(),
            Some(Value::String(_)) => return Err(parse_error("'catalog.host' must not be empty")),
            Some(_) => return Err(parse_error("'catalog.host' must be a string")),
            None => return Err(parse_error("missing required field 'catalog.host'")),
        };
        let (protocol, host) = split_host(host)?;

        let catalog_id = match catalog.get("catalog_id") {
            None | Some(Value::Null) => DEFAULT_CATALOG_ID.to_string(),
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            Some(_) => {
                return Err(parse_error(
                    "'catalog.catalog_id' must be a non-empty string or a number",
                ));
            }
        };

        let params = CatalogParams {
            token: optional_string(catalog, "token")?,
            oauth2_token: optional_string(catalog, "oauth2_token")?,
            username: optional_string(catalog, "username")?
                .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
            password: optional_string(catalog, "password")?,
        };

        if root.contains_key("bag") {
            if kind.files_only() {
                root.remove("bag");
            } else {
                let bag = root
                    .get_mut("bag")
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| parse_error("'bag' must be an object"))?;
                let has_archiver = bag
                    .get("bag_archiver")
                    .and_then(Value::as_str)
                    .is_some_and(|a| !a.is_empty());
                if !has_archiver {
                    bag.insert(
                        "bag_archiver".to_string(),
                        Value::String(DEFAULT_BAG_ARCHIVER.to_string()),
                    );
                }
            }
        }

        Ok(Self {
            server: ServerCoords {
                protocol,
                host,
                catalog_id,
            },
            catalog: params,
            document,
        })
    }

    /// The bag directive, if any survived normalization
    pub fn bag(&self) -> Option<&serde_json::Map<String, Value>> {
        self.document.get("bag").and_then(Value::as_object)
    }
}

fn parse_error(detail: impl std::fmt::Display) -> Error {
    Error::BadRequest(format!("Error parsing configuration: {detail}"))
}

/// Split `host` into scheme and authority
///
/// A value carrying a scheme (`://`) is parsed as a URL; anything else is a
/// bare host reached over https.
fn split_host(host: &str) -> Result<(String, String)> {
    if !host.contains("://") {
        return Ok(("https".to_string(), host.trim_end_matches('/').to_string()));
    }

    let url = url::Url::parse(host)
        .map_err(|e| parse_error(format!("'catalog.host' is not a valid URL: {e}")))?;
    let name = url
        .host_str()
        .ok_or_else(|| parse_error("'catalog.host' has no host name"))?;
    let authority = match url.port() {
        Some(port) => format!("{name}:{port}"),
        None => name.to_string(),
    };
    Ok((url.scheme().to_string(), authority))
}

fn optional_string(
    section: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<String>> {
    match section.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(parse_error(format!("'catalog.{field}' must be a string"))),
    }
}
