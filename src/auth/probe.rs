//! Catalog session token probing

use crate::error::Result;
use crate::types::ServerCoords;
use async_trait::async_trait;
use std::time::Duration;

/// Checks whether a catalog session token is currently accepted
#[async_trait]
pub trait TokenProbe: Send + Sync {
    /// Whether `server` accepts `token`
    ///
    /// Every call makes a fresh round trip; results are never cached.
    async fn is_live(&self, server: &ServerCoords, token: &str) -> bool;
}

/// Probes `{protocol}://{host}/authn/session` with the token as a cookie
#[derive(Debug, Clone)]
pub struct SessionTokenProbe {
    client: reqwest::Client,
    cookie_name: String,
}

impl SessionTokenProbe {
    /// Create a probe sending the token in cookie `cookie_name`
    pub fn new(cookie_name: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            cookie_name: cookie_name.into(),
        })
    }
}

#[async_trait]
impl TokenProbe for SessionTokenProbe {
    async fn is_live(&self, server: &ServerCoords, token: &str) -> bool {
        let url = format!("{}/authn/session", server.base_url());
        let result = self
            .client
            .get(&url)
            .header(
                reqwest::header::COOKIE,
                format!("{}={}", self.cookie_name, token),
            )
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::info!(url = %url, status = %response.status(), "catalog rejected session token");
                false
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "session token probe failed");
                false
            }
        }
    }
}
