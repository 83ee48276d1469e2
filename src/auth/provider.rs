//! Identity providers

use super::InboundCredentials;
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::types::{AuthContext, Identity, Wallet};
use async_trait::async_trait;
use serde_json::Value;

/// Resolves who is making a request
///
/// Implementations never fail a request outright: anything that prevents
/// resolving an identity yields an anonymous context, and the export driver
/// decides whether anonymity is acceptable.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the authentication context for one request
    async fn authenticate(&self, inbound: &InboundCredentials) -> AuthContext;
}

/// Provider for deployments without authentication
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousProvider;

#[async_trait]
impl IdentityProvider for AnonymousProvider {
    async fn authenticate(&self, _inbound: &InboundCredentials) -> AuthContext {
        AuthContext::anonymous()
    }
}

/// Provider backed by a webauthn session endpoint
///
/// Forwards the caller's `Cookie` and `Authorization` headers to the configured
/// session URL and reads the `client`, `attributes` and `wallet` members of the
/// response.
#[derive(Debug, Clone)]
pub struct WebauthnSessionProvider {
    client: reqwest::Client,
    session_url: String,
}

impl WebauthnSessionProvider {
    /// Build a provider from the auth configuration
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let session_url = config.session_url.clone().ok_or_else(|| Error::Config {
            message: "webauthn authentication requires a session_url".into(),
            key: Some("auth.session_url".into()),
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            session_url,
        })
    }

    async fn fetch_session(&self, inbound: &InboundCredentials) -> Option<Value> {
        let mut request = self.client.get(&self.session_url);
        if let Some(cookie) = &inbound.cookie_header {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(authorization) = &inbound.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(session_url = %self.session_url, error = %e, "session lookup failed");
                return None;
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::NOT_FOUND
        {
            return None;
        }
        if !status.is_success() {
            tracing::warn!(session_url = %self.session_url, status = %status, "unexpected session lookup status");
            return None;
        }

        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(session_url = %self.session_url, error = %e, "malformed session document");
                None
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for WebauthnSessionProvider {
    async fn authenticate(&self, inbound: &InboundCredentials) -> AuthContext {
        if inbound.cookie_header.is_none() && inbound.authorization.is_none() {
            return AuthContext::anonymous();
        }
        match self.fetch_session(inbound).await {
            Some(session) => context_from_session(&session),
            None => AuthContext::anonymous(),
        }
    }
}

/// Build an [`AuthContext`] from a session document
fn context_from_session(session: &Value) -> AuthContext {
    let client = session.get("client");
    let id = client.and_then(|c| match c {
        Value::String(id) => Some(id.clone()),
        Value::Object(fields) => fields.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });
    let Some(id) = id.filter(|id| !id.is_empty()) else {
        return AuthContext::anonymous();
    };

    let mut identity = Identity::new(id);
    identity.display_name = client
        .and_then(|c| c.get("display_name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut context = AuthContext::for_identity(identity);
    if let Some(attributes) = session.get("attributes").and_then(Value::as_array) {
        for attribute in attributes {
            let attr_id = match attribute {
                Value::String(s) => Some(s.as_str()),
                Value::Object(fields) => fields.get("id").and_then(Value::as_str),
                _ => None,
            };
            if let Some(attr_id) = attr_id
                && !context.attributes.iter().any(|a| a == attr_id)
            {
                context.attributes.push(attr_id.to_string());
            }
        }
    }

    let wallet = session
        .get("wallet")
        .or_else(|| session.get("extra_values").and_then(|e| e.get("wallet")))
        .filter(|w| !w.is_null());
    if let Some(wallet) = wallet {
        context.wallet = Some(Wallet(wallet.clone()));
    }
    context
}
