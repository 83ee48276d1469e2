//! Credential resolution for the downloader

use super::TokenProbe;
use crate::error::{Error, Result};
use crate::export_spec::{ANONYMOUS_USER, CatalogParams};
use crate::types::{Credential, RequestContext, ServerCoords};

/// Pick the credential the downloader will present to the catalog
///
/// Order of preference:
/// 1. the specification's `token`, only if the catalog accepts it right now
/// 2. the inbound session cookie
/// 3. the specification's `oauth2_token`, else an inbound bearer token
/// 4. a non-anonymous username with a password
/// 5. no credential
///
/// A rejected specification token is fatal only when authentication is required;
/// otherwise it is dropped and resolution continues.
pub async fn resolve_credential(
    params: &CatalogParams,
    server: &ServerCoords,
    ctx: &RequestContext,
    probe: &dyn TokenProbe,
    auth_required: bool,
) -> Result<Credential> {
    if let Some(token) = params.token.as_deref().filter(|t| !t.is_empty()) {
        if probe.is_live(server, token).await {
            return Ok(Credential::Session(token.to_string()));
        }
        if auth_required {
            return Err(Error::Unauthorized(format!(
                "the supplied session token is not valid for {}",
                server.host
            )));
        }
        tracing::info!(
            request_id = %ctx.request_id,
            host = %server.host,
            "ignoring rejected session token"
        );
    }

    if let Some(token) = &ctx.session_token {
        return Ok(Credential::Session(token.clone()));
    }

    if let Some(token) = params
        .oauth2_token
        .as_ref()
        .filter(|t| !t.is_empty())
        .or(ctx.bearer_token.as_ref())
    {
        return Ok(Credential::Bearer(token.clone()));
    }

    if !params.username.eq_ignore_ascii_case(ANONYMOUS_USER)
        && let Some(password) = &params.password
    {
        return Ok(Credential::Basic {
            username: params.username.clone(),
            password: password.clone(),
        });
    }

    Ok(Credential::Anonymous)
}
