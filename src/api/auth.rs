//! Request context middleware
//!
//! Builds the [`RequestContext`] every handler works with: request id, client
//! address, session and bearer tokens, and the identity resolved by the
//! configured [`IdentityProvider`](crate::auth::IdentityProvider). Each request
//! also produces one audit event when it completes.

use crate::api::AppState;
use crate::auth::InboundCredentials;
use crate::types::RequestContext;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Header carrying the request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound request id that is reused
const MAX_REQUEST_ID_LEN: usize = 128;

/// Resolve the requester and attach a [`RequestContext`] to the request
pub async fn request_context(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let inbound = InboundCredentials {
        cookie_header: header_string(headers, header::COOKIE),
        authorization: header_string(headers, header::AUTHORIZATION),
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = if state.config.api.trust_proxy_headers {
        forwarded_for(headers).or(peer)
    } else {
        peer
    };
    let inbound_request_id = header_string(headers, REQUEST_ID_HEADER).filter(|id| {
        !id.is_empty()
            && id.len() <= MAX_REQUEST_ID_LEN
            && id.chars().all(|c| c.is_ascii_graphic())
    });
    let referrer = header_string(headers, header::REFERER);
    let agent = header_string(headers, header::USER_AGENT);

    let auth = state.provider.authenticate(&inbound).await;
    let mut ctx = RequestContext::new(client_ip, auth);
    if let Some(id) = inbound_request_id {
        ctx.request_id = id;
    }
    ctx.session_token = inbound.cookie(&state.config.auth.cookie_name);
    ctx.bearer_token = inbound.bearer_token();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    tracing::info!(
        target: "catalog_export::audit",
        request_id = %ctx.request_id,
        elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        content_type = %content_type,
        client = %ctx.client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
        user = %ctx.user_label(),
        referrer = referrer.as_deref().unwrap_or(""),
        agent = agent.as_deref().unwrap_or(""),
        "request complete"
    );

    response
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// First address in `X-Forwarded-For`
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}
