//! Export submission and retrieval handlers.

use super::ExportQuery;
use crate::api::AppState;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::service::ExportOutcome;
use crate::types::{ExportKind, RequestContext};
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

/// URLs returned for a finished export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriList {
    /// Every URL, in order of preference
    pub urls: Vec<String>,
    /// Value for the `Location` header, if the result has a single home
    pub location: Option<String>,
}

impl UriList {
    /// Render as a `201 Created` `text/uri-list` response
    pub fn into_created_response(self) -> Response {
        let body = self.urls.join("\n");
        let mut response = (
            StatusCode::CREATED,
            [(header::CONTENT_TYPE, "text/uri-list")],
            body,
        )
            .into_response();
        if let Some(value) = self
            .location
            .and_then(|location| HeaderValue::from_str(&location).ok())
        {
            response.headers_mut().insert(header::LOCATION, value);
        }
        response
    }
}

/// Shape the URLs for `outcome`
///
/// `collection_url` is the absolute URL the export was posted to; the job's own
/// URL is `{collection_url}/{key}`.
///
/// Bag exports point at a single result: its landing page or persistent
/// identifier resolvers when the downloader reported one, then the local copy.
/// File exports list every file and only set a location when there is one.
pub fn build_uri_list(outcome: &ExportOutcome, collection_url: &str, resolvers: &[String]) -> UriList {
    let job_url = format!("{}/{}", collection_url.trim_end_matches('/'), outcome.key);

    match outcome.kind {
        ExportKind::Bag => {
            let urls = match outcome.artifacts.first() {
                Some(artifact) => {
                    if let Some(landing) = &artifact.landing_page {
                        vec![landing.clone(), job_url]
                    } else if let Some(identifier) = &artifact.persistent_id {
                        resolvers
                            .iter()
                            .map(|resolver| format!("{resolver}{identifier}"))
                            .chain(std::iter::once(job_url))
                            .collect()
                    } else if artifact.local_path.is_none() && !artifact.remote_urls.is_empty() {
                        artifact.remote_urls.clone()
                    } else {
                        vec![job_url]
                    }
                }
                None => vec![job_url],
            };
            let location = urls.first().cloned();
            UriList { urls, location }
        }
        ExportKind::File => {
            let mut urls = Vec::new();
            for artifact in &outcome.artifacts {
                if let Some(name) = artifact.file_name() {
                    urls.push(format!("{job_url}/{}", urlencoding::encode(&name)));
                }
                urls.extend(artifact.remote_urls.iter().cloned());
            }
            if urls.is_empty() {
                urls.push(job_url);
            }
            let location = (urls.len() == 1).then(|| urls[0].clone());
            UriList { urls, location }
        }
    }
}

/// Absolute base URL of this service as seen by the client
fn external_base_url(config: &Config, headers: &HeaderMap) -> String {
    if let Some(base) = &config.api.public_base_url {
        return base.trim_end_matches('/').to_string();
    }

    let forwarded = |name: &str| {
        config
            .api
            .trust_proxy_headers
            .then(|| headers.get(name).and_then(|v| v.to_str().ok()))
            .flatten()
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let scheme = forwarded("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = forwarded("x-forwarded-host")
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| config.api.bind_address.to_string());
    format!("{scheme}://{host}")
}

fn parse_kind(kind: &str) -> Result<ExportKind> {
    kind.parse()
        .map_err(|_| Error::NotFound(format!("Unknown export type '{kind}'.")))
}

/// POST /export/:kind - Run an export
#[utoipa::path(
    post,
    path = "/export/{kind}",
    tag = "export",
    params(
        ("kind" = String, Path, description = "Export type: `bag` or `file`"),
        ExportQuery
    ),
    request_body(content = Object, description = "Export specification", content_type = "application/json"),
    responses(
        (status = 201, description = "Export created; body lists result URLs", content_type = "text/uri-list", body = String),
        (status = 400, description = "Malformed export specification", body = crate::error::ApiError),
        (status = 401, description = "Authentication required or rejected", body = crate::error::ApiError),
        (status = 403, description = "Forbidden, or another export is running for this requester", body = crate::error::ApiError),
        (status = 409, description = "The specification does not fit the catalog", body = crate::error::ApiError),
        (status = 502, description = "The export failed downstream", body = crate::error::ApiError)
    )
)]
pub async fn create_export(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(kind): Path<String>,
    Query(query): Query<ExportQuery>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let kind = parse_kind(&kind)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::BadRequest("No configuration specified.".into()));
    }
    let document: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| Error::BadRequest(format!("Error parsing configuration: {e}")))?;

    let outcome = state
        .service
        .submit(&ctx, kind, query.is_public(), document)
        .await?;

    let collection_url = format!(
        "{}{}",
        external_base_url(&state.config, &headers),
        uri.path()
    );
    let list = build_uri_list(
        &outcome,
        &collection_url,
        &state.config.export.identifier_resolvers,
    );
    Ok(list.into_created_response())
}

/// GET /export/:kind/:key - Retrieve the single artifact of an export
#[utoipa::path(
    get,
    path = "/export/{kind}/{key}",
    tag = "export",
    params(
        ("kind" = String, Path, description = "Export type: `bag` or `file`"),
        ("key" = String, Path, description = "Job key returned at creation")
    ),
    responses(
        (status = 200, description = "Artifact content, typed by file extension"),
        (status = 400, description = "The export holds several files; name one", body = crate::error::ApiError),
        (status = 403, description = "Not permitted to access this export", body = crate::error::ApiError),
        (status = 404, description = "Unknown export, or the export produced nothing (body is the job log)", content_type = "text/plain", body = String)
    )
)]
pub async fn get_export(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((kind, key)): Path<(String, String)>,
) -> Result<Response> {
    stream_export(&state, &ctx, &kind, &key, None).await
}

/// GET /export/:kind/:key/:filename - Retrieve a named artifact, or `log` for the job log
#[utoipa::path(
    get,
    path = "/export/{kind}/{key}/{filename}",
    tag = "export",
    params(
        ("kind" = String, Path, description = "Export type: `bag` or `file`"),
        ("key" = String, Path, description = "Job key returned at creation"),
        ("filename" = String, Path, description = "File name, or `log` for the job log")
    ),
    responses(
        (status = 200, description = "Artifact content, typed by file extension"),
        (status = 403, description = "Not permitted to access this export", body = crate::error::ApiError),
        (status = 404, description = "Unknown export or file", body = crate::error::ApiError)
    )
)]
pub async fn get_export_file(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((kind, key, filename)): Path<(String, String, String)>,
) -> Result<Response> {
    stream_export(&state, &ctx, &kind, &key, Some(&filename)).await
}

async fn stream_export(
    state: &AppState,
    ctx: &RequestContext,
    kind: &str,
    key: &str,
    filename: Option<&str>,
) -> Result<Response> {
    parse_kind(kind)?;
    let file = state.service.retrieve(ctx, key, filename).await?;

    let handle = tokio::fs::File::open(&file.path).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(handle)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    if let Some(value) = file
        .content_disposition
        .as_deref()
        .and_then(|d| HeaderValue::from_str(d).ok())
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    tracing::debug!(
        request_id = %ctx.request_id,
        path = %file.path.display(),
        size = file.size,
        "streaming export artifact"
    );
    Ok(response)
}
