//! REST API server module
//!
//! Exposes export submission and artifact retrieval over HTTP, with an
//! OpenAPI description of every route.

use crate::{Config, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Export
/// - `POST /export/:kind` - Run an export (`bag` or `file`), returns a `text/uri-list`
/// - `GET /export/:kind/:key` - Download the single artifact of an export
/// - `GET /export/:kind/:key/:filename` - Download a named artifact, or `log`
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
///
/// `HEAD` is answered on every `GET` route.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    let router = Router::new()
        // Export
        .route("/export/:kind", post(routes::create_export))
        .route("/export/:kind/:key", get(routes::get_export))
        .route("/export/:kind/:key/:filename", get(routes::get_export_file))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    // Last layer applied runs first: CORS, then tracing, then the request context.
    let router = router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::request_context,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer for the configured origins ("*" or empty allows any)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on the configured bind address until `shutdown` resolves
///
/// In-flight requests are allowed to finish once `shutdown` completes.
///
/// # Example
///
/// ```no_run
/// use catalog_export::api::{AppState, start_api_server};
/// use catalog_export::auth::{AnonymousProvider, SessionTokenProbe};
/// use catalog_export::downloader::CatalogDownloader;
/// use catalog_export::{Config, ExportService};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let probe = SessionTokenProbe::new(&config.auth.cookie_name, config.auth.request_timeout)?;
/// let downloader = CatalogDownloader::new(&config.auth.cookie_name)?;
/// let service = ExportService::new(config.clone(), Arc::new(downloader), Arc::new(probe));
/// let state = AppState::new(service, config, Arc::new(AnonymousProvider));
///
/// start_api_server(state, catalog_export::wait_for_signal()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server<F>(state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_address = state.config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(state);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "API server listening"
    );

    // ConnectInfo feeds the client address into the request context
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
