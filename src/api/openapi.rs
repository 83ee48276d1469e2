//! OpenAPI documentation and schema generation
//!
//! The export REST API described with utoipa at compile time.

use utoipa::OpenApi;

/// OpenAPI documentation for the catalog-export REST API
///
/// Served at `/openapi.json`; the Swagger UI (when enabled) lives at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "catalog-export REST API",
        version = "0.4.0",
        description = "Runs catalog exports on behalf of authenticated clients and serves the staged results",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    paths(
        // Export
        crate::api::routes::create_export,
        crate::api::routes::get_export,
        crate::api::routes::get_export_file,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "export", description = "Export jobs - Run an export and download its artifacts"),
        (name = "system", description = "System endpoints - Health checks and the OpenAPI spec"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Session cookie and bearer token schemes
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{
            ApiKey, ApiKeyValue, Http, HttpAuthScheme, SecurityScheme,
        };

        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "session",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("webauthn"))),
            );
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
