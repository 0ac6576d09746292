//! Router configuration for the DEPOT Web API.

use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{
    create_processed_file, create_reference_file, create_submitted_file, download, download_cli,
    download_named, drs, get_file, get_upload, patch_file, post_upload, put_file, AppState,
};
use super::middleware::{create_cors_layer, JwtState};

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    cors_origins: &[String],
) -> Router {
    let file_routes = Router::new()
        .route("/files-processed", post(create_processed_file))
        .route("/files-submitted", post(create_submitted_file))
        .route("/files-reference", post(create_reference_file))
        .route("/files/:uuid", get(get_file).patch(patch_file).put(put_file))
        .route("/files/:uuid/upload", get(get_upload).post(post_upload))
        .route("/files/:uuid/download", get(download))
        .route("/files/:uuid/download/:filename", get(download_named))
        .route("/files/:uuid/download_cli", get(download_cli))
        .route("/files/:uuid/drs", get(drs));

    Router::new()
        .merge(file_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(Extension(jwt_state)),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::handlers::file::download,
        crate::web::handlers::file::download_named,
        crate::web::handlers::file::download_cli,
        crate::web::handlers::file::drs,
        crate::web::handlers::upload::get_upload,
        crate::web::handlers::upload::post_upload,
        crate::web::handlers::item::create_processed_file,
        crate::web::handlers::item::create_submitted_file,
        crate::web::handlers::item::create_reference_file,
        crate::web::handlers::item::get_file,
        crate::web::handlers::item::patch_file,
        crate::web::handlers::item::put_file,
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "files", description = "File item writes"),
        (name = "upload", description = "Upload credential coordination"),
        (name = "download", description = "Download brokering")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Create the Swagger UI router.
pub fn create_swagger_router() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_health_router() {
        let _router = create_health_router();
        // Should not panic
    }

    #[test]
    fn test_openapi_document_builds() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/files/{uuid}/download"));
        assert!(doc.paths.paths.contains_key("/files-processed"));
    }
}
