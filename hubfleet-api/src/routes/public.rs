// Public routes: banner, health and API docs
use crate::app::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_docs;

pub fn create_public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_docs::ApiDoc::openapi()))
        .route("/", get(root))
        .route("/health", get(health))
}

async fn root() -> &'static str {
    "Hubfleet API - tenant instance lifecycle"
}

async fn health() -> &'static str {
    "ok"
}
