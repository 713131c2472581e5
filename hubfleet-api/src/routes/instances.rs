use crate::app::AppState;
use crate::handlers::instances;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn create_instance_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/instances", post(instances::create_instance))
        .route(
            "/instances/{slug}",
            get(instances::get_instance).delete(instances::cancel_instance),
        )
}
