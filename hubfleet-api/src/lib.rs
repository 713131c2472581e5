// Library entry point for the binary and the HTTP tests

pub mod api_docs;
pub mod app;
pub mod config;
pub mod handlers;
pub mod provider_manager;
pub mod routes;
pub mod setup;

pub use app::AppState;
