use hubfleet_api::app::{create_cors, AppState};
use hubfleet_api::config::{database::create_pool, Settings, StoreBackend};
use hubfleet_api::provider_manager::ProviderManager;
use hubfleet_api::routes::create_router;
use hubfleet_api::setup::run_migrations;
use hubfleet_orchestrator::{InstanceStore, MemoryStore, Orchestrator, PgInstanceStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    let store: Arc<dyn InstanceStore> = match &settings.store {
        StoreBackend::Postgres { database_url } => {
            let pool = create_pool(database_url).await?;
            run_migrations(&pool).await?;
            Arc::new(PgInstanceStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("🧪 STORE=memory: records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let orchestrator = Orchestrator::new(ProviderManager::capabilities(&settings, store)?);
    let state = AppState::new(orchestrator.clone());

    let app = create_router().layer(create_cors()).with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "🚀 hubfleet API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !orchestrator.shutdown(settings.shutdown_grace).await {
        tracing::warn!("⚠️ exiting with lifecycle sequences still in flight");
    }
    tracing::info!("👋 bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("🛑 shutdown signal received");
}
