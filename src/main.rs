//! vulncollect — entry point.
//!
//! Start-up sequencing: load config, apply
//! migrations, open the connection pool, spawn collectors, serve
//! `/healthz`, run until interrupted. Exit code 0 on clean shutdown,
//! non-zero on fatal start-up failure.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vulncollect::config::Config;
use vulncollect::health::{self, Readiness};
use vulncollect::store::{Store, StoreConfig};
use vulncollect::supervisor::Supervisor;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::load()?);
    tracing::info!(server_bind = %config.server_bind, "starting vulncollect");

    let store = Store::connect(&config.database_url, &StoreConfig::default()).await?;
    store.migrate().await?;
    tracing::info!("schema migrations applied");

    let readiness = Readiness::new();
    readiness.set_ready(true);

    let supervisor = Supervisor::start(store, config.clone());
    let cancel = supervisor.cancellation_token();

    let health_app = health::router(readiness.clone());
    let listener = tokio::net::TcpListener::bind(&config.server_bind).await?;
    let health_server = tokio::spawn(async move {
        let _ = axum::serve(listener, health_app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    readiness.set_ready(false);

    supervisor.shutdown().await;
    let _ = health_server.await;

    tracing::info!("vulncollect shutdown complete");
    Ok(())
}
