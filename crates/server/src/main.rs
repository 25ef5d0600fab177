use std::sync::Arc;

use anyhow::Context as _;

use tessera_engine::Reconciler;
use tessera_storage::{SqlAuditSink, SqlCatalog, SqliteAliasStore};

mod config;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::ServerConfig::load()?;

    let pool = tessera_storage::create_db(&cfg.db_path)
        .await
        .with_context(|| format!("opening database {}", cfg.db_path.display()))?;

    let engine = Arc::new(Reconciler::new(
        pool.clone(),
        Arc::new(SqliteAliasStore::new(pool.clone())),
        Arc::new(SqlCatalog::new(pool.clone())),
        Arc::new(SqlAuditSink::new(pool)),
        cfg.engine_config(),
    ));

    let app = routes::router(engine);
    let listener = tokio::net::TcpListener::bind(&cfg.addr)
        .await
        .with_context(|| format!("binding {}", cfg.addr))?;
    tracing::info!(addr = %cfg.addr, db = %cfg.db_path.display(), "reconciliation server up");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
