//! Tally API Server — records wallet events and serves aggregated balances.

use api::{AppState, router};
use std::{net::SocketAddr, sync::Arc};
use tally_core::config::KvBackend;
use tally_core::{Settings, telemetry};
use tally_storage::{self as storage, KvStore, MemoryKvStore, PgKvStore};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(
        start = %settings.start_time,
        end = %settings.end_time,
        namespace = %settings.kv_namespace,
        mode = ?settings.update_mode,
        "Starting Tally API Server"
    );

    let store: Arc<dyn KvStore> = match settings.kv_backend {
        KvBackend::Postgres => {
            let pool = storage::connect(&settings.database_url).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            tracing::info!("Database ready");
            Arc::new(PgKvStore::new(pool, settings.kv_namespace.clone()))
        }
        KvBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryKvStore::new())
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let app = router(Arc::new(AppState::new(store, settings)));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
