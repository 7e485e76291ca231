/**
 * SENTINEL HQ - Point d'entrée du serveur central
 *
 * RÔLE : Bootstrap config → store SQLite → ingest gRPC + API REST côte à côte.
 * Arrêt propre des deux serveurs sur Ctrl-C.
 *
 * ARCHITECTURE : agents → gRPC StreamMetrics (9090) → store ← REST (8080) ← dashboard.
 * UTILITÉ : point de collecte unique des métriques de tous les hôtes.
 */

use anyhow::{Context, Result};
use sentinel_hq::config::load_config;
use sentinel_hq::http::{self, AppState};
use sentinel_hq::{HealthTracker, Ingestor, SqliteLogStore, TelemetryService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentinel_hq=info")),
        )
        .init();

    let cfg = load_config().await?;
    info!("Sentinel HQ starting (liveness policy: {:?})", cfg.liveness_policy);

    let store = Arc::new(
        SqliteLogStore::open(&cfg.database_path, cfg.liveness_policy)
            .await
            .with_context(|| format!("Failed to open database {}", cfg.database_path.display()))?,
    );
    let health = HealthTracker::new();

    let grpc_listener = TcpListener::bind(cfg.grpc_addr)
        .await
        .with_context(|| format!("Failed to listen on grpc address {}", cfg.grpc_addr))?;
    let http_listener = TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("Failed to listen on http address {}", cfg.http_addr))?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        trigger.cancel();
    });

    // les streams ouverts se terminent aussi à l'arrêt
    let ingestor = Ingestor::new(store.clone(), health.clone()).with_shutdown(shutdown.clone());
    let telemetry = TelemetryService::new(ingestor);
    let grpc = tonic::transport::Server::builder()
        .add_service(telemetry.into_server())
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(grpc_listener),
            shutdown.clone().cancelled_owned(),
        );
    info!("gRPC ingest listening on {}", cfg.grpc_addr);

    let app = http::build_router(AppState {
        store: store.clone(),
        health,
    });
    let rest = axum::serve(http_listener, app).with_graceful_shutdown(shutdown.cancelled_owned());
    info!("REST API listening on http://{}", cfg.http_addr);

    let served = tokio::try_join!(
        async { grpc.await.context("gRPC server failed") },
        async { rest.await.context("HTTP server failed") },
    );
    store.close().await;
    served?;

    info!("Sentinel HQ stopped");
    Ok(())
}
