/**
 * DIMMHUB KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Bootstrap : config, catalogue de jeux, registre des nodes, miroir
 * MQTT optionnel, puis API REST.
 */

use anyhow::{Context, Result};
use dimmhub_kernel::catalog::Catalog;
use dimmhub_kernel::config::load_config;
use dimmhub_kernel::health::HealthTracker;
use dimmhub_kernel::http::{build_router, AppState};
use dimmhub_kernel::mqtt::spawn_status_mirror;
use dimmhub_kernel::{MessageBus, NodeRegistry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dimmhub_kernel=info")),
        )
        .init();

    let cfg = load_config().await;

    let catalog = match Catalog::load(&cfg.games.catalog, &cfg.games.directory).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("failed to load game catalog, starting with an empty one: {e}");
            Catalog::new()
        }
    };

    let bus = MessageBus::new();
    let registry = Arc::new(NodeRegistry::new(bus.clone(), cfg.loader.clone()));
    let registered = registry.populate(cfg.node_specs()).await;
    info!(registered, configured = cfg.nodes.len(), "node registry ready");

    let health = HealthTracker::new();
    let _mirror = cfg
        .mqtt
        .as_ref()
        .map(|mqtt| spawn_status_mirror(&bus, mqtt, health.clone()));

    let app = build_router(AppState {
        registry,
        catalog: Arc::new(catalog),
        health,
    });

    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    info!("listening on http://{}", cfg.listen);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
