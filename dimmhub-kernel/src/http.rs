/**
 * API REST DIMMHUB - Pilotage des nodes depuis un dashboard ou la CLI
 *
 * ROUTES :
 * - GET  /health                     ping
 * - GET  /system/health              état du kernel
 * - GET  /nodes, /nodes/{id}         snapshots des nodes
 * - GET  /nodes/{id}/record          représentation sérialisable du node
 * - POST /nodes/{id}/load/{game_id}  démarre un chargement (?strict=true)
 * - POST /nodes/{id}/terminate       arrête le chargement en cours
 * - GET  /games                      catalogue
 *
 * Un chargement accepté répond 202 : la suite se lit sur /nodes/{id}.
 */

use crate::catalog::Catalog;
use crate::game::GameDescriptor;
use crate::health::{HealthTracker, KernelHealth};
use crate::node::{LoadOutcome, NodeError, NodeId, NodeRecord, NodeSnapshot};
use crate::registry::SharedNodeRegistry;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedNodeRegistry,
    pub catalog: Arc<Catalog>,
    pub health: HealthTracker,
}

#[derive(Debug, Default, Deserialize)]
struct LoadParams {
    #[serde(default)]
    strict: bool,
}

type ApiError = (StatusCode, Json<Value>);

fn not_found(what: &str, id: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown {what} '{id}'") })),
    )
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{id}", get(get_node))
        .route("/nodes/{id}/record", get(get_node_record))
        .route("/nodes/{id}/load/{game_id}", post(load_game))
        .route("/nodes/{id}/terminate", post(terminate_load))
        .route("/games", get(list_games))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.registry, &app.catalog).await)
}

// GET /nodes (liste)
async fn list_nodes(State(app): State<AppState>) -> Json<Vec<NodeSnapshot>> {
    let nodes = app.registry.list().await;
    Json(nodes.iter().map(|n| n.snapshot()).collect())
}

// GET /nodes/{id} (détail)
async fn get_node(
    State(app): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<NodeSnapshot>, ApiError> {
    let node = app
        .registry
        .get(NodeId::from(id))
        .await
        .ok_or_else(|| not_found("node", id))?;
    Ok(Json(node.snapshot()))
}

// GET /nodes/{id}/record
async fn get_node_record(
    State(app): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<NodeRecord>, ApiError> {
    let node = app
        .registry
        .get(NodeId::from(id))
        .await
        .ok_or_else(|| not_found("node", id))?;
    Ok(Json(node.record()))
}

// POST /nodes/{id}/load/{game_id}
async fn load_game(
    State(app): State<AppState>,
    Path((id, game_id)): Path<(u32, String)>,
    Query(params): Query<LoadParams>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let node = app
        .registry
        .get(NodeId::from(id))
        .await
        .ok_or_else(|| not_found("node", id))?;
    let game = app
        .catalog
        .get(&game_id)
        .ok_or_else(|| not_found("game", &game_id))?;

    info!(node = %node.id(), game = %game_id, strict = params.strict, "load requested");
    let outcome = if params.strict {
        node.load_strict(game)
    } else {
        node.load(game)
    };

    match outcome {
        Ok(LoadOutcome::Started(attempt)) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "node": node.id(), "game": game_id, "attempt": attempt })),
        )),
        Ok(LoadOutcome::Rejected(report)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": report.failure_reason(),
                "report": report,
            })),
        )),
        Err(e @ NodeError::Busy { .. }) => Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": e.to_string() })),
        )),
        Err(e) => {
            error!(node = %node.id(), "load failed to start: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}

// POST /nodes/{id}/terminate
async fn terminate_load(
    State(app): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Value>, ApiError> {
    let node = app
        .registry
        .get(NodeId::from(id))
        .await
        .ok_or_else(|| not_found("node", id))?;
    let stopped = node.terminate();
    Ok(Json(json!({ "node": node.id(), "stopped": stopped })))
}

// GET /games
async fn list_games(State(app): State<AppState>) -> Json<Vec<GameDescriptor>> {
    Json(app.catalog.list().iter().map(|g| g.as_ref().clone()).collect())
}
