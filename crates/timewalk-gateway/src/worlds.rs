//! REST endpoints for world generation jobs.

use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use timewalk_core::{preferred_splat_url, CoreError, OperationStatus};

#[derive(Debug, Deserialize)]
pub struct GenerateWorldBody {
    pub scene_description: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

fn upstream_error(e: CoreError) -> (StatusCode, String) {
    tracing::error!(target: "timewalk::gateway", "World Labs request failed: {}", e);
    let status = match &e {
        CoreError::Api { status: 404, .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

/// POST /api/worlds/generate
pub async fn generate_world(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateWorldBody>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let scene = body.scene_description.trim();
    if scene.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "scene_description is required".to_string()));
    }
    let display_name = body.display_name.as_deref().unwrap_or("Timewalk World");
    let model = body.model.as_deref().unwrap_or(state.worlds.model());
    let operation_id = state
        .worlds
        .generate_world(scene, display_name, model)
        .await
        .map_err(upstream_error)?;
    Ok(Json(json!({ "operation_id": operation_id })))
}

/// GET /api/worlds/status/:operation_id (one poll)
pub async fn world_status(
    State(state): State<Arc<AppState>>,
    Path(operation_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let payload = state
        .worlds
        .fetch_operation(&operation_id)
        .await
        .map_err(upstream_error)?;
    Ok(Json(status_body(&OperationStatus::from_payload(&payload))))
}

fn status_body(status: &OperationStatus) -> Value {
    let mut body = json!({ "done": status.done });
    if let Some(world_id) = &status.world_id {
        body["world_id"] = json!(world_id);
    }
    if let Some(url) = status.response.as_ref().and_then(|r| preferred_splat_url(r, "500k")) {
        body["splat_url"] = json!(url);
    }
    if let Some(err) = &status.error {
        body["error"] = json!(err);
    }
    body
}
