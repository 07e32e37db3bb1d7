//! GET /health - liveness probe
//!
//! Unauthenticated. Reports the active model so operators can see what is
//! resident without a key.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    // Blocks behind a running generation, like every other manager call.
    let manager = Arc::clone(&state.manager);
    let loaded_model = tokio::task::spawn_blocking(move || manager.loaded_model()).await?;
    Ok(Json(json!({
        "status": "ok",
        "loaded_model": loaded_model,
    })))
}
