//! Model lifecycle routes: load, unload and status

use crate::auth::ApiUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use solo_engine::DeviceRequest;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    pub model_name: String,
    /// `auto`, `cpu`, `cuda` or `cuda:N`; the server default when omitted
    #[serde(default)]
    pub device: Option<String>,
    /// Hugging Face token for gated or private repositories
    #[serde(default)]
    pub hf_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /load_model
pub async fn load_model(
    State(state): State<Arc<AppState>>,
    ApiUser(user): ApiUser,
    Json(body): Json<LoadModelRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let device = match body.device.as_deref() {
        Some(raw) => raw
            .parse::<DeviceRequest>()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?,
        None => state.manager.default_device(),
    };
    info!(user = %user, model = %body.model_name, device = %device, "load requested");

    let manager = Arc::clone(&state.manager);
    let outcome = tokio::task::spawn_blocking(move || {
        manager.load(&body.model_name, body.hf_token.as_deref(), device)
    })
    .await??;

    Ok(Json(MessageResponse {
        message: outcome.to_string(),
    }))
}

/// POST /unload_model
pub async fn unload_model(
    State(state): State<Arc<AppState>>,
    ApiUser(user): ApiUser,
) -> ApiResult<Json<MessageResponse>> {
    info!(user = %user, "unload requested");
    let manager = Arc::clone(&state.manager);
    let outcome = tokio::task::spawn_blocking(move || manager.unload()).await?;
    Ok(Json(MessageResponse {
        message: outcome.to_string(),
    }))
}

/// GET /status
pub async fn status(
    State(state): State<Arc<AppState>>,
    _user: ApiUser,
) -> ApiResult<Json<Value>> {
    let manager = Arc::clone(&state.manager);
    let status = tokio::task::spawn_blocking(move || manager.status()).await?;
    Ok(Json(json!({ "status": status })))
}
