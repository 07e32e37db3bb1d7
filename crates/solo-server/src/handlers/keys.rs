//! POST /generate_apikey

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ApiKeyRequest {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// Issue a key for `username`. A user who already has a key gets a new one
/// and the old one stops working.
pub async fn generate_apikey(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApiKeyRequest>,
) -> ApiResult<Json<ApiKeyResponse>> {
    let keystore = Arc::clone(&state.keystore);
    let api_key = tokio::task::spawn_blocking(move || keystore.generate(&body.username)).await??;
    Ok(Json(ApiKeyResponse { api_key }))
}
