//! POST /generate

use crate::auth::ApiUser;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use solo_engine::{Completion, GenerationParameters, GenerationRequest};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    /// Model to use; empty or omitted means the one already loaded
    #[serde(default)]
    pub model_name: String,
    pub prompt: String,
    #[serde(default)]
    pub hf_token: Option<String>,
    #[serde(default)]
    pub parameters: GenerationParameters,
}

impl From<GenerateBody> for GenerationRequest {
    fn from(body: GenerateBody) -> Self {
        let request = GenerationRequest::new(body.model_name, body.prompt)
            .with_parameters(body.parameters);
        match body.hf_token {
            Some(token) => request.with_auth_token(token),
            None => request,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    /// Wall-clock seconds spent in the manager, including any implicit load
    pub request_time: f64,
    pub completions: Vec<Completion>,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    ApiUser(user): ApiUser,
    Json(body): Json<GenerateBody>,
) -> ApiResult<Json<GenerateResponse>> {
    let request = GenerationRequest::from(body);
    info!(
        user = %user,
        model = %request.model_name,
        prompt_chars = request.prompt.len(),
        sequences = request.parameters.num_return_sequences,
        "generation requested"
    );

    let manager = Arc::clone(&state.manager);
    let started = Instant::now();
    let completions = tokio::task::spawn_blocking(move || manager.generate(&request)).await??;
    let request_time = started.elapsed().as_secs_f64();

    info!(user = %user, request_time, completions = completions.len(), "generation finished");
    Ok(Json(GenerateResponse {
        success: true,
        request_time,
        completions,
    }))
}
