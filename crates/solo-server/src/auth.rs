//! API-key authentication extractor.
//!
//! Handlers that take an [`ApiUser`] only run when the request carries an
//! `x-API-Key` header that resolves to a user in the key store. Header names
//! are case-insensitive, so `X-Api-Key` works as well.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::warn;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// The user an authenticated request was issued to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiUser(pub String);

impl FromRequestParts<Arc<AppState>> for ApiUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(API_KEY_HEADER) else {
            warn!(path = %parts.uri.path(), "rejected request: missing API key");
            return Err(ApiError::AuthMissing);
        };
        let key = value
            .to_str()
            .map_err(|_| ApiError::AuthInvalid)?
            .trim()
            .to_string();
        if key.is_empty() {
            return Err(ApiError::AuthMissing);
        }

        let keystore = Arc::clone(&state.keystore);
        let owner = tokio::task::spawn_blocking(move || keystore.verify(&key)).await??;
        match owner {
            Some(user) => Ok(ApiUser(user)),
            None => {
                warn!(path = %parts.uri.path(), "rejected request: invalid API key");
                Err(ApiError::AuthInvalid)
            }
        }
    }
}
