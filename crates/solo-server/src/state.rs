//! Shared application state

use crate::keystore::KeyStore;
use solo_engine::ModelManager;
use std::sync::Arc;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    /// The single model slot; every call blocks, run it off the async runtime
    pub manager: Arc<ModelManager>,
    pub keystore: Arc<KeyStore>,
}

impl AppState {
    pub fn new(manager: Arc<ModelManager>, keystore: Arc<KeyStore>) -> Self {
        Self { manager, keystore }
    }
}
