//! Single-model lifecycle manager.
//!
//! [`ModelManager`] is a two-state machine, **Unloaded** and
//! **Loaded(name, model, tokenizer, device map)**, behind one mutex. Every
//! operation that reads or changes the slot holds the lock for its whole
//! duration, including the decode loop of `generate`, so a caller sees either
//! the full effect of a transition or none of it.
//!
//! Loading a different model first releases the current one (handles dropped,
//! device memory returned) so that only one model is ever resident. A failed
//! load leaves the manager unloaded with nothing retained.
//!
//! The API is synchronous. Async callers should run it on a blocking thread.

use crate::decode;
use crate::device::{DeviceMap, DeviceRequest};
use crate::error::{ManagerError, ManagerResult, RuntimeError, RuntimeResult};
use crate::params::{Completion, GenerationRequest};
use crate::placement::classify;
use crate::runtime::{CausalModel, LoadRequest, ModelRepository, TextTokenizer};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Status reported while nothing is loaded
pub const NO_MODEL_LOADED: &str = "No model loaded.";

/// Result of a successful [`ModelManager::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The model was acquired and is now active
    Loaded { name: String, status: String },
    /// The requested model was already active; nothing was fetched
    AlreadyLoaded { name: String },
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded { name, .. } => write!(f, "Model {name} loaded successfully."),
            LoadOutcome::AlreadyLoaded { name } => write!(f, "Model {name} is already loaded."),
        }
    }
}

/// Result of [`ModelManager::unload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnloadOutcome {
    Unloaded { name: String },
    NothingLoaded,
}

impl fmt::Display for UnloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnloadOutcome::Unloaded { name } => write!(f, "Model {name} unloaded successfully."),
            UnloadOutcome::NothingLoaded => write!(f, "No model loaded to unload."),
        }
    }
}

/// The active model. Model and tokenizer are acquired together and dropped
/// together.
struct LoadedModel {
    name: String,
    device_map: DeviceMap,
    model: Box<dyn CausalModel>,
    tokenizer: Box<dyn TextTokenizer>,
}

/// Owns at most one loaded model and serializes every transition on it.
pub struct ModelManager {
    repository: Arc<dyn ModelRepository>,
    default_device: DeviceRequest,
    slot: Mutex<Option<LoadedModel>>,
}

impl ModelManager {
    /// Create an unloaded manager over `repository`.
    pub fn new(repository: Arc<dyn ModelRepository>) -> Self {
        Self {
            repository,
            default_device: DeviceRequest::Auto,
            slot: Mutex::new(None),
        }
    }

    /// Placement used when `generate` has to load a model on its own.
    pub fn with_default_device(mut self, device: DeviceRequest) -> Self {
        self.default_device = device;
        self
    }

    pub fn default_device(&self) -> DeviceRequest {
        self.default_device
    }

    /// Make `name` the active model.
    ///
    /// A no-op when `name` is already active. Otherwise the current model (if
    /// any) is fully unloaded before the new one is fetched.
    pub fn load(
        &self,
        name: &str,
        credential: Option<&str>,
        device: DeviceRequest,
    ) -> ManagerResult<LoadOutcome> {
        let mut slot = self.slot.lock();
        self.load_locked(&mut slot, name, credential, device)
    }

    /// Drop the active model and return its device memory. Never fails.
    pub fn unload(&self) -> UnloadOutcome {
        let mut slot = self.slot.lock();
        release(self.repository.as_ref(), &mut slot)
    }

    /// Complete `request.prompt`, loading `request.model_name` first if it is
    /// not the active model.
    pub fn generate(&self, request: &GenerationRequest) -> ManagerResult<Vec<Completion>> {
        request.parameters.validate()?;

        let mut slot = self.slot.lock();
        self.ensure_loaded(&mut slot, request)?;
        let loaded = slot.as_ref().ok_or(ManagerError::NoModelLoaded)?;

        decode::generate(
            loaded.model.as_ref(),
            loaded.tokenizer.as_ref(),
            &request.prompt,
            &request.parameters,
        )
        .map_err(|e| {
            error!(model = %loaded.name, error = %e, "generation failed");
            ManagerError::Generation(e)
        })
    }

    /// Placement status of the active model, or [`NO_MODEL_LOADED`].
    pub fn status(&self) -> String {
        match self.slot.lock().as_ref() {
            Some(loaded) => classify(&loaded.device_map, &loaded.name),
            None => NO_MODEL_LOADED.to_string(),
        }
    }

    /// Name of the active model, if any.
    pub fn loaded_model(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|l| l.name.clone())
    }

    fn ensure_loaded(
        &self,
        slot: &mut Option<LoadedModel>,
        request: &GenerationRequest,
    ) -> ManagerResult<()> {
        if request.model_name.is_empty() {
            return Ok(());
        }
        if slot.as_ref().is_some_and(|l| l.name == request.model_name) {
            return Ok(());
        }
        self.load_locked(
            slot,
            &request.model_name,
            request.auth_token.as_deref(),
            self.default_device,
        )
        .map(|_| ())
    }

    fn load_locked(
        &self,
        slot: &mut Option<LoadedModel>,
        name: &str,
        credential: Option<&str>,
        device: DeviceRequest,
    ) -> ManagerResult<LoadOutcome> {
        if let Some(current) = slot.as_ref() {
            if current.name == name {
                info!(model = %name, "model already loaded");
                return Ok(LoadOutcome::AlreadyLoaded {
                    name: name.to_string(),
                });
            }
        }

        if name.trim().is_empty() {
            return Err(ManagerError::ModelLoad {
                model: name.to_string(),
                source: RuntimeError::Repository("model name must not be empty".into()),
            });
        }

        if let Some(current) = slot.as_ref() {
            info!(current = %current.name, next = %name, "unloading current model before load");
            release(self.repository.as_ref(), slot);
        }

        info!(model = %name, device = %device, "loading model");
        let request = LoadRequest {
            name,
            credential,
            device,
        };
        let loaded = match self.acquire(&request) {
            Ok(loaded) => loaded,
            Err(source) => {
                // Anything fetched before the failure is already dropped.
                self.repository.release_device_memory();
                error!(model = %name, error = %source, "failed to load model");
                return Err(ManagerError::ModelLoad {
                    model: name.to_string(),
                    source,
                });
            }
        };

        let status = classify(&loaded.device_map, &loaded.name);
        info!(model = %name, status = %status, "model loaded");
        *slot = Some(loaded);

        Ok(LoadOutcome::Loaded {
            name: name.to_string(),
            status,
        })
    }

    fn acquire(&self, request: &LoadRequest<'_>) -> RuntimeResult<LoadedModel> {
        let tokenizer = self.repository.fetch_tokenizer(request)?;
        let mut model = self.repository.fetch_model(request)?;
        model.eval();
        let device_map = model.device_map();
        if device_map.is_empty() {
            warn!(model = %request.name, "runtime reported an empty device map");
        }
        Ok(LoadedModel {
            name: request.name.to_string(),
            device_map,
            model,
            tokenizer,
        })
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if slot.is_some() {
            release(self.repository.as_ref(), slot);
        }
    }
}

/// Drop the handles in `slot`, then return device memory. The drop happens
/// before the release so the runtime can actually reclaim it.
fn release(repository: &dyn ModelRepository, slot: &mut Option<LoadedModel>) -> UnloadOutcome {
    match slot.take() {
        Some(loaded) => {
            let name = loaded.name.clone();
            drop(loaded);
            repository.release_device_memory();
            info!(model = %name, "model unloaded");
            UnloadOutcome::Unloaded { name }
        }
        None => {
            info!("no model loaded to unload");
            UnloadOutcome::NothingLoaded
        }
    }
}
