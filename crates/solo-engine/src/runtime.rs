//! Trait seams between the model manager and an ML runtime.
//!
//! The manager never touches tensors. A runtime hands out an owned tokenizer
//! and an owned model; the model opens independent [`DecodeSession`]s, each
//! of which turns a token stream into next-token logits. Dropping the boxes
//! releases the runtime resources.

use crate::device::{DeviceMap, DeviceRequest};
use crate::error::{RuntimeError, RuntimeResult};

/// Text ↔ token-id conversion paired with one model.
pub trait TextTokenizer: Send + Sync {
    /// Encode `text`, optionally adding the model's special tokens (BOS etc.).
    fn encode(&self, text: &str, add_special_tokens: bool) -> RuntimeResult<Vec<u32>>;

    /// Decode `ids`, optionally dropping special/control tokens from the text.
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> RuntimeResult<String>;

    /// Token that ends generation, if the tokenizer defines one.
    fn eos_token_id(&self) -> Option<u32>;
}

/// One autoregressive decode stream with its own cache.
pub trait DecodeSession {
    /// Feed the tokens the session has not seen yet and return the logits
    /// for the next position.
    fn forward(&mut self, tokens: &[u32]) -> RuntimeResult<Vec<f32>>;
}

/// A runtime-resident causal language model.
pub trait CausalModel: Send + Sync {
    /// Switch off training-only behaviour (dropout and friends).
    fn eval(&mut self);

    /// Where each submodule was placed.
    fn device_map(&self) -> DeviceMap;

    /// Open a fresh decode stream.
    fn start_session(&self) -> RuntimeResult<Box<dyn DecodeSession + '_>>;
}

/// Arguments for fetching a model and its tokenizer.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    /// Repository identifier, e.g. `TinyLlama/TinyLlama-1.1B-Chat-v1.0`
    pub name: &'a str,
    /// Access token for gated repositories
    pub credential: Option<&'a str>,
    /// Placement strategy
    pub device: DeviceRequest,
}

/// Source of models and tokenizers.
pub trait ModelRepository: Send + Sync {
    fn fetch_tokenizer(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn TextTokenizer>>;

    fn fetch_model(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn CausalModel>>;

    /// Return cached device memory to the driver. Called after the previous
    /// model's handles have been dropped.
    fn release_device_memory(&self);
}

/// Repository for builds without an inference backend: every load fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRepository;

impl UnavailableRepository {
    fn unavailable(name: &str) -> RuntimeError {
        RuntimeError::Repository(format!(
            "cannot fetch '{name}': this build has no inference backend (enable the `candle` feature)"
        ))
    }
}

impl ModelRepository for UnavailableRepository {
    fn fetch_tokenizer(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn TextTokenizer>> {
        Err(Self::unavailable(request.name))
    }

    fn fetch_model(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn CausalModel>> {
        Err(Self::unavailable(request.name))
    }

    fn release_device_memory(&self) {}
}
