//! # solo-engine
//!
//! Owns the single text-generation model that a `solo` server exposes.
//!
//! The crate is split along the line between *what* the service guarantees and
//! *how* the numbers are computed:
//!
//! | Module | Role |
//! |--------|------|
//! | [`manager`] | [`ModelManager`]: the Unloaded/Loaded state machine behind one mutex |
//! | [`placement`] | Pure device-map → status string classification |
//! | [`decode`] | Sampling, stop criteria and per-token log-probabilities |
//! | [`runtime`] | Trait seams to the ML runtime (repository, model, tokenizer) |
//! | [`hardware`] | CUDA / RAM probing used for `auto` placement |
//!
//! ## Features
//!
//! | Feature   | Description                                            |
//! |-----------|--------------------------------------------------------|
//! | `candle`  | Candle backend loading Llama-family models from the Hub |
//! | `cuda`    | CUDA kernels for the Candle backend                    |
//! | `testing` | Deterministic [`testing::ScriptedRepository`]          |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solo_engine::{DeviceRequest, ModelManager};
//! use solo_engine::runtime::UnavailableRepository;
//!
//! let manager = ModelManager::new(Arc::new(UnavailableRepository));
//! assert_eq!(manager.status(), solo_engine::NO_MODEL_LOADED);
//! let _ = manager.load("TinyLlama/TinyLlama-1.1B-Chat-v1.0", None, DeviceRequest::Auto);
//! ```

pub mod decode;
pub mod device;
pub mod error;
pub mod hardware;
pub mod manager;
pub mod params;
pub mod placement;
pub mod runtime;

#[cfg(feature = "candle")]
pub mod candle;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use device::{DeviceClass, DeviceMap, DeviceRequest};
pub use error::{ManagerError, ManagerResult, RuntimeError, RuntimeResult};
pub use hardware::HardwareInfo;
pub use manager::{LoadOutcome, ModelManager, NO_MODEL_LOADED, UnloadOutcome};
pub use params::{Completion, GenerationParameters, GenerationRequest, TokenScore};
pub use placement::classify;
