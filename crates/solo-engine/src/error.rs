//! Error types for the runtime seam and the model manager

use thiserror::Error;

/// Failures reported by a model runtime (repository, tokenizer, forward pass).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Fetching weights, configs or tokenizer files failed
    #[error("model repository error: {0}")]
    Repository(String),

    /// Tokenizer could not encode or decode
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Forward pass or sampling failed
    #[error("inference error: {0}")]
    Inference(String),

    /// Requested device is unavailable or unsupported
    #[error("device error: {0}")]
    Device(String),

    /// Not enough memory to hold the weights
    #[error("memory constrained: {0}")]
    MemoryConstrained(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures surfaced by [`ModelManager`](crate::ModelManager) operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// Acquiring the tokenizer or model failed; the manager is left unloaded.
    #[error("failed to load model '{model}': {source}")]
    ModelLoad {
        model: String,
        #[source]
        source: RuntimeError,
    },

    /// `generate` was called with nothing loaded and nothing to load.
    #[error("no model loaded")]
    NoModelLoaded,

    /// A generation parameter is out of bounds.
    #[error("invalid generation parameters: {0}")]
    InvalidParameters(String),

    /// Tokenization or decoding failed mid-request; no completions are returned.
    #[error("generation failed: {0}")]
    Generation(#[source] RuntimeError),
}

/// Result type for manager operations
pub type ManagerResult<T> = Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_load_error_keeps_cause() {
        let err = ManagerError::ModelLoad {
            model: "gpt2".to_string(),
            source: RuntimeError::Repository("404 Not Found".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("gpt2"));
        assert!(text.contains("404 Not Found"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ManagerError::NoModelLoaded.to_string(), "no model loaded");
        let err = ManagerError::Generation(RuntimeError::Inference("nan logits".into()));
        assert_eq!(err.to_string(), "generation failed: inference error: nan logits");
    }
}
