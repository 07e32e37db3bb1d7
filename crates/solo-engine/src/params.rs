//! Generation requests, parameters and completions

use crate::error::{ManagerError, ManagerResult};
use serde::{Deserialize, Serialize};

/// Sampling and stopping controls for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    /// Sampling temperature. `0.0` selects greedy decoding.
    pub temperature: f64,

    /// Hard cap on newly generated tokens per sequence
    pub max_new_tokens: usize,

    /// Nucleus sampling threshold
    pub top_p: f64,

    /// Number of independent completions to produce
    pub num_return_sequences: usize,

    /// A sequence stops as soon as its tokens end with any of these
    pub stop_sequences: Vec<String>,

    /// Seed for the sampler. Sequence `i` uses `seed + i`.
    pub seed: Option<u64>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_new_tokens: 128,
            top_p: 0.9,
            num_return_sequences: 1,
            stop_sequences: Vec::new(),
            seed: None,
        }
    }
}

impl GenerationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_num_return_sequences(mut self, n: usize) -> Self {
        self.num_return_sequences = n;
        self
    }

    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences = stops.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> ManagerResult<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ManagerError::InvalidParameters(format!(
                "temperature must be a finite value >= 0, got {}",
                self.temperature
            )));
        }
        if self.max_new_tokens == 0 {
            return Err(ManagerError::InvalidParameters(
                "max_new_tokens must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ManagerError::InvalidParameters(format!(
                "top_p must be between 0.0 and 1.0, got {}",
                self.top_p
            )));
        }
        if self.num_return_sequences == 0 {
            return Err(ManagerError::InvalidParameters(
                "num_return_sequences must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// A prompt to complete with a named model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model to use. Empty means "whatever is loaded".
    #[serde(default)]
    pub model_name: String,
    pub prompt: String,
    /// Credential forwarded to the repository if the model must be loaded
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub parameters: GenerationParameters,
}

impl GenerationRequest {
    pub fn new(model_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            prompt: prompt.into(),
            auth_token: None,
            parameters: GenerationParameters::default(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// One generated token and the log-probability it was chosen with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenScore {
    pub text: String,
    #[serde(rename = "logprob")]
    pub log_probability: f64,
}

/// One generated continuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Continuation text with special tokens stripped
    pub text: String,
    /// Per-token breakdown in generation order
    pub tokens: Vec<TokenScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters_are_valid() {
        let params = GenerationParameters::default();
        assert_eq!(params.max_new_tokens, 128);
        assert_eq!(params.num_return_sequences, 1);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_negative_temperature_rejected() {
        let err = GenerationParameters::new().with_temperature(-0.1).validate();
        assert!(matches!(err, Err(ManagerError::InvalidParameters(_))));
    }

    #[test]
    fn test_nan_temperature_rejected() {
        let err = GenerationParameters::new().with_temperature(f64::NAN).validate();
        assert!(err.is_err());
    }

    #[test]
    fn test_zero_temperature_allowed() {
        assert!(GenerationParameters::new().with_temperature(0.0).validate().is_ok());
    }

    #[test]
    fn test_top_p_bounds() {
        assert!(GenerationParameters::new().with_top_p(0.0).validate().is_ok());
        assert!(GenerationParameters::new().with_top_p(1.0).validate().is_ok());
        assert!(GenerationParameters::new().with_top_p(1.01).validate().is_err());
        assert!(GenerationParameters::new().with_top_p(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_zero_counts_rejected() {
        assert!(GenerationParameters::new().with_max_new_tokens(0).validate().is_err());
        assert!(
            GenerationParameters::new()
                .with_num_return_sequences(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_parameters_deserialize_with_defaults() {
        let params: GenerationParameters =
            serde_json::from_str(r#"{"max_new_tokens": 16, "stop_sequences": ["\n"]}"#).unwrap();
        assert_eq!(params.max_new_tokens, 16);
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.stop_sequences, vec!["\n".to_string()]);
    }

    #[test]
    fn test_token_score_wire_name() {
        let token = TokenScore {
            text: "hi".into(),
            log_probability: -0.5,
        };
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["logprob"], -0.5);
    }
}
