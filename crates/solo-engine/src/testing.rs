//! Deterministic in-memory runtime for tests.
//!
//! [`ScriptedRepository`] serves models that emit a fixed, word-level
//! continuation. Logits are sharply peaked on the scripted word, so with the
//! default nucleus threshold sampling is as deterministic as greedy decoding.
//! The repository counts every acquisition and memory release, and tracks how
//! many models and tokenizers are alive, so lifecycle tests can assert on
//! exactly what the manager did.

use crate::device::{DeviceClass, DeviceMap, DeviceRequest, whole_model};
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{CausalModel, DecodeSession, LoadRequest, ModelRepository, TextTokenizer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const BOS: &str = "<s>";
pub const EOS: &str = "</s>";
pub const UNK: &str = "<unk>";

const SPECIAL_TOKENS: [&str; 3] = [BOS, EOS, UNK];

/// Whitespace tokenizer over a fixed vocabulary. Ids 0..3 are `<s>`, `</s>`
/// and `<unk>`.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab: Vec<String>,
    index: HashMap<String, u32>,
}

impl WordTokenizer {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab: Vec<String> = SPECIAL_TOKENS.iter().map(|s| s.to_string()).collect();
        let mut index: HashMap<String, u32> = vocab
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        for word in words {
            let word = word.into();
            if !index.contains_key(&word) {
                index.insert(word.clone(), vocab.len() as u32);
                vocab.push(word);
            }
        }
        Self { vocab, index }
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn is_special(id: u32) -> bool {
        (id as usize) < SPECIAL_TOKENS.len()
    }
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> RuntimeResult<Vec<u32>> {
        let unk = self.index[UNK];
        let mut ids: Vec<u32> = Vec::new();
        if add_special_tokens {
            ids.push(self.index[BOS]);
        }
        ids.extend(
            text.split_whitespace()
                .map(|w| self.id(w).unwrap_or(unk)),
        );
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> RuntimeResult<String> {
        let mut words = Vec::with_capacity(ids.len());
        for &id in ids {
            if skip_special_tokens && Self::is_special(id) {
                continue;
            }
            let word = self
                .vocab
                .get(id as usize)
                .ok_or_else(|| RuntimeError::Tokenizer(format!("token id {id} not in vocabulary")))?;
            words.push(word.as_str());
        }
        Ok(words.join(" "))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.id(EOS)
    }
}

/// What a scripted model does once loaded
#[derive(Debug, Clone)]
pub struct ScriptedModelSpec {
    continuation: Vec<String>,
    device_map: DeviceMap,
    peak: f32,
    end_with_eos: bool,
    load_failure: Option<RuntimeError>,
    inference_failure: Option<String>,
}

impl ScriptedModelSpec {
    /// A model that answers every prompt with `continuation`, then EOS.
    pub fn new(continuation: &str) -> Self {
        Self {
            continuation: continuation.split_whitespace().map(str::to_string).collect(),
            device_map: whole_model(DeviceClass::Gpu(0)),
            peak: 30.0,
            end_with_eos: true,
            load_failure: None,
            inference_failure: None,
        }
    }

    /// Device map reported under `auto` placement
    pub fn on(mut self, device_map: DeviceMap) -> Self {
        self.device_map = device_map;
        self
    }

    /// Logit given to the scripted token (all others get 0.0)
    pub fn with_peak(mut self, peak: f32) -> Self {
        self.peak = peak;
        self
    }

    /// Keep repeating the last word instead of emitting EOS
    pub fn without_eos(mut self) -> Self {
        self.end_with_eos = false;
        self
    }

    /// Fail the model fetch (after the tokenizer was fetched)
    pub fn failing_load(mut self, error: RuntimeError) -> Self {
        self.load_failure = Some(error);
        self
    }

    /// Fail every forward pass
    pub fn failing_inference(mut self, message: &str) -> Self {
        self.inference_failure = Some(message.to_string());
        self
    }

    fn tokenizer(&self) -> WordTokenizer {
        WordTokenizer::new(self.continuation.iter().cloned())
    }
}

/// Decrements a shared counter when dropped
#[derive(Debug)]
struct Resident(Arc<AtomicUsize>);

impl Resident {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Resident {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedTokenizer {
    inner: WordTokenizer,
    _resident: Resident,
}

impl TextTokenizer for ScriptedTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> RuntimeResult<Vec<u32>> {
        self.inner.encode(text, add_special_tokens)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> RuntimeResult<String> {
        self.inner.decode(ids, skip_special_tokens)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.inner.eos_token_id()
    }
}

struct ScriptedModel {
    script: Vec<u32>,
    vocab_size: usize,
    eos: Option<u32>,
    peak: f32,
    device_map: DeviceMap,
    inference_failure: Option<String>,
    evaluating: bool,
    _resident: Resident,
}

impl CausalModel for ScriptedModel {
    fn eval(&mut self) {
        self.evaluating = true;
    }

    fn device_map(&self) -> DeviceMap {
        self.device_map.clone()
    }

    fn start_session(&self) -> RuntimeResult<Box<dyn DecodeSession + '_>> {
        if !self.evaluating {
            return Err(RuntimeError::Inference(
                "model is not in evaluation mode".into(),
            ));
        }
        Ok(Box::new(ScriptedSession {
            model: self,
            step: 0,
        }))
    }
}

struct ScriptedSession<'a> {
    model: &'a ScriptedModel,
    step: usize,
}

impl DecodeSession for ScriptedSession<'_> {
    fn forward(&mut self, tokens: &[u32]) -> RuntimeResult<Vec<f32>> {
        if let Some(message) = &self.model.inference_failure {
            return Err(RuntimeError::Inference(message.clone()));
        }
        if tokens.is_empty() {
            return Err(RuntimeError::Inference("forward called with no tokens".into()));
        }

        let script = &self.model.script;
        let target = match (script.get(self.step), self.model.eos) {
            (Some(&id), _) => id,
            (None, Some(eos)) => eos,
            (None, None) => script.last().copied().unwrap_or(0),
        };
        self.step += 1;

        let mut logits = vec![0.0f32; self.model.vocab_size];
        logits[target as usize] = self.model.peak;
        Ok(logits)
    }
}

/// In-memory [`ModelRepository`] serving [`ScriptedModelSpec`]s by name.
#[derive(Default)]
pub struct ScriptedRepository {
    specs: Mutex<HashMap<String, ScriptedModelSpec>>,
    tokenizer_fetches: AtomicUsize,
    model_fetches: AtomicUsize,
    releases: AtomicUsize,
    resident_models: Arc<AtomicUsize>,
    resident_tokenizers: Arc<AtomicUsize>,
    last_credential: Mutex<Option<String>>,
    last_device: Mutex<Option<DeviceRequest>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(self, name: &str, spec: ScriptedModelSpec) -> Self {
        self.specs.lock().insert(name.to_string(), spec);
        self
    }

    pub fn tokenizer_fetches(&self) -> usize {
        self.tokenizer_fetches.load(Ordering::SeqCst)
    }

    pub fn model_fetches(&self) -> usize {
        self.model_fetches.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Models currently alive (fetched and not yet dropped)
    pub fn resident_models(&self) -> usize {
        self.resident_models.load(Ordering::SeqCst)
    }

    /// Tokenizers currently alive
    pub fn resident_tokenizers(&self) -> usize {
        self.resident_tokenizers.load(Ordering::SeqCst)
    }

    pub fn last_credential(&self) -> Option<String> {
        self.last_credential.lock().clone()
    }

    pub fn last_device(&self) -> Option<DeviceRequest> {
        *self.last_device.lock()
    }

    /// Vocabulary the named model's tokenizer uses
    pub fn tokenizer_for(&self, name: &str) -> Option<WordTokenizer> {
        self.specs.lock().get(name).map(ScriptedModelSpec::tokenizer)
    }

    fn spec(&self, name: &str) -> RuntimeResult<ScriptedModelSpec> {
        self.specs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::Repository(format!("model '{name}' not found")))
    }
}

impl ModelRepository for ScriptedRepository {
    fn fetch_tokenizer(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn TextTokenizer>> {
        self.tokenizer_fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_credential.lock() = request.credential.map(str::to_string);
        let spec = self.spec(request.name)?;
        Ok(Box::new(ScriptedTokenizer {
            inner: spec.tokenizer(),
            _resident: Resident::new(&self.resident_tokenizers),
        }))
    }

    fn fetch_model(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn CausalModel>> {
        self.model_fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_device.lock() = Some(request.device);
        let spec = self.spec(request.name)?;
        if let Some(err) = spec.load_failure.clone() {
            return Err(err);
        }

        let tokenizer = spec.tokenizer();
        let script = spec
            .continuation
            .iter()
            .filter_map(|w| tokenizer.id(w))
            .collect();
        let device_map = match request.device {
            DeviceRequest::Auto => spec.device_map.clone(),
            DeviceRequest::Pinned(device) => whole_model(device),
        };

        Ok(Box::new(ScriptedModel {
            script,
            vocab_size: tokenizer.vocab_size(),
            eos: if spec.end_with_eos {
                tokenizer.eos_token_id()
            } else {
                None
            },
            peak: spec.peak,
            device_map,
            inference_failure: spec.inference_failure.clone(),
            evaluating: false,
            _resident: Resident::new(&self.resident_models),
        }))
    }

    fn release_device_memory(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
