//! Candle backend: Llama-family causal LMs pulled from the Hugging Face Hub.
//!
//! Weights are memory-mapped from the local Hub cache, in F16 on CUDA and
//! F32 on CPU. Candle places the whole model on one device, so the device map
//! this backend reports always has a single whole-model entry.

use crate::device::{DeviceClass, DeviceMap, DeviceRequest, whole_model};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hardware;
use crate::runtime::{CausalModel, DecodeSession, LoadRequest, ModelRepository, TextTokenizer};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const WEIGHTS_INDEX: &str = "model.safetensors.index.json";
const SINGLE_WEIGHTS: &str = "model.safetensors";

/// Token strings different model families use to end a turn
const EOS_CANDIDATES: [&str; 5] = [
    "</s>",
    "<|endoftext|>",
    "<|end_of_text|>",
    "<|eot_id|>",
    "<|im_end|>",
];

fn inference(err: candle_core::Error) -> RuntimeError {
    RuntimeError::Inference(err.to_string())
}

fn hub(err: hf_hub::api::sync::ApiError) -> RuntimeError {
    RuntimeError::Repository(err.to_string())
}

/// [`ModelRepository`] backed by the Hugging Face Hub and Candle.
#[derive(Debug, Clone, Default)]
pub struct CandleRepository {
    cache_dir: Option<PathBuf>,
    use_flash_attn: bool,
}

impl CandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store downloads under `dir` instead of the default Hub cache.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_flash_attn(mut self, enabled: bool) -> Self {
        self.use_flash_attn = enabled;
        self
    }

    fn repo(&self, request: &LoadRequest<'_>) -> RuntimeResult<ApiRepo> {
        let mut builder = ApiBuilder::new()
            .with_progress(false)
            .with_token(request.credential.map(str::to_string));
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        Ok(builder.build().map_err(hub)?.model(request.name.to_string()))
    }

    fn select_device(&self, request: DeviceRequest) -> RuntimeResult<(Device, DeviceClass)> {
        match request {
            DeviceRequest::Auto => {
                let device = Device::cuda_if_available(0).map_err(|e| RuntimeError::Device(e.to_string()))?;
                let class = if device.is_cuda() {
                    DeviceClass::Gpu(0)
                } else {
                    DeviceClass::Cpu
                };
                Ok((device, class))
            }
            DeviceRequest::Pinned(DeviceClass::Cpu) => Ok((Device::Cpu, DeviceClass::Cpu)),
            DeviceRequest::Pinned(DeviceClass::Gpu(ordinal)) => {
                let device = Device::new_cuda(ordinal).map_err(|e| {
                    RuntimeError::Device(format!("cuda:{ordinal} unavailable: {e}"))
                })?;
                Ok((device, DeviceClass::Gpu(ordinal)))
            }
            DeviceRequest::Pinned(DeviceClass::Disk) => Err(RuntimeError::Device(
                "disk offload is not supported by the candle backend".into(),
            )),
        }
    }

    fn weight_files(&self, repo: &ApiRepo) -> RuntimeResult<Vec<PathBuf>> {
        match repo.get(WEIGHTS_INDEX) {
            Ok(index) => {
                let shards = read_shard_names(&index)?;
                shards.iter().map(|s| repo.get(s).map_err(hub)).collect()
            }
            Err(err) => {
                debug!(error = %err, "no sharded index, fetching single weights file");
                Ok(vec![repo.get(SINGLE_WEIGHTS).map_err(hub)?])
            }
        }
    }
}

/// Unique shard file names listed in a safetensors index.
fn read_shard_names(index: &Path) -> RuntimeResult<BTreeSet<String>> {
    let raw = std::fs::read_to_string(index)
        .map_err(|e| RuntimeError::Repository(format!("read {}: {e}", index.display())))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| RuntimeError::Repository(format!("parse {}: {e}", index.display())))?;
    let map = json
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| RuntimeError::Repository(format!("{} has no weight_map", index.display())))?;
    Ok(map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

/// Refuse to map weights that cannot fit in RAM. Only CPU placements are
/// checked; an unknown amount of available memory is not treated as a failure.
fn check_host_memory(files: &[PathBuf], dtype: DType) -> RuntimeResult<()> {
    let on_disk: u64 = files
        .iter()
        .filter_map(|f| std::fs::metadata(f).ok())
        .map(|m| m.len())
        .sum();
    // Checkpoints are usually stored in 16-bit; F32 doubles them.
    let needed = if dtype == DType::F32 { on_disk * 2 } else { on_disk };
    let (_, available) = hardware::memory_snapshot();
    if available > 0 && needed > available {
        return Err(RuntimeError::MemoryConstrained(format!(
            "weights need ~{} MiB but only {} MiB RAM is available",
            needed / (1024 * 1024),
            available / (1024 * 1024)
        )));
    }
    Ok(())
}

impl ModelRepository for CandleRepository {
    fn fetch_tokenizer(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn TextTokenizer>> {
        let path = self.repo(request)?.get("tokenizer.json").map_err(hub)?;
        let inner = tokenizers::Tokenizer::from_file(&path)
            .map_err(|e| RuntimeError::Tokenizer(format!("load {}: {e}", path.display())))?;
        let eos = EOS_CANDIDATES.iter().find_map(|t| inner.token_to_id(t));
        if eos.is_none() {
            warn!(model = %request.name, "tokenizer has no recognised end-of-sequence token");
        }
        Ok(Box::new(CandleTokenizer { inner, eos }))
    }

    fn fetch_model(&self, request: &LoadRequest<'_>) -> RuntimeResult<Box<dyn CausalModel>> {
        let repo = self.repo(request)?;
        let (device, class) = self.select_device(request.device)?;
        let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };

        let config_path = repo.get("config.json").map_err(hub)?;
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| RuntimeError::Repository(format!("read config.json: {e}")))?;
        let llama_config: LlamaConfig = serde_json::from_str(&raw)
            .map_err(|e| RuntimeError::Repository(format!("unsupported config.json: {e}")))?;
        let config = llama_config.into_config(self.use_flash_attn);

        let files = self.weight_files(&repo)?;
        if class.is_cpu() {
            check_host_memory(&files, dtype)?;
        }

        info!(
            model = %request.name,
            device = %class,
            dtype = ?dtype,
            shards = files.len(),
            "mapping weights"
        );
        // SAFETY: the Hub cache files are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, &device) }
            .map_err(|e| RuntimeError::Repository(format!("map weights: {e}")))?;
        let llama = Llama::load(vb, &config).map_err(|e| {
            if e.to_string().contains("out of memory") {
                RuntimeError::MemoryConstrained(e.to_string())
            } else {
                RuntimeError::Repository(format!("build model: {e}"))
            }
        })?;

        Ok(Box::new(CandleModel {
            llama,
            config,
            device,
            dtype,
            class,
        }))
    }

    fn release_device_memory(&self) {
        // Candle frees buffers when the tensors drop; there is no pool to flush.
        let (_, available) = hardware::memory_snapshot();
        debug!(
            available_ram_mb = available / (1024 * 1024),
            "device memory released"
        );
    }
}

struct CandleTokenizer {
    inner: tokenizers::Tokenizer,
    eos: Option<u32>,
}

impl TextTokenizer for CandleTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> RuntimeResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| RuntimeError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> RuntimeResult<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| RuntimeError::Tokenizer(e.to_string()))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos
    }
}

struct CandleModel {
    llama: Llama,
    config: Config,
    device: Device,
    dtype: DType,
    class: DeviceClass,
}

impl CandleModel {
    /// EOS ids declared by the model config, used to cross-check the tokenizer
    fn config_eos(&self) -> Vec<u32> {
        match &self.config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => vec![*id],
            Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
            None => Vec::new(),
        }
    }
}

impl CausalModel for CandleModel {
    fn eval(&mut self) {
        // Candle modules have no train/eval switch.
        debug!(eos = ?self.config_eos(), "model ready for inference");
    }

    fn device_map(&self) -> DeviceMap {
        whole_model(self.class)
    }

    fn start_session(&self) -> RuntimeResult<Box<dyn DecodeSession + '_>> {
        let cache = Cache::new(true, self.dtype, &self.config, &self.device).map_err(inference)?;
        Ok(Box::new(CandleSession {
            model: self,
            cache,
            position: 0,
        }))
    }
}

/// One sequence's KV cache and position
struct CandleSession<'a> {
    model: &'a CandleModel,
    cache: Cache,
    position: usize,
}

impl DecodeSession for CandleSession<'_> {
    fn forward(&mut self, tokens: &[u32]) -> RuntimeResult<Vec<f32>> {
        let limit = self.model.config.max_position_embeddings;
        if self.position + tokens.len() > limit {
            return Err(RuntimeError::Inference(format!(
                "sequence exceeds the model context of {limit} tokens"
            )));
        }

        let input = Tensor::new(tokens, &self.model.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(inference)?;
        let logits = self
            .model
            .llama
            .forward(&input, self.position, &mut self.cache)
            .map_err(inference)?;
        self.position += tokens.len();

        logits
            .squeeze(0)
            .and_then(|l| l.to_dtype(DType::F32))
            .and_then(|l| l.to_vec1::<f32>())
            .map_err(inference)
    }
}
