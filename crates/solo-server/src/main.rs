//! solo server entry point.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SOLO_CONFIG` | *(none)* | Config file (toml, yaml, json, ...) |
//! | `SOLO__PORT` | `8000` | TCP port to listen on |
//! | `SOLO__KEYSTORE_PATH` | `apikey_store.json` | API key table |
//! | `SOLO__DEFAULT_DEVICE` | `auto` | Placement for implicit loads |
//! | `SOLO_LOG` / `RUST_LOG` | `info` | Log filter |

use solo_engine::runtime::ModelRepository;
use solo_engine::{HardwareInfo, ModelManager};
use solo_server::{AppState, KeyStore, ServerConfig, logging, serve};
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(feature = "candle")]
fn repository(config: &ServerConfig) -> Arc<dyn ModelRepository> {
    let mut repo = solo_engine::candle::CandleRepository::new();
    if let Some(dir) = &config.model_cache_dir {
        repo = repo.with_cache_dir(dir.clone());
    }
    Arc::new(repo)
}

#[cfg(not(feature = "candle"))]
fn repository(_config: &ServerConfig) -> Arc<dyn ModelRepository> {
    warn!("built without the `candle` feature: every model load will fail");
    Arc::new(solo_engine::runtime::UnavailableRepository)
}

#[tokio::main]
async fn main() {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("solo-server: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("solo-server: failed to initialise logging: {e}");
            std::process::exit(1);
        }
    };

    let hardware = tokio::task::spawn_blocking(HardwareInfo::detect)
        .await
        .ok();
    if let Some(hw) = &hardware {
        info!(
            cuda = hw.cuda_available,
            vram_mb = hw.vram_bytes / (1024 * 1024),
            ram_mb = hw.total_ram_bytes / (1024 * 1024),
            cpu_cores = hw.cpu_cores,
            "detected hardware"
        );
    }

    // validate() already checked the device
    let default_device = config.device().unwrap_or_default();
    let manager = ModelManager::new(repository(&config)).with_default_device(default_device);
    let keystore = KeyStore::new(config.keystore_path.clone());
    info!(
        keystore = %keystore.path().display(),
        default_device = %default_device,
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(Arc::new(manager), Arc::new(keystore)));
    if let Err(e) = serve(&config, state).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
