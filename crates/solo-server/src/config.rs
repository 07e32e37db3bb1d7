//! Server configuration
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. the file named by `SOLO_CONFIG` (format from its extension)
//! 3. `SOLO__*` environment variables, e.g. `SOLO__PORT=9000`

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use solo_engine::DeviceRequest;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "SOLO_CONFIG";
/// Prefix of per-field overrides (`SOLO__KEYSTORE_PATH`, ...)
pub const ENV_PREFIX: &str = "SOLO";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("config parsing error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JSON file holding the user → API key table
    pub keystore_path: PathBuf,
    /// Placement used when `/generate` loads a model on its own
    pub default_device: String,
    /// Directory for the daily rolling log file; unset logs to stdout only
    pub log_dir: Option<PathBuf>,
    /// Write the log file as JSON lines
    pub log_json: bool,
    /// Hugging Face cache used by the Candle backend
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            keystore_path: PathBuf::from("apikey_store.json"),
            default_device: "auto".to_string(),
            log_dir: Some(PathBuf::from("logs")),
            log_json: false,
            model_cache_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load from defaults, `SOLO_CONFIG` and the environment, then validate.
    pub fn load() -> ConfigResult<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Like [`load`](Self::load) with an explicit file instead of `SOLO_CONFIG`.
    pub fn load_from(file: Option<&Path>) -> ConfigResult<Self> {
        let defaults = Config::try_from(&ServerConfig::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = file {
            let format = detect_format(path)?;
            builder = builder.add_source(File::from(path).format(format));
        }
        let config: ServerConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.keystore_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("keystore_path must not be empty".into()));
        }
        self.device()?;
        Ok(())
    }

    /// Parsed [`default_device`](Self::default_device)
    pub fn device(&self) -> ConfigResult<DeviceRequest> {
        self.default_device
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("default_device: {e}")))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat(format!("{} has no extension", path.display())))?;
    match ext.to_lowercase().as_str() {
        "toml" => Ok(FileFormat::Toml),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "json" => Ok(FileFormat::Json),
        "json5" => Ok(FileFormat::Json5),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solo_engine::DeviceClass;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device().unwrap(), DeviceRequest::Auto);
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solo.toml");
        std::fs::write(
            &path,
            "port = 9100\nkeystore_path = \"/var/lib/solo/keys.json\"\ndefault_device = \"cuda:1\"\n",
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.keystore_path, PathBuf::from("/var/lib/solo/keys.json"));
        assert_eq!(config.device().unwrap(), DeviceRequest::Pinned(DeviceClass::Gpu(1)));
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServerConfig::default();
        config.keystore_path = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.default_device = "tpu".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(matches!(
            detect_format(Path::new("solo.txt")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert_eq!(detect_format(Path::new("solo.YML")).unwrap(), FileFormat::Yaml);
    }
}
