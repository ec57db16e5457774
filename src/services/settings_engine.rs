// marksync Settings Engine
// Loads the client configuration from JSON, layers environment overrides on top,
// and checks that the backend connection identifiers are present.

use std::fs;
use std::path::{Path, PathBuf};

use crate::platform;
use crate::types::errors::ConfigError;
use crate::types::settings::AppConfig;

/// Points at an alternative config file.
pub const ENV_CONFIG_PATH: &str = "MARKSYNC_CONFIG";
pub const ENV_API_URL: &str = "MARKSYNC_API_URL";
pub const ENV_ANON_KEY: &str = "MARKSYNC_ANON_KEY";
pub const ENV_DATA_DIR: &str = "MARKSYNC_DATA_DIR";

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<AppConfig, ConfigError>;
    fn save(&self) -> Result<(), ConfigError>;
    fn get_config(&self) -> &AppConfig;
    fn get_config_path(&self) -> &Path;
}

/// Settings engine that reads `config.json` from disk.
pub struct SettingsEngine {
    config_path: PathBuf,
    config: AppConfig,
}

impl SettingsEngine {
    /// Creates a SettingsEngine.
    ///
    /// The path is taken from `path_override`, then `MARKSYNC_CONFIG`, then
    /// `config.json` under the platform config directory.
    pub fn new(path_override: Option<PathBuf>) -> Self {
        let config_path = path_override
            .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
            .unwrap_or_else(|| platform::get_config_dir().join("config.json"));

        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    /// Loads the file, applies process environment overrides and validates.
    pub fn load_from_env(path_override: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
        let mut engine = Self::new(path_override);
        let mut config = engine.load()?;
        apply_overrides(&mut config, |key| std::env::var(key).ok());
        validate(&config)?;
        engine.config = config.clone();
        Ok(config)
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// Reads the config file. A missing file yields defaults; a malformed one is an error.
    fn load(&mut self) -> Result<AppConfig, ConfigError> {
        if !self.config_path.exists() {
            log::debug!(
                "no config file at {}, using defaults",
                self.config_path.display()
            );
            self.config = AppConfig::default();
            return Ok(self.config.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        self.config = serde_json::from_str(&content).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to parse config file: {}", e))
        })?;
        Ok(self.config.clone())
    }

    /// Writes the in-memory config, creating parent directories as needed.
    fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConfigError::IoError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(&self.config).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(&self.config_path, json)
            .map_err(|e| ConfigError::IoError(format!("Failed to write config file: {}", e)))
    }

    fn get_config(&self) -> &AppConfig {
        &self.config
    }

    fn get_config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Overlays non-empty environment values onto `config`.
///
/// `lookup` abstracts the environment so callers can supply a fixed map.
pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_API_URL) {
        config.api_url = url;
    }
    if let Some(key) = get(ENV_ANON_KEY) {
        config.anon_key = key;
    }
    if let Some(dir) = get(ENV_DATA_DIR) {
        config.data_dir = Some(dir);
    }
}

/// Fails with [`ConfigError::Missing`] when a connection identifier is blank.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.api_url.trim().is_empty() {
        return Err(ConfigError::Missing("api_url"));
    }
    if config.anon_key.trim().is_empty() {
        return Err(ConfigError::Missing("anon_key"));
    }
    if config.table.trim().is_empty() {
        return Err(ConfigError::Missing("table"));
    }
    Ok(())
}

/// Resolves the directory for the session cache.
pub fn data_dir(config: &AppConfig) -> PathBuf {
    match &config.data_dir {
        Some(dir) => PathBuf::from(dir),
        None => platform::get_data_dir(),
    }
}
