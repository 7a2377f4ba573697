/// Bridge configuration
///
/// TOML/JSON configuration files, environment variable overrides and validation.
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::impl_default;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File read error
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// Parse error
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// Validation error
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How `require()` picks module loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderSelection {
    /// Every loader is tried in registration order; selectors are informational.
    Advisory,
    /// Only loaders whose selector is empty, `*`, or a suffix of the module id are tried.
    Filter,
}

impl LoaderSelection {
    /// Whether a loader registered under `selector` may serve module `id`.
    pub fn admits(self, selector: &str, id: &str) -> bool {
        match self {
            LoaderSelection::Advisory => true,
            LoaderSelection::Filter => selector.is_empty() || selector == "*" || id.ends_with(selector),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "advisory" => Some(LoaderSelection::Advisory),
            "filter" => Some(LoaderSelection::Filter),
            _ => None,
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Root holding the modules directory. `None` means the executable's directory.
    pub module_root: Option<PathBuf>,

    /// Name of the directory under `module_root` searched by `require()`.
    pub modules_dir: String,

    /// Loader selection policy
    pub loader_selection: LoaderSelection,

    /// Engine heap limit in bytes
    pub memory_limit: Option<usize>,

    /// Engine stack limit in bytes
    pub max_stack_size: Option<usize>,

    /// Allocation threshold that triggers a collection
    pub gc_threshold: Option<usize>,

    /// Install `print` and `console` into the global namespace
    pub console: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl_default!(BridgeConfig {
    module_root: None,
    modules_dir: "modules".to_string(),
    loader_selection: LoaderSelection::Advisory,
    memory_limit: None,
    max_stack_size: None,
    gc_threshold: None,
    console: true,
    logging: LoggingConfig::default(),
});

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration rooted at `root`.
    pub fn with_module_root(root: impl Into<PathBuf>) -> Self {
        Self {
            module_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Load from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// Parse JSON text
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save as TOML
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// Override fields from `SCRIPT_BRIDGE_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = env::var_os("SCRIPT_BRIDGE_MODULE_ROOT") {
            self.module_root = Some(PathBuf::from(root));
        }
        if let Ok(val) = env::var("SCRIPT_BRIDGE_MEMORY_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.memory_limit = Some(limit);
            }
        }
        if let Ok(val) = env::var("SCRIPT_BRIDGE_MAX_STACK_SIZE") {
            if let Ok(size) = val.parse() {
                self.max_stack_size = Some(size);
            }
        }
        if let Ok(val) = env::var("SCRIPT_BRIDGE_LOADER_SELECTION") {
            if let Some(selection) = LoaderSelection::parse(&val) {
                self.loader_selection = selection;
            }
        }
        if let Ok(val) = env::var("SCRIPT_BRIDGE_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.modules_dir.is_empty() {
            return Err(ConfigError::ValidationError(
                "modules_dir must not be empty".to_string(),
            ));
        }
        if Path::new(&self.modules_dir).is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "modules_dir must be relative to module_root, got {}",
                self.modules_dir
            )));
        }
        if self.memory_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "memory_limit must be greater than zero".to_string(),
            ));
        }
        if self.max_stack_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_stack_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory that `require()` searches.
    ///
    /// Falls back to the directory of the running executable when no root is configured.
    pub fn module_home(&self) -> PathBuf {
        let root = self.module_root.clone().unwrap_or_else(|| {
            env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        root.join(&self.modules_dir)
    }

    /// Find and load a configuration file
    ///
    /// Search order:
    /// 1. ./script_bridge.toml
    /// 2. ./script_bridge.json
    /// 3. ~/.config/script_bridge/config.toml
    /// 4. defaults
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("script_bridge.toml") {
            tracing::info!(target: "bridge", "Loaded config from script_bridge.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("script_bridge.json") {
            tracing::info!(target: "bridge", "Loaded config from script_bridge.json");
            return config;
        }

        if let Some(home) = env::var_os("HOME") {
            let config_path = PathBuf::from(home)
                .join(".config")
                .join("script_bridge")
                .join("config.toml");

            if let Ok(config) = Self::from_toml_file(&config_path) {
                tracing::info!(target: "bridge", "Loaded config from {:?}", config_path);
                return config;
            }
        }

        tracing::debug!(target: "bridge", "Using default configuration");
        Self::default()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,

    /// Colored output
    pub ansi: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    ansi: true,
});

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}
