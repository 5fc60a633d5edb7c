//! TOML-based configuration for the CornerCast server.
//!
//! Every field has a serde default so a partial file (or no file at all)
//! still yields a working configuration; a missing file is not an error.
//!
//! Example:
//!
//! ```toml
//! [server]
//! log_level = "info"
//!
//! [listener]
//! bind_address = "0.0.0.0"
//! port = 6000
//!
//! [pipeline]
//! ingest_queue = 1024
//! dispatch_queue = 256
//! log_capacity = 500
//! warning_threshold = 5
//!
//! [dispatch]
//! program_connection = "program"
//! fail_fast = false
//! overlay_templates = ["point-banner", "warning-card"]
//!
//! [triggers]
//! store_path = "triggers.toml"
//!
//! [[obs.connections]]
//! name = "program"
//! host = "127.0.0.1"
//! version = "v5"
//! password = "secret"
//! ```

use std::path::{Path, PathBuf};

use cast_obs::ObsConnectionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub triggers: TriggerStoreConfig,
    #[serde(default)]
    pub obs: ObsConfig,
}

/// General server behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// UDP listener settings for the scoring-device feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// UDP port the scoring device sends datagrams to.
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

/// Queue depths and aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Raw frames buffered between the listener thread and the decode task.
    #[serde(default = "default_ingest_queue")]
    pub ingest_queue: usize,
    /// Decoded events buffered ahead of the dispatcher (drop-oldest).
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
    /// Bounded event-log capacity.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Warnings before an athlete is flagged disqualification-eligible.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,
    /// Per-code point values; codes absent here score 1.
    #[serde(default)]
    pub point_values: std::collections::HashMap<String, u32>,
}

/// Dispatcher behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Connection that receives scene switches and overlay broadcasts.
    #[serde(default = "default_program_connection")]
    pub program_connection: String,
    /// When set, a failed scene switch skips the paired overlay on `both` rules.
    #[serde(default)]
    pub fail_fast: bool,
    /// Overlay templates offered to the presentation layer.
    #[serde(default)]
    pub overlay_templates: Vec<String>,
}

/// Where the trigger table persists its rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerStoreConfig {
    #[serde(default = "default_trigger_store_path")]
    pub store_path: PathBuf,
}

/// Named production-system connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObsConfig {
    #[serde(default)]
    pub connections: Vec<ObsConnectionConfig>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    6000
}
fn default_ingest_queue() -> usize {
    1024
}
fn default_dispatch_queue() -> usize {
    256
}
fn default_log_capacity() -> usize {
    500
}
fn default_warning_threshold() -> u32 {
    5
}
fn default_program_connection() -> String {
    "program".to_string()
}
fn default_trigger_store_path() -> PathBuf {
    PathBuf::from("triggers.toml")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest_queue: default_ingest_queue(),
            dispatch_queue: default_dispatch_queue(),
            log_capacity: default_log_capacity(),
            warning_threshold: default_warning_threshold(),
            point_values: std::collections::HashMap::new(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            program_connection: default_program_connection(),
            fail_fast: false,
            overlay_templates: Vec::new(),
        }
    }
}

impl Default for TriggerStoreConfig {
    fn default() -> Self {
        Self {
            store_path: default_trigger_store_path(),
        }
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not yet exist.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
