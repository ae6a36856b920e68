//! Configuration management.
//!
//! A pipeline is a JSON object with `inputs`, `processors`, and `flushers`
//! arrays, each entry naming a plugin `Type` plus a `detail` object. Agent
//! level settings live in `agent.json` beside the pipeline files.
//!
//! Parsing follows one rule throughout: a value that makes the pipeline
//! meaningless (unknown encoding, malformed pattern, missing input) rejects
//! the pipeline at init, while a recoverable mismatch falls back to its
//! default with a warning.

pub mod flush_strategy;
pub mod reader_options;

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::tail::framer::{FrameMode, MultilinePatterns};

/// Environment variable locating the configuration directory on platforms
/// where the executable directory is unwritable.
pub const SYS_CONF_DIR_ENV: &str = "logflow_sys_conf_dir";

/// Configuration errors. A pipeline that fails init does not start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("plugin {plugin}: invalid param {param}: {reason}")]
    InvalidParam {
        plugin: String,
        param: &'static str,
        reason: String,
    },
    #[error("pipeline {pipeline}: missing required {section} plugin")]
    MissingPlugin {
        pipeline: String,
        section: &'static str,
    },
    #[error("pipeline {pipeline}: unknown plugin type {kind:?}")]
    UnknownPlugin { pipeline: String, kind: String },
    #[error("invalid {param} pattern: {source}")]
    InvalidPattern {
        param: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("invalid container info: {0}")]
    InvalidContainerInfo(String),
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One plugin reference inside a pipeline section.
#[derive(Clone, Debug, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub detail: Value,
}

/// A pipeline: inputs feed processors feed flushers.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<PluginConfig>,
    #[serde(default)]
    pub processors: Vec<PluginConfig>,
    #[serde(default)]
    pub flushers: Vec<PluginConfig>,
}

impl PipelineConfig {
    /// Loads one pipeline file; the file stem names the pipeline unless the
    /// config carries an explicit name.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PipelineConfig =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.name.is_empty() {
            config.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inputs.is_empty() {
            return Err(ConfigError::MissingPlugin {
                pipeline: self.name.clone(),
                section: "input",
            });
        }
        if self.flushers.is_empty() {
            return Err(ConfigError::MissingPlugin {
                pipeline: self.name.clone(),
                section: "flusher",
            });
        }
        Ok(())
    }
}

/// Multiline framing section of a file input's `detail`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MultilineOptions {
    #[serde(rename = "Mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "StartPattern", default)]
    pub start_pattern: Option<String>,
    #[serde(rename = "ContinuePattern", default)]
    pub continue_pattern: Option<String>,
    #[serde(rename = "EndPattern", default)]
    pub end_pattern: Option<String>,
}

impl MultilineOptions {
    /// Resolves the frame mode, compiling patterns. JSON mode ignores the
    /// patterns; custom mode requires at least a start pattern.
    pub fn to_frame_mode(&self) -> Result<FrameMode, ConfigError> {
        match self.mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Ok(FrameMode::Json),
            None | Some("custom") => {
                let Some(start) = &self.start_pattern else {
                    if self.continue_pattern.is_some() || self.end_pattern.is_some() {
                        return Err(ConfigError::InvalidParam {
                            plugin: "input_file".to_string(),
                            param: "Multiline.StartPattern",
                            reason: "required when ContinuePattern or EndPattern is set"
                                .to_string(),
                        });
                    }
                    return Ok(FrameMode::SingleLine);
                };
                let start = compile(start, "Multiline.StartPattern")?;
                let continuation = self
                    .continue_pattern
                    .as_deref()
                    .map(|p| compile(p, "Multiline.ContinuePattern"))
                    .transpose()?;
                let end = self
                    .end_pattern
                    .as_deref()
                    .map(|p| compile(p, "Multiline.EndPattern"))
                    .transpose()?;
                Ok(FrameMode::Multiline(MultilinePatterns {
                    start,
                    continuation,
                    end,
                }))
            }
            Some(other) => Err(ConfigError::InvalidParam {
                plugin: "input_file".to_string(),
                param: "Multiline.Mode",
                reason: format!("unknown mode {other:?}"),
            }),
        }
    }
}

fn compile(pattern: &str, param: &'static str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern { param, source })
}

/// Agent-level settings shared by every pipeline.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding checkpoints and other runtime state.
    pub data_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub proxy: Option<String>,
    /// Local address outbound connections bind to.
    pub bind_address: Option<std::net::IpAddr>,
    /// Host-to-address substitutions applied before connecting, in place of
    /// a resolver lookup.
    pub host_overrides: std::collections::HashMap<String, std::net::SocketAddr>,
    pub compression: bool,
    pub compression_level: i32,
    pub queue_capacity: usize,
    pub queue_max_in_flight: usize,
    pub max_send_attempts: u32,
    pub checkpoint_interval_secs: u64,
    /// Readers and drivers exit within this grace period after a stop.
    pub stop_grace_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            data_dir: PathBuf::from("data"),
            http_timeout_secs: 15,
            proxy: None,
            bind_address: None,
            host_overrides: std::collections::HashMap::new(),
            compression: true,
            compression_level: 3,
            queue_capacity: 256,
            queue_max_in_flight: 8,
            max_send_attempts: 5,
            checkpoint_interval_secs: 5,
            stop_grace_ms: 3000,
        }
    }
}

impl AgentConfig {
    /// Loads `agent.json` from the configuration directory; a missing file
    /// means defaults.
    pub fn load(conf_dir: &Path) -> Result<Self, ConfigError> {
        let path = conf_dir.join("agent.json");
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path,
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentConfig::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("checkpoints.json")
    }
}

/// Resolves the configuration directory: the override env var wins, then
/// the executable's directory, then the working directory.
#[must_use]
pub fn resolve_conf_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(SYS_CONF_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Loads every pipeline file under `<conf_dir>/pipelines`.
pub fn load_pipelines(conf_dir: &Path) -> Result<Vec<PipelineConfig>, ConfigError> {
    let dir = conf_dir.join("pipelines");
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ConfigError::Io { path: dir, source }),
    };
    let mut configs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            configs.push(PipelineConfig::load(&path)?);
        }
    }
    configs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(configs)
}
