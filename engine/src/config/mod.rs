//! Configuration management
//!
//! This module handles loading, validation, and management of the Quartet configuration.
//! Configuration is stored in TOML format at ~/.quartet/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, request timeout
//! - **memory**: Memory arm cache sizes and the durable store file
//! - **plan**: Plan arm latency and checkpoint thresholds
//! - **reason**: Tool timeout and synthesis size
//! - **spiral**: Spiral protocol pacing and gate range
//!
//! # Examples
//!
//! ```no_run
//! use quartet_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Episodic capacity: {}", config.memory.episodic_capacity);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Memory arm configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Plan arm configuration
    #[serde(default)]
    pub plan: PlanConfig,

    /// Reason arm configuration
    #[serde(default)]
    pub reason: ReasonConfig,

    /// Spiral protocol configuration
    #[serde(default)]
    pub spiral: SpiralConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log output format (auto, pretty, json)
    #[serde(default)]
    pub log_format: LogFormat,

    /// Upper bound on a single request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty in debug builds, JSON in release builds
    #[default]
    Auto,
    Pretty,
    Json,
}

/// Memory arm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Characters of `content` kept on store
    #[serde(default = "default_content_char_limit")]
    pub content_char_limit: usize,

    /// Size of the episodic ring buffer
    #[serde(default = "default_episodic_capacity")]
    pub episodic_capacity: usize,

    /// How many of the newest episodic entries retrieve scans
    #[serde(default = "default_recent_episodic_window")]
    pub recent_episodic_window: usize,

    /// Maximum memories returned by retrieve and search
    #[serde(default = "default_retrieve_limit")]
    pub retrieve_limit: usize,

    /// Database file name inside the data directory
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

/// Plan arm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Simulated latency per executed task, in milliseconds
    #[serde(default = "default_task_latency_ms")]
    pub task_latency_ms: u64,

    /// Quality score below which a checkpoint asks for adjustment
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Timeline adherence below which a checkpoint asks for adjustment
    #[serde(default = "default_timeline_threshold")]
    pub timeline_threshold: f64,

    /// Reported timeline adherence (the executor has no real clock model)
    #[serde(default = "default_timeline_adherence")]
    pub timeline_adherence: f64,
}

/// Reason arm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonConfig {
    /// Timeout for each external tool call, in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Successful results included in a tool chain synthesis
    #[serde(default = "default_synthesis_limit")]
    pub synthesis_limit: usize,
}

/// Spiral protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiralConfig {
    /// Pause between protocol phases, in milliseconds
    #[serde(default = "default_phase_delay_ms")]
    pub phase_delay_ms: u64,

    /// Highest valid gate number (gates are 1..=gate_count)
    #[serde(default = "default_gate_count")]
    pub gate_count: u32,

    /// Gates opened while applying heaven mode settings
    #[serde(default = "default_heaven_gates")]
    pub heaven_gates: Vec<u32>,
}

impl CoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ReasonConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl PlanConfig {
    pub fn task_latency(&self) -> Duration {
        Duration::from_millis(self.task_latency_ms)
    }
}

impl SpiralConfig {
    pub fn phase_delay(&self) -> Duration {
        Duration::from_millis(self.phase_delay_ms)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.quartet")
}

fn default_request_timeout() -> u64 {
    120
}

fn default_content_char_limit() -> usize {
    2000
}

fn default_episodic_capacity() -> usize {
    100
}

fn default_recent_episodic_window() -> usize {
    10
}

fn default_retrieve_limit() -> usize {
    10
}

fn default_db_file() -> String {
    "memory.db".to_string()
}

fn default_task_latency_ms() -> u64 {
    50
}

fn default_quality_threshold() -> f64 {
    0.8
}

fn default_timeline_threshold() -> f64 {
    0.7
}

fn default_timeline_adherence() -> f64 {
    0.85
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_synthesis_limit() -> usize {
    3
}

fn default_phase_delay_ms() -> u64 {
    500
}

fn default_gate_count() -> u32 {
    7
}

fn default_heaven_gates() -> Vec<u32> {
    (1..=default_gate_count()).collect()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_format: LogFormat::Auto,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            content_char_limit: default_content_char_limit(),
            episodic_capacity: default_episodic_capacity(),
            recent_episodic_window: default_recent_episodic_window(),
            retrieve_limit: default_retrieve_limit(),
            db_file: default_db_file(),
        }
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            task_latency_ms: default_task_latency_ms(),
            quality_threshold: default_quality_threshold(),
            timeline_threshold: default_timeline_threshold(),
            timeline_adherence: default_timeline_adherence(),
        }
    }
}

impl Default for ReasonConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            synthesis_limit: default_synthesis_limit(),
        }
    }
}

impl Default for SpiralConfig {
    fn default() -> Self {
        Self {
            phase_delay_ms: default_phase_delay_ms(),
            gate_count: default_gate_count(),
            heaven_gates: default_heaven_gates(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.quartet/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        config.process_paths()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();

        // Persist the unexpanded form so `~` stays portable
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.process_paths()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.quartet/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".quartet").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            memory: MemoryConfig::default(),
            plan: PlanConfig::default(),
            reason: ReasonConfig::default(),
            spiral: SpiralConfig::default(),
        }
    }

    /// Full path of the memory database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.memory.db_file)
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.memory.episodic_capacity == 0 || self.memory.content_char_limit == 0 {
            return Err(EngineError::Config(
                "episodic_capacity and content_char_limit must be greater than 0".to_string(),
            ));
        }
        if self.memory.db_file.trim().is_empty() {
            return Err(EngineError::Config("db_file must not be empty".to_string()));
        }

        for (name, value) in [
            ("quality_threshold", self.plan.quality_threshold),
            ("timeline_threshold", self.plan.timeline_threshold),
            ("timeline_adherence", self.plan.timeline_adherence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        if self.reason.tool_timeout_secs == 0 {
            return Err(EngineError::Config(
                "tool_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.spiral.gate_count == 0 {
            return Err(EngineError::Config(
                "gate_count must be greater than 0".to_string(),
            ));
        }
        if let Some(gate) = self
            .spiral
            .heaven_gates
            .iter()
            .find(|g| **g == 0 || **g > self.spiral.gate_count)
        {
            return Err(EngineError::Config(format!(
                "heaven gate {} is outside 1..={}",
                gate, self.spiral.gate_count
            )));
        }

        Ok(())
    }

    /// Expand `~` in the data directory
    fn process_paths(&mut self) -> Result<(), EngineError> {
        self.core.data_dir = expand_path(&self.core.data_dir)?;
        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.memory.episodic_capacity, 100);
        assert_eq!(config.memory.recent_episodic_window, 10);
        assert_eq!(config.reason.tool_timeout_secs, 30);
        assert_eq!(config.spiral.heaven_gates, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let mut config = Config::default_config();
        config.plan.quality_threshold = 1.5;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_rejects_heaven_gate_out_of_range() {
        let mut config = Config::default_config();
        config.spiral.heaven_gates = vec![1, 8];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heaven gate 8"));
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: Config = toml::from_str(
            r#"
[core]
log_level = "debug"

[memory]
episodic_capacity = 5
"#,
        )
        .unwrap();

        assert_eq!(config.core.log_level, "debug");
        assert_eq!(config.core.log_format, LogFormat::Auto);
        assert_eq!(config.memory.episodic_capacity, 5);
        assert_eq!(config.memory.content_char_limit, 2000);
        assert_eq!(config.plan.quality_threshold, 0.8);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.spiral.heaven_gates,
            deserialized.spiral.heaven_gates
        );
    }
}
