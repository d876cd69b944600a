//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration value failed validation
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Path or command name for the ffmpeg binary
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// Path or command name for the ffprobe binary
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Job execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Default number of files processed at once when a job
    /// does not request its own limit (0 = use built-in default)
    #[serde(default)]
    pub max_concurrent_files: u32,
    /// Per-file time budget in seconds before the tool is killed
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_task_timeout_secs() -> u64 {
    600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: 0,
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log raw tool stderr at debug level (default false)
    #[serde(default)]
    pub debug_tool_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug_tool_output: false,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the TOML file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SOUNDBATCH_FFMPEG -> tools.ffmpeg
    /// - SOUNDBATCH_FFPROBE -> tools.ffprobe
    /// - SOUNDBATCH_MAX_CONCURRENT_FILES -> jobs.max_concurrent_files
    /// - SOUNDBATCH_TASK_TIMEOUT_SECS -> jobs.task_timeout_secs
    /// - SOUNDBATCH_DEBUG_TOOL_OUTPUT -> logging.debug_tool_output
    pub fn apply_env_overrides(&mut self) {
        // SOUNDBATCH_FFMPEG
        if let Ok(val) = env::var("SOUNDBATCH_FFMPEG") {
            if !val.is_empty() {
                self.tools.ffmpeg = PathBuf::from(val);
            }
        }

        // SOUNDBATCH_FFPROBE
        if let Ok(val) = env::var("SOUNDBATCH_FFPROBE") {
            if !val.is_empty() {
                self.tools.ffprobe = PathBuf::from(val);
            }
        }

        // SOUNDBATCH_MAX_CONCURRENT_FILES
        if let Ok(val) = env::var("SOUNDBATCH_MAX_CONCURRENT_FILES") {
            if let Ok(limit) = val.parse::<u32>() {
                self.jobs.max_concurrent_files = limit;
            }
        }

        // SOUNDBATCH_TASK_TIMEOUT_SECS
        if let Ok(val) = env::var("SOUNDBATCH_TASK_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.jobs.task_timeout_secs = secs;
            }
        }

        // SOUNDBATCH_DEBUG_TOOL_OUTPUT
        if let Ok(val) = env::var("SOUNDBATCH_DEBUG_TOOL_OUTPUT") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.logging.debug_tool_output = true,
                "false" | "0" | "no" => self.logging.debug_tool_output = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Check configuration values for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.task_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.tools.ffmpeg.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "tools.ffmpeg must not be empty".to_string(),
            ));
        }
        if self.tools.ffprobe.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "tools.ffprobe must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
