//! Engine configuration.
//!
//! Settings are loaded from a TOML file covering debounce timing, ignore
//! patterns, organization rules, watched directories and the duplicate
//! digest algorithm.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! debounce_ms = 500
//! base_throttle_ms = 250
//!
//! [ignore]
//! patterns = ["*.tmp", ".git"]
//!
//! [duplicates]
//! algorithm = "blake3"
//!
//! [[rules]]
//! pattern = "invoice_*"
//! extensions = ["pdf"]
//! target_dir = "invoices"
//!
//! [[watch]]
//! path = "/home/me/Downloads"
//! priority = "high"
//! ```

use crate::duplicates::DigestAlgorithm;
use crate::monitor::Priority;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the rollback journal created inside an organized directory.
pub const JOURNAL_FILE_NAME: &str = ".tidywatch_journal.jsonl";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub ignore: IgnoreSettings,

    #[serde(default)]
    pub duplicates: DuplicateSettings,

    /// Organization rules, evaluated in declared order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Directories to watch when running the monitor.
    #[serde(default)]
    pub watch: Vec<WatchEntry>,
}

/// Timing and journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Quiet period before a burst of events on one path fires. Must be non-zero.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Throttle delay for `normal` priority directories.
    #[serde(default = "default_base_throttle_ms")]
    pub base_throttle_ms: u64,

    /// Where the rollback journal lives. Defaults to a file inside the
    /// organized directory.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_base_throttle_ms() -> u64 {
    250
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            base_throttle_ms: default_base_throttle_ms(),
            journal_path: None,
        }
    }
}

impl EngineSettings {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn base_throttle(&self) -> Duration {
        Duration::from_millis(self.base_throttle_ms)
    }

    /// Journal location for work rooted at `dir`.
    pub fn journal_path_for(&self, dir: &Path) -> PathBuf {
        match &self.journal_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => dir.join(path),
            None => dir.join(JOURNAL_FILE_NAME),
        }
    }
}

/// Ignore-pattern settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreSettings {
    #[serde(default = "default_ignore_patterns")]
    pub patterns: Vec<String>,
}

impl Default for IgnoreSettings {
    fn default() -> Self {
        Self {
            patterns: default_ignore_patterns(),
        }
    }
}

/// Partial downloads, editor swap files and OS metadata.
fn default_ignore_patterns() -> Vec<String> {
    [
        ".DS_Store",
        "Thumbs.db",
        "*.tmp",
        "*.part",
        "*.crdownload",
        "*.swp",
        ".git",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl IgnoreSettings {
    /// The configured patterns plus the journal file, which must never be
    /// organized away.
    pub fn effective_patterns(&self) -> Vec<String> {
        let mut patterns = self.patterns.clone();
        if !patterns.iter().any(|p| p == JOURNAL_FILE_NAME) {
            patterns.push(JOURNAL_FILE_NAME.to_string());
        }
        patterns
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateSettings {
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
}

/// One organization rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Glob matched against the file's basename.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Accepted extensions, with or without a leading dot.
    #[serde(default)]
    pub extensions: Option<Vec<String>>,

    /// Destination directory; relative paths resolve against the organized root.
    pub target_dir: PathBuf,
}

/// A directory to register with the monitor at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub priority: Priority,
}

impl EngineConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.tidywatchrc.toml` in the current directory
    /// 3. Look for `tidywatch/config.toml` in the platform config directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read, does not parse, or
    /// fails validation.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".tidywatchrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tidywatch").join("config.toml");
            if user_config.exists() {
                return Self::load_from_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    /// Like [`EngineConfig::load`], but a broken configuration is reported once
    /// and replaced by defaults, which carry an empty rule set.
    pub fn load_or_default(config_path: Option<&Path>) -> Self {
        match Self::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{}; continuing with defaults and no rules", e);
                Self::default()
            }
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.debounce_ms == 0 {
            return Err(ConfigError::ConfigInvalid(
                "engine.debounce_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
