//! Executor configuration management with precedence and validation
//!
//! Precedence, lowest first: built-in defaults, the JSON config file, then
//! environment variables.

use kiln_core::{
    Error, Result, DEFAULT_PROJECT_CACHE_DIR, KILN_CACHE_DIR_VAR, KILN_CROSS_PROCESS_LOCKS_VAR,
};
use kiln_utils::XdgPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which store keeps execution history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// One record file per identity below each workspace root
    #[default]
    File,
    /// Process-local history, lost on exit
    Memory,
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default configuration
    #[default]
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    EnvironmentVariable(String),
    /// Set in code through the builder
    CommandLine,
}

/// Configuration of the work executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Root of the shared workspaces of content-addressed work
    pub cache_dir: PathBuf,
    /// Workspace root of project-local work, relative to the project directory
    pub project_cache_dir: PathBuf,
    pub history_backend: HistoryBackend,
    /// Also lock workspaces against other processes
    pub cross_process_locking: bool,
    /// Where the effective values came from
    pub source: ConfigSource,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cache_dir: XdgPaths::transforms_dir(),
            project_cache_dir: PathBuf::from(DEFAULT_PROJECT_CACHE_DIR),
            history_backend: HistoryBackend::File,
            cross_process_locking: true,
            source: ConfigSource::Default,
        }
    }
}

/// On-disk form; every key is optional and overrides the default when set
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    cache_dir: Option<PathBuf>,
    project_cache_dir: Option<PathBuf>,
    history_backend: Option<HistoryBackend>,
    cross_process_locking: Option<bool>,
}

impl ExecutorConfig {
    /// Create a builder starting from defaults
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::new()
    }

    /// Load with full precedence from the default config file location
    pub fn load() -> Result<Self> {
        Self::load_from(&XdgPaths::config_file())
    }

    /// Load with full precedence, reading `config_file` if it exists
    pub fn load_from(config_file: &Path) -> Result<Self> {
        let mut config = if config_file.exists() {
            Self::from_file(config_file)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        debug!(source = ?config.source, cache_dir = %config.cache_dir.display(), "loaded executor config");
        Ok(config)
    }

    /// Defaults overridden by the keys present in a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, "read config file", e))?;
        let file: FileConfig = serde_json::from_str(&content).map_err(|e| Error::Json {
            message: format!("invalid config file {}: {e}", path.display()),
            source: e,
        })?;

        let mut config = Self::default();
        if let Some(cache_dir) = file.cache_dir {
            config.cache_dir = cache_dir;
        }
        if let Some(project_cache_dir) = file.project_cache_dir {
            config.project_cache_dir = project_cache_dir;
        }
        if let Some(backend) = file.history_backend {
            config.history_backend = backend;
        }
        if let Some(locking) = file.cross_process_locking {
            config.cross_process_locking = locking;
        }
        config.source = ConfigSource::ConfigFile(path.to_path_buf());
        Ok(config)
    }

    /// Override values from environment variables
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(KILN_CACHE_DIR_VAR) {
            if !dir.is_empty() {
                self.cache_dir = PathBuf::from(dir);
                self.source = ConfigSource::EnvironmentVariable(KILN_CACHE_DIR_VAR.to_string());
            }
        }

        if let Ok(value) = std::env::var(KILN_CROSS_PROCESS_LOCKS_VAR) {
            match parse_flag(&value) {
                Some(enabled) => {
                    self.cross_process_locking = enabled;
                    self.source =
                        ConfigSource::EnvironmentVariable(KILN_CROSS_PROCESS_LOCKS_VAR.to_string());
                }
                None => warn!(
                    variable = KILN_CROSS_PROCESS_LOCKS_VAR,
                    value = %value,
                    "ignoring unrecognised boolean"
                ),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::configuration("cache_dir must not be empty"));
        }
        if self.project_cache_dir.as_os_str().is_empty() {
            return Err(Error::configuration("project_cache_dir must not be empty"));
        }
        if self.project_cache_dir.is_absolute() {
            return Err(Error::configuration(format!(
                "project_cache_dir must be relative to the project, got {}",
                self.project_cache_dir.display()
            )));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for creating executor configurations
#[derive(Debug, Clone)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig {
                source: ConfigSource::CommandLine,
                ..ExecutorConfig::default()
            },
        }
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn project_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.project_cache_dir = dir.into();
        self
    }

    pub fn history_backend(mut self, backend: HistoryBackend) -> Self {
        self.config.history_backend = backend;
        self
    }

    pub fn cross_process_locking(mut self, enabled: bool) -> Self {
        self.config.cross_process_locking = enabled;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ExecutorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ExecutorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
