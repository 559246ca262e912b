use kiln_core::{APP_DIR_NAME, TRANSFORMS_DIR_NAME};
use std::env;
use std::path::PathBuf;

/// XDG Base Directory paths for kiln
pub struct XdgPaths;

impl XdgPaths {
    /// Get XDG_CONFIG_HOME/kiln or fallback
    pub fn config_dir() -> PathBuf {
        env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".config"))
                    .unwrap_or_else(|| PathBuf::from(".config"))
            })
            .join(APP_DIR_NAME)
    }

    /// Get XDG_CACHE_HOME/kiln or fallback
    pub fn cache_dir() -> PathBuf {
        env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|home| home.join(".cache"))
                    .unwrap_or_else(|| PathBuf::from(".cache"))
            })
            .join(APP_DIR_NAME)
    }

    /// Root of the shared, content-addressed transform workspaces
    pub fn transforms_dir() -> PathBuf {
        Self::cache_dir().join(TRANSFORMS_DIR_NAME)
    }

    /// Default location of the executor configuration file
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("executor.json")
    }
}
