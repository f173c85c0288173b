//! Platform-specific directory management
//!
//! Follows the XDG Base Directory layout on Linux and standard locations on macOS.
//!
//! Environment variables can override default directories:
//! - `PHASEBUILD_CACHE_DIR` - Override cache directory
//! - `PHASEBUILD_CONFIG_DIR` - Override config directory
//! - `PHASEBUILD_DATA_DIR` - Override data directory

use std::env;
use std::path::PathBuf;

use crate::config::defaults;

/// Environment variable names for directory overrides
pub const ENV_CACHE_DIR: &str = "PHASEBUILD_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "PHASEBUILD_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "PHASEBUILD_DATA_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "phasebuild";

const PACKAGES_SUBDIR: &str = "packages";
const REPOSITORY_SUBDIR: &str = "repository";

/// Platform-specific directory provider
#[derive(Debug, Clone)]
pub struct PhasebuildDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl PhasebuildDirs {
    /// Resolve directories from the environment, falling back to platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: resolve(ENV_CACHE_DIR, dirs::cache_dir, &[".cache"]),
            config_dir: resolve(ENV_CONFIG_DIR, dirs::config_dir, &[".config"]),
            data_dir: resolve(ENV_DATA_DIR, dirs::data_dir, &[".local", "share"]),
        }
    }

    /// Use one explicit root for all three directories
    #[must_use]
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache_dir: root.join("cache"),
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    /// Cache directory; its content can be regenerated
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Root of the package cache
    #[must_use]
    pub fn package_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(PACKAGES_SUBDIR)
    }

    /// Root of the local repository that `install` publishes into
    #[must_use]
    pub fn local_repository_dir(&self) -> PathBuf {
        self.data_dir.join(REPOSITORY_SUBDIR)
    }

    /// Path of the user settings file
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(defaults::SETTINGS_FILE)
    }
}

impl Default for PhasebuildDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &[&str]) -> PathBuf {
    if let Ok(path) = env::var(var) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    platform().map(|p| p.join(APP_NAME)).unwrap_or_else(|| {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_fallback
            .iter()
            .fold(base, |path, part| path.join(part))
            .join(APP_NAME)
    })
}
