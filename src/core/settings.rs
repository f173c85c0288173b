//! User settings management
//!
//! Reads `settings.toml` from the config directory (or `--settings-file`).
//! Settings hold the ordered repository server list, per-server credentials,
//! network timeouts and fetch parallelism. A missing file yields defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::error::ConfigError;
use crate::infra::dirs::PhasebuildDirs;

/// Username/password pair for one server
///
/// Values may reference environment variables as `${VAR}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Copy with `${VAR}` references replaced by their environment values
    #[must_use]
    pub fn resolved(&self) -> Self {
        Self {
            username: substitute_env_vars(&self.username),
            password: substitute_env_vars(&self.password),
        }
    }
}

/// User settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Remote servers, tried in order
    #[serde(default)]
    pub servers: Vec<String>,

    /// Credentials keyed by server URL
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, Credentials>,

    /// Per-server request timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timeout_secs: Option<u64>,

    /// Budget in seconds for fetching one package across all servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_timeout_secs: Option<u64>,

    /// Packages materialized concurrently during resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_fetches: Option<usize>,

    /// Overrides `<data_dir>/repository`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repository: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the config directory
    pub fn load(dirs: &PhasebuildDirs) -> Result<Self, ConfigError> {
        Self::load_from_path(&dirs.settings_path())
    }

    /// Load settings from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Settings {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Settings {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Save settings, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let settings_error = |error: String| ConfigError::Settings {
            path: path.to_path_buf(),
            error,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| settings_error(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| settings_error(e.to_string()))?;
        fs::write(path, content).map_err(|e| settings_error(e.to_string()))
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(
            self.server_timeout_secs
                .unwrap_or(defaults::SERVER_TIMEOUT_SECS),
        )
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(
            self.package_timeout_secs
                .unwrap_or(defaults::PACKAGE_TIMEOUT_SECS),
        )
    }

    pub fn parallel_fetches(&self) -> usize {
        self.parallel_fetches.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Local repository root, honouring the override
    pub fn local_repository_dir(&self, dirs: &PhasebuildDirs) -> PathBuf {
        self.local_repository
            .clone()
            .unwrap_or_else(|| dirs.local_repository_dir())
    }

    /// Resolved credentials for `server`, matched ignoring a trailing slash
    pub fn credentials_for(&self, server: &str) -> Option<Credentials> {
        let wanted = server.trim_end_matches('/');
        self.credentials
            .iter()
            .find(|(url, _)| url.trim_end_matches('/') == wanted)
            .map(|(_, creds)| creds.resolved())
    }
}

/// Replace `${VAR}` references with environment values; unset variables become empty
pub fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
