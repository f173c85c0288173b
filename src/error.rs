//! Error types for phasebuild
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::phase::Phase;

/// Checksum computation errors
#[derive(Error, Debug)]
pub enum ChecksumError {
    /// IO error while reading content to digest
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Low-level transfer errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error for '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Request did not complete within the client timeout
    #[error("Request to '{url}' timed out")]
    Timeout { url: String },

    /// Server answered with a non-success status
    #[error("HTTP {status} for '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Max retries exceeded
    #[error("Transfer failed after {retries} retries: {url}")]
    MaxRetriesExceeded { url: String, retries: u32 },
}

/// Build descriptor and settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Descriptor file missing
    #[error("Build descriptor not found at '{path}'")]
    DescriptorNotFound { path: PathBuf },

    /// Descriptor could not be parsed
    #[error("Failed to parse build descriptor '{path}': {error}")]
    DescriptorParse { path: PathBuf, error: String },

    /// Missing or empty required field
    #[error("Build descriptor is missing required field '{field}'")]
    MissingField { field: String },

    /// Invalid field value
    #[error("Invalid value for '{field}': {message}")]
    InvalidField { field: String, message: String },

    /// Malformed `group/artifact[@version][:scope]` string
    #[error("Invalid package spec '{spec}': {message}")]
    InvalidPackageSpec { spec: String, message: String },

    /// Unknown phase name
    #[error("Unknown phase '{name}'")]
    UnknownPhase { name: String },

    /// Unknown dependency scope
    #[error("Unknown dependency scope '{name}'")]
    UnknownScope { name: String },

    /// Plugin configuration does not match the plugin's schema
    #[error("Invalid configuration for plugin '{plugin}': {message}")]
    InvalidPluginConfig { plugin: String, message: String },

    /// No target matches the requested selection
    #[error("No target matches {selector}")]
    TargetNotFound { selector: String },

    /// Settings file error
    #[error("Failed to load settings '{path}': {error}")]
    Settings { path: PathBuf, error: String },
}

/// Package cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Variant is not present in the cache
    #[error("Package '{variant}' is not in cache")]
    NotInCache { variant: String },

    /// IO error
    #[error("Cache IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// A cache entry or metadata file is unreadable
    #[error("Invalid cache entry '{path}': {error}")]
    InvalidEntry { path: PathBuf, error: String },
}

/// Remote repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No server holds the requested variant
    #[error("Package '{package}' not found on any server (tried: {})", servers.join(", "))]
    PackageNotFound {
        package: String,
        servers: Vec<String>,
    },

    /// Downloaded bytes did not match the published checksum twice in a row
    #[error("Checksum mismatch for '{package}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    /// Transfer failure against one server
    #[error("Server '{server}' failed: {error}")]
    Network { server: String, error: String },

    /// One server did not answer in time
    #[error("Server '{server}' timed out after {seconds}s")]
    Timeout { server: String, seconds: u64 },

    /// The per-package budget across all servers ran out
    #[error("Fetching '{package}' exceeded the {seconds}s budget")]
    BudgetExceeded { package: String, seconds: u64 },

    /// No remote server is configured to publish to
    #[error("No remote server configured")]
    NoServerConfigured,

    /// Publishing to a remote server requires credentials
    #[error("Publishing to '{server}' requires credentials")]
    MissingCredentials { server: String },

    /// Server rejected the credentials
    #[error("Server '{server}' rejected the credentials")]
    Unauthorized { server: String },

    /// Server returned unreadable metadata
    #[error("Invalid metadata from '{server}': {error}")]
    InvalidMetadata { server: String, error: String },

    /// Package is not present in the local cache and no update source exists
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Packaging the project failed
    #[error("Packaging failed: {error}")]
    Packaging { error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Run was cancelled at a fetch boundary
    #[error("Fetch of '{package}' cancelled")]
    Cancelled { package: String },
}

/// Dependency resolution errors
#[derive(Error, Debug)]
pub enum ResolverError {
    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Two direct declarations pin different versions of the same package
    #[error("Version conflict for '{package}': declared as both {first} and {second}")]
    VersionConflict {
        package: String,
        first: String,
        second: String,
    },

    /// No version could be determined for an unversioned declaration
    #[error("No published version found for '{package}'")]
    NoVersion { package: String },

    /// Repository failure while materializing a package
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Resolution was cancelled
    #[error("Dependency resolution cancelled")]
    Cancelled,
}

/// Failure raised by a plugin's `process`
#[derive(Error, Debug)]
pub enum PluginError {
    /// Plugin reported a failure
    #[error("{message}")]
    Failed { message: String },

    /// No factory is registered for a declared plugin
    #[error("Unknown plugin '{package}'")]
    Unknown { package: String },

    /// Plugin used the package manager and it failed
    #[error("Package manager error: {0}")]
    Repository(#[from] RepositoryError),

    /// IO error inside a plugin
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Convenience constructor for plugin-defined failures
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Build run errors, always tagged with the phase at fault
#[derive(Error, Debug)]
pub enum BuildError {
    /// A plugin failed; the run stops at this phase
    #[error("Plugin '{plugin}' failed during {phase}: {source}")]
    PluginFailed {
        phase: Phase,
        plugin: String,
        #[source]
        source: PluginError,
    },

    /// Dependency resolution failed
    #[error("Dependency resolution failed during {phase}: {source}")]
    ResolutionFailed {
        phase: Phase,
        #[source]
        source: ResolverError,
    },

    /// Descriptor content rejected while the run was in progress
    #[error("Invalid build descriptor during {phase}: {source}")]
    InvalidDescriptor {
        phase: Phase,
        #[source]
        source: ConfigError,
    },

    /// Packaging or installing the project failed
    #[error("Packaging failed during {phase}: {source}")]
    Packaging {
        phase: Phase,
        #[source]
        source: RepositoryError,
    },

    /// A phase's built-in default action failed
    #[error("Default action for {phase} failed: {message}")]
    DefaultActionFailed { phase: Phase, message: String },

    /// Run was cancelled at a phase boundary
    #[error("Build cancelled before {phase}")]
    Cancelled { phase: Phase },
}

impl BuildError {
    /// Phase at which the run stopped
    pub fn phase(&self) -> Phase {
        match self {
            Self::PluginFailed { phase, .. }
            | Self::ResolutionFailed { phase, .. }
            | Self::InvalidDescriptor { phase, .. }
            | Self::Packaging { phase, .. }
            | Self::DefaultActionFailed { phase, .. }
            | Self::Cancelled { phase } => *phase,
        }
    }
}

/// Top-level phasebuild error type
#[derive(Error, Debug)]
pub enum PhasebuildError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Repository error
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Resolver error
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Plugin error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Download error
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Checksum error
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_not_found_lists_servers() {
        let err = RepositoryError::PackageNotFound {
            package: "org.acme/zlib@1.3.0".to_string(),
            servers: vec!["https://a.example".to_string(), "https://b.example".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("https://a.example"));
        assert!(msg.contains("https://b.example"));
    }

    #[test]
    fn test_cycle_message_joins_path() {
        let err = ResolverError::CircularDependency {
            cycle: vec!["a/a@1.0.0".into(), "b/b@1.0.0".into(), "a/a@1.0.0".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: a/a@1.0.0 -> b/b@1.0.0 -> a/a@1.0.0"
        );
    }

    #[test]
    fn test_build_error_reports_phase() {
        let err = BuildError::PluginFailed {
            phase: Phase::Link,
            plugin: "org.acme/stamp".to_string(),
            source: PluginError::failed("boom"),
        };
        assert_eq!(err.phase(), Phase::Link);
        assert!(err.to_string().contains("LINK"));
    }
}
