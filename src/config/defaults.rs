//! Default configuration values

/// Build descriptor file name at the project root
pub const DESCRIPTOR_FILE: &str = "build.json";

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Metadata file stored next to every package variant
pub const METADATA_FILE: &str = "package.json";

/// Checksum file stored next to every package variant
pub const CHECKSUM_FILE: &str = "checksum.sha256";

/// Cache entry file that marks a variant as committed to the cache
pub const CACHE_ENTRY_FILE: &str = "entry.toml";

/// Version index stored per `group/artifact` in a repository
pub const VERSIONS_FILE: &str = "versions.json";

/// Build output directory, relative to the project directory
pub const BUILD_DIR: &str = "build";

/// Dependency directory, relative to the target build directory
pub const DEPENDENCY_DIR: &str = "deps";

/// Target directory name when the descriptor declares no targets
pub const DEFAULT_TARGET_DIR: &str = "default";

/// Time allowed for a single server to answer one request (seconds)
pub const SERVER_TIMEOUT_SECS: u64 = 30;

/// Total time allowed to fetch one package across all servers (seconds)
pub const PACKAGE_TIMEOUT_SECS: u64 = 120;

/// Maximum attempts for idempotent uploads
pub const MAX_UPLOAD_RETRIES: u32 = 3;
