//! Repository transports and layout
//!
//! Every repository, remote or local, shares one layout:
//!
//! ```text
//! <root>/<group>/<artifact>/versions.json
//! <root>/<group>/<artifact>/<version>/<arch>-<platform>-<toolchain>/package.json
//! <root>/<group>/<artifact>/<version>/<arch>-<platform>-<toolchain>/<artifact>-<version>.pkg
//! <root>/<group>/<artifact>/<version>/<arch>-<platform>-<toolchain>/checksum.sha256
//! ```
//!
//! Platform-agnostic variants live in the `any` directory. Transports only
//! move bytes by relative key; the layout is computed here.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::package::{Coordinate, PackageVariant};
use crate::core::settings::Credentials;
use crate::error::{DownloadError, RepositoryError};
use crate::infra::checksum::compute_file_checksum;
use crate::infra::download::DownloadManager;
use crate::infra::filesystem;

/// Directory name of the platform-agnostic variant
pub const AGNOSTIC_DIR: &str = "any";

/// `<group>/<artifact>/<version>/<triple|any>`
pub fn variant_key(variant: &PackageVariant) -> String {
    let id = &variant.identity;
    let dir = variant
        .target
        .as_ref()
        .map_or_else(|| AGNOSTIC_DIR.to_string(), |t| t.dir_name());
    format!("{}/{}/{}/{dir}", id.group_id, id.artifact_id, id.version)
}

pub fn metadata_key(variant: &PackageVariant) -> String {
    format!("{}/{}", variant_key(variant), defaults::METADATA_FILE)
}

pub fn checksum_key(variant: &PackageVariant) -> String {
    format!("{}/{}", variant_key(variant), defaults::CHECKSUM_FILE)
}

pub fn artifact_key(variant: &PackageVariant, file_name: &str) -> String {
    format!("{}/{file_name}", variant_key(variant))
}

pub fn versions_key(coordinate: &Coordinate) -> String {
    format!(
        "{}/{}/{}",
        coordinate.group_id,
        coordinate.artifact_id,
        defaults::VERSIONS_FILE
    )
}

/// Published versions of one coordinate (`versions.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionIndex {
    #[serde(default)]
    pub versions: Vec<String>,
}

impl VersionIndex {
    /// Add `version` if missing; returns whether the index changed
    pub fn insert(&mut self, version: &str) -> bool {
        if self.versions.iter().any(|v| v == version) {
            return false;
        }
        self.versions.push(version.to_string());
        self.versions.sort_by(|a, b| compare_versions(a, b));
        true
    }

    /// Highest version by semver precedence
    pub fn latest(&self) -> Option<&str> {
        self.versions
            .iter()
            .max_by(|a, b| compare_versions(a, b))
            .map(String::as_str)
    }
}

/// Semver order; unparsable versions sort below every valid one
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
        (Err(_), Ok(_)) => std::cmp::Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Byte-level access to one repository server
#[async_trait]
pub trait RepositoryTransport: Send + Sync + fmt::Debug {
    /// Server URL, used in logs and errors
    fn url(&self) -> &str;

    /// Whether this is a filesystem repository that needs no credentials
    fn is_local(&self) -> bool;

    /// Read a small text document; `Ok(None)` when absent
    async fn get_text(&self, key: &str) -> Result<Option<String>, RepositoryError>;

    /// Copy a blob to `dest`; returns its checksum, or `Ok(None)` when absent
    async fn get_file(&self, key: &str, dest: &Path) -> Result<Option<String>, RepositoryError>;

    /// Store a blob at `key`
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        credentials: Option<&Credentials>,
    ) -> Result<(), RepositoryError>;
}

/// HTTP(S) repository: GET to read, PUT with basic auth to publish
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    downloads: DownloadManager,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            downloads: DownloadManager::with_timeout(timeout),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url.trim_end_matches('/'))
    }

    fn map_error(&self, e: DownloadError) -> RepositoryError {
        match e {
            DownloadError::HttpStatus {
                status: 401 | 403, ..
            } => RepositoryError::Unauthorized {
                server: self.base_url.clone(),
            },
            DownloadError::IoError { path, error } => RepositoryError::Io { path, error },
            other => RepositoryError::Network {
                server: self.base_url.clone(),
                error: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl RepositoryTransport for HttpTransport {
    fn url(&self) -> &str {
        &self.base_url
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        self.downloads
            .fetch_text(&self.url_for(key))
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn get_file(&self, key: &str, dest: &Path) -> Result<Option<String>, RepositoryError> {
        let result = self
            .downloads
            .download(&self.url_for(key), dest)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(result.map(|r| r.checksum))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        credentials: Option<&Credentials>,
    ) -> Result<(), RepositoryError> {
        let auth = credentials.map(|c| (c.username.as_str(), c.password.as_str()));
        self.downloads
            .upload(&self.url_for(key), bytes, auth)
            .await
            .map_err(|e| self.map_error(e))
    }
}

/// Filesystem repository, used for `file://` servers and the local repository
#[derive(Debug, Clone)]
pub struct FileTransport {
    url: String,
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            url: format!("file://{}", root.display()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl RepositoryTransport for FileTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Io {
                path,
                error: e.to_string(),
            }),
        }
    }

    async fn get_file(&self, key: &str, dest: &Path) -> Result<Option<String>, RepositoryError> {
        let source = self.path_for(key);
        if !source.is_file() {
            return Ok(None);
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::Io {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
        }
        tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| RepositoryError::Io {
                path: source.clone(),
                error: e.to_string(),
            })?;
        let checksum = compute_file_checksum(dest)
            .await
            .map_err(|e| RepositoryError::Io {
                path: dest.to_path_buf(),
                error: e.to_string(),
            })?;
        Ok(Some(checksum))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _credentials: Option<&Credentials>,
    ) -> Result<(), RepositoryError> {
        let path = self.path_for(key);
        filesystem::write_atomic(&path, &bytes)
            .await
            .map_err(|e| RepositoryError::Io {
                path,
                error: e.to_string(),
            })
    }
}

/// Transport for a server URL from the settings file
pub fn transport_for(
    url: &str,
    timeout: Duration,
) -> Result<Box<dyn RepositoryTransport>, RepositoryError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(FileTransport::new(path)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(HttpTransport::new(url, timeout)));
    }
    if Path::new(url).is_absolute() {
        return Ok(Box::new(FileTransport::new(url)));
    }
    Err(RepositoryError::Network {
        server: url.to_string(),
        error: "unsupported server URL scheme".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::{PackageIdentity, TargetTriple};
    use tempfile::TempDir;

    fn variant(target: bool) -> PackageVariant {
        PackageVariant::new(
            PackageIdentity::new("org.acme", "zlib", "1.3.0"),
            target.then(|| TargetTriple::new("x86_64", "linux", "gcc")),
        )
    }

    #[test]
    fn test_layout_keys() {
        assert_eq!(
            metadata_key(&variant(true)),
            "org.acme/zlib/1.3.0/x86_64-linux-gcc/package.json"
        );
        assert_eq!(
            checksum_key(&variant(false)),
            "org.acme/zlib/1.3.0/any/checksum.sha256"
        );
        assert_eq!(
            artifact_key(&variant(true), "zlib-1.3.0.pkg"),
            "org.acme/zlib/1.3.0/x86_64-linux-gcc/zlib-1.3.0.pkg"
        );
        assert_eq!(
            versions_key(&Coordinate::new("org.acme", "zlib")),
            "org.acme/zlib/versions.json"
        );
    }

    #[test]
    fn test_version_index_orders_by_semver() {
        let mut index = VersionIndex::default();
        assert!(index.insert("1.10.0"));
        assert!(index.insert("1.2.0"));
        assert!(!index.insert("1.2.0"));
        assert_eq!(index.versions, vec!["1.2.0", "1.10.0"]);
        assert_eq!(index.latest(), Some("1.10.0"));
    }

    #[tokio::test]
    async fn test_file_transport_roundtrip() {
        let temp = TempDir::new().unwrap();
        let transport = FileTransport::new(temp.path().join("repo"));
        let key = artifact_key(&variant(true), "zlib-1.3.0.pkg");

        assert!(transport.get_text(&key).await.unwrap().is_none());
        transport.put(&key, b"blob".to_vec(), None).await.unwrap();

        let dest = temp.path().join("out").join("zlib.pkg");
        let checksum = transport.get_file(&key, &dest).await.unwrap().unwrap();
        assert_eq!(checksum, crate::infra::checksum::compute_checksum(b"blob"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"blob");
    }

    #[test]
    fn test_transport_for_schemes() {
        let timeout = Duration::from_secs(1);
        assert!(transport_for("file:///srv/repo", timeout).unwrap().is_local());
        assert!(!transport_for("https://repo.example", timeout).unwrap().is_local());
        assert!(transport_for("ftp://repo.example", timeout).is_err());
    }
}
