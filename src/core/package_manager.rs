//! Package manager
//!
//! The facade plugins and the resolver use for everything package related:
//! cache lookups, fetching from the configured servers, checksum-based
//! updates, packaging the current project and publishing it.
//!
//! Resolution servers are the local repository followed by the remote
//! servers from the settings file, in order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::package::{Coordinate, PackageIdentity, PackageMetadata, PackageVariant};
use crate::core::packaging::{BundlePackager, PackageArtifact, Packager};
use crate::core::project::Project;
use crate::core::resolver::{Materialized, PackageSource};
use crate::core::settings::{Credentials, Settings};
use crate::error::{CacheError, RepositoryError};
use crate::infra::dirs::PhasebuildDirs;
use crate::registry::cache::{CacheInfo, CachedPackage, PackageCache};
use crate::registry::client::{FetchedPackage, PublishOutcome, RepositoryClient};
use crate::registry::transport::{compare_versions, transport_for, FileTransport, RepositoryTransport};

/// Result of an update check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The cached checksum matches the server's
    UpToDate,
    /// The variant was redownloaded and its cache entry replaced
    Updated {
        previous: Option<String>,
        current: Option<String>,
    },
    /// Not cached before; downloaded now
    Downloaded,
    /// No server publishes a checksum for this variant
    Unavailable,
}

pub struct PackageManager {
    cache: PackageCache,
    client: RepositoryClient,
    /// Local repository first, then remote servers in settings order
    servers: Vec<Box<dyn RepositoryTransport>>,
    settings: Settings,
    packager: Box<dyn Packager>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageManager")
            .field("cache", &self.cache.root())
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

impl PackageManager {
    /// Create a manager over an explicit cache root and local repository
    pub fn new(
        cache_root: PathBuf,
        local_repository: PathBuf,
        settings: Settings,
    ) -> Result<Self, RepositoryError> {
        let mut servers: Vec<Box<dyn RepositoryTransport>> =
            vec![Box::new(FileTransport::new(local_repository))];
        for url in &settings.servers {
            servers.push(transport_for(url, settings.server_timeout())?);
        }

        Ok(Self {
            cache: PackageCache::new(cache_root),
            client: RepositoryClient::new(settings.server_timeout(), settings.package_timeout()),
            servers,
            settings,
            packager: Box::new(BundlePackager),
            cancel: CancellationToken::new(),
        })
    }

    /// Create a manager using the platform directories
    pub fn from_settings(dirs: &PhasebuildDirs, settings: Settings) -> Result<Self, RepositoryError> {
        let local = settings.local_repository_dir(dirs);
        Self::new(dirs.package_cache_dir(), local, settings)
    }

    /// Stop fetches when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Replace the packager used by `package_project`
    #[must_use]
    pub fn with_packager(mut self, packager: Box<dyn Packager>) -> Self {
        self.packager = packager;
        self
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Local repository followed by the remote servers
    pub fn resolution_servers(&self) -> &[Box<dyn RepositoryTransport>] {
        &self.servers
    }

    /// Remote servers only, in settings order
    pub fn remote_servers(&self) -> &[Box<dyn RepositoryTransport>] {
        &self.servers[1..]
    }

    fn local_repository(&self) -> &dyn RepositoryTransport {
        self.servers[0].as_ref()
    }

    pub fn is_in_cache(&self, variant: &PackageVariant) -> bool {
        self.cache.is_in_cache(variant)
    }

    /// Read a variant from the cache; never downloads
    pub async fn load_package(&self, variant: &PackageVariant) -> Result<CachedPackage, CacheError> {
        self.cache.load(variant).await
    }

    /// Fetch `variant` from `servers` and replace its cache entry
    pub async fn download_package(
        &self,
        variant: &PackageVariant,
        servers: &[Box<dyn RepositoryTransport>],
    ) -> Result<CachedPackage, RepositoryError> {
        let _guard = self.cache.lock(variant).await;
        self.fetch_and_store(variant, servers).await
    }

    /// Load from cache, or fetch from the resolution servers on a miss
    ///
    /// Concurrent callers for the same variant wait on the variant lock, so
    /// a variant is fetched at most once.
    pub async fn ensure_package(&self, variant: &PackageVariant) -> Result<CachedPackage, RepositoryError> {
        let _guard = self.cache.lock(variant).await;

        match self.cache.load(variant).await {
            Ok(package) => {
                tracing::debug!("Cache hit for {variant}");
                return Ok(package);
            }
            Err(CacheError::NotInCache { .. }) => {
                tracing::debug!("Cache miss for {variant}");
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry for {variant}: {e}");
                self.cache.invalidate(variant).await?;
            }
        }

        self.fetch_and_store(variant, &self.servers).await
    }

    /// Compare the cached checksum with the first server that publishes one
    ///
    /// Servers are asked in order and the first checksum answer is
    /// authoritative; later servers are not consulted. Unreachable or slow
    /// servers are skipped. On a mismatch the variant is downloaded again
    /// and replaces the cached entry only once the new blob is verified, so
    /// a failed update leaves the previous entry usable.
    pub async fn update_package(
        &self,
        variant: &PackageVariant,
        servers: &[Box<dyn RepositoryTransport>],
    ) -> Result<UpdateOutcome, RepositoryError> {
        let _guard = self.cache.lock(variant).await;

        let entry = match self.cache.entry(variant).await {
            Ok(entry) => entry,
            Err(CacheError::NotInCache { .. }) => {
                self.fetch_and_store(variant, servers).await?;
                return Ok(UpdateOutcome::Downloaded);
            }
            Err(e) => return Err(e.into()),
        };

        let Some((server, remote)) = self.client.fetch_checksum(variant, servers).await? else {
            tracing::warn!("No server publishes a checksum for {variant}");
            return Ok(UpdateOutcome::Unavailable);
        };

        if entry
            .checksum
            .as_deref()
            .is_some_and(|local| crate::infra::checksum::checksums_match(local, &remote))
        {
            tracing::debug!("{variant} is up to date with {server}");
            self.cache.touch(variant).await?;
            return Ok(UpdateOutcome::UpToDate);
        }

        tracing::info!("{variant} changed on {server}; downloading again");
        // The old entry stays until the new blob has been downloaded and verified
        let (fetched, staging) = self.fetch(variant, servers).await?;
        if let Err(e) = self.cache.invalidate(variant).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        let stored = self.commit(variant, fetched, &staging).await?;
        Ok(UpdateOutcome::Updated {
            previous: entry.checksum,
            current: stored.entry.checksum,
        })
    }

    /// Bundle the project's build output
    pub fn package_project(&self, project: &Project) -> Result<PackageArtifact, RepositoryError> {
        self.packager.package(project)
    }

    /// Package the project and install it into the local repository
    pub async fn publish_local(
        &self,
        project: &Project,
    ) -> Result<(PackageArtifact, PublishOutcome), RepositoryError> {
        let artifact = self.package_project(project)?;
        let outcome = self
            .client
            .publish(&artifact, self.local_repository(), None)
            .await?;
        self.forget_replaced(&artifact, &outcome).await?;
        Ok((artifact, outcome))
    }

    /// Package the project and publish it to a remote server
    ///
    /// Defaults to the first configured server and its configured
    /// credentials; credentials are mandatory for remote servers.
    pub async fn publish(
        &self,
        project: &Project,
        server: Option<&str>,
        credentials: Option<Credentials>,
    ) -> Result<(PackageArtifact, PublishOutcome), RepositoryError> {
        let target: &dyn RepositoryTransport = match server {
            Some(url) => match self.remote_servers().iter().find(|s| s.url() == url) {
                Some(found) => found.as_ref(),
                None => {
                    let transport = transport_for(url, self.settings.server_timeout())?;
                    return self.publish_to(project, transport.as_ref(), credentials).await;
                }
            },
            None => self
                .remote_servers()
                .first()
                .map(AsRef::as_ref)
                .ok_or(RepositoryError::NoServerConfigured)?,
        };
        self.publish_to(project, target, credentials).await
    }

    async fn publish_to(
        &self,
        project: &Project,
        server: &dyn RepositoryTransport,
        credentials: Option<Credentials>,
    ) -> Result<(PackageArtifact, PublishOutcome), RepositoryError> {
        let credentials = credentials.or_else(|| self.settings.credentials_for(server.url()));
        let artifact = self.package_project(project)?;
        let outcome = self
            .client
            .publish(&artifact, server, credentials.as_ref())
            .await?;
        Ok((artifact, outcome))
    }

    /// Highest known version of `coordinate`, from the cache and every server
    pub async fn resolve_version(&self, coordinate: &Coordinate) -> Result<Option<String>, RepositoryError> {
        let mut index = self.client.fetch_versions(coordinate, &self.servers).await;
        for version in self.cached_versions(coordinate).await {
            index.insert(&version);
        }
        Ok(index.latest().map(str::to_string))
    }

    /// Cache size summary
    pub fn cache_info(&self) -> CacheInfo {
        self.cache.info()
    }

    /// Remove every cached package
    pub async fn clean_cache(&self) -> Result<u64, RepositoryError> {
        Ok(self.cache.clean().await?)
    }

    async fn fetch_and_store(
        &self,
        variant: &PackageVariant,
        servers: &[Box<dyn RepositoryTransport>],
    ) -> Result<CachedPackage, RepositoryError> {
        let (fetched, staging) = self.fetch(variant, servers).await?;
        self.commit(variant, fetched, &staging).await
    }

    /// Download `variant` into the staging area; the cache is not touched
    async fn fetch(
        &self,
        variant: &PackageVariant,
        servers: &[Box<dyn RepositoryTransport>],
    ) -> Result<(FetchedPackage, PathBuf), RepositoryError> {
        let staging = self.cache.staging_path(variant);
        let fetched = self
            .client
            .download(variant, servers, &staging, &self.cancel)
            .await?;
        Ok((fetched, staging))
    }

    /// Move a verified download into the cache
    async fn commit(
        &self,
        variant: &PackageVariant,
        fetched: FetchedPackage,
        staging: &Path,
    ) -> Result<CachedPackage, RepositoryError> {
        let stored = self
            .cache
            .store(
                variant,
                &fetched.metadata,
                fetched.artifact,
                Some(&fetched.server),
            )
            .await;
        if stored.is_err() {
            let _ = tokio::fs::remove_file(staging).await;
        }
        Ok(stored?)
    }

    /// Drop a cache entry that a local reinstall just made stale
    async fn forget_replaced(
        &self,
        artifact: &PackageArtifact,
        outcome: &PublishOutcome,
    ) -> Result<(), RepositoryError> {
        if matches!(outcome, PublishOutcome::Overwritten { .. }) && self.is_in_cache(&artifact.variant) {
            let _guard = self.cache.lock(&artifact.variant).await;
            self.cache.invalidate(&artifact.variant).await?;
        }
        Ok(())
    }

    async fn cached_versions(&self, coordinate: &Coordinate) -> Vec<String> {
        let dir = self
            .cache
            .root()
            .join(&coordinate.group_id)
            .join(&coordinate.artifact_id);
        let mut versions = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return versions;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let version = entry.file_name().to_string_lossy().into_owned();
            let agnostic = PackageVariant::agnostic(coordinate.with_version(&version));
            if self.cache.is_in_cache(&agnostic) {
                versions.push(version);
            }
        }
        versions.sort_by(|a, b| compare_versions(a, b));
        versions
    }
}

#[async_trait]
impl PackageSource for PackageManager {
    async fn resolve_version(&self, coordinate: &Coordinate) -> Result<Option<String>, RepositoryError> {
        PackageManager::resolve_version(self, coordinate).await
    }

    async fn metadata(&self, identity: &PackageIdentity) -> Result<PackageMetadata, RepositoryError> {
        let variant = PackageVariant::agnostic(identity.clone());
        Ok(self.ensure_package(&variant).await?.metadata)
    }

    async fn materialize(&self, variant: &PackageVariant) -> Result<Materialized, RepositoryError> {
        let package = self.ensure_package(variant).await?;
        Ok(Materialized {
            location: package.dir,
            checksum: package.entry.checksum,
        })
    }
}
