//! Remote repository client
//!
//! Fetches variants from an ordered server list and publishes packaged
//! artifacts. Servers are tried strictly in order with no retry of a failed
//! server. A server that stalls for longer than the server timeout counts as
//! failing; a transfer that keeps making progress is bounded only by the
//! overall budget for a single package across all servers.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::package::{Coordinate, PackageMetadata, PackageVariant};
use crate::core::packaging::PackageArtifact;
use crate::core::settings::Credentials;
use crate::error::RepositoryError;
use crate::infra::checksum::checksums_match;
use crate::registry::cache::StagedArtifact;
use crate::registry::transport::{
    artifact_key, checksum_key, metadata_key, versions_key, RepositoryTransport, VersionIndex,
};

/// A variant fetched from one server
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPackage {
    pub server: String,
    pub metadata: PackageMetadata,
    /// Verified artifact in the staging area; `None` for agnostic variants
    pub artifact: Option<StagedArtifact>,
}

/// Result of a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Newly stored
    Published,
    /// The server already held this exact checksum
    AlreadyPublished,
    /// A different checksum was replaced
    Overwritten { previous: String },
}

#[derive(Debug, Clone)]
pub struct RepositoryClient {
    server_timeout: Duration,
    package_timeout: Duration,
}

impl RepositoryClient {
    pub fn new(server_timeout: Duration, package_timeout: Duration) -> Self {
        Self {
            server_timeout,
            package_timeout,
        }
    }

    pub fn server_timeout(&self) -> Duration {
        self.server_timeout
    }

    /// Download `variant` from the first server that has it
    ///
    /// `staging` is a path chosen by the cache; nothing is written anywhere
    /// else. On error no staged file is left behind.
    pub async fn download(
        &self,
        variant: &PackageVariant,
        servers: &[Box<dyn RepositoryTransport>],
        staging: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<FetchedPackage, RepositoryError> {
        let package = variant.to_string();
        let deadline = Instant::now() + self.package_timeout;
        let mut attempted = Vec::new();

        for server in servers {
            if cancel.is_cancelled() {
                return Err(RepositoryError::Cancelled { package });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RepositoryError::BudgetExceeded {
                    package,
                    seconds: self.package_timeout.as_secs(),
                });
            }

            attempted.push(server.url().to_string());
            tracing::debug!("Trying {} for {package}", server.url());

            let attempt = tokio::select! {
                () = cancel.cancelled() => {
                    let _ = tokio::fs::remove_file(staging).await;
                    return Err(RepositoryError::Cancelled { package });
                }
                result = tokio::time::timeout(remaining, self.fetch_from(server.as_ref(), variant, staging)) => result,
            };

            match attempt {
                Ok(Ok(Some(fetched))) => {
                    tracing::info!("Fetched {package} from {}", server.url());
                    return Ok(fetched);
                }
                Ok(Ok(None)) => {
                    tracing::debug!("{} does not have {package}", server.url());
                }
                Ok(Err(e @ RepositoryError::ChecksumMismatch { .. })) => {
                    let _ = tokio::fs::remove_file(staging).await;
                    return Err(e);
                }
                Ok(Err(e)) => {
                    let _ = tokio::fs::remove_file(staging).await;
                    tracing::warn!("{} failed for {package}: {e}", server.url());
                }
                Err(_) => {
                    let _ = tokio::fs::remove_file(staging).await;
                    tracing::warn!(
                        "{} timed out after {}s for {package}",
                        server.url(),
                        remaining.as_secs()
                    );
                    if Instant::now() >= deadline {
                        return Err(RepositoryError::BudgetExceeded {
                            package,
                            seconds: self.package_timeout.as_secs(),
                        });
                    }
                }
            }
        }

        Err(RepositoryError::PackageNotFound {
            package,
            servers: attempted,
        })
    }

    /// One attempt against one server
    ///
    /// A checksum mismatch is redownloaded once from the same server; a second
    /// mismatch means the server is serving corrupt data.
    async fn fetch_from(
        &self,
        server: &dyn RepositoryTransport,
        variant: &PackageVariant,
        staging: &std::path::Path,
    ) -> Result<Option<FetchedPackage>, RepositoryError> {
        let Some(metadata) = self.fetch_metadata(server, variant).await? else {
            return Ok(None);
        };

        if variant.is_agnostic() && metadata.checksum.is_none() {
            return Ok(Some(FetchedPackage {
                server: server.url().to_string(),
                metadata,
                artifact: None,
            }));
        }

        let file_name = metadata
            .file_name
            .clone()
            .unwrap_or_else(|| variant.identity.artifact_file_name());
        let expected = match metadata.checksum.clone() {
            Some(checksum) => checksum,
            None => match server.get_text(&checksum_key(variant)).await? {
                Some(text) => text.trim().to_string(),
                None => {
                    return Err(RepositoryError::InvalidMetadata {
                        server: server.url().to_string(),
                        error: format!("no checksum published for {variant}"),
                    })
                }
            },
        };

        let key = artifact_key(variant, &file_name);
        for attempt in 1..=2 {
            let Some(actual) = server.get_file(&key, staging).await? else {
                return Ok(None);
            };

            if checksums_match(&actual, &expected) {
                return Ok(Some(FetchedPackage {
                    server: server.url().to_string(),
                    metadata,
                    artifact: Some(StagedArtifact {
                        path: staging.to_path_buf(),
                        file_name,
                        checksum: actual,
                    }),
                }));
            }

            let _ = tokio::fs::remove_file(staging).await;
            if attempt == 2 {
                return Err(RepositoryError::ChecksumMismatch {
                    package: variant.to_string(),
                    expected,
                    actual,
                });
            }
            tracing::warn!(
                "Checksum mismatch for {variant} from {}; downloading again",
                server.url()
            );
        }

        Ok(None)
    }

    /// Parsed `package.json` of `variant` on `server`
    pub async fn fetch_metadata(
        &self,
        server: &dyn RepositoryTransport,
        variant: &PackageVariant,
    ) -> Result<Option<PackageMetadata>, RepositoryError> {
        let Some(text) = server.get_text(&metadata_key(variant)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| RepositoryError::InvalidMetadata {
                server: server.url().to_string(),
                error: e.to_string(),
            })
    }

    /// Checksum published by the first server that answers for `variant`
    ///
    /// Returns `(server, checksum)`. Unreachable or slow servers are skipped.
    pub async fn fetch_checksum(
        &self,
        variant: &PackageVariant,
        servers: &[Box<dyn RepositoryTransport>],
    ) -> Result<Option<(String, String)>, RepositoryError> {
        for server in servers {
            let key = checksum_key(variant);
            match tokio::time::timeout(self.server_timeout, server.get_text(&key)).await {
                Ok(Ok(Some(text))) => {
                    return Ok(Some((server.url().to_string(), text.trim().to_string())));
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::warn!("Checksum lookup on {} failed: {e}", server.url()),
                Err(_) => tracing::warn!("Checksum lookup on {} timed out", server.url()),
            }
        }
        Ok(None)
    }

    /// Every version published for `coordinate` across `servers`
    pub async fn fetch_versions(
        &self,
        coordinate: &Coordinate,
        servers: &[Box<dyn RepositoryTransport>],
    ) -> VersionIndex {
        let mut merged = VersionIndex::default();
        for server in servers {
            match self.read_versions(server.as_ref(), coordinate).await {
                Ok(index) => {
                    for version in &index.versions {
                        merged.insert(version);
                    }
                }
                Err(e) => tracing::warn!("Version lookup on {} failed: {e}", server.url()),
            }
        }
        merged
    }

    async fn read_versions(
        &self,
        server: &dyn RepositoryTransport,
        coordinate: &Coordinate,
    ) -> Result<VersionIndex, RepositoryError> {
        let key = versions_key(coordinate);
        let text = tokio::time::timeout(self.server_timeout, server.get_text(&key))
            .await
            .map_err(|_| RepositoryError::Timeout {
                server: server.url().to_string(),
                seconds: self.server_timeout.as_secs(),
            })??;
        match text {
            Some(text) => serde_json::from_str(&text).map_err(|e| RepositoryError::InvalidMetadata {
                server: server.url().to_string(),
                error: e.to_string(),
            }),
            None => Ok(VersionIndex::default()),
        }
    }

    /// Publish `artifact` to `server`
    ///
    /// Remote servers require credentials. Publishing the same checksum twice
    /// is a no-op; a different checksum for the same variant replaces the old
    /// one with a warning. The checksum file is written after the blob and
    /// metadata, so readers never see a checksum without its blob.
    pub async fn publish(
        &self,
        artifact: &PackageArtifact,
        server: &dyn RepositoryTransport,
        credentials: Option<&Credentials>,
    ) -> Result<PublishOutcome, RepositoryError> {
        if !server.is_local() && credentials.is_none() {
            return Err(RepositoryError::MissingCredentials {
                server: server.url().to_string(),
            });
        }

        let variant = &artifact.variant;
        let existing = server.get_text(&checksum_key(variant)).await?;
        let outcome = match existing.as_deref().map(str::trim) {
            Some(current) if checksums_match(current, &artifact.checksum) => {
                tracing::info!("{variant} already published to {}", server.url());
                self.record_version(server, artifact, credentials).await?;
                return Ok(PublishOutcome::AlreadyPublished);
            }
            Some(current) => {
                tracing::warn!(
                    "Replacing {variant} on {} (checksum {current} -> {})",
                    server.url(),
                    artifact.checksum
                );
                PublishOutcome::Overwritten {
                    previous: current.to_string(),
                }
            }
            None => PublishOutcome::Published,
        };

        let metadata = serde_json::to_vec_pretty(&artifact.metadata).map_err(|e| {
            RepositoryError::Packaging {
                error: e.to_string(),
            }
        })?;

        server
            .put(
                &artifact_key(variant, &artifact.file_name),
                artifact.bytes.clone(),
                credentials,
            )
            .await?;
        server
            .put(&metadata_key(variant), metadata, credentials)
            .await?;

        if !variant.is_agnostic() {
            let agnostic = PackageVariant::agnostic(variant.identity.clone());
            let agnostic_metadata =
                serde_json::to_vec_pretty(&artifact.metadata.agnostic()).map_err(|e| {
                    RepositoryError::Packaging {
                        error: e.to_string(),
                    }
                })?;
            server
                .put(&metadata_key(&agnostic), agnostic_metadata, credentials)
                .await?;
        }

        server
            .put(
                &checksum_key(variant),
                artifact.checksum.clone().into_bytes(),
                credentials,
            )
            .await?;

        self.record_version(server, artifact, credentials).await?;
        tracing::info!("Published {variant} to {}", server.url());
        Ok(outcome)
    }

    async fn record_version(
        &self,
        server: &dyn RepositoryTransport,
        artifact: &PackageArtifact,
        credentials: Option<&Credentials>,
    ) -> Result<(), RepositoryError> {
        let identity = &artifact.variant.identity;
        let coordinate = identity.coordinate();
        let mut index = self.read_versions(server, &coordinate).await?;
        if index.insert(&identity.version) {
            let json = serde_json::to_vec_pretty(&index).map_err(|e| RepositoryError::Packaging {
                error: e.to_string(),
            })?;
            server.put(&versions_key(&coordinate), json, credentials).await?;
        }
        Ok(())
    }
}
