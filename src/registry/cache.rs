//! Local package cache
//!
//! Stores materialized variants under the repository layout, with an
//! `entry.toml` per variant recording where the artifact lives, its checksum
//! and when it was last verified. The entry is written last, so a variant is
//! in the cache exactly when its entry exists.
//!
//! Writers serialize on a per-variant async lock; different variants never
//! contend. Artifacts arrive through a staging directory and are moved into
//! place only after their checksum has been verified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::defaults;
use crate::core::package::{PackageMetadata, PackageVariant};
use crate::error::CacheError;
use crate::infra::filesystem;

const STAGING_DIR: &str = ".staging";

/// Bookkeeping for one cached variant (`entry.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Artifact checksum; absent for metadata-only variants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Artifact file name inside the variant directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Server the variant was fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    pub last_verified: DateTime<Utc>,
}

/// An artifact downloaded to the staging area and verified
#[derive(Debug, Clone, PartialEq)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub checksum: String,
}

/// A variant read back from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPackage {
    pub variant: PackageVariant,
    pub entry: CacheEntry,
    pub metadata: PackageMetadata,
    /// Variant directory
    pub dir: PathBuf,
}

impl CachedPackage {
    /// Path of the artifact blob, if this variant has one
    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.entry.file_name.as_ref().map(|name| self.dir.join(name))
    }
}

/// Cache size summary
#[derive(Debug)]
pub struct CacheInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Number of committed variants
    pub entry_count: usize,
    pub exists: bool,
}

impl CacheInfo {
    /// Format size for display
    pub fn format_size(&self) -> String {
        filesystem::format_size(self.size_bytes)
    }
}

#[derive(Debug)]
pub struct PackageCache {
    root: PathBuf,
    locks: Mutex<HashMap<PackageVariant, Arc<Mutex<()>>>>,
    staging_counter: AtomicU64,
}

impl PackageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
            staging_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `variant`
    pub fn variant_dir(&self, variant: &PackageVariant) -> PathBuf {
        let key = crate::registry::transport::variant_key(variant);
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }

    fn entry_path(&self, variant: &PackageVariant) -> PathBuf {
        self.variant_dir(variant).join(defaults::CACHE_ENTRY_FILE)
    }

    /// Fresh path in the staging area for downloading `variant`
    pub fn staging_path(&self, variant: &PackageVariant) -> PathBuf {
        let n = self.staging_counter.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{}-{}-{n}.part",
            variant.identity.artifact_id,
            variant.identity.version,
            std::process::id()
        );
        self.root.join(STAGING_DIR).join(name)
    }

    /// Wait for exclusive access to `variant`
    ///
    /// Locks nobody holds or waits on are dropped from the table here, so it
    /// only grows with the number of variants in flight at once.
    pub async fn lock(&self, variant: &PackageVariant) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Holders and waiters keep a clone; the table's own is the last one
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(variant.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Whether a committed entry exists for `variant`
    ///
    /// For the agnostic variant this means the metadata is cached, which is
    /// all a shallow dependency needs.
    pub fn is_in_cache(&self, variant: &PackageVariant) -> bool {
        self.entry_path(variant).is_file()
    }

    /// Read the committed entry of `variant`
    pub async fn entry(&self, variant: &PackageVariant) -> Result<CacheEntry, CacheError> {
        let path = self.entry_path(variant);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotInCache {
                    variant: variant.to_string(),
                })
            }
            Err(e) => {
                return Err(CacheError::Io {
                    path,
                    error: e.to_string(),
                })
            }
        };
        toml::from_str(&content).map_err(|e| CacheError::InvalidEntry {
            path,
            error: e.to_string(),
        })
    }

    /// Load a cached variant; never touches the network
    ///
    /// An entry whose artifact has disappeared counts as a miss.
    pub async fn load(&self, variant: &PackageVariant) -> Result<CachedPackage, CacheError> {
        let entry = self.entry(variant).await?;
        let dir = self.variant_dir(variant);

        let metadata_path = dir.join(defaults::METADATA_FILE);
        let content = tokio::fs::read_to_string(&metadata_path)
            .await
            .map_err(|e| CacheError::InvalidEntry {
                path: metadata_path.clone(),
                error: e.to_string(),
            })?;
        let metadata: PackageMetadata =
            serde_json::from_str(&content).map_err(|e| CacheError::InvalidEntry {
                path: metadata_path,
                error: e.to_string(),
            })?;

        let package = CachedPackage {
            variant: variant.clone(),
            entry,
            metadata,
            dir,
        };

        if let Some(artifact) = package.artifact_path() {
            if !artifact.is_file() {
                tracing::warn!("Cached artifact for {variant} is missing; treating as a miss");
                return Err(CacheError::NotInCache {
                    variant: variant.to_string(),
                });
            }
        }

        Ok(package)
    }

    /// Commit `variant` into the cache
    ///
    /// The staged artifact (if any) is moved into the variant directory,
    /// metadata is written, and the entry is written last. A binary variant
    /// also commits the agnostic metadata of its identity so shallow lookups
    /// hit. Callers must hold the variant lock.
    pub async fn store(
        &self,
        variant: &PackageVariant,
        metadata: &PackageMetadata,
        artifact: Option<StagedArtifact>,
        server: Option<&str>,
    ) -> Result<CachedPackage, CacheError> {
        let dir = self.variant_dir(variant);
        let io_error = |path: &Path, e: std::io::Error| CacheError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        let (checksum, file_name) = match artifact {
            Some(staged) => {
                let dest = dir.join(&staged.file_name);
                filesystem::move_file(&staged.path, &dest)
                    .await
                    .map_err(|e| io_error(&dest, e))?;
                (Some(staged.checksum), Some(staged.file_name))
            }
            None => (None, None),
        };

        self.write_metadata(&dir, metadata).await?;

        let entry = CacheEntry {
            checksum,
            file_name,
            server: server.map(str::to_string),
            last_verified: Utc::now(),
        };
        self.write_entry(variant, &entry).await?;

        if !variant.is_agnostic() {
            let agnostic = PackageVariant::agnostic(variant.identity.clone());
            if !self.is_in_cache(&agnostic) {
                let agnostic_dir = self.variant_dir(&agnostic);
                self.write_metadata(&agnostic_dir, &metadata.agnostic()).await?;
                let agnostic_entry = CacheEntry {
                    checksum: None,
                    file_name: None,
                    server: entry.server.clone(),
                    last_verified: entry.last_verified,
                };
                self.write_entry(&agnostic, &agnostic_entry).await?;
            }
        }

        tracing::debug!("Cached {variant}");

        Ok(CachedPackage {
            variant: variant.clone(),
            entry,
            metadata: metadata.clone(),
            dir,
        })
    }

    /// Record a successful checksum comparison against a server
    pub async fn touch(&self, variant: &PackageVariant) -> Result<(), CacheError> {
        let mut entry = self.entry(variant).await?;
        entry.last_verified = Utc::now();
        self.write_entry(variant, &entry).await
    }

    /// Drop `variant` from the cache; callers must hold the variant lock
    pub async fn invalidate(&self, variant: &PackageVariant) -> Result<(), CacheError> {
        let dir = self.variant_dir(variant);
        filesystem::remove_dir_all(&dir)
            .await
            .map_err(|e| CacheError::Io {
                path: dir,
                error: e.to_string(),
            })?;
        tracing::debug!("Invalidated cache entry for {variant}");
        Ok(())
    }

    /// Size and entry count of the cache
    pub fn info(&self) -> CacheInfo {
        let exists = self.root.exists();
        let (size_bytes, _) = if exists {
            filesystem::dir_stats(&self.root)
        } else {
            (0, 0)
        };
        let entry_count = if exists {
            walkdir::WalkDir::new(&self.root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && e.file_name() == defaults::CACHE_ENTRY_FILE)
                .count()
        } else {
            0
        };

        CacheInfo {
            path: self.root.clone(),
            size_bytes,
            entry_count,
            exists,
        }
    }

    /// Remove every cached package; returns the number of bytes freed
    pub async fn clean(&self) -> Result<u64, CacheError> {
        let size = self.info().size_bytes;
        filesystem::remove_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::Io {
                path: self.root.clone(),
                error: e.to_string(),
            })?;
        tracing::info!("Cleared package cache at {}", self.root.display());
        Ok(size)
    }

    async fn write_metadata(&self, dir: &Path, metadata: &PackageMetadata) -> Result<(), CacheError> {
        let path = dir.join(defaults::METADATA_FILE);
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| CacheError::InvalidEntry {
            path: path.clone(),
            error: e.to_string(),
        })?;
        filesystem::write_atomic(&path, &json)
            .await
            .map_err(|e| CacheError::Io {
                path,
                error: e.to_string(),
            })
    }

    async fn write_entry(&self, variant: &PackageVariant, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(variant);
        let content = toml::to_string_pretty(entry).map_err(|e| CacheError::InvalidEntry {
            path: path.clone(),
            error: e.to_string(),
        })?;
        filesystem::write_atomic(&path, content.as_bytes())
            .await
            .map_err(|e| CacheError::Io {
                path,
                error: e.to_string(),
            })
    }
}
