//! Project packaging
//!
//! Bundles the build output of a project into one artifact blob plus the
//! `package.json` metadata published next to it. The blob is a JSON document
//! mapping relative paths to hex-encoded contents; everything downstream
//! treats it as opaque bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::package::{PackageIdentity, PackageMetadata, PackageVariant, TargetTriple};
use crate::core::project::Project;
use crate::error::RepositoryError;
use crate::infra::checksum::compute_checksum;

/// A packaged variant ready to be stored or published
#[derive(Debug, Clone, PartialEq)]
pub struct PackageArtifact {
    pub variant: PackageVariant,
    /// `<artifactId>-<version>.pkg`
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`
    pub checksum: String,
    /// Variant-level metadata, checksum included
    pub metadata: PackageMetadata,
}

/// Turns a project's build output into a [`PackageArtifact`]
pub trait Packager: Send + Sync {
    fn package(&self, project: &Project) -> Result<PackageArtifact, RepositoryError>;
}

/// Serialized bundle layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub identity: PackageIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetTriple>,
    /// Relative path (with `/` separators) to hex-encoded content
    pub files: BTreeMap<String, String>,
}

impl Bundle {
    /// Decode a bundle blob
    pub fn decode(bytes: &[u8]) -> Result<Self, RepositoryError> {
        serde_json::from_slice(bytes).map_err(|e| RepositoryError::Packaging {
            error: e.to_string(),
        })
    }

    /// Raw content of `path`, if bundled
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).and_then(|hex| hex::decode(hex).ok())
    }
}

/// Default packager: build dir contents (minus fetched dependencies) plus `package.includes`
#[derive(Debug, Clone, Copy, Default)]
pub struct BundlePackager;

impl BundlePackager {
    fn collect(
        root: &Path,
        skip: Option<&Path>,
        files: &mut BTreeMap<String, String>,
    ) -> Result<(), RepositoryError> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| skip.map_or(true, |s| e.path() != s));

        for entry in walker {
            let entry = entry.map_err(|e| RepositoryError::Packaging {
                error: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let content = std::fs::read(entry.path()).map_err(|e| RepositoryError::Io {
                path: entry.path().to_path_buf(),
                error: e.to_string(),
            })?;
            files.insert(relative_key(root, entry.path()), hex::encode(content));
        }
        Ok(())
    }
}

impl Packager for BundlePackager {
    fn package(&self, project: &Project) -> Result<PackageArtifact, RepositoryError> {
        let mut files = BTreeMap::new();

        let build_dir = project.build_dir();
        if build_dir.exists() {
            let deps = project.dependency_dir();
            Self::collect(&build_dir, Some(&deps), &mut files)?;
        }

        let includes = project
            .build_config()
            .package
            .as_ref()
            .map(|p| p.includes.clone())
            .unwrap_or_default();
        for include in includes {
            let path = project.base_dir().join(&include);
            if path.is_dir() {
                let mut nested = BTreeMap::new();
                Self::collect(&path, None, &mut nested)?;
                for (key, value) in nested {
                    files.insert(format!("{}/{key}", include.trim_end_matches('/')), value);
                }
            } else {
                let content = std::fs::read(&path).map_err(|e| RepositoryError::Io {
                    path: path.clone(),
                    error: e.to_string(),
                })?;
                files.insert(include.replace('\\', "/"), hex::encode(content));
            }
        }

        let variant = project.variant();
        let bundle = Bundle {
            identity: variant.identity.clone(),
            target: variant.target.clone(),
            files,
        };
        let bytes = serde_json::to_vec(&bundle).map_err(|e| RepositoryError::Packaging {
            error: e.to_string(),
        })?;
        let checksum = compute_checksum(&bytes);
        let file_name = variant.identity.artifact_file_name();

        let descriptor = project.build_config();
        let include_dir = project
            .current_target()
            .and_then(|t| t.include_dirs.first())
            .or_else(|| descriptor.include_dirs.first())
            .cloned();

        let metadata = PackageMetadata {
            identity: variant.identity.clone(),
            target: variant.target.clone(),
            checksum: Some(checksum.clone()),
            file_name: Some(file_name.clone()),
            include_dir,
            dependencies: descriptor.dependency_specs().map_err(|e| RepositoryError::Packaging {
                error: e.to_string(),
            })?,
            build: Some(descriptor.clone()),
        };

        tracing::debug!(
            "Packaged {} ({} files, {} bytes)",
            variant,
            bundle.files.len(),
            bytes.len()
        );

        Ok(PackageArtifact {
            variant,
            file_name,
            bytes,
            checksum,
            metadata,
        })
    }
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
