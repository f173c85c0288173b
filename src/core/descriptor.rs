//! Build descriptor (`build.json`) parsing and validation
//!
//! The descriptor is parsed once per run and validated before any phase
//! starts; everything it declares is immutable afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::package::{DependencySpec, PackageIdentity, TargetTriple};
use crate::core::phase::PhaseSet;
use crate::error::ConfigError;

/// Kind of artifact a project produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArtifactType {
    #[serde(rename = "executable")]
    Executable,
    #[serde(rename = "shared_library")]
    SharedLibrary,
    #[serde(rename = "static library", alias = "static_library")]
    StaticLibrary,
    #[serde(rename = "driver")]
    Driver,
    #[default]
    #[serde(rename = "none")]
    None,
}

/// Compiler options of a target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

/// Linker options of a target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_information: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<serde_json::Value>,
}

/// A plugin declaration: `{ package, phases?, config? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// `group/artifact[@version][:scope]`
    pub package: String,

    /// Phase names; empty means every phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<String>,

    /// Plugin-specific configuration, validated against the plugin's schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl PluginEntry {
    pub fn spec(&self) -> Result<DependencySpec, ConfigError> {
        self.package.parse()
    }

    pub fn phase_set(&self) -> Result<PhaseSet, ConfigError> {
        PhaseSet::parse(&self.phases)
    }
}

/// One build target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub name: String,
    pub arch: String,
    pub platform: String,
    pub toolchain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<CompileOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defines: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_options: Option<LinkOptions>,
}

impl TargetConfig {
    pub fn triple(&self) -> TargetTriple {
        TargetTriple::new(&self.arch, &self.platform, &self.toolchain)
    }
}

/// Packaging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra files, relative to the project directory, bundled into the artifact
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other: Vec<String>,
}

/// The project build descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDescriptor {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,

    #[serde(rename = "type", default)]
    pub artifact_type: ArtifactType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// `group/artifact[@version][:scope]` strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetConfig>,
}

impl BuildDescriptor {
    /// Parse and validate a descriptor from JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let descriptor: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::DescriptorParse {
                path: crate::config::defaults::DESCRIPTOR_FILE.into(),
                error: e.to_string(),
            })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Load and validate the descriptor at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::DescriptorNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::DescriptorParse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let descriptor: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::DescriptorParse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check every field that later phases rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("groupId", &self.group_id),
            ("artifactId", &self.artifact_id),
            ("version", &self.version),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        // The project identity must itself be a valid package spec.
        format!("{}/{}@{}", self.group_id, self.artifact_id, self.version)
            .parse::<DependencySpec>()
            .map_err(|_| ConfigError::InvalidField {
                field: "groupId/artifactId".to_string(),
                message: "only letters, digits, '.', '_' and '-' are allowed".to_string(),
            })?;

        semver::Version::parse(&self.version).map_err(|e| ConfigError::InvalidField {
            field: "version".to_string(),
            message: e.to_string(),
        })?;

        self.dependency_specs()?;

        for target in &self.targets {
            for (field, value) in [
                ("name", &target.name),
                ("arch", &target.arch),
                ("platform", &target.platform),
                ("toolchain", &target.toolchain),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingField {
                        field: format!("targets[].{field}"),
                    });
                }
            }
        }

        for entry in self.all_plugin_entries() {
            entry.spec()?;
            entry.phase_set()?;
        }

        Ok(())
    }

    /// The project's own identity
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.group_id, &self.artifact_id, &self.version)
    }

    /// Parsed dependency declarations, in declaration order
    pub fn dependency_specs(&self) -> Result<Vec<DependencySpec>, ConfigError> {
        self.dependencies.iter().map(|d| d.parse()).collect()
    }

    /// Top-level plugin entries followed by every target's entries
    pub fn all_plugin_entries(&self) -> impl Iterator<Item = &PluginEntry> {
        self.plugins
            .iter()
            .chain(self.targets.iter().flat_map(|t| t.plugins.iter()))
    }

    /// Pick the target to build
    ///
    /// By name when given, otherwise the first target matching `arch` and
    /// `platform`, otherwise the first target. `Ok(None)` when the descriptor
    /// declares no targets.
    pub fn select_target(
        &self,
        name: Option<&str>,
        arch: Option<&str>,
        platform: Option<&str>,
    ) -> Result<Option<&TargetConfig>, ConfigError> {
        if let Some(name) = name {
            return self
                .targets
                .iter()
                .find(|t| t.name == name)
                .map(Some)
                .ok_or_else(|| ConfigError::TargetNotFound {
                    selector: format!("name '{name}'"),
                });
        }

        if arch.is_some() || platform.is_some() {
            return self
                .targets
                .iter()
                .find(|t| {
                    arch.map_or(true, |a| t.arch == a) && platform.map_or(true, |p| t.platform == p)
                })
                .map(Some)
                .ok_or_else(|| ConfigError::TargetNotFound {
                    selector: format!(
                        "arch '{}' / platform '{}'",
                        arch.unwrap_or("*"),
                        platform.unwrap_or("*")
                    ),
                });
        }

        Ok(self.targets.first())
    }
}
