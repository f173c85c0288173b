//! The project being built
//!
//! A `Project` pairs the validated descriptor with the selected target and
//! the directories a run writes into.

use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::descriptor::{BuildDescriptor, TargetConfig};
use crate::core::options::CommandOptions;
use crate::core::package::{PackageIdentity, PackageVariant, TargetTriple};
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Project {
    descriptor: BuildDescriptor,
    target: Option<TargetConfig>,
    base_dir: PathBuf,
}

impl Project {
    /// Wrap an already validated descriptor
    pub fn new(descriptor: BuildDescriptor, target: Option<TargetConfig>, base_dir: PathBuf) -> Self {
        Self {
            descriptor,
            target,
            base_dir,
        }
    }

    /// Load `build.json` from `base_dir` and select the target `options` ask for
    pub fn load(base_dir: &Path, options: &CommandOptions) -> Result<Self, ConfigError> {
        let descriptor = BuildDescriptor::load(&base_dir.join(defaults::DESCRIPTOR_FILE))?;
        let target = descriptor
            .select_target(
                options.target.as_deref(),
                options.arch.as_deref(),
                options.platform.as_deref(),
            )?
            .cloned();
        Ok(Self::new(descriptor, target, base_dir.to_path_buf()))
    }

    pub fn build_config(&self) -> &BuildDescriptor {
        &self.descriptor
    }

    pub fn group_id(&self) -> &str {
        &self.descriptor.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.descriptor.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    pub fn identity(&self) -> PackageIdentity {
        self.descriptor.identity()
    }

    pub fn current_target(&self) -> Option<&TargetConfig> {
        self.target.as_ref()
    }

    /// Triple of the selected target; `None` builds the platform-agnostic variant
    pub fn target_triple(&self) -> Option<TargetTriple> {
        self.target.as_ref().map(TargetConfig::triple)
    }

    /// Variant this project produces
    pub fn variant(&self) -> PackageVariant {
        PackageVariant::new(self.identity(), self.target_triple())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/build/<target>`
    pub fn build_dir(&self) -> PathBuf {
        let target = self
            .target
            .as_ref()
            .map_or(defaults::DEFAULT_TARGET_DIR, |t| t.name.as_str());
        self.base_dir.join(defaults::BUILD_DIR).join(target)
    }

    /// `<build>/deps`
    pub fn dependency_dir(&self) -> PathBuf {
        self.build_dir().join(defaults::DEPENDENCY_DIR)
    }

    /// Source files of the target, falling back to the descriptor's list
    pub fn sources(&self) -> Vec<PathBuf> {
        let sources = match &self.target {
            Some(target) if !target.sources.is_empty() => &target.sources,
            _ => &self.descriptor.sources,
        };
        sources.iter().map(|s| self.base_dir.join(s)).collect()
    }

    pub fn test_sources(&self) -> Vec<PathBuf> {
        self.descriptor
            .test_sources
            .iter()
            .map(|s| self.base_dir.join(s))
            .collect()
    }
}
