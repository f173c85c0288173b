//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};

use phasebuild::core::descriptor::BuildDescriptor;
use phasebuild::core::package_manager::PackageManager;
use phasebuild::core::packaging::PackageArtifact;
use phasebuild::core::project::Project;
use phasebuild::core::settings::Settings;
use phasebuild::infra::dirs::PhasebuildDirs;
use serde_json::json;
use tempfile::TempDir;

/// Test project context
///
/// A temporary directory holding a project at its root and an isolated
/// phasebuild home (cache, config, data) under `.home`.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Root of the isolated phasebuild directories
    pub fn home(&self) -> PathBuf {
        self.dir.path().join(".home")
    }

    pub fn dirs(&self) -> PhasebuildDirs {
        PhasebuildDirs::rooted_at(self.home())
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Write `build.json`
    pub fn write_descriptor(&self, descriptor: &serde_json::Value) {
        self.create_file(
            "build.json",
            &serde_json::to_string_pretty(descriptor).expect("Failed to serialize descriptor"),
        );
    }

    /// Write `settings.toml` into the isolated config directory
    pub fn write_settings(&self, settings: &Settings) {
        settings
            .save_to_path(&self.dirs().settings_path())
            .expect("Failed to write settings");
    }

    /// Package manager over the isolated directories
    pub fn package_manager(&self, settings: Settings) -> PackageManager {
        PackageManager::from_settings(&self.dirs(), settings).expect("Failed to create package manager")
    }

    /// Run the phasebuild binary in the project directory
    pub fn run(&self, args: &[&str]) -> Output {
        let dirs = self.dirs();
        Command::new(env!("CARGO_BIN_EXE_phasebuild"))
            .current_dir(self.path())
            .env("PHASEBUILD_CACHE_DIR", dirs.cache_dir())
            .env("PHASEBUILD_CONFIG_DIR", dirs.config_dir())
            .env("PHASEBUILD_DATA_DIR", dirs.data_dir())
            .env_remove("RUST_LOG")
            .args(args)
            .output()
            .expect("Failed to execute phasebuild")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Target used by packages that ship binaries
pub const LINUX_TARGET: (&str, &str, &str) = ("x86_64", "linux", "gcc");

/// Descriptor JSON for a library `group/artifact@version`
pub fn library_descriptor(
    id: &str,
    dependencies: &[&str],
    target: Option<(&str, &str, &str)>,
) -> serde_json::Value {
    let (coordinate, version) = id.split_once('@').expect("id must be group/artifact@version");
    let (group, artifact) = coordinate.split_once('/').expect("id must be group/artifact@version");
    let targets: Vec<serde_json::Value> = target
        .map(|(arch, platform, toolchain)| {
            json!({
                "name": format!("{arch}-{platform}"),
                "arch": arch,
                "platform": platform,
                "toolchain": toolchain,
            })
        })
        .into_iter()
        .collect();
    json!({
        "groupId": group,
        "artifactId": artifact,
        "version": version,
        "type": "static_library",
        "dependencies": dependencies,
        "targets": targets,
    })
}

/// Build and install a library into the manager's local repository
///
/// The library's build output is a single `lib<artifact>.a` whose content is
/// `payload`.
pub async fn install_library(
    manager: &PackageManager,
    id: &str,
    dependencies: &[&str],
    target: Option<(&str, &str, &str)>,
    payload: &str,
) -> PackageArtifact {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let descriptor = library_descriptor(id, dependencies, target);
    let descriptor = BuildDescriptor::from_json(&descriptor.to_string()).expect("invalid library descriptor");
    let target = descriptor.targets.first().cloned();
    let project = Project::new(descriptor, target, dir.path().to_path_buf());

    let build_dir = project.build_dir();
    std::fs::create_dir_all(&build_dir).expect("Failed to create build dir");
    std::fs::write(
        build_dir.join(format!("lib{}.a", project.artifact_id())),
        payload,
    )
    .expect("Failed to write build output");

    let (artifact, _) = manager
        .publish_local(&project)
        .await
        .expect("Failed to install library");
    artifact
}
