//! Phase-running commands
//!
//! `clean`, `build`, `test`, `package` and `install` all load the project,
//! register its plugins and hand the selected phase range to the
//! orchestrator; they differ only in the task switch they set.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::cli::output::OutputConfig;
use crate::core::builder::{BuildOrchestrator, BuildReport};
use crate::core::options::CommandOptions;
use crate::core::package_manager::PackageManager;
use crate::core::plugin_registry::{PluginLoader, PluginRegistry};
use crate::core::project::Project;
use crate::core::settings::Settings;
use crate::infra::dirs::PhasebuildDirs;

/// Everything one run needs, loaded before the first phase
#[derive(Debug)]
pub struct Session {
    pub project: Project,
    pub options: CommandOptions,
    pub packages: PackageManager,
    pub registry: PluginRegistry,
}

impl Session {
    /// Load descriptor, settings and plugins; any error here aborts before CLEAN
    pub fn open(
        project_dir: &Path,
        options: CommandOptions,
        loader: &PluginLoader,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let dirs = PhasebuildDirs::new();
        let settings = match &options.settings_file {
            Some(path) => Settings::load_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => Settings::load(&dirs).context("Failed to load settings")?,
        };

        let project = Project::load(project_dir, &options)
            .with_context(|| format!("Failed to load project in {}", project_dir.display()))?;
        tracing::info!(
            "Loaded {} (target: {})",
            project.identity(),
            project
                .current_target()
                .map_or("default", |t| t.name.as_str())
        );

        let packages = PackageManager::from_settings(&dirs, settings)
            .context("Failed to configure package repositories")?
            .with_cancellation(cancel.clone());

        let mut registry = PluginRegistry::new();
        loader
            .load(project.build_config(), project.current_target(), &mut registry)
            .context("Failed to load plugins")?;

        Ok(Self {
            project,
            options,
            packages,
            registry,
        })
    }

    /// Run the selected phases
    pub async fn run(&self, output: OutputConfig, cancel: CancellationToken) -> Result<BuildReport> {
        let spinner = output.spinner(&format!("Building {}", self.project.identity()));
        let result = BuildOrchestrator::new(&self.project, self.options.clone(), &self.packages, &self.registry)
            .with_cancellation(cancel)
            .run()
            .await;
        spinner.finish_and_clear();

        let report = result.context("Build failed")?;
        output.report(&report);
        Ok(report)
    }
}

/// Execute a phase-running command
pub async fn execute(
    project_dir: &Path,
    options: CommandOptions,
    output: OutputConfig,
    cancel: CancellationToken,
) -> Result<BuildReport> {
    let session = Session::open(project_dir, options, &PluginLoader::new(), &cancel)?;
    session.run(output, cancel).await
}
