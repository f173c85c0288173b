//! Build orchestration
//!
//! Walks the contiguous phase range a run selects. For each phase it builds
//! a fresh [`PhaseContext`] chained to the previous one, runs the resolver
//! when entering `RESOLVE_DEPENDENCIES`, invokes the bound plugins one after
//! another in registration order, and then runs the phase's built-in action
//! unless a plugin suppressed it.
//!
//! The first failing plugin stops the run at that phase. Nothing from
//! earlier phases is rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::options::{BuildIntent, CommandOptions};
use crate::core::package::ScopeSet;
use crate::core::package_manager::PackageManager;
use crate::core::phase::Phase;
use crate::core::plugin::{PhaseContext, PluginContext};
use crate::core::plugin_registry::PluginRegistry;
use crate::core::project::Project;
use crate::core::resolver::{Resolution, Resolver};
use crate::error::{BuildError, RepositoryError, ResolverError};
use crate::infra::filesystem;
use crate::registry::client::PublishOutcome;

/// What a phase's built-in action produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Nothing to report
    Done,
    /// Build directory removed; `cache_bytes` freed when the cache was cleared too
    Cleaned { cache_bytes: Option<u64> },
    /// Project bundled
    Packaged { file_name: String, checksum: String },
    /// Project installed into the local repository
    Installed {
        variant: String,
        checksum: String,
        outcome: PublishOutcome,
    },
}

/// Built-in behavior of each phase, run after its plugins
#[async_trait]
pub trait PhaseActions: Send + Sync {
    async fn run(
        &self,
        params: &PhaseContext,
        project: &Project,
        packages: &PackageManager,
    ) -> Result<ActionOutcome, BuildError>;
}

/// Default phase behavior
///
/// Compiling, linking and running tests are left to plugins; the built-in
/// actions only manage the build directory, packaging and installation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardActions;

#[async_trait]
impl PhaseActions for StandardActions {
    async fn run(
        &self,
        params: &PhaseContext,
        project: &Project,
        packages: &PackageManager,
    ) -> Result<ActionOutcome, BuildError> {
        let phase = params.phase();
        match phase {
            Phase::Clean => {
                let build_dir = project.build_dir();
                filesystem::remove_dir_all(&build_dir)
                    .await
                    .map_err(|e| BuildError::DefaultActionFailed {
                        phase,
                        message: format!("cannot remove {}: {e}", build_dir.display()),
                    })?;
                tracing::info!("Removed {}", build_dir.display());

                let cache_bytes = if params.command_options().all {
                    let freed = packages
                        .clean_cache()
                        .await
                        .map_err(|source| BuildError::Packaging { phase, source })?;
                    tracing::info!("Cleared package cache ({freed} bytes)");
                    Some(freed)
                } else {
                    None
                };
                Ok(ActionOutcome::Cleaned { cache_bytes })
            }
            Phase::Compile => {
                let build_dir = project.build_dir();
                tokio::fs::create_dir_all(&build_dir)
                    .await
                    .map_err(|e| BuildError::DefaultActionFailed {
                        phase,
                        message: format!("cannot create {}: {e}", build_dir.display()),
                    })?;
                tracing::debug!(
                    "{} input files, {} dependencies visible to the compiler",
                    params.input_files().len(),
                    params.solved_dependencies().len()
                );
                Ok(ActionOutcome::Done)
            }
            Phase::Package => {
                let artifact = packages
                    .package_project(project)
                    .map_err(|source| BuildError::Packaging { phase, source })?;
                tracing::info!("Packaged {} ({})", artifact.file_name, artifact.checksum);
                Ok(ActionOutcome::Packaged {
                    file_name: artifact.file_name,
                    checksum: artifact.checksum,
                })
            }
            Phase::Install => {
                let (artifact, outcome) = packages
                    .publish_local(project)
                    .await
                    .map_err(|source| BuildError::Packaging { phase, source })?;
                Ok(ActionOutcome::Installed {
                    variant: artifact.variant.to_string(),
                    checksum: artifact.checksum,
                    outcome,
                })
            }
            Phase::ResolveDependencies | Phase::Link | Phase::Test => Ok(ActionOutcome::Done),
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Phases entered and finished, in order
    pub completed: Vec<Phase>,
    /// Phases whose built-in action was skipped
    pub suppressed: Vec<Phase>,
    /// Built-in action results, by phase
    pub outcomes: Vec<(Phase, ActionOutcome)>,
    /// Full resolution, before any per-phase filtering
    pub resolution: Resolution,
}

impl BuildReport {
    pub fn outcome(&self, phase: Phase) -> Option<&ActionOutcome> {
        self.outcomes
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, outcome)| outcome)
    }

    pub fn was_suppressed(&self, phase: Phase) -> bool {
        self.suppressed.contains(&phase)
    }
}

pub struct BuildOrchestrator<'a> {
    project: &'a Project,
    options: Arc<CommandOptions>,
    packages: &'a PackageManager,
    registry: &'a PluginRegistry,
    actions: Box<dyn PhaseActions>,
    cancel: CancellationToken,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(
        project: &'a Project,
        options: CommandOptions,
        packages: &'a PackageManager,
        registry: &'a PluginRegistry,
    ) -> Self {
        Self {
            project,
            options: Arc::new(options),
            packages,
            registry,
            actions: Box::new(StandardActions),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_actions(mut self, actions: Box<dyn PhaseActions>) -> Self {
        self.actions = actions;
        self
    }

    /// Stop at the next phase or fetch boundary once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every phase the command options select
    pub async fn run(&self) -> Result<BuildReport, BuildError> {
        let mut report = BuildReport::default();
        let Some(range) = self.options.phase_range() else {
            tracing::warn!("No task selected; nothing to do");
            return Ok(report);
        };

        let suppressed = self.options.suppressed_phases();
        let filter = CommandOptions::resolution_scopes(&range);
        let build_config = Arc::new(self.project.build_config().clone());
        let target = self.project.current_target().cloned().map(Arc::new);

        tracing::info!(
            "Building {} ({} to {})",
            self.project.identity(),
            range.first(),
            range.last()
        );

        let mut previous: Option<Arc<PhaseContext>> = None;
        for phase in range.phases() {
            if self.cancel.is_cancelled() {
                return Err(BuildError::Cancelled { phase });
            }
            tracing::info!("Entering {phase}");

            let mut params = match previous.take() {
                Some(prev) => PhaseContext::next(prev, phase),
                None => {
                    let mut first = PhaseContext::new(
                        phase,
                        build_config.clone(),
                        target.clone(),
                        self.options.clone(),
                    );
                    first.set_input_files(self.project.sources());
                    first
                }
            };
            if phase == Phase::Test {
                for file in self.project.test_sources() {
                    params.add_input_file(file);
                }
            }

            if phase == Phase::ResolveDependencies {
                report.resolution = self.resolve(phase, filter).await?;
            }
            params.set_solved_dependencies(report.resolution.filtered(BuildIntent::for_phase(phase)));

            if suppressed.contains(phase) {
                params.prevent_default();
            }

            for binding in self.registry.bindings_for(phase) {
                tracing::debug!("Running plugin '{}' for {phase}", binding.name());
                let context = PluginContext::new(self.packages, self.project, binding.config());
                binding
                    .plugin()
                    .process(&mut params, &context)
                    .await
                    .map_err(|source| {
                        tracing::error!("Plugin '{}' failed during {phase}: {source}", binding.name());
                        BuildError::PluginFailed {
                            phase,
                            plugin: binding.name().to_string(),
                            source,
                        }
                    })?;
            }

            if params.is_default_suppressed() {
                tracing::info!("Default action for {phase} suppressed");
                report.suppressed.push(phase);
            } else {
                let outcome = self.actions.run(&params, self.project, self.packages).await?;
                report.outcomes.push((phase, outcome));
            }

            report.completed.push(phase);
            tracing::debug!("Finished {phase}");
            previous = Some(Arc::new(params));
        }

        Ok(report)
    }

    async fn resolve(&self, phase: Phase, filter: ScopeSet) -> Result<Resolution, BuildError> {
        let specs = self
            .project
            .build_config()
            .dependency_specs()
            .map_err(|source| BuildError::InvalidDescriptor { phase, source })?;

        let resolver = Resolver::new(self.packages, self.project.target_triple())
            .with_parallelism(self.packages.settings().parallel_fetches())
            .with_cancellation(self.cancel.clone());

        match resolver.resolve(&self.project.identity(), &specs, filter).await {
            Ok(resolution) => {
                tracing::info!("Resolved {} dependencies", resolution.len());
                Ok(resolution)
            }
            Err(
                ResolverError::Cancelled
                | ResolverError::Repository(RepositoryError::Cancelled { .. }),
            ) => Err(BuildError::Cancelled { phase }),
            Err(source) => Err(BuildError::ResolutionFailed { phase, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::BuildDescriptor;
    use crate::core::options::Task;
    use crate::core::phase::PhaseSet;
    use crate::core::plugin::Plugin;
    use crate::core::settings::Settings;
    use crate::error::PluginError;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records `(plugin, phase, suppressed-on-entry)` for every call
    #[derive(Default)]
    struct Journal(Mutex<Vec<(String, Phase, bool)>>);

    impl Journal {
        fn calls(&self) -> Vec<(String, Phase)> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|(n, p, _)| (n.clone(), *p))
                .collect()
        }

        fn suppressed_on_entry(&self, name: &str, phase: Phase) -> Option<bool> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(n, p, _)| n == name && *p == phase)
                .map(|(_, _, s)| *s)
        }
    }

    struct Recorder {
        name: &'static str,
        journal: Arc<Journal>,
        prevent_in: Option<Phase>,
        fail_in: Option<Phase>,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Arc<Journal>) -> Self {
            Self {
                name,
                journal: journal.clone(),
                prevent_in: None,
                fail_in: None,
            }
        }
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(&self, params: &mut PhaseContext, _: &PluginContext<'_>) -> Result<(), PluginError> {
            self.journal.0.lock().unwrap().push((
                self.name.to_string(),
                params.phase(),
                params.is_default_suppressed(),
            ));
            if self.fail_in == Some(params.phase()) {
                return Err(PluginError::failed("compiler exploded"));
            }
            if self.prevent_in == Some(params.phase()) {
                params.prevent_default();
            }
            Ok(())
        }
    }

    /// Generates an object file during COMPILE so later phases see it
    struct ObjectEmitter;

    #[async_trait]
    impl Plugin for ObjectEmitter {
        fn name(&self) -> &str {
            "emitter"
        }

        async fn process(&self, params: &mut PhaseContext, context: &PluginContext<'_>) -> Result<(), PluginError> {
            let out = context.current_project().build_dir().join("main.o");
            tokio::fs::create_dir_all(context.current_project().build_dir()).await?;
            tokio::fs::write(&out, b"obj").await?;
            params.add_input_file(out);
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        project: Project,
        packages: PackageManager,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let descriptor = BuildDescriptor::from_json(
            r#"{
                "groupId": "org.acme",
                "artifactId": "app",
                "version": "1.0.0",
                "sources": ["src/main.c"],
                "testSources": ["test/main_test.c"]
            }"#,
        )
        .unwrap();
        let project = Project::new(descriptor, None, dir.path().join("project"));
        let packages = PackageManager::new(
            dir.path().join("cache"),
            dir.path().join("repository"),
            Settings::default(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            project,
            packages,
        }
    }

    #[tokio::test]
    async fn test_compile_only_plugin_runs_once() {
        let f = fixture();
        let journal = Arc::new(Journal::default());
        let mut registry = PluginRegistry::new();
        registry.register(
            Arc::new(Recorder::new("cc", &journal)),
            PhaseSet::from_phases(&[Phase::Compile]),
        );

        let mut options = CommandOptions::for_task(Task::Package);
        options.all = true;
        BuildOrchestrator::new(&f.project, options, &f.packages, &registry)
            .run()
            .await
            .unwrap();

        assert_eq!(journal.calls(), vec![("cc".to_string(), Phase::Compile)]);
    }

    #[tokio::test]
    async fn test_plugins_run_in_registration_order_per_phase() {
        let f = fixture();
        let journal = Arc::new(Journal::default());
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Recorder::new("a", &journal)), PhaseSet::all());
        registry.register(
            Arc::new(Recorder::new("b", &journal)),
            PhaseSet::from_phases(&[Phase::Link]),
        );
        registry.register(Arc::new(Recorder::new("c", &journal)), PhaseSet::empty());

        let report = BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Build), &f.packages, &registry)
            .run()
            .await
            .unwrap();

        assert_eq!(
            report.completed,
            vec![Phase::ResolveDependencies, Phase::Compile, Phase::Link]
        );
        let expected: Vec<(String, Phase)> = [
            ("a", Phase::ResolveDependencies),
            ("c", Phase::ResolveDependencies),
            ("a", Phase::Compile),
            ("c", Phase::Compile),
            ("a", Phase::Link),
            ("b", Phase::Link),
            ("c", Phase::Link),
        ]
        .into_iter()
        .map(|(n, p)| (n.to_string(), p))
        .collect();
        assert_eq!(journal.calls(), expected);
    }

    #[tokio::test]
    async fn test_prevent_default_lasts_one_phase() {
        let f = fixture();
        let journal = Arc::new(Journal::default());
        let mut registry = PluginRegistry::new();
        let mut first = Recorder::new("first", &journal);
        first.prevent_in = Some(Phase::Link);
        registry.register(Arc::new(first), PhaseSet::all());
        registry.register(Arc::new(Recorder::new("second", &journal)), PhaseSet::all());

        let report = BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Test), &f.packages, &registry)
            .run()
            .await
            .unwrap();

        assert_eq!(journal.suppressed_on_entry("second", Phase::Link), Some(true));
        assert_eq!(journal.suppressed_on_entry("first", Phase::Test), Some(false));
        assert_eq!(report.suppressed, vec![Phase::Link]);
        assert!(report.outcome(Phase::Test).is_some());
    }

    #[tokio::test]
    async fn test_no_tests_enters_test_suppressed() {
        let f = fixture();
        let journal = Arc::new(Journal::default());
        let mut registry = PluginRegistry::new();
        registry.register(
            Arc::new(Recorder::new("runner", &journal)),
            PhaseSet::from_phases(&[Phase::Test]),
        );

        let mut options = CommandOptions::for_task(Task::Test);
        options.no_tests = true;
        let report = BuildOrchestrator::new(&f.project, options, &f.packages, &registry)
            .run()
            .await
            .unwrap();

        assert_eq!(journal.suppressed_on_entry("runner", Phase::Test), Some(true));
        assert!(report.was_suppressed(Phase::Test));
        assert_eq!(report.completed.last(), Some(&Phase::Test));
    }

    #[tokio::test]
    async fn test_plugin_failure_aborts_run() {
        let f = fixture();
        let journal = Arc::new(Journal::default());
        let mut registry = PluginRegistry::new();
        let mut cc = Recorder::new("cc", &journal);
        cc.fail_in = Some(Phase::Compile);
        registry.register(Arc::new(cc), PhaseSet::all());
        registry.register(Arc::new(Recorder::new("after", &journal)), PhaseSet::all());

        let err = BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Install), &f.packages, &registry)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Phase::Compile);
        assert!(matches!(err, BuildError::PluginFailed { ref plugin, .. } if plugin == "cc"));
        let calls = journal.calls();
        assert!(!calls.contains(&("after".to_string(), Phase::Compile)));
        assert!(calls.iter().all(|(_, p)| *p <= Phase::Compile));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_phase() {
        let f = fixture();
        let registry = PluginRegistry::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Build), &f.packages, &registry)
            .with_cancellation(token)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled { phase: Phase::ResolveDependencies }));
    }

    #[tokio::test]
    async fn test_input_files_flow_between_phases() {
        let f = fixture();
        let journal = Arc::new(Journal::default());
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(ObjectEmitter), PhaseSet::from_phases(&[Phase::Compile]));

        struct Check(Arc<Journal>);

        #[async_trait]
        impl Plugin for Check {
            fn name(&self) -> &str {
                "check"
            }

            async fn process(&self, params: &mut PhaseContext, _: &PluginContext<'_>) -> Result<(), PluginError> {
                let has_object = params
                    .input_files()
                    .iter()
                    .any(|p| p.ends_with("main.o"));
                let has_test = params
                    .input_files()
                    .iter()
                    .any(|p| p.ends_with("test/main_test.c"));
                let in_test = params.phase() == Phase::Test;
                if !has_object || has_test != in_test {
                    return Err(PluginError::failed(format!("unexpected inputs in {}", params.phase())));
                }
                let previous = params.previous_phase_params().map(PhaseContext::phase);
                if in_test && previous != Some(Phase::Link) {
                    return Err(PluginError::failed("TEST must follow LINK"));
                }
                self.0.0.lock().unwrap().push(("check".into(), params.phase(), false));
                Ok(())
            }
        }

        registry.register(
            Arc::new(Check(journal.clone())),
            PhaseSet::from_phases(&[Phase::Link, Phase::Test]),
        );

        BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Test), &f.packages, &registry)
            .run()
            .await
            .unwrap();
        assert_eq!(
            journal.calls(),
            vec![("check".to_string(), Phase::Link), ("check".to_string(), Phase::Test)]
        );
    }

    #[tokio::test]
    async fn test_install_publishes_to_local_repository() {
        let f = fixture();
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(ObjectEmitter), PhaseSet::from_phases(&[Phase::Compile]));

        let report = BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Install), &f.packages, &registry)
            .run()
            .await
            .unwrap();

        let Some(ActionOutcome::Packaged { checksum: packaged, .. }) = report.outcome(Phase::Package) else {
            panic!("missing package outcome");
        };
        let Some(ActionOutcome::Installed { checksum, outcome, .. }) = report.outcome(Phase::Install) else {
            panic!("missing install outcome");
        };
        assert_eq!(packaged, checksum);
        assert_eq!(outcome, &PublishOutcome::Published);

        let repo_version = f
            .packages
            .resolve_version(&f.project.identity().coordinate())
            .await
            .unwrap();
        assert_eq!(repo_version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_clean_removes_build_dir() {
        let f = fixture();
        let build_dir: PathBuf = f.project.build_dir();
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::write(build_dir.join("stale.o"), b"x").unwrap();

        let registry = PluginRegistry::new();
        let report = BuildOrchestrator::new(&f.project, CommandOptions::for_task(Task::Clean), &f.packages, &registry)
            .run()
            .await
            .unwrap();

        assert_eq!(report.completed, vec![Phase::Clean]);
        assert_eq!(
            report.outcome(Phase::Clean),
            Some(&ActionOutcome::Cleaned { cache_bytes: None })
        );
        assert!(!build_dir.exists());
    }
}
