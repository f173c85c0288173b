//! Plugin registry and loader
//!
//! The registry is an ordered list of bindings; registration order is the
//! only tie-break for invocation order within a phase. The loader turns the
//! descriptor's plugin declarations into bindings using factories supplied
//! by the host program.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::descriptor::{BuildDescriptor, PluginEntry, TargetConfig};
use crate::core::package::Coordinate;
use crate::core::phase::{Phase, PhaseSet};
use crate::core::plugin::{Plugin, PluginConfig};
use crate::error::{ConfigError, PhasebuildError, PluginError};

/// Handle returned by registration, stable for the registry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(usize);

/// A plugin bound to a set of phases
#[derive(Clone)]
pub struct PluginBinding {
    plugin: Arc<dyn Plugin>,
    phases: PhaseSet,
    order: usize,
    config: PluginConfig,
}

impl PluginBinding {
    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn phases(&self) -> PhaseSet {
        self.phases
    }

    /// Position in registration order
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl fmt::Debug for PluginBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBinding")
            .field("plugin", &self.plugin.name())
            .field("phases", &self.phases)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    bindings: Vec<PluginBinding>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `plugin` to `phases` without configuration
    ///
    /// An empty phase set binds to every phase.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>, phases: PhaseSet) -> PluginHandle {
        self.push(plugin, phases, PluginConfig::default())
    }

    /// Bind `plugin` after validating `raw` against its config schema
    pub fn register_with_config(
        &mut self,
        plugin: Arc<dyn Plugin>,
        phases: PhaseSet,
        raw: Option<&serde_json::Value>,
    ) -> Result<PluginHandle, ConfigError> {
        let config = PluginConfig::for_plugin(plugin.as_ref(), raw)?;
        Ok(self.push(plugin, phases, config))
    }

    fn push(&mut self, plugin: Arc<dyn Plugin>, phases: PhaseSet, config: PluginConfig) -> PluginHandle {
        let order = self.bindings.len();
        let phases = if phases == PhaseSet::empty() {
            PhaseSet::all()
        } else {
            phases
        };
        tracing::debug!("Registered plugin '{}' (#{order}) for {phases:?}", plugin.name());
        self.bindings.push(PluginBinding {
            plugin,
            phases,
            order,
            config,
        });
        PluginHandle(order)
    }

    /// Bindings for `phase`, in registration order
    pub fn bindings_for(&self, phase: Phase) -> impl Iterator<Item = &PluginBinding> {
        self.bindings.iter().filter(move |b| b.phases.contains(phase))
    }

    pub fn get(&self, handle: PluginHandle) -> Option<&PluginBinding> {
        self.bindings.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

type PluginFactory = Box<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Resolves descriptor plugin declarations to plugin instances
///
/// Factories are keyed by group/artifact; the declared version is ignored.
#[derive(Default)]
pub struct PluginLoader {
    factories: HashMap<Coordinate, PluginFactory>,
    strict: bool,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on declarations with no factory instead of skipping them
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Provide the factory for `package` (`group/artifact`)
    pub fn register_factory<F>(&mut self, package: &str, factory: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        let spec: crate::core::package::DependencySpec = package.parse()?;
        self.factories.insert(spec.coordinate, Box::new(factory));
        Ok(())
    }

    pub fn knows(&self, coordinate: &Coordinate) -> bool {
        self.factories.contains_key(coordinate)
    }

    /// Register the descriptor's top-level plugins, then the target's
    pub fn load(
        &self,
        descriptor: &BuildDescriptor,
        target: Option<&TargetConfig>,
        registry: &mut PluginRegistry,
    ) -> Result<Vec<PluginHandle>, PhasebuildError> {
        let entries = descriptor
            .plugins
            .iter()
            .chain(target.into_iter().flat_map(|t| t.plugins.iter()));

        let mut handles = Vec::new();
        for entry in entries {
            if let Some(handle) = self.load_entry(entry, registry)? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    fn load_entry(
        &self,
        entry: &PluginEntry,
        registry: &mut PluginRegistry,
    ) -> Result<Option<PluginHandle>, PhasebuildError> {
        let spec = entry.spec()?;
        let phases = entry.phase_set()?;

        let Some(factory) = self.factories.get(&spec.coordinate) else {
            if self.strict {
                return Err(PluginError::Unknown {
                    package: spec.coordinate.to_string(),
                }
                .into());
            }
            tracing::warn!("No plugin available for '{}'; skipping", spec.coordinate);
            return Ok(None);
        };

        let handle = registry.register_with_config(factory(), phases, entry.config.as_ref())?;
        Ok(Some(handle))
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("strict", &self.strict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plugin::{ConfigFieldType, ConfigSchema, PhaseContext, PluginContext};
    use async_trait::async_trait;
    use serde_json::json;

    struct Named(&'static str);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn process(&self, _: &mut PhaseContext, _: &PluginContext<'_>) -> Result<(), PluginError> {
            Ok(())
        }
    }

    struct Typed;

    #[async_trait]
    impl Plugin for Typed {
        fn name(&self) -> &str {
            "typed"
        }

        fn config_schema(&self) -> Option<ConfigSchema> {
            Some(ConfigSchema::new().required("level", ConfigFieldType::Integer))
        }

        async fn process(&self, _: &mut PhaseContext, _: &PluginContext<'_>) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn names(registry: &PluginRegistry, phase: Phase) -> Vec<String> {
        registry
            .bindings_for(phase)
            .map(|b| b.name().to_string())
            .collect()
    }

    #[test]
    fn test_phase_specific_binding() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Named("compile-only")), PhaseSet::from_phases(&[Phase::Compile]));

        assert_eq!(names(&registry, Phase::Compile), vec!["compile-only"]);
        for phase in Phase::ALL.into_iter().filter(|p| *p != Phase::Compile) {
            assert!(names(&registry, phase).is_empty(), "invoked in {phase}");
        }
    }

    #[test]
    fn test_empty_phase_set_binds_all() {
        let mut registry = PluginRegistry::new();
        let handle = registry.register(Arc::new(Named("everywhere")), PhaseSet::empty());
        assert!(registry.get(handle).unwrap().phases().is_all());
        for phase in Phase::ALL {
            assert_eq!(names(&registry, phase), vec!["everywhere"]);
        }
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Named("a")), PhaseSet::all());
        registry.register(Arc::new(Named("b")), PhaseSet::from_phases(&[Phase::Link]));
        registry.register(Arc::new(Named("c")), PhaseSet::empty());
        registry.register(Arc::new(Named("d")), PhaseSet::from_phases(&[Phase::Compile, Phase::Link]));

        assert_eq!(names(&registry, Phase::Link), vec!["a", "b", "c", "d"]);
        assert_eq!(names(&registry, Phase::Compile), vec!["a", "c", "d"]);
        assert_eq!(names(&registry, Phase::Clean), vec!["a", "c"]);

        let orders: Vec<usize> = registry.bindings_for(Phase::Link).map(PluginBinding::order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_register_with_config_validates() {
        let mut registry = PluginRegistry::new();
        let handle = registry
            .register_with_config(Arc::new(Typed), PhaseSet::all(), Some(&json!({"level": 2})))
            .unwrap();
        assert_eq!(registry.get(handle).unwrap().config().get("level"), Some(&json!(2)));

        let err = registry
            .register_with_config(Arc::new(Typed), PhaseSet::all(), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPluginConfig { .. }));
        assert_eq!(registry.len(), 1);
    }

    fn descriptor() -> BuildDescriptor {
        BuildDescriptor::from_json(
            r#"{
                "groupId": "org.acme",
                "artifactId": "app",
                "version": "1.0.0",
                "plugins": [
                    { "package": "org.acme/stamp@1.0.0", "phases": ["COMPILE"] },
                    { "package": "org.other/missing" }
                ],
                "targets": [{
                    "name": "linux",
                    "arch": "x86_64",
                    "platform": "linux",
                    "toolchain": "gcc",
                    "plugins": [ { "package": "org.acme/typed", "config": { "level": 1 } } ]
                }]
            }"#,
        )
        .unwrap()
    }

    fn loader() -> PluginLoader {
        let mut loader = PluginLoader::new();
        loader
            .register_factory("org.acme/stamp", || Arc::new(Named("stamp")))
            .unwrap();
        loader.register_factory("org.acme/typed", || Arc::new(Typed)).unwrap();
        loader
    }

    #[test]
    fn test_loader_skips_unknown_plugins() {
        let descriptor = descriptor();
        let mut registry = PluginRegistry::new();
        let handles = loader()
            .load(&descriptor, descriptor.targets.first(), &mut registry)
            .unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(names(&registry, Phase::Compile), vec!["stamp", "typed"]);
        assert_eq!(names(&registry, Phase::Link), vec!["typed"]);
    }

    #[test]
    fn test_strict_loader_rejects_unknown_plugins() {
        let descriptor = descriptor();
        let mut registry = PluginRegistry::new();
        let err = loader()
            .strict(true)
            .load(&descriptor, None, &mut registry)
            .unwrap_err();
        assert!(matches!(
            err,
            PhasebuildError::Plugin(PluginError::Unknown { ref package }) if package == "org.other/missing"
        ));
    }

    #[test]
    fn test_loader_ignores_other_targets_without_selection() {
        let descriptor = descriptor();
        let mut registry = PluginRegistry::new();
        loader().load(&descriptor, None, &mut registry).unwrap();
        assert_eq!(names(&registry, Phase::Link), Vec::<String>::new());
    }
}
