//! Plugin contract
//!
//! A plugin is invoked once per phase it is bound to, with the live
//! [`PhaseContext`] of that phase and a [`PluginContext`] giving access to
//! the package manager, the project and the plugin's own configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::descriptor::{BuildDescriptor, TargetConfig};
use crate::core::options::CommandOptions;
use crate::core::package::ResolvedPackage;
use crate::core::package_manager::PackageManager;
use crate::core::phase::Phase;
use crate::core::project::Project;
use crate::error::{ConfigError, PluginError};

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Shape of the accepted configuration; `None` accepts anything untyped
    fn config_schema(&self) -> Option<ConfigSchema> {
        None
    }

    /// Run this plugin for the phase in `params`
    async fn process(&self, params: &mut PhaseContext, context: &PluginContext<'_>) -> Result<(), PluginError>;
}

/// State of one phase, handed to every plugin bound to it
///
/// Created fresh per phase and chained to the completed context of the
/// phase before it.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    phase: Phase,
    build_config: Arc<BuildDescriptor>,
    current_target: Option<Arc<TargetConfig>>,
    command_options: Arc<CommandOptions>,
    input_files: Vec<PathBuf>,
    solved_dependencies: Arc<Vec<ResolvedPackage>>,
    previous: Option<Arc<PhaseContext>>,
    default_suppressed: bool,
}

impl PhaseContext {
    pub fn new(
        phase: Phase,
        build_config: Arc<BuildDescriptor>,
        current_target: Option<Arc<TargetConfig>>,
        command_options: Arc<CommandOptions>,
    ) -> Self {
        Self {
            phase,
            build_config,
            current_target,
            command_options,
            input_files: Vec::new(),
            solved_dependencies: Arc::new(Vec::new()),
            previous: None,
            default_suppressed: false,
        }
    }

    /// Context for `phase` following the completed `previous` context
    ///
    /// Input files carry over; the default-suppressed flag starts unset.
    pub fn next(previous: Arc<PhaseContext>, phase: Phase) -> Self {
        Self {
            phase,
            build_config: previous.build_config.clone(),
            current_target: previous.current_target.clone(),
            command_options: previous.command_options.clone(),
            input_files: previous.input_files.clone(),
            solved_dependencies: Arc::new(Vec::new()),
            previous: Some(previous),
            default_suppressed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn build_config(&self) -> &BuildDescriptor {
        &self.build_config
    }

    pub fn current_target(&self) -> Option<&TargetConfig> {
        self.current_target.as_deref()
    }

    pub fn command_options(&self) -> &CommandOptions {
        &self.command_options
    }

    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// Append a file for this and later phases
    pub fn add_input_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.input_files.contains(&path) {
            self.input_files.push(path);
        }
    }

    pub fn set_input_files(&mut self, files: Vec<PathBuf>) {
        self.input_files = files;
    }

    /// Dependencies admitted by this phase's scope view, dependencies first
    pub fn solved_dependencies(&self) -> &[ResolvedPackage] {
        &self.solved_dependencies
    }

    pub fn set_solved_dependencies(&mut self, deps: Vec<ResolvedPackage>) {
        self.solved_dependencies = Arc::new(deps);
    }

    /// Completed context of the preceding phase
    pub fn previous_phase_params(&self) -> Option<&PhaseContext> {
        self.previous.as_deref()
    }

    /// Ask external tooling to skip this phase's built-in action
    ///
    /// Later plugins of the same phase still run.
    pub fn prevent_default(&mut self) {
        self.default_suppressed = true;
    }

    pub fn is_default_suppressed(&self) -> bool {
        self.default_suppressed
    }
}

/// Services available to a plugin during `process`
pub struct PluginContext<'a> {
    package_manager: &'a PackageManager,
    project: &'a Project,
    config: &'a PluginConfig,
}

impl<'a> PluginContext<'a> {
    pub fn new(package_manager: &'a PackageManager, project: &'a Project, config: &'a PluginConfig) -> Self {
        Self {
            package_manager,
            project,
            config,
        }
    }

    pub fn package_manager(&self) -> &PackageManager {
        self.package_manager
    }

    pub fn current_project(&self) -> &Project {
        self.project
    }

    pub fn plugin_config(&self) -> &PluginConfig {
        self.config
    }
}

impl fmt::Debug for PluginContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("project", &self.project.identity().to_string())
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

/// JSON type of one configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ConfigFieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ConfigFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigField {
    pub field_type: ConfigFieldType,
    pub required: bool,
}

/// Declared configuration shape of a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSchema {
    fields: BTreeMap<String, ConfigField>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional field
    #[must_use]
    pub fn optional(mut self, name: &str, field_type: ConfigFieldType) -> Self {
        self.fields.insert(
            name.to_string(),
            ConfigField {
                field_type,
                required: false,
            },
        );
        self
    }

    /// Declare a required field
    #[must_use]
    pub fn required(mut self, name: &str, field_type: ConfigFieldType) -> Self {
        self.fields.insert(
            name.to_string(),
            ConfigField {
                field_type,
                required: true,
            },
        );
        self
    }

    /// Check `raw` against this schema
    ///
    /// Absent configuration is an empty object. Undeclared keys are rejected.
    pub fn validate(&self, plugin: &str, raw: Option<&Value>) -> Result<Map<String, Value>, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidPluginConfig {
            plugin: plugin.to_string(),
            message,
        };

        let map = match raw {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => return Err(invalid(format!("expected an object, got {other}"))),
        };

        for (name, field) in &self.fields {
            match map.get(name) {
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(invalid(format!("field '{name}' must be a {}", field.field_type)));
                }
                None if field.required => {
                    return Err(invalid(format!("missing required field '{name}'")));
                }
                _ => {}
            }
        }

        if let Some(unknown) = map.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(invalid(format!("unknown field '{unknown}'")));
        }

        Ok(map)
    }
}

/// Configuration handed to a plugin
#[derive(Debug, Clone, PartialEq)]
pub enum PluginConfig {
    /// Checked against the plugin's schema
    Validated(Map<String, Value>),
    /// Plugin declares no schema; passed through as written
    Untyped(Value),
}

impl PluginConfig {
    /// Validate `raw` for `plugin`, falling back to untyped when it has no schema
    pub fn for_plugin(plugin: &dyn Plugin, raw: Option<&Value>) -> Result<Self, ConfigError> {
        match plugin.config_schema() {
            Some(schema) => schema.validate(plugin.name(), raw).map(Self::Validated),
            None => Ok(Self::Untyped(raw.cloned().unwrap_or(Value::Null))),
        }
    }

    /// Top-level field, for either shape
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Validated(map) => map.get(key),
            Self::Untyped(value) => value.get(key),
        }
    }

    /// Deserialize the whole configuration into a plugin-defined type
    pub fn parse<T: DeserializeOwned>(&self, plugin: &str) -> Result<T, ConfigError> {
        let value = match self {
            Self::Validated(map) => Value::Object(map.clone()),
            Self::Untyped(value) => value.clone(),
        };
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidPluginConfig {
            plugin: plugin.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::Untyped(Value::Null)
    }
}
