//! Core build logic
//!
//! # Submodules
//!
//! - [`phase`] - Build phases, phase sets and ranges
//! - [`package`] - Package identities, scopes, variants and metadata
//! - [`descriptor`] - Build descriptor (build.json) parsing and validation
//! - [`settings`] - User settings: servers, credentials, timeouts
//! - [`options`] - Command options and per-phase build intents
//! - [`project`] - The project being built
//! - [`packaging`] - Bundling build output into package artifacts
//! - [`resolver`] - Dependency resolution
//! - [`package_manager`] - Cache, fetch, update and publish facade
//! - [`plugin`] - Plugin contract and per-phase context
//! - [`plugin_registry`] - Plugin bindings and descriptor-driven loading
//! - [`builder`] - Phase orchestration

pub mod builder;
pub mod descriptor;
pub mod options;
pub mod package;
pub mod package_manager;
pub mod packaging;
pub mod phase;
pub mod plugin;
pub mod plugin_registry;
pub mod project;
pub mod resolver;
pub mod settings;
