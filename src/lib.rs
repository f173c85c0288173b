//! Phasebuild - native-project build orchestrator
//!
//! Drives a fixed sequence of build phases, invoking plugins bound to each
//! phase, and resolves, caches, fetches and publishes binary packages for
//! architecture/platform/toolchain variants.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Phases, descriptors, resolution, plugins and orchestration
//! - [`registry`] - Package cache and repository client
//! - [`infra`] - Infrastructure layer (network, filesystem, checksums)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod registry;

#[cfg(test)]
pub mod test_utils;
