//! Test utilities
//!
//! Generators for proptest and an in-memory package source for resolver and
//! orchestrator tests.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid group id (dotted lowercase segments)
    pub fn group_id() -> impl Strategy<Value = String> {
        proptest::collection::vec("[a-z][a-z0-9]{0,8}", 1..4).prop_map(|parts| parts.join("."))
    }

    /// Generate a valid artifact id (lowercase alphanumeric with hyphens)
    pub fn artifact_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,20}[a-z0-9]".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a valid semver version string
    pub fn semver_version() -> impl Strategy<Value = String> {
        (1u32..100, 0u32..100, 0u32..100)
            .prop_map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
    }

    /// Generate a valid SHA256 hash (64 hex characters)
    pub fn sha256_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    /// Generate a `(arch, platform, toolchain)` triple
    pub fn target_triple() -> impl Strategy<Value = (String, String, String)> {
        (
            prop_oneof![Just("x86_64"), Just("aarch64"), Just("riscv64")],
            prop_oneof![Just("linux"), Just("windows"), Just("macos")],
            prop_oneof![Just("gcc"), Just("clang"), Just("msvc")],
        )
            .prop_map(|(a, p, t)| (a.to_string(), p.to_string(), t.to_string()))
    }
}

#[cfg(test)]
pub mod fake_source {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::core::package::{
        Coordinate, DependencySpec, PackageIdentity, PackageMetadata, PackageVariant,
    };
    use crate::core::resolver::{Materialized, PackageSource};
    use crate::error::RepositoryError;
    use crate::registry::transport::VersionIndex;

    /// Package source backed by a map, recording every call
    #[derive(Debug, Default)]
    pub struct FakeSource {
        packages: HashMap<PackageIdentity, PackageMetadata>,
        pub metadata_calls: Mutex<Vec<PackageIdentity>>,
        pub materialized: Mutex<Vec<PackageVariant>>,
    }

    impl FakeSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register `id` (`group/artifact@version`) with dependency specs
        #[must_use]
        pub fn with(mut self, id: &str, deps: &[&str]) -> Self {
            let spec: DependencySpec = id.parse().unwrap_or_else(|e| panic!("bad id {id}: {e}"));
            let identity = spec.coordinate.with_version(spec.version.unwrap_or_default());
            let dependencies = deps
                .iter()
                .map(|d| d.parse().unwrap_or_else(|e| panic!("bad dep {d}: {e}")))
                .collect();
            self.packages.insert(
                identity.clone(),
                PackageMetadata {
                    identity,
                    target: None,
                    checksum: None,
                    file_name: None,
                    include_dir: None,
                    dependencies,
                    build: None,
                },
            );
            self
        }

        pub fn materialized_ids(&self) -> Vec<String> {
            self.materialized
                .lock()
                .unwrap()
                .iter()
                .map(|v| v.identity.to_string())
                .collect()
        }
    }

    #[async_trait]
    impl PackageSource for FakeSource {
        async fn resolve_version(&self, coordinate: &Coordinate) -> Result<Option<String>, RepositoryError> {
            let mut index = VersionIndex::default();
            for id in self.packages.keys().filter(|id| &id.coordinate() == coordinate) {
                index.insert(&id.version);
            }
            Ok(index.latest().map(str::to_string))
        }

        async fn metadata(&self, identity: &PackageIdentity) -> Result<PackageMetadata, RepositoryError> {
            self.metadata_calls.lock().unwrap().push(identity.clone());
            self.packages
                .get(identity)
                .cloned()
                .ok_or_else(|| RepositoryError::PackageNotFound {
                    package: identity.to_string(),
                    servers: vec!["fake".to_string()],
                })
        }

        async fn materialize(&self, variant: &PackageVariant) -> Result<Materialized, RepositoryError> {
            self.materialized.lock().unwrap().push(variant.clone());
            Ok(Materialized {
                location: PathBuf::from("/fake").join(variant.identity.to_string()),
                checksum: variant.target.as_ref().map(|_| "0".repeat(64)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_group_id_generator_yields_valid_specs(group in group_id(), artifact in artifact_id()) {
            let spec = format!("{group}/{artifact}");
            prop_assert!(spec.parse::<crate::core::package::DependencySpec>().is_ok());
        }

        #[test]
        fn test_semver_version_generator(version in semver_version()) {
            prop_assert!(semver::Version::parse(&version).is_ok());
        }

        #[test]
        fn test_sha256_hash_generator(hash in sha256_hash()) {
            prop_assert_eq!(hash.len(), 64);
            prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
