//! Integration tests for dependency resolution
//!
//! Packages are installed into an isolated local repository through the
//! real packaging and publish path, then resolved with the package manager
//! as the source.

mod common;

use common::{install_library, TestProject, LINUX_TARGET};
use phasebuild::core::options::BuildIntent;
use phasebuild::core::package::{
    Coordinate, DependencySpec, PackageIdentity, Scope, ScopeSet, TargetTriple,
};
use phasebuild::core::package_manager::PackageManager;
use phasebuild::core::resolver::{Resolution, Resolver};
use phasebuild::core::settings::Settings;
use phasebuild::error::{RepositoryError, ResolverError};

fn specs(list: &[&str]) -> Vec<DependencySpec> {
    list.iter().map(|s| s.parse().unwrap()).collect()
}

fn root() -> PackageIdentity {
    PackageIdentity::new("org.acme", "app", "1.0.0")
}

fn linux() -> Option<TargetTriple> {
    let (arch, platform, toolchain) = LINUX_TARGET;
    Some(TargetTriple::new(arch, platform, toolchain))
}

async fn resolve(
    manager: &PackageManager,
    deps: &[&str],
    intent: BuildIntent,
) -> Result<Resolution, ResolverError> {
    Resolver::new(manager, linux())
        .with_parallelism(4)
        .resolve(&root(), &specs(deps), intent.scopes())
        .await
}

fn position(resolution: &Resolution, artifact: &str) -> usize {
    resolution
        .packages()
        .iter()
        .position(|p| p.identity().artifact_id == artifact)
        .unwrap_or_else(|| panic!("{artifact} not resolved"))
}

#[tokio::test]
async fn test_diamond_nearest_first_declaration_wins() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    let t = Some(LINUX_TARGET);
    install_library(&manager, "org.acme/c@1.0.0", &[], t, "c1").await;
    install_library(&manager, "org.acme/c@2.0.0", &[], t, "c2").await;
    install_library(&manager, "org.acme/a@1.0.0", &["org.acme/c@1.0.0"], t, "a").await;
    install_library(&manager, "org.acme/b@1.0.0", &["org.acme/c@2.0.0"], t, "b").await;

    let resolution = resolve(
        &manager,
        &["org.acme/a@1.0.0", "org.acme/b@1.0.0"],
        BuildIntent::Compile,
    )
    .await
    .unwrap();

    assert_eq!(resolution.len(), 3);
    let c = resolution.find(&Coordinate::new("org.acme", "c")).unwrap();
    assert_eq!(c.identity().version, "1.0.0");
    assert!(c.checksum.is_some());
    assert!(position(&resolution, "c") < position(&resolution, "a"));
    assert!(position(&resolution, "c") < position(&resolution, "b"));
}

#[tokio::test]
async fn test_direct_declaration_beats_transitive() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    let t = Some(LINUX_TARGET);
    install_library(&manager, "org.acme/c@1.0.0", &[], t, "c1").await;
    install_library(&manager, "org.acme/c@2.0.0", &[], t, "c2").await;
    install_library(&manager, "org.acme/a@1.0.0", &["org.acme/c@1.0.0"], t, "a").await;

    let resolution = resolve(
        &manager,
        &["org.acme/a@1.0.0", "org.acme/c@2.0.0"],
        BuildIntent::Compile,
    )
    .await
    .unwrap();

    let c = resolution.find(&Coordinate::new("org.acme", "c")).unwrap();
    assert_eq!(c.identity().version, "2.0.0");
}

#[tokio::test]
async fn test_cycle_is_reported_with_path() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    let t = Some(LINUX_TARGET);
    install_library(&manager, "org.acme/x@1.0.0", &["org.acme/y@1.0.0"], t, "x").await;
    install_library(&manager, "org.acme/y@1.0.0", &["org.acme/x@1.0.0"], t, "y").await;

    let err = resolve(&manager, &["org.acme/x@1.0.0"], BuildIntent::Compile)
        .await
        .unwrap_err();

    let ResolverError::CircularDependency { cycle } = err else {
        panic!("expected a cycle, got {err}");
    };
    assert!(cycle.iter().any(|n| n.contains("org.acme/x")));
    assert!(cycle.iter().any(|n| n.contains("org.acme/y")));
    assert_eq!(cycle.first(), cycle.last());
}

#[tokio::test]
async fn test_test_scope_is_a_projection() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    let t = Some(LINUX_TARGET);
    install_library(&manager, "org.acme/harness@1.0.0", &[], t, "h").await;
    install_library(&manager, "org.acme/mock@1.0.0", &[], t, "m").await;
    install_library(
        &manager,
        "org.acme/core@1.0.0",
        &["org.acme/mock@1.0.0:test"],
        t,
        "core",
    )
    .await;

    let deps = ["org.acme/core@1.0.0", "org.acme/harness@1.0.0:test"];

    let compile = resolve(&manager, &deps, BuildIntent::Compile).await.unwrap();
    assert!(compile.find(&Coordinate::new("org.acme", "harness")).is_none());
    assert!(compile.find(&Coordinate::new("org.acme", "core")).is_some());

    let test = resolve(&manager, &deps, BuildIntent::Test).await.unwrap();
    let harness = test.find(&Coordinate::new("org.acme", "harness")).unwrap();
    assert_eq!(harness.scopes, ScopeSet::of(&[Scope::Test]));
    assert!(test.filtered(BuildIntent::Install).iter().all(|p| p.identity().artifact_id != "harness"));

    // Test dependencies of dependencies are never followed.
    assert!(test.find(&Coordinate::new("org.acme", "mock")).is_none());
}

#[tokio::test]
async fn test_unversioned_dependency_takes_highest_version() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    let t = Some(LINUX_TARGET);
    install_library(&manager, "org.acme/d@1.2.0", &[], t, "d12").await;
    install_library(&manager, "org.acme/d@1.10.0", &[], t, "d110").await;
    install_library(&manager, "org.acme/d@1.9.3", &[], t, "d193").await;

    let resolution = resolve(&manager, &["org.acme/d"], BuildIntent::Compile).await.unwrap();
    let d = resolution.find(&Coordinate::new("org.acme", "d")).unwrap();
    assert_eq!(d.identity().version, "1.10.0");
}

#[tokio::test]
async fn test_missing_package_names_servers() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());

    let err = resolve(&manager, &["org.acme/ghost@1.0.0"], BuildIntent::Compile)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolverError::Repository(RepositoryError::PackageNotFound { ref servers, .. }) if servers.len() == 1
    ));
}

#[tokio::test]
async fn test_second_resolution_is_served_from_cache() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    let t = Some(LINUX_TARGET);
    install_library(&manager, "org.acme/z@1.0.0", &[], t, "z").await;

    let first = resolve(&manager, &["org.acme/z@1.0.0"], BuildIntent::Compile).await.unwrap();

    std::fs::remove_dir_all(project.dirs().local_repository_dir()).unwrap();

    let second = resolve(&manager, &["org.acme/z@1.0.0"], BuildIntent::Compile).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_shallow_dependency_uses_metadata_only() {
    let project = TestProject::new();
    let manager = project.package_manager(Settings::default());
    install_library(&manager, "org.acme/headers@1.0.0", &[], Some(LINUX_TARGET), "h").await;

    let resolution = resolve(&manager, &["org.acme/headers@1.0.0:shallow"], BuildIntent::Compile)
        .await
        .unwrap();

    let headers = resolution.find(&Coordinate::new("org.acme", "headers")).unwrap();
    assert!(headers.variant.is_agnostic());
    assert!(headers.checksum.is_none());
    assert!(resolution.filtered(BuildIntent::Install).is_empty());
}
