//! Dependency resolution
//!
//! Resolution runs in three steps:
//!
//! 1. Breadth-first discovery from the project's declared dependencies,
//!    fetching only metadata. Packages are deduplicated by group/artifact;
//!    when two versions are reachable the one closest to the root wins, ties
//!    going to the first declaration. Test dependencies of dependencies are
//!    not followed, and shallow-only packages are not expanded.
//! 2. Scope propagation to a fixed point over the discovered edges, so a
//!    package reached along several paths carries the union of their scopes.
//! 3. Topological ordering (dependencies before dependents) with cycle
//!    detection, then concurrent materialization of the packages the run's
//!    scope filter admits. The filter is applied only here, after the full
//!    graph is known.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::options::BuildIntent;
use crate::core::package::{
    Coordinate, DependencySpec, PackageIdentity, PackageMetadata, PackageVariant, ResolvedPackage,
    Scope, ScopeSet, TargetTriple,
};
use crate::error::{RepositoryError, ResolverError};

/// Where a materialized variant lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub location: PathBuf,
    pub checksum: Option<String>,
}

/// Package lookups the resolver needs
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Highest available version of an unversioned declaration
    async fn resolve_version(&self, coordinate: &Coordinate) -> Result<Option<String>, RepositoryError>;

    /// Metadata of `identity`, without fetching platform binaries
    async fn metadata(&self, identity: &PackageIdentity) -> Result<PackageMetadata, RepositoryError>;

    /// Make `variant` available locally
    async fn materialize(&self, variant: &PackageVariant) -> Result<Materialized, RepositoryError>;
}

/// Dependency graph keyed by package identity
///
/// Nodes keep insertion order so ordering and cycle reports are deterministic.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Adjacency list: package -> dependencies
    edges: HashMap<String, Vec<String>>,
    /// All known packages, in insertion order
    nodes: Vec<String>,
    known: HashSet<String>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, name: &str) {
        if self.known.insert(name.to_string()) {
            self.nodes.push(name.to_string());
        }
    }

    /// Add a package to the graph
    pub fn add_package(&mut self, name: &str, dependencies: Vec<String>) {
        self.add_node(name);
        for dep in &dependencies {
            self.add_node(dep);
        }
        self.edges.insert(name.to_string(), dependencies);
    }

    /// Compute topological sort (build order)
    ///
    /// Returns packages in order such that dependencies come before dependents.
    pub fn topological_sort(&self) -> Result<Vec<String>, ResolverError> {
        let mut visited = HashSet::new();
        let mut temp_visited = HashSet::new();
        let mut result = Vec::new();
        let mut cycle_path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node) {
                self.visit(
                    node,
                    &mut visited,
                    &mut temp_visited,
                    &mut result,
                    &mut cycle_path,
                )?;
            }
        }

        Ok(result)
    }

    fn visit(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        temp_visited: &mut HashSet<String>,
        result: &mut Vec<String>,
        cycle_path: &mut Vec<String>,
    ) -> Result<(), ResolverError> {
        if temp_visited.contains(node) {
            // Report only the loop itself, starting and ending at `node`
            let start = cycle_path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle = cycle_path[start..].to_vec();
            cycle.push(node.to_string());
            return Err(ResolverError::CircularDependency { cycle });
        }

        if visited.contains(node) {
            return Ok(());
        }

        temp_visited.insert(node.to_string());
        cycle_path.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.visit(dep, visited, temp_visited, result, cycle_path)?;
            }
        }

        cycle_path.pop();
        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());

        Ok(())
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }
}

/// Resolved dependency set of one project, dependencies before dependents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    packages: Vec<ResolvedPackage>,
}

impl Resolution {
    pub fn packages(&self) -> &[ResolvedPackage] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// The view a phase with `intent` sees, order preserved
    pub fn filtered(&self, intent: BuildIntent) -> Vec<ResolvedPackage> {
        self.packages
            .iter()
            .filter(|p| intent.admits(p.scopes))
            .cloned()
            .collect()
    }

    pub fn find(&self, coordinate: &Coordinate) -> Option<&ResolvedPackage> {
        self.packages
            .iter()
            .find(|p| &p.identity().coordinate() == coordinate)
    }
}

#[derive(Debug)]
struct Node {
    identity: PackageIdentity,
    metadata: PackageMetadata,
    expanded: bool,
}

#[derive(Debug)]
struct Edge {
    parent: Option<Coordinate>,
    child: Coordinate,
    declared: ScopeSet,
}

#[derive(Debug)]
struct Pending {
    parent: Option<Coordinate>,
    spec: DependencySpec,
}

/// Scopes an edge hands to its child, given the parent's effective scopes
///
/// `None` means the edge is not followed.
fn edge_scopes(declared: ScopeSet, parent: Option<ScopeSet>) -> Option<ScopeSet> {
    let Some(parent) = parent else {
        return Some(declared);
    };
    if declared.is_only(Scope::Test) {
        return None;
    }
    if declared.is_only(Scope::Shallow) {
        return Some(ScopeSet::of(&[Scope::Shallow]));
    }
    let inherited = parent.without(Scope::Shallow);
    if inherited.is_empty() {
        None
    } else {
        Some(inherited)
    }
}

/// Whether an edge asks for more than metadata
fn expands(declared: ScopeSet) -> bool {
    !declared.is_only(Scope::Shallow)
}

pub struct Resolver<'a, S: PackageSource + ?Sized> {
    source: &'a S,
    target: Option<TargetTriple>,
    parallelism: usize,
    cancel: CancellationToken,
}

impl<'a, S: PackageSource + ?Sized> Resolver<'a, S> {
    /// Resolver materializing binaries for `target` (agnostic when `None`)
    pub fn new(source: &'a S, target: Option<TargetTriple>) -> Self {
        Self {
            source,
            target,
            parallelism: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Materialize up to `n` packages concurrently
    #[must_use]
    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.parallelism = n.max(1);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn check_cancelled(&self) -> Result<(), ResolverError> {
        if self.cancel.is_cancelled() {
            Err(ResolverError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve the dependencies of `root` and materialize those `filter` admits
    ///
    /// Discovery always walks every declared scope, so the versions chosen
    /// are the same whichever phases the run covers. `filter` only decides
    /// which of the resolved packages are fetched.
    pub async fn resolve(
        &self,
        root: &PackageIdentity,
        dependencies: &[DependencySpec],
        filter: ScopeSet,
    ) -> Result<Resolution, ResolverError> {
        let declared = merge_root_declarations(dependencies)?;
        let root_coordinate = root.coordinate();

        // Step 1: discovery
        let mut nodes: HashMap<Coordinate, Node> = HashMap::new();
        let mut order: Vec<Coordinate> = Vec::new();
        let mut edges: Vec<Edge> = Vec::new();
        let mut queue: VecDeque<Pending> = declared
            .into_iter()
            .map(|spec| Pending { parent: None, spec })
            .collect();

        while let Some(Pending { parent, spec }) = queue.pop_front() {
            self.check_cancelled()?;
            let coordinate = spec.coordinate.clone();

            if parent.is_some() && spec.scopes.is_only(Scope::Test) {
                continue;
            }

            edges.push(Edge {
                parent: parent.clone(),
                child: coordinate.clone(),
                declared: spec.scopes,
            });

            if coordinate == root_coordinate {
                // Closes a cycle through the project; reported after discovery
                continue;
            }

            if let Some(existing) = nodes.get_mut(&coordinate) {
                if let Some(version) = &spec.version {
                    if version != &existing.identity.version {
                        tracing::debug!(
                            "{coordinate}@{version} omitted: {} is nearer",
                            existing.identity
                        );
                    }
                }
                if !existing.expanded && expands(spec.scopes) {
                    existing.expanded = true;
                    enqueue_children(&mut queue, existing);
                }
                continue;
            }

            let version = match &spec.version {
                Some(version) => version.clone(),
                None => self
                    .source
                    .resolve_version(&coordinate)
                    .await?
                    .ok_or_else(|| ResolverError::NoVersion {
                        package: coordinate.to_string(),
                    })?,
            };
            let identity = coordinate.with_version(version);
            let metadata = self.source.metadata(&identity).await?;

            let mut node = Node {
                identity,
                metadata,
                expanded: false,
            };
            if expands(spec.scopes) {
                node.expanded = true;
                enqueue_children(&mut queue, &node);
            }
            order.push(coordinate.clone());
            nodes.insert(coordinate, node);
        }

        // Step 2: scope propagation
        let scopes = propagate_scopes(&edges, &nodes);

        // Step 3: ordering
        let mut graph = DependencyGraph::new();
        let root_key = root.to_string();
        let key_of = |c: &Coordinate| -> String {
            if c == &root_coordinate {
                root_key.clone()
            } else {
                nodes
                    .get(c)
                    .map_or_else(|| c.to_string(), |n| n.identity.to_string())
            }
        };
        graph.add_package(
            &root_key,
            edges
                .iter()
                .filter(|e| e.parent.is_none())
                .map(|e| key_of(&e.child))
                .collect(),
        );
        for coordinate in &order {
            let deps = edges
                .iter()
                .filter(|e| e.parent.as_ref() == Some(coordinate))
                .map(|e| key_of(&e.child))
                .collect();
            graph.add_package(&key_of(coordinate), deps);
        }
        let sorted = graph.topological_sort()?;

        let by_key: HashMap<String, &Coordinate> =
            order.iter().map(|c| (key_of(c), c)).collect();
        let selected: Vec<(&Node, ScopeSet)> = sorted
            .iter()
            .filter_map(|key| by_key.get(key))
            .filter_map(|c| {
                let node = nodes.get(*c)?;
                let node_scopes = scopes.get(*c).copied().unwrap_or_default();
                (!node_scopes.intersection(filter).is_empty()).then_some((node, node_scopes))
            })
            .collect();

        // Step 4: materialization
        self.check_cancelled()?;
        let packages: Vec<ResolvedPackage> = futures::stream::iter(selected)
            .map(|(node, node_scopes)| self.materialize(node, node_scopes))
            .buffered(self.parallelism)
            .try_collect()
            .await?;

        tracing::info!("Resolved {} dependencies of {root}", packages.len());
        Ok(Resolution { packages })
    }

    async fn materialize(&self, node: &Node, scopes: ScopeSet) -> Result<ResolvedPackage, ResolverError> {
        self.check_cancelled()?;
        let variant = if scopes.is_only(Scope::Shallow) {
            PackageVariant::agnostic(node.identity.clone())
        } else {
            PackageVariant::new(node.identity.clone(), self.target.clone())
        };

        let materialized = match self.source.materialize(&variant).await {
            Ok(m) => m,
            Err(RepositoryError::Cancelled { .. }) => return Err(ResolverError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        Ok(ResolvedPackage {
            variant,
            checksum: materialized.checksum,
            location: materialized.location,
            dependencies: node.metadata.dependencies.clone(),
            scopes,
            build: node.metadata.build.clone(),
        })
    }
}

/// Merge duplicate root declarations; different explicit versions conflict
fn merge_root_declarations(specs: &[DependencySpec]) -> Result<Vec<DependencySpec>, ResolverError> {
    let mut merged: Vec<DependencySpec> = Vec::new();
    for spec in specs {
        match merged.iter_mut().find(|m| m.coordinate == spec.coordinate) {
            Some(existing) => {
                match (&existing.version, &spec.version) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(ResolverError::VersionConflict {
                            package: spec.coordinate.to_string(),
                            first: a.clone(),
                            second: b.clone(),
                        });
                    }
                    (None, Some(b)) => existing.version = Some(b.clone()),
                    _ => {}
                }
                existing.scopes = existing.scopes.union(spec.scopes);
            }
            None => merged.push(spec.clone()),
        }
    }
    Ok(merged)
}

fn enqueue_children(queue: &mut VecDeque<Pending>, node: &Node) {
    let parent = node.identity.coordinate();
    for dep in &node.metadata.dependencies {
        queue.push_back(Pending {
            parent: Some(parent.clone()),
            spec: dep.clone(),
        });
    }
}

/// Effective scopes of every node, iterated to a fixed point
fn propagate_scopes(edges: &[Edge], nodes: &HashMap<Coordinate, Node>) -> HashMap<Coordinate, ScopeSet> {
    let mut scopes: HashMap<Coordinate, ScopeSet> = HashMap::new();
    loop {
        let mut changed = false;
        for edge in edges {
            if !nodes.contains_key(&edge.child) {
                continue;
            }
            let parent_scopes = match &edge.parent {
                None => None,
                Some(parent) => match nodes.get(parent) {
                    Some(node) if node.expanded => Some(scopes.get(parent).copied().unwrap_or_default()),
                    _ => continue,
                },
            };
            let Some(contribution) = edge_scopes(edge.declared, parent_scopes) else {
                continue;
            };
            let entry = scopes.entry(edge.child.clone()).or_default();
            let merged = entry.union(contribution);
            if merged != *entry {
                *entry = merged;
                changed = true;
            }
        }
        if !changed {
            return scopes;
        }
    }
}
