//! Package identities, variants and dependency declarations
//!
//! A package is identified by `group/artifact@version`. The cache and the
//! repositories operate on variants: an identity specialized to one
//! `(arch, platform, toolchain)` triple, or the platform-agnostic variant
//! that only carries metadata.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::descriptor::BuildDescriptor;
use crate::error::ConfigError;

/// `group/artifact[@version][:scope[,scope...]]`
const PACKAGE_SPEC_PATTERN: &str =
    r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)(?:@([A-Za-z0-9_.+-]+))?(?::([A-Za-z,]+))?$";

/// Group and artifact without a version; the unit of nearest-wins deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
}

impl Coordinate {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Pin this coordinate to a version
    pub fn with_version(&self, version: impl Into<String>) -> PackageIdentity {
        PackageIdentity {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.artifact_id)
    }
}

/// Immutable `(groupId, artifactId, version)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIdentity {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl PackageIdentity {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Group and artifact of this identity
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(&self.group_id, &self.artifact_id)
    }

    /// Name of the artifact blob published for this identity
    pub fn artifact_file_name(&self) -> String {
        format!("{}-{}.pkg", self.artifact_id, self.version)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.group_id, self.artifact_id, self.version)
    }
}

/// Dependency scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Compile,
    Test,
    Runtime,
    /// Only the package metadata is needed, not its platform binaries
    Shallow,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Compile, Scope::Test, Scope::Runtime, Scope::Shallow];

    pub fn name(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Test => "test",
            Self::Runtime => "runtime",
            Self::Shallow => "shallow",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Compile => 1,
            Self::Test => 1 << 1,
            Self::Runtime => 1 << 2,
            Self::Shallow => 1 << 3,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownScope {
                name: s.to_string(),
            })
    }
}

/// A set of scopes; merging declarations takes the union
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopeSet(u8);

impl ScopeSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(scopes: &[Scope]) -> Self {
        scopes.iter().fold(Self::empty(), |set, s| set.with(*s))
    }

    #[must_use]
    pub fn with(self, scope: Scope) -> Self {
        Self(self.0 | scope.bit())
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub fn without(self, scope: Scope) -> Self {
        Self(self.0 & !scope.bit())
    }

    pub fn contains(self, scope: Scope) -> bool {
        self.0 & scope.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether this set holds exactly one scope and it is `scope`
    pub fn is_only(self, scope: Scope) -> bool {
        self.0 == scope.bit()
    }

    pub fn iter(self) -> impl Iterator<Item = Scope> {
        Scope::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Scope::name).collect();
        f.write_str(&names.join(","))
    }
}

/// A declared dependency as written in a descriptor: the version may be omitted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub coordinate: Coordinate,
    pub version: Option<String>,
    pub scopes: ScopeSet,
}

impl DependencySpec {
    /// Pin this declaration to a concrete version
    pub fn pin(&self, version: impl Into<String>) -> Dependency {
        Dependency {
            identity: self.coordinate.with_version(version),
            scopes: self.scopes,
        }
    }
}

impl FromStr for DependencySpec {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ConfigError::InvalidPackageSpec {
            spec: spec.to_string(),
            message: message.to_string(),
        };

        let re = Regex::new(PACKAGE_SPEC_PATTERN).map_err(|e| invalid(&e.to_string()))?;
        let caps = re
            .captures(spec.trim())
            .ok_or_else(|| invalid("expected group/artifact[@version][:scope]"))?;

        let group = &caps[1];
        let artifact = &caps[2];
        if [group, artifact].iter().any(|s| *s == "." || *s == "..") {
            return Err(invalid("path segments are not allowed"));
        }

        let scopes = match caps.get(4) {
            Some(list) => {
                let mut set = ScopeSet::empty();
                for name in list.as_str().split(',').filter(|s| !s.is_empty()) {
                    set = set.with(name.parse()?);
                }
                if set.is_empty() {
                    return Err(invalid("empty scope list"));
                }
                set
            }
            None => ScopeSet::of(&[Scope::Compile]),
        };

        Ok(Self {
            coordinate: Coordinate::new(group, artifact),
            version: caps.get(3).map(|m| m.as_str().to_string()),
            scopes,
        })
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coordinate)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        write!(f, ":{}", self.scopes)
    }
}

impl Serialize for DependencySpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DependencySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A dependency pinned to an exact identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub identity: PackageIdentity,
    pub scopes: ScopeSet,
}

/// `(arch, platform, toolchain)` a binary variant is built for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetTriple {
    pub arch: String,
    pub platform: String,
    pub toolchain: String,
}

impl TargetTriple {
    pub fn new(
        arch: impl Into<String>,
        platform: impl Into<String>,
        toolchain: impl Into<String>,
    ) -> Self {
        Self {
            arch: arch.into(),
            platform: platform.into(),
            toolchain: toolchain.into(),
        }
    }

    /// Directory name used by the cache and repository layouts
    pub fn dir_name(&self) -> String {
        format!("{}-{}-{}", self.arch, self.platform, self.toolchain)
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// An identity plus the target it is specialized to
///
/// `target == None` is the platform-agnostic variant: only metadata, never binaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageVariant {
    pub identity: PackageIdentity,
    pub target: Option<TargetTriple>,
}

impl PackageVariant {
    pub fn new(identity: PackageIdentity, target: Option<TargetTriple>) -> Self {
        Self { identity, target }
    }

    /// Metadata-only variant of `identity`
    pub fn agnostic(identity: PackageIdentity) -> Self {
        Self {
            identity,
            target: None,
        }
    }

    pub fn is_agnostic(&self) -> bool {
        self.target.is_none()
    }
}

impl fmt::Display for PackageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} [{target}]", self.identity),
            None => write!(f, "{} [any]", self.identity),
        }
    }
}

/// Metadata stored next to every published variant (`package.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(flatten)]
    pub identity: PackageIdentity,

    /// Target of the binary variant; absent for identity-level metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetTriple>,

    /// SHA-256 of the artifact blob; absent for identity-level metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Artifact blob file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Include directory inside the unpacked artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_dir: Option<String>,

    /// The package's own direct dependencies
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    /// Descriptor the package was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildDescriptor>,
}

impl PackageMetadata {
    /// Identity-level copy with the variant-specific fields stripped
    #[must_use]
    pub fn agnostic(&self) -> Self {
        Self {
            target: None,
            checksum: None,
            file_name: None,
            ..self.clone()
        }
    }
}

/// A materialized package ready to feed include/library paths to a toolchain
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPackage {
    pub variant: PackageVariant,

    /// Checksum of the stored artifact; `None` for metadata-only packages
    pub checksum: Option<String>,

    /// Directory holding the stored variant
    pub location: PathBuf,

    /// Direct dependencies, as declared by the package
    pub dependencies: Vec<DependencySpec>,

    /// Effective scopes after merging every path that reaches this package
    pub scopes: ScopeSet,

    pub build: Option<BuildDescriptor>,
}

impl ResolvedPackage {
    pub fn identity(&self) -> &PackageIdentity {
        &self.variant.identity
    }
}
