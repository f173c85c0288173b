//! Build phases
//!
//! The fixed, totally ordered phase sequence every build run walks through.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One stage of the build sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Remove previous build outputs
    Clean,
    /// Resolve and materialize the dependency graph
    ResolveDependencies,
    /// Compile sources
    Compile,
    /// Link objects
    Link,
    /// Run tests
    Test,
    /// Bundle the build output into a package artifact
    Package,
    /// Install the artifact into the local repository
    Install,
}

impl Phase {
    /// All phases in canonical order
    pub const ALL: [Phase; 7] = [
        Phase::Clean,
        Phase::ResolveDependencies,
        Phase::Compile,
        Phase::Link,
        Phase::Test,
        Phase::Package,
        Phase::Install,
    ];

    /// Canonical upper-case name
    pub fn name(self) -> &'static str {
        match self {
            Self::Clean => "CLEAN",
            Self::ResolveDependencies => "RESOLVE_DEPENDENCIES",
            Self::Compile => "COMPILE",
            Self::Link => "LINK",
            Self::Test => "TEST",
            Self::Package => "PACKAGE",
            Self::Install => "INSTALL",
        }
    }

    /// Position in the canonical order
    pub fn index(self) -> usize {
        self as usize
    }

    /// The phase that follows this one, if any
    pub fn next(self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = ConfigError;

    /// Accepts `RESOLVE_DEPENDENCIES`, `resolve_dependencies` and `resolve-dependencies`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|phase| phase.name() == normalized)
            .ok_or_else(|| ConfigError::UnknownPhase {
                name: s.to_string(),
            })
    }
}

/// A set of phases a plugin is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseSet(u8);

impl PhaseSet {
    /// Matches every phase
    pub const fn all() -> Self {
        Self(0b0111_1111)
    }

    /// Matches no phase
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a set from a list; an empty list means every phase
    pub fn from_phases(phases: &[Phase]) -> Self {
        if phases.is_empty() {
            return Self::all();
        }
        let mut set = Self::empty();
        for phase in phases {
            set.insert(*phase);
        }
        set
    }

    /// Parse phase names from a descriptor; an empty list means every phase
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let phases = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<Phase>, _>>()?;
        Ok(Self::from_phases(&phases))
    }

    /// Add a phase
    pub fn insert(&mut self, phase: Phase) {
        self.0 |= 1 << phase.index();
    }

    /// Whether the set contains `phase`
    pub fn contains(self, phase: Phase) -> bool {
        self.0 & (1 << phase.index()) != 0
    }

    /// Whether every phase is included
    pub fn is_all(self) -> bool {
        self == Self::all()
    }

    /// Phases in canonical order
    pub fn iter(self) -> impl Iterator<Item = Phase> {
        Phase::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl Default for PhaseSet {
    fn default() -> Self {
        Self::all()
    }
}

/// A contiguous, ordered slice of the phase sequence selected for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRange {
    first: Phase,
    last: Phase,
}

impl PhaseRange {
    /// Create a range; `first` and `last` are swapped if given out of order
    pub fn new(first: Phase, last: Phase) -> Self {
        if first <= last {
            Self { first, last }
        } else {
            Self {
                first: last,
                last: first,
            }
        }
    }

    /// First phase of the run
    pub fn first(&self) -> Phase {
        self.first
    }

    /// Last phase of the run
    pub fn last(&self) -> Phase {
        self.last
    }

    /// Whether `phase` runs in this range
    pub fn contains(&self, phase: Phase) -> bool {
        self.first <= phase && phase <= self.last
    }

    /// Phases in execution order
    pub fn phases(&self) -> impl Iterator<Item = Phase> {
        let (first, last) = (self.first, self.last);
        Phase::ALL
            .into_iter()
            .filter(move |p| first <= *p && *p <= last)
    }
}
