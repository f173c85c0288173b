//! Command options and build intents
//!
//! Translates the task switches of one invocation into the contiguous phase
//! range to run and the dependency scope view each phase sees.

use std::path::PathBuf;

use crate::core::package::{Scope, ScopeSet};
use crate::core::phase::{Phase, PhaseRange, PhaseSet};

/// Top-level task requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Clean,
    Build,
    Test,
    Package,
    Install,
    Publish,
}

/// Flags consumed by the orchestrator for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pub clean: bool,
    pub build: bool,
    pub test: bool,
    pub package: bool,
    pub install: bool,
    pub publish: bool,

    /// Target architecture selector
    pub arch: Option<String>,
    /// Target platform selector
    pub platform: Option<String>,
    /// Target name selector
    pub target: Option<String>,

    /// Enter TEST with its built-in action suppressed
    pub no_tests: bool,
    /// Prepend CLEAN and clear the package cache
    pub all: bool,
    /// Settings file overriding `<config_dir>/settings.toml`
    pub settings_file: Option<PathBuf>,
}

impl CommandOptions {
    /// Options with the switch for `task` set
    pub fn for_task(task: Task) -> Self {
        let mut options = Self::default();
        match task {
            Task::Clean => options.clean = true,
            Task::Build => options.build = true,
            Task::Test => options.test = true,
            Task::Package => options.package = true,
            Task::Install => options.install = true,
            Task::Publish => options.publish = true,
        }
        options
    }

    /// Last phase any selected task needs
    fn last_phase(&self) -> Option<Phase> {
        if self.install || self.publish {
            Some(Phase::Install)
        } else if self.package {
            Some(Phase::Package)
        } else if self.test {
            Some(Phase::Test)
        } else if self.build {
            Some(Phase::Link)
        } else if self.clean || self.all {
            Some(Phase::Clean)
        } else {
            None
        }
    }

    /// Phases this run walks through, or `None` when no task is selected
    pub fn phase_range(&self) -> Option<PhaseRange> {
        let last = self.last_phase()?;
        let first = if self.clean || self.all {
            Phase::Clean
        } else {
            Phase::ResolveDependencies
        };
        Some(PhaseRange::new(first, last))
    }

    /// Phases entered with their default-suppressed flag already set
    pub fn suppressed_phases(&self) -> PhaseSet {
        let mut set = PhaseSet::empty();
        if self.no_tests {
            set.insert(Phase::Test);
        }
        set
    }

    /// Union of the scope views of every phase in `range`
    pub fn resolution_scopes(range: &PhaseRange) -> ScopeSet {
        range
            .phases()
            .map(|phase| BuildIntent::for_phase(phase).scopes())
            .fold(ScopeSet::empty(), ScopeSet::union)
    }
}

/// Which dependency scopes a phase needs to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildIntent {
    /// compile + runtime + shallow
    Compile,
    /// compile + runtime + test + shallow
    Test,
    /// compile + runtime; shallow packages are never bundled
    Install,
}

impl BuildIntent {
    /// Scope view of `phase`
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Test => Self::Test,
            Phase::Package | Phase::Install => Self::Install,
            _ => Self::Compile,
        }
    }

    pub fn scopes(self) -> ScopeSet {
        match self {
            Self::Compile => ScopeSet::of(&[Scope::Compile, Scope::Runtime, Scope::Shallow]),
            Self::Test => ScopeSet::of(&[Scope::Compile, Scope::Runtime, Scope::Test, Scope::Shallow]),
            Self::Install => ScopeSet::of(&[Scope::Compile, Scope::Runtime]),
        }
    }

    /// Whether a package with effective `scopes` belongs to this view
    pub fn admits(self, scopes: ScopeSet) -> bool {
        !scopes.intersection(self.scopes()).is_empty()
    }
}
