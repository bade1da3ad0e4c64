// SPDX-License-Identifier: MPL-2.0

//! Solver configuration and per-command requests.

use std::sync::Arc;
use std::time::Instant;

use crate::{MatchSpec, PackageRecord, ResolveError};

/// Packages that are kept installed unless explicitly removed.
pub const DEFAULT_DO_NOT_REMOVE: [&str; 6] = [
    "anaconda",
    "conda",
    "conda-build",
    "python.app",
    "console_shortcut",
    "powershell_shortcut",
];

/// How channel order influences the choice of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ChannelPriority {
    /// A name found in a higher priority channel hides it in every lower one.
    Strict,
    /// Every channel is usable; higher priority channels are preferred over
    /// newer versions.
    #[default]
    Flexible,
    /// Channels only break ties between otherwise identical versions.
    Disabled,
}

/// The SAT backend driving a solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SatSolverChoice {
    /// The `varisat` CDCL solver.
    #[default]
    Varisat,
    /// A small DPLL solver with unit propagation.
    Dpll,
}

/// Session-wide solver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SolverConfig {
    /// How channel order influences the choice of records.
    pub channel_priority: ChannelPriority,
    /// The SAT backend.
    pub sat_solver: SatSolverChoice,
    /// Whether to compute a conflict explanation when the final attempt fails.
    pub unsatisfiable_hints: bool,
    /// How many levels of dependencies the conflict explanation follows.
    pub unsatisfiable_hints_check_depth: usize,
    /// Whether to leave build timestamps out of the optimization.
    pub ignore_timestamps: bool,
    /// Abort with [ResolveError::Cancelled] once this instant has passed.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub deadline: Option<Instant>,
    /// Packages that are always updated to their best version when installed.
    pub aggressive_update_packages: Vec<MatchSpec>,
    /// Packages that stay installed unless explicitly removed.
    pub do_not_remove: Vec<String>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            channel_priority: ChannelPriority::default(),
            sat_solver: SatSolverChoice::default(),
            unsatisfiable_hints: true,
            unsatisfiable_hints_check_depth: 2,
            ignore_timestamps: false,
            deadline: None,
            aggressive_update_packages: Vec::new(),
            do_not_remove: DEFAULT_DO_NOT_REMOVE.map(String::from).to_vec(),
        }
    }
}

impl SolverConfig {
    /// Sets the channel priority mode.
    pub fn with_channel_priority(mut self, channel_priority: ChannelPriority) -> Self {
        self.channel_priority = channel_priority;
        self
    }

    /// Sets the SAT backend.
    pub fn with_sat_solver(mut self, sat_solver: SatSolverChoice) -> Self {
        self.sat_solver = sat_solver;
        self
    }

    /// Enables or disables conflict explanations.
    pub fn with_unsatisfiable_hints(mut self, enabled: bool) -> Self {
        self.unsatisfiable_hints = enabled;
        self
    }

    /// Leaves build timestamps out of the optimization.
    pub fn with_ignore_timestamps(mut self, ignore: bool) -> Self {
        self.ignore_timestamps = ignore;
        self
    }

    /// Sets the instant after which resolution is cancelled.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the packages that are always updated.
    pub fn with_aggressive_update_packages(mut self, specs: impl IntoIterator<Item = MatchSpec>) -> Self {
        self.aggressive_update_packages = specs.into_iter().collect();
        self
    }

    /// Sets the packages that stay installed unless explicitly removed.
    pub fn with_do_not_remove<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.do_not_remove = names.into_iter().map(Into::into).collect();
        self
    }

    /// Fails with [ResolveError::Cancelled] if the deadline has passed.
    pub(crate) fn check_deadline(&self) -> Result<(), ResolveError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ResolveError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// How installed packages may change during an install or update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UpdateModifier {
    /// Do nothing if every requested spec is already satisfied.
    SpecsSatisfiedSkipSolve,
    /// Keep installed packages at their current version where possible.
    #[default]
    FreezeInstalled,
    /// Also update the dependencies of the requested packages.
    UpdateDeps,
    /// Update the requested packages, changing others only if needed.
    UpdateSpecs,
    /// Update every package in the environment.
    UpdateAll,
}

/// Whether the dependencies of the requested packages are part of the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DepsModifier {
    /// Requested packages come with their dependencies.
    #[default]
    NotSet,
    /// Only the requested packages change; dependencies are not added.
    NoDeps,
    /// Only the dependencies are installed, not the requested packages.
    OnlyDeps,
}

/// The inputs of one command against one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Request {
    /// Specs the user asks to install or update.
    pub specs_to_add: Vec<MatchSpec>,
    /// Specs the user asks to remove.
    pub specs_to_remove: Vec<MatchSpec>,
    /// Records currently installed in the environment.
    pub installed: Vec<Arc<PackageRecord>>,
    /// Specs the user requested in earlier commands, oldest first.
    pub history: Vec<MatchSpec>,
    /// Specs that always constrain their package.
    pub pinned: Vec<MatchSpec>,
    /// Records describing the host system, such as `__glibc`.
    pub virtual_packages: Vec<Arc<PackageRecord>>,
    /// How installed packages may change.
    pub update_modifier: UpdateModifier,
    /// Whether the dependencies of the requested packages are part of the result.
    pub deps_modifier: DepsModifier,
    /// Remove packages nothing asks for anymore.
    pub prune: bool,
    /// Remove the requested packages without touching anything else.
    pub force_remove: bool,
    /// Ignore `pinned`.
    pub ignore_pinned: bool,
}

impl Request {
    /// A request to install `specs` into an empty environment.
    pub fn install(specs: impl IntoIterator<Item = MatchSpec>) -> Self {
        Self {
            specs_to_add: specs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A request to remove `specs`.
    pub fn remove(specs: impl IntoIterator<Item = MatchSpec>) -> Self {
        Self {
            specs_to_remove: specs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sets the installed records.
    pub fn with_installed(mut self, installed: impl IntoIterator<Item = Arc<PackageRecord>>) -> Self {
        self.installed = installed.into_iter().collect();
        self
    }

    /// Sets the requested history.
    pub fn with_history(mut self, history: impl IntoIterator<Item = MatchSpec>) -> Self {
        self.history = history.into_iter().collect();
        self
    }

    /// Sets the pinned specs.
    pub fn with_pinned(mut self, pinned: impl IntoIterator<Item = MatchSpec>) -> Self {
        self.pinned = pinned.into_iter().collect();
        self
    }

    /// Sets the virtual packages.
    pub fn with_virtual_packages(mut self, records: impl IntoIterator<Item = Arc<PackageRecord>>) -> Self {
        self.virtual_packages = records.into_iter().collect();
        self
    }

    /// Sets the update modifier.
    pub fn with_update_modifier(mut self, modifier: UpdateModifier) -> Self {
        self.update_modifier = modifier;
        self
    }

    /// Sets the dependencies modifier.
    pub fn with_deps_modifier(mut self, modifier: DepsModifier) -> Self {
        self.deps_modifier = modifier;
        self
    }

    /// Enables pruning of unrequested packages.
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Removes without solving.
    pub fn with_force_remove(mut self, force_remove: bool) -> Self {
        self.force_remove = force_remove;
        self
    }

    /// Ignores pinned specs.
    pub fn with_ignore_pinned(mut self, ignore: bool) -> Self {
        self.ignore_pinned = ignore;
        self
    }

    /// Whether this request removes packages.
    pub fn is_removal(&self) -> bool {
        !self.specs_to_remove.is_empty()
    }

    /// Whether a frozen attempt makes sense for this request: installed
    /// packages are only frozen in freeze mode, and never when packages get
    /// removed or pruned.
    pub(crate) fn allows_freeze(&self) -> bool {
        self.update_modifier == UpdateModifier::FreezeInstalled && !self.prune && !self.is_removal()
    }
}
