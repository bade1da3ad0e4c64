// SPDX-License-Identifier: MPL-2.0

//! Handling solver errors.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;
use version_order::VersionParseError;

use crate::diagnose::ConflictReport;
use crate::MatchSpec;

/// There is no solution for this set of dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unsatisfiable {
    /// Specs that could not be satisfied together. Empty when diagnosis was
    /// skipped, e.g. on an attempt that is going to be retried.
    pub specs: Vec<MatchSpec>,
    /// Human-readable dependency chains grouped by the package they collide
    /// on. Only computed on the final attempt when hints are enabled.
    pub report: ConflictReport,
}

impl Unsatisfiable {
    pub(crate) fn bare() -> Self {
        Self::default()
    }

    pub(crate) fn with_specs(specs: Vec<MatchSpec>) -> Self {
        Self {
            specs,
            report: ConflictReport::default(),
        }
    }
}

impl Display for Unsatisfiable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.report.is_empty() && self.specs.is_empty() {
            return f.write_str("the requested specs cannot be satisfied together");
        }
        if self.report.is_empty() {
            f.write_str("the following specs conflict:")?;
            for spec in &self.specs {
                write!(f, "\n  - {spec}")?;
            }
            return Ok(());
        }
        write!(f, "{}", self.report)
    }
}

/// Errors that may occur while parsing a [MatchSpec].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecParseError {
    /// The spec string does not follow the match spec grammar.
    #[error("invalid match spec '{spec}': {reason}")]
    Invalid {
        /// The offending spec string.
        spec: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A version or version expression inside the spec is malformed.
    #[error("invalid match spec '{spec}'")]
    Version {
        /// The offending spec string.
        spec: String,
        /// The underlying version error.
        #[source]
        source: VersionParseError,
    },
}

/// Errors that may occur while resolving an environment.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// There is no solution for this set of dependencies.
    #[error("Unsatisfiable: {0}")]
    Unsatisfiable(Box<Unsatisfiable>),

    /// Some requested package names do not exist in the index at all.
    #[error("packages not found in the index: {}", display_specs(.specs))]
    PackagesNotFound {
        /// The specs naming missing packages.
        specs: Vec<MatchSpec>,
    },

    /// More than one installed record matches the spec of one name. This
    /// environment cannot be reasoned about and is never retried.
    #[error("inconsistent environment: {name} has several installed records: {}", records.join(", "))]
    InconsistentEnvironment {
        /// The package name.
        name: String,
        /// The `channel::name-version-build` strings of the duplicate records.
        records: Vec<String>,
    },

    /// A match spec or version is malformed.
    #[error(transparent)]
    SpecParse(#[from] SpecParseError),

    /// Pinned specs conflict with the requested specs.
    #[error(
        "requested specs conflict with pinned specs\n  requested: {}\n  pinned: {}",
        display_specs(.requested),
        display_specs(.pinned)
    )]
    SpecsConfigurationConflict {
        /// The requested specs involved in the conflict.
        requested: Vec<MatchSpec>,
        /// The pinned specs involved in the conflict.
        pinned: Vec<MatchSpec>,
    },

    /// The configured deadline passed.
    #[error("resolution cancelled: deadline exceeded")]
    Cancelled,

    /// The SAT backend failed internally.
    #[error("SAT backend failure: {0}")]
    Backend(String),
}

impl ResolveError {
    /// Whether a later, less constrained attempt may succeed where this one failed.
    pub fn allows_retry(&self) -> bool {
        matches!(
            self,
            ResolveError::Unsatisfiable(_) | ResolveError::PackagesNotFound { .. }
        )
    }

    pub(crate) fn unsatisfiable(reason: Unsatisfiable) -> Self {
        ResolveError::Unsatisfiable(Box::new(reason))
    }
}

impl From<VersionParseError> for ResolveError {
    fn from(source: VersionParseError) -> Self {
        ResolveError::SpecParse(SpecParseError::Version {
            spec: String::new(),
            source,
        })
    }
}

fn display_specs(specs: &[MatchSpec]) -> String {
    specs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
