// SPDX-License-Identifier: MPL-2.0

//! SAT-based resolution of conda-style package environments.
//!
//! Given an index of package records, the records installed in an
//! environment and a request (specs to install or remove, plus modifiers
//! such as freezing installed packages or skipping dependencies), this crate
//! finds the environment the request leads to: one record per package name,
//! every dependency satisfied, and among all such environments the best one
//! according to a fixed sequence of objectives.
//!
//! The problem is encoded as boolean clauses. Each record is a variable,
//! each package name allows at most one record, each dependency of a
//! selected record must be met by one of its candidates. Objectives are
//! then minimized one after the other: removed packages, channel priority,
//! versions and build numbers of the requested packages, optional and
//! installed packages, versions of their dependencies, and finally the
//! number of packages. When no environment exists, the minimal set of
//! conflicting specs is isolated and reported as dependency chains:
//!
//! ```txt
//! Package python conflicts for:
//! numpy -> python[version='>=3.10']
//! python 3.9.*
//! ```
//!
//! Resolution tries several times, loosening constraints on every attempt:
//! first with installed packages frozen to their current records, then
//! updatable; first on a reduced index of the latest records, if one is
//! provided, then on the full index.
//!
//! ## API
//!
//! ```
//! # use std::sync::Arc;
//! # use envsolve::{resolve, Index, PackageRecord, Request, SolverConfig};
//! #
//! # fn try_main() -> Result<(), Box<dyn std::error::Error>> {
//! let index = Index::new([
//!     Arc::new(PackageRecord::new("python", "3.10.4", "0")?),
//!     Arc::new(PackageRecord::new("numpy", "1.20.0", "0")?.with_depends(["python >=3.10"])),
//! ])?;
//! let request = Request::install(["numpy".parse()?]);
//! let solution = resolve(&index, &request, &SolverConfig::default())?;
//! assert_eq!(solution.names().collect::<Vec<_>>(), ["python", "numpy"]);
//! #     Ok(())
//! # }
//! # fn main() {
//! #     try_main().unwrap();
//! # }
//! ```
//!
//! The [Index] holds the records of every channel, in channel priority
//! order. A [Request] describes one command: what to add, what to remove,
//! what is installed and what the user asked for in the past. The
//! [SolverConfig] holds the settings shared by every command, such as the
//! [ChannelPriority] mode and the SAT backend.
//!
//! A [Resolver] additionally accepts a reduced index, tried before the full
//! one:
//!
//! ```
//! # use std::sync::Arc;
//! # use envsolve::{Index, PackageRecord, Request, Resolver, SolverConfig};
//! #
//! # fn try_main() -> Result<(), Box<dyn std::error::Error>> {
//! let full = Index::new([
//!     Arc::new(PackageRecord::new("six", "1.15", "0")?),
//!     Arc::new(PackageRecord::new("six", "1.16", "0")?),
//! ])?;
//! let current = Index::new([Arc::new(PackageRecord::new("six", "1.16", "0")?)])?;
//! let config = SolverConfig::default();
//! let request = Request::install(["six 1.15".parse()?]);
//! let solution = Resolver::new(&full, &config)
//!     .with_current(&current)
//!     .resolve(&request)?;
//! assert_eq!(solution.records[0].version.to_string(), "1.15");
//! #     Ok(())
//! # }
//! # fn main() {
//! #     try_main().unwrap();
//! # }
//! ```
//!
//! ## Logging
//!
//! Resolution reports its progress through the [log] facade: every attempt
//! and optimization pass at `info` level, the specs and reductions at
//! `debug` level. Inconsistent environments and overridden pins are
//! reported at `warn` level.

#![warn(missing_docs)]

mod aggregate;
mod compile;
mod config;
mod consistency;
mod diagnose;
mod error;
mod graph;
mod index;
mod match_spec;
mod optimize;
mod record;
mod reduce;
mod retry;
mod sat;
mod solver;
mod specs;
mod type_aliases;

pub use config::{
    ChannelPriority, DepsModifier, Request, SatSolverChoice, SolverConfig, UpdateModifier,
    DEFAULT_DO_NOT_REMOVE,
};
pub use diagnose::{Conflict, ConflictReport, DependencyChain};
pub use error::{ResolveError, SpecParseError, Unsatisfiable};
pub use index::Index;
pub use match_spec::{BuildNumberSpec, MatchSpec};
pub use record::{PackageRecord, RecordKey, DEFAULT_CHANNEL, VIRTUAL_CHANNEL};
pub use retry::{resolve, Resolver};
pub use sat::{new_backend, DpllBackend, Lit, Model, SatBackend, VarisatBackend};
pub use solver::Solution;
pub use specs::{Spec, SpecsMap};
pub use type_aliases::{FxIndexMap, FxIndexSet, Map, Set};
pub use version_order::{VersionOrder, VersionParseError, VersionSpec};

mod internal;
