// SPDX-License-Identifier: MPL-2.0

//! Resolution as a sequence of attempts, each less constrained than the one
//! before.
//!
//! A request is first solved against the reduced index, if there is one,
//! with installed packages frozen. A requested name missing from the reduced
//! index moves on to the full index; conflicting constraints lift the
//! freeze. Only the last attempt explains its failure.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use log::{debug, info};

use crate::index::Index;
use crate::solver::{shortcut, Attempt};
use crate::{PackageRecord, Request, ResolveError, Solution, SolverConfig, UpdateModifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ReducedFrozen,
    ReducedUnfrozen,
    FullFrozen,
    FullUnfrozen,
}

impl Stage {
    fn first(has_reduced: bool, freeze: bool) -> Self {
        Self::ReducedFrozen.skipping(has_reduced, freeze)
    }

    fn is_reduced(self) -> bool {
        matches!(self, Self::ReducedFrozen | Self::ReducedUnfrozen)
    }

    fn is_frozen(self) -> bool {
        matches!(self, Self::ReducedFrozen | Self::FullFrozen)
    }

    /// The closest stage that can run.
    fn skipping(self, has_reduced: bool, freeze: bool) -> Self {
        let full = !has_reduced || !self.is_reduced();
        match (full, freeze && self.is_frozen()) {
            (false, true) => Self::ReducedFrozen,
            (false, false) => Self::ReducedUnfrozen,
            (true, true) => Self::FullFrozen,
            (true, false) => Self::FullUnfrozen,
        }
    }

    /// The stage to try after this one failed with a retryable `error`.
    fn next(self, error: &ResolveError, has_reduced: bool, freeze: bool) -> Option<Self> {
        let missing = matches!(error, ResolveError::PackagesNotFound { .. });
        let next = match (self, missing) {
            (Self::ReducedFrozen, true) => Self::FullFrozen,
            (Self::ReducedFrozen, false) => Self::ReducedUnfrozen,
            (Self::ReducedUnfrozen, true) => Self::FullUnfrozen,
            (Self::ReducedUnfrozen, false) => Self::FullFrozen,
            (Self::FullFrozen, false) => Self::FullUnfrozen,
            (Self::FullFrozen, true) | (Self::FullUnfrozen, _) => return None,
        };
        Some(next.skipping(has_reduced, freeze))
    }

    /// The update modifier the aggregator works with at this stage.
    fn modifier(self, requested: UpdateModifier) -> UpdateModifier {
        match requested {
            _ if self.is_frozen() => UpdateModifier::FreezeInstalled,
            UpdateModifier::FreezeInstalled => UpdateModifier::UpdateSpecs,
            other => other,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index = if self.is_reduced() { "reduced" } else { "full" };
        let freeze = if self.is_frozen() { "frozen" } else { "unfrozen" };
        write!(f, "{index} index, {freeze} installed packages")
    }
}

/// Resolves requests against a full index and, optionally, a reduced one
/// holding only the latest records.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    full: &'a Index,
    current: Option<&'a Index>,
    config: &'a SolverConfig,
}

impl<'a> Resolver<'a> {
    /// A resolver over `full`.
    pub fn new(full: &'a Index, config: &'a SolverConfig) -> Self {
        Self {
            full,
            current: None,
            config,
        }
    }

    /// Tries `current` before the full index.
    pub fn with_current(mut self, current: &'a Index) -> Self {
        self.current = Some(current);
        self
    }

    /// Finds the environment `request` leads to.
    ///
    /// Installed and virtual packages are added to both indices, so that an
    /// environment never depends on records the channels no longer carry.
    pub fn resolve(&self, request: &Request) -> Result<Solution, ResolveError> {
        if let Some(solution) = shortcut(request)? {
            return Ok(solution);
        }
        let known: Vec<&Arc<PackageRecord>> = request
            .installed
            .iter()
            .chain(&request.virtual_packages)
            .collect();
        let full = self.full.extended(known.iter().copied())?;
        let current = self
            .current
            .map(|current| current.extended(known.iter().copied()))
            .transpose()?;

        let freeze = request.allows_freeze();
        let mut stage = Stage::first(current.is_some(), freeze);
        loop {
            self.config.check_deadline()?;
            let index = match (&current, stage.is_reduced()) {
                (Some(current), true) => current,
                _ => &full,
            };
            info!("solving with the {stage} ({} records)", index.len());
            let attempt = Attempt {
                index,
                request,
                config: self.config,
                modifier: stage.modifier(request.update_modifier),
                diagnose: stage == Stage::FullUnfrozen,
            };
            let error = match attempt.solve() {
                Ok(solution) => return Ok(solution),
                Err(error) if error.allows_retry() => error,
                Err(error) => return Err(error),
            };
            let Some(next) = stage.next(&error, current.is_some(), freeze) else {
                return Err(error);
            };
            debug!("{error}");
            info!("attempt with the {stage} failed, retrying with the {next}");
            stage = next;
        }
    }
}

/// Finds the environment `request` leads to over `index`.
///
/// Shorthand for [Resolver::new] followed by [Resolver::resolve].
pub fn resolve(
    index: &Index,
    request: &Request,
    config: &SolverConfig,
) -> Result<Solution, ResolveError> {
    Resolver::new(index, config).resolve(request)
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Unsatisfiable;

    fn unsat() -> ResolveError {
        ResolveError::unsatisfiable(Unsatisfiable::bare())
    }

    fn missing() -> ResolveError {
        ResolveError::PackagesNotFound { specs: Vec::new() }
    }

    #[test]
    fn every_stage_is_tried_in_order() {
        let mut stage = Stage::first(true, true);
        let mut seen = vec![stage];
        while let Some(next) = stage.next(&unsat(), true, true) {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            [
                Stage::ReducedFrozen,
                Stage::ReducedUnfrozen,
                Stage::FullFrozen,
                Stage::FullUnfrozen
            ]
        );
    }

    #[test]
    fn missing_names_move_to_the_full_index() {
        assert_eq!(
            Stage::ReducedFrozen.next(&missing(), true, true),
            Some(Stage::FullFrozen)
        );
        assert_eq!(
            Stage::ReducedUnfrozen.next(&missing(), true, true),
            Some(Stage::FullUnfrozen)
        );
        assert_eq!(Stage::FullFrozen.next(&missing(), true, true), None);
    }

    #[test]
    fn inapplicable_stages_are_skipped() {
        assert_eq!(Stage::first(false, true), Stage::FullFrozen);
        assert_eq!(Stage::first(true, false), Stage::ReducedUnfrozen);
        assert_eq!(Stage::first(false, false), Stage::FullUnfrozen);
        assert_eq!(
            Stage::ReducedUnfrozen.next(&unsat(), true, false),
            Some(Stage::FullUnfrozen)
        );
    }

    #[test]
    fn unfrozen_stages_lift_the_freeze() {
        assert_eq!(
            Stage::FullFrozen.modifier(UpdateModifier::UpdateAll),
            UpdateModifier::FreezeInstalled
        );
        assert_eq!(
            Stage::FullUnfrozen.modifier(UpdateModifier::FreezeInstalled),
            UpdateModifier::UpdateSpecs
        );
        assert_eq!(
            Stage::FullUnfrozen.modifier(UpdateModifier::UpdateDeps),
            UpdateModifier::UpdateDeps
        );
    }
}
