// SPDX-License-Identifier: MPL-2.0

//! One resolution attempt against one index.
//!
//! An attempt aggregates the constraints of the request into specs, relaxes
//! those that conflict, reduces the index to what the specs can reach,
//! optimizes over the reduced index and finally applies the dependency
//! modifiers of the request to the optimal records.
//!
//! The returned records are in install order: every record comes after the
//! records it depends on.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::diagnose::{build_conflict_report, conflicting_specs};
use crate::graph::PrefixGraph;
use crate::index::Index;
use crate::optimize::optimize;
use crate::{
    DepsModifier, FxIndexMap, FxIndexSet, MatchSpec, PackageRecord, Request, ResolveError,
    SolverConfig, SpecParseError, Unsatisfiable, UpdateModifier,
};

/// The outcome of a successful resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    /// The records of the environment, dependencies first.
    pub records: Vec<Arc<PackageRecord>>,
    /// Installed records that were inconsistent with the rest of the
    /// environment before solving.
    pub inconsistent: Vec<Arc<PackageRecord>>,
    /// Specs from the history that had to be relaxed to find a solution.
    pub neutered: Vec<MatchSpec>,
}

impl Solution {
    fn of(records: Vec<Arc<PackageRecord>>) -> Result<Self, SpecParseError> {
        Ok(Self {
            records: install_order(records)?,
            ..Self::default()
        })
    }

    /// The record named `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Arc<PackageRecord>> {
        self.records.iter().find(|r| r.name == name)
    }

    /// The package names, in install order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }
}

fn install_order(records: Vec<Arc<PackageRecord>>) -> Result<Vec<Arc<PackageRecord>>, SpecParseError> {
    Ok(PrefixGraph::new(records, [])?.into_records())
}

/// Answers requests that need no solving: forced removals and requests
/// already satisfied by the environment.
pub(crate) fn shortcut(request: &Request) -> Result<Option<Solution>, ResolveError> {
    if request.force_remove && request.is_removal() {
        if !request.specs_to_add.is_empty() {
            warn!("forced removal ignores the specs to add");
        }
        let kept: Vec<Arc<PackageRecord>> = request
            .installed
            .iter()
            .filter(|r| !request.specs_to_remove.iter().any(|s| s.matches(r)))
            .cloned()
            .collect();
        return Ok(Some(Solution::of(kept)?));
    }
    if request.update_modifier == UpdateModifier::SpecsSatisfiedSkipSolve
        && !request.is_removal()
        && !request.prune
        && request
            .specs_to_add
            .iter()
            .all(|s| request.installed.iter().any(|r| s.matches(r)))
    {
        info!("all requested specs are already satisfied");
        return Ok(Some(Solution::of(request.installed.clone())?));
    }
    Ok(None)
}

pub(crate) struct Attempt<'a> {
    pub(crate) index: &'a Index,
    pub(crate) request: &'a Request,
    pub(crate) config: &'a SolverConfig,
    pub(crate) modifier: UpdateModifier,
    /// Whether a failure gets a conflict explanation.
    pub(crate) diagnose: bool,
}

impl Attempt<'_> {
    pub(crate) fn solve(&self) -> Result<Solution, ResolveError> {
        self.solve_for(self.request.specs_to_add.clone(), self.modifier)
    }

    fn solve_for(
        &self,
        specs_to_add: Vec<MatchSpec>,
        modifier: UpdateModifier,
    ) -> Result<Solution, ResolveError> {
        let request = self.request;
        let config = self.config;
        let mut aggregator = Aggregator::new(self.index, request, config, modifier, specs_to_add);
        aggregator.collect();
        aggregator.remove_specs()?;
        aggregator.add_specs()?;
        let before = aggregator.solution.clone();
        let floated = aggregator.float_inconsistent()?;
        let specs = aggregator.neuter_conflicts()?;
        debug!(
            "final specs to add:\n  - {}",
            specs.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  - ")
        );

        config.check_deadline()?;
        let reduced = self.index.reduced(&specs, config.channel_priority, true)?;
        let Some(mut records) = optimize(&reduced, &specs, config, request.is_removal())? else {
            return Err(self.unsatisfiable(&specs, &aggregator.specs_to_add)?);
        };

        for (name, (record, previous)) in &floated {
            if previous.is_none() {
                records.retain(|r| &r.name != name);
                records.push(Arc::clone(record));
            }
        }
        if modifier == UpdateModifier::UpdateSpecs {
            log_constricting_specs(self.index, &aggregator.specs_to_add, &request.installed, &records);
        }
        if !floated.is_empty() {
            let orphans: Vec<Arc<PackageRecord>> = before
                .iter()
                .filter(|r| {
                    !aggregator.specs_map.contains(&r.name) && !records.iter().any(|s| s.name == r.name)
                })
                .cloned()
                .collect();
            records.extend(orphans);
        }
        let inconsistent: Vec<Arc<PackageRecord>> =
            floated.values().map(|(record, _)| Arc::clone(record)).collect();

        match request.deps_modifier {
            DepsModifier::NoDeps => records = self.no_deps(records, &aggregator.specs_to_add),
            DepsModifier::OnlyDeps if modifier != UpdateModifier::UpdateDeps => {
                records = self.only_deps(records, &aggregator.specs_to_add)?;
            }
            _ if modifier == UpdateModifier::UpdateDeps => {
                let mut solution = self.update_deps(records, &aggregator)?;
                for record in inconsistent {
                    if !solution.inconsistent.contains(&record) {
                        solution.inconsistent.push(record);
                    }
                }
                return Ok(solution);
            }
            _ => {}
        }

        if request.prune {
            let mut graph = PrefixGraph::new(records, &specs)?;
            let pruned = graph.prune();
            if !pruned.is_empty() {
                debug!(
                    "pruned {}",
                    pruned.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                );
            }
            records = graph.into_records();
        }

        let records = install_order(records)?;
        debug!(
            "solved environment:\n  - {}",
            records.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  - ")
        );
        Ok(Solution {
            records,
            inconsistent,
            neutered: aggregator.neutered_history(),
        })
    }

    fn unsatisfiable(
        &self,
        specs: &[MatchSpec],
        explicit: &[MatchSpec],
    ) -> Result<ResolveError, ResolveError> {
        if !self.diagnose || !self.config.unsatisfiable_hints {
            return Ok(ResolveError::unsatisfiable(Unsatisfiable::bare()));
        }
        let conflicts = conflicting_specs(self.index, specs, explicit, self.config)?.unwrap_or_default();
        let report = build_conflict_report(
            self.index,
            &conflicts,
            self.config.unsatisfiable_hints_check_depth,
        );
        Ok(ResolveError::unsatisfiable(Unsatisfiable {
            specs: conflicts,
            report,
        }))
    }

    /// The installed records, with only the requested ones replaced and the
    /// removed ones gone.
    fn no_deps(
        &self,
        solved: Vec<Arc<PackageRecord>>,
        specs_to_add: &[MatchSpec],
    ) -> Vec<Arc<PackageRecord>> {
        let request = self.request;
        let added: Vec<Arc<PackageRecord>> = solved
            .into_iter()
            .filter(|r| specs_to_add.iter().any(|s| s.matches(r)))
            .collect();
        let mut records: Vec<Arc<PackageRecord>> = request
            .installed
            .iter()
            .filter(|r| !request.specs_to_remove.iter().any(|s| s.matches(r)))
            .filter(|r| !added.iter().any(|a| a.name == r.name))
            .cloned()
            .collect();
        records.extend(added);
        records
    }

    /// The solution without the requested records nothing else depends on,
    /// unless they were already installed.
    fn only_deps(
        &self,
        solved: Vec<Arc<PackageRecord>>,
        specs_to_add: &[MatchSpec],
    ) -> Result<Vec<Arc<PackageRecord>>, ResolveError> {
        let request = self.request;
        let mut graph = PrefixGraph::new(solved, specs_to_add)?;
        let removed = graph.remove_youngest_anchored();
        let add_back: Vec<Arc<PackageRecord>> = removed
            .iter()
            .filter(|r| !request.specs_to_remove.iter().any(|s| s.name() == r.name))
            .filter_map(|r| request.installed.iter().find(|i| i.name == r.name))
            .cloned()
            .collect();
        let mut records = graph.into_records();
        records.extend(add_back);
        Ok(records)
    }

    /// Solves again with every dependency of the request requested by name,
    /// so that they get updated too.
    fn update_deps(
        &self,
        solved: Vec<Arc<PackageRecord>>,
        aggregator: &Aggregator<'_>,
    ) -> Result<Solution, ResolveError> {
        let graph = PrefixGraph::new(solved, [])?;
        let mut specs: FxIndexMap<String, MatchSpec> = FxIndexMap::default();
        for spec in &aggregator.specs_to_add {
            for record in graph.all_ancestors(spec.name()) {
                specs.insert(record.name.clone(), MatchSpec::from_name(record.name.as_str()));
            }
        }
        for pin in &aggregator.pinned {
            specs.shift_remove(pin.name());
        }
        if specs.contains_key("python") {
            let python = self.request.installed.iter().find(|r| r.name == "python");
            if let Some(minor) = python.and_then(|p| p.version.major_minor()) {
                let spec = MatchSpec::from_name("python").with_version(Some(format!("{minor}.*").parse()?));
                specs.insert("python".to_string(), spec);
            }
        }
        for spec in &aggregator.specs_to_add {
            specs.insert(spec.name().to_string(), spec.clone());
        }
        debug!(
            "updating the dependencies of the request: {}",
            specs.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        );
        self.solve_for(specs.into_values().collect(), UpdateModifier::UpdateSpecs)
    }
}

/// Logs the dependencies that keep a requested package from updating to
/// its newest version.
fn log_constricting_specs(
    index: &Index,
    requested: &[MatchSpec],
    installed: &[Arc<PackageRecord>],
    solved: &[Arc<PackageRecord>],
) {
    for spec in requested {
        let name = spec.name();
        if name.starts_with("__") {
            continue;
        }
        let (Some(before), Some(after)) = (
            installed.iter().find(|r| r.name == name),
            solved.iter().find(|r| r.name == name),
        ) else {
            continue;
        };
        let Some(newest) = index.group(name).next() else {
            continue;
        };
        if after.version != before.version || newest.version <= after.version {
            continue;
        }
        let constricting: FxIndexSet<String> = solved
            .iter()
            .flat_map(move |record| {
                record
                    .depends
                    .iter()
                    .filter_map(|d| d.parse::<MatchSpec>().ok())
                    .filter(move |d| d.name() == name && !d.matches(newest))
                    .map(move |d| format!("{} -> requires {d}", record.name))
            })
            .collect();
        if !constricting.is_empty() {
            info!(
                "updating {name} is constricted by:\n  {}",
                constricting.into_iter().collect::<Vec<_>>().join("\n  ")
            );
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, version: &str, depends: &[&str]) -> Arc<PackageRecord> {
        Arc::new(
            PackageRecord::new(name, version, "0")
                .unwrap()
                .with_depends(depends.iter().copied()),
        )
    }

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn index() -> Index {
        Index::new([
            rec("python", "3.9.7", &[]),
            rec("python", "3.10.4", &[]),
            rec("six", "1.15", &["python"]),
            rec("six", "1.16", &["python"]),
            rec("flask", "2.0", &["python", "werkzeug"]),
            rec("werkzeug", "2.0", &["python", "six"]),
        ])
        .unwrap()
    }

    fn attempt<'a>(index: &'a Index, request: &'a Request, config: &'a SolverConfig) -> Attempt<'a> {
        Attempt {
            index,
            request,
            config,
            modifier: UpdateModifier::UpdateSpecs,
            diagnose: true,
        }
    }

    fn names(solution: &Solution) -> Vec<String> {
        solution.records.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn install_order_puts_dependencies_first() {
        let index = index();
        let request = Request::install([spec("flask")]);
        let config = SolverConfig::default();
        let solution = attempt(&index, &request, &config).solve().unwrap();
        assert_eq!(
            names(&solution),
            [
                "defaults::python-3.10.4-0",
                "defaults::six-1.16-0",
                "defaults::werkzeug-2.0-0",
                "defaults::flask-2.0-0",
            ]
        );
    }

    #[test]
    fn only_deps_leaves_the_request_out() {
        let index = index();
        let request = Request::install([spec("flask")]).with_deps_modifier(DepsModifier::OnlyDeps);
        let config = SolverConfig::default();
        let solution = attempt(&index, &request, &config).solve().unwrap();
        assert_eq!(
            solution.names().collect::<Vec<_>>(),
            ["python", "six", "werkzeug"]
        );
    }

    #[test]
    fn update_deps_updates_the_dependencies() {
        let index = index();
        let installed = [
            rec("python", "3.10.4", &[]),
            rec("six", "1.15", &["python"]),
            rec("werkzeug", "2.0", &["python", "six"]),
        ];
        let request = Request::install([spec("werkzeug")])
            .with_installed(installed)
            .with_history([spec("werkzeug")])
            .with_update_modifier(UpdateModifier::UpdateDeps);
        let config = SolverConfig::default();
        let mut attempt = attempt(&index, &request, &config);
        attempt.modifier = UpdateModifier::UpdateDeps;
        let solution = attempt.solve().unwrap();
        assert_eq!(solution.get("six").unwrap().version.to_string(), "1.16");
    }

    #[test]
    fn missing_names_and_versions_fail_differently() {
        let index = index();
        let config = SolverConfig::default();
        let request = Request::install([spec("flask"), spec("django")]);
        let err = attempt(&index, &request, &config).solve().unwrap_err();
        let ResolveError::PackagesNotFound { specs } = &err else {
            panic!("expected missing packages, got {err}");
        };
        assert_eq!(specs.iter().map(|s| s.name()).collect::<Vec<_>>(), ["django"]);

        let request = Request::install([spec("flask"), spec("python 3.8.*")]);
        let err = attempt(&index, &request, &config).solve().unwrap_err();
        let ResolveError::Unsatisfiable(reason) = &err else {
            panic!("expected unsatisfiable, got {err}");
        };
        assert!(err.allows_retry());
        assert_eq!(reason.specs.iter().map(|s| s.name()).collect::<Vec<_>>(), ["python"]);

        let request = Request::install([spec("six 1.15"), spec("werkzeug"), spec("python 3.9.*")]);
        assert!(attempt(&index, &request, &config).solve().is_ok());
    }

    #[test]
    fn forced_removal_skips_the_solver() {
        let request = Request::remove([spec("six")])
            .with_installed([rec("python", "3.9.7", &[]), rec("six", "1.15", &["python"])])
            .with_force_remove(true);
        let solution = shortcut(&request).unwrap().unwrap();
        assert_eq!(solution.names().collect::<Vec<_>>(), ["python"]);
    }

    #[test]
    fn satisfied_specs_skip_the_solver() {
        let installed = [rec("python", "3.9.7", &[]), rec("six", "1.15", &["python"])];
        let request = Request::install([spec("six")])
            .with_installed(installed.clone())
            .with_update_modifier(UpdateModifier::SpecsSatisfiedSkipSolve);
        let solution = shortcut(&request).unwrap().unwrap();
        assert_eq!(solution.names().collect::<Vec<_>>(), ["python", "six"]);

        let request = Request::install([spec("flask")])
            .with_installed(installed)
            .with_update_modifier(UpdateModifier::SpecsSatisfiedSkipSolve);
        assert!(shortcut(&request).unwrap().is_none());
    }
}
