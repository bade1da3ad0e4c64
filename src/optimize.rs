// SPDX-License-Identifier: MPL-2.0

//! Lexicographic optimization of a satisfiable problem.
//!
//! Every pass minimizes one objective and fixes its optimum before the next
//! pass runs, so an earlier pass always dominates a later one:
//!
//! 1. removed packages, for remove operations;
//! 2. channel, then version, of the requested packages;
//! 3. active tracked features;
//! 4. featureless records where a featured alternative is active;
//! 5. build number, then arch over `noarch`, of the requested packages;
//! 6. optional installs, for other operations;
//! 7. targeted packages moved away from their target;
//! 8. channel, version, build number and arch of every other package;
//! 9. packages no spec mentions;
//! 10. timestamps, if the solution is still not unique.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::compile::Problem;
use crate::index::{Index, VersionKey};
use crate::internal::{Objective, Polarity};
use crate::sat::{new_backend, Lit, Model};
use crate::{FxIndexSet, MatchSpec, PackageRecord, ResolveError, SolverConfig};

/// How many solutions are enumerated after the last pass.
const MAX_ALTERNATIVES: usize = 10;

/// Per-record rank objectives of a set of names: 0 for the best record of a
/// name, growing by one at each strictly worse step of the component.
#[derive(Default)]
struct VersionMetrics {
    channel: Objective,
    version: Objective,
    build: Objective,
    arch: Objective,
    timestamp: Objective,
}

struct Passes<'p, 'i> {
    problem: &'p mut Problem<'i>,
    config: &'p SolverConfig,
    solution: Model,
}

impl Passes<'_, '_> {
    fn run(&mut self, label: &str, objective: &Objective, trymax: bool) -> Result<u64, ResolveError> {
        self.config.check_deadline()?;
        let best = Some(self.solution.clone());
        let Some((model, value)) = self.problem.clauses.minimize(objective, best, trymax)? else {
            return Err(ResolveError::Backend(format!(
                "optimization of {label} lost satisfiability"
            )));
        };
        self.solution = model;
        info!("{label}: {value}");
        Ok(value)
    }

    fn is_converged(&mut self) -> Result<bool, ResolveError> {
        let exclusion = self.exclusion(&self.solution.clone());
        Ok(self.problem.clauses.sat_with(&[exclusion], false)?.is_none())
    }

    /// The clause excluding every solution that selects all records of `model`.
    fn exclusion(&self, model: &Model) -> Vec<Lit> {
        self.problem
            .selected(model)
            .into_iter()
            .map(|id| !self.problem.record_var(id))
            .collect()
    }

    fn version_metrics<'s>(&self, names: impl IntoIterator<Item = &'s str>) -> VersionMetrics {
        let index = self.problem.index;
        let mut metrics = VersionMetrics::default();
        let names: FxIndexSet<&str> = names.into_iter().collect();
        for name in names {
            let ranked = index.ranked_group(
                name,
                self.config.channel_priority,
                self.config.ignore_timestamps,
            );
            let (mut ic, mut iv, mut ib, mut ia, mut it) = (0u64, 0u64, 0u64, 0u64, 0u64);
            let mut previous: Option<&VersionKey> = None;
            for (key, id) in &ranked {
                if let Some(prev) = previous {
                    if prev.first != key.first {
                        ic += 1;
                        (iv, ib, ia, it) = (0, 0, 0, 0);
                    } else if prev.second != key.second {
                        iv += 1;
                        (ib, ia, it) = (0, 0, 0);
                    } else if prev.build_number != key.build_number {
                        ib += 1;
                        (ia, it) = (0, 0);
                    } else if prev.arch != key.arch {
                        ia += 1;
                        it = 0;
                    } else if prev.timestamp != key.timestamp {
                        it += 1;
                    }
                }
                let var = self.problem.record_var(*id);
                for (rank, objective) in [
                    (ic, &mut metrics.channel),
                    (iv, &mut metrics.version),
                    (ib, &mut metrics.build),
                    (ia, &mut metrics.arch),
                    (it, &mut metrics.timestamp),
                ] {
                    if rank > 0 {
                        objective.push((rank, var));
                    }
                }
                previous = Some(key);
            }
        }
        metrics
    }

    fn feature_count(&self) -> Objective {
        self.problem.features().map(|(_, lit)| (1, lit)).collect()
    }

    fn feature_metric(&mut self) -> Objective {
        let index = self.problem.index;
        let mut objective = Objective::new();
        for (_, ids) in index.groups() {
            let mut active: FxIndexSet<&str> = FxIndexSet::default();
            for &id in ids {
                for feature in &index.record(id).features {
                    if self.problem.feature_var(feature) != Lit::FALSE {
                        active.insert(feature.as_str());
                    }
                }
            }
            for feature in active {
                let tracked = self.problem.feature_var(feature);
                for &id in ids {
                    if index.record(id).features.iter().any(|f| f == feature) {
                        continue;
                    }
                    let record = self.problem.record_var(id);
                    let misfeatured = self.problem.clauses.and(record, tracked, Polarity::Both);
                    objective.push((1, misfeatured));
                }
            }
        }
        objective
    }
}

/// Finds the best solution of `specs` over `index`, or `None` if there is
/// none. Records are returned sorted by name.
pub(crate) fn optimize(
    index: &Index,
    specs: &[MatchSpec],
    config: &SolverConfig,
    removal: bool,
) -> Result<Option<Vec<Arc<PackageRecord>>>, ResolveError> {
    let mut problem = Problem::compile(index, new_backend(config.sat_solver));
    let required: Vec<Vec<Lit>> = problem
        .spec_constraints(specs)
        .into_iter()
        .map(|lit| vec![lit])
        .collect();
    let Some(solution) = problem.clauses.sat_with(&required, true)? else {
        debug!("specs are unsatisfiable over {} records", index.len());
        return Ok(None);
    };

    let mut requested: Vec<&MatchSpec> = Vec::new();
    let mut optional: Vec<MatchSpec> = Vec::new();
    let mut others: Vec<MatchSpec> = Vec::new();
    let mut unmentioned: FxIndexSet<&str> = index.groups().map(|(name, _)| name).collect();
    for spec in specs {
        unmentioned.shift_remove(spec.name());
        if !spec.is_optional() {
            if spec.target().is_some() {
                others.push(spec.clone());
            } else {
                requested.push(spec);
            }
        } else if !index.find_match_ids(spec).is_empty() {
            let bare = MatchSpec::from_name(spec.name())
                .with_optional(true)
                .with_target(spec.target().map(str::to_string));
            optional.push(bare.clone());
            others.push(bare);
        }
    }
    others.extend(unmentioned.iter().map(|&name| MatchSpec::from_name(name)));
    debug!(
        "requested specs: {}",
        requested.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    );
    debug!(
        "optional specs: {}",
        optional.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    );

    let mut passes = Passes {
        problem: &mut problem,
        config,
        solution,
    };

    if removal {
        let removed: Objective = optional
            .iter()
            .map(|s| (1, !passes.problem.group_var(s.name())))
            .collect();
        passes.run("package removal metric", &removed, false)?;
    }

    let direct = passes.version_metrics(requested.iter().map(|s| s.name()));
    passes.run("requested channel metric", &direct.channel, false)?;
    passes.run("requested version metric", &direct.version, false)?;

    let features = passes.feature_count();
    passes.run("track feature count", &features, false)?;
    let misfeatures = passes.feature_metric();
    passes.run("package misfeature count", &misfeatures, false)?;

    passes.run("requested build metric", &direct.build, false)?;
    passes.run("requested noarch metric", &direct.arch, false)?;

    if !removal {
        let installs: Objective = optional
            .iter()
            .map(|s| (1, passes.problem.group_var(s.name())))
            .collect();
        passes.run("optional package install metric", &installs, false)?;
    }

    let updates: Objective = others
        .iter()
        .filter_map(|s| s.target())
        .filter_map(|target| index.lookup_dist(target))
        .map(|id| (1, !passes.problem.record_var(id)))
        .collect();
    passes.run("dependency update count", &updates, false)?;

    let mut indirect = passes.version_metrics(others.iter().map(|s| s.name()));
    passes.run("additional channel metric", &indirect.channel, false)?;
    passes.run("additional version metric", &indirect.version, false)?;
    passes.run("additional build metric", &indirect.build, false)?;
    passes.run("additional noarch metric", &indirect.arch, false)?;

    let weak: Objective = unmentioned
        .iter()
        .map(|&name| (1, passes.problem.group_var(name)))
        .collect();
    passes.run("weak dependency count", &weak, true)?;

    if !passes.is_converged()? {
        indirect.timestamp.extend(direct.timestamp);
        passes.run("timestamp metric", &indirect.timestamp, false)?;
    }

    let first = passes.problem.selected(&passes.solution);
    let mut solutions = vec![first.clone()];
    let mut exclusion = passes.exclusion(&passes.solution);
    while let Some(model) = passes.problem.clauses.sat_with(std::slice::from_ref(&exclusion), true)? {
        solutions.push(passes.problem.selected(&model));
        if solutions.len() > MAX_ALTERNATIVES {
            debug!("too many solutions; terminating");
            break;
        }
        exclusion = passes.exclusion(&model);
    }
    if solutions.len() > 1 {
        let common: FxIndexSet<_> = first
            .iter()
            .filter(|&id| solutions.iter().all(|s| s.contains(id)))
            .collect();
        let diffs: Vec<String> = solutions
            .iter()
            .map(|s| {
                s.iter()
                    .filter(|id| !common.contains(id))
                    .map(|&id| index.record(id).to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        warn!(
            "{} possible package resolutions (only showing differing packages):\n  - {}",
            if solutions.len() > MAX_ALTERNATIVES {
                format!(">{MAX_ALTERNATIVES}")
            } else {
                solutions.len().to_string()
            },
            diffs.join("\n  - ")
        );
    }

    Ok(Some(
        first
            .into_iter()
            .map(|id| Arc::clone(index.record(id)))
            .collect(),
    ))
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelPriority, SatSolverChoice};

    fn rec(name: &str, version: &str) -> PackageRecord {
        PackageRecord::new(name, version, "0").unwrap()
    }

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn dists(records: &[Arc<PackageRecord>]) -> Vec<String> {
        records.iter().map(|r| r.to_string()).collect()
    }

    fn run(index: &Index, specs: &[&str], config: &SolverConfig) -> Vec<String> {
        let specs: Vec<MatchSpec> = specs.iter().map(|s| spec(s)).collect();
        dists(&optimize(index, &specs, config, false).unwrap().unwrap())
    }

    #[test]
    fn requested_versions_are_maximized() {
        let index = Index::new(
            ["1.18", "1.19", "1.20"].map(|v| Arc::new(rec("numpy", v))),
        )
        .unwrap();
        for choice in [SatSolverChoice::Varisat, SatSolverChoice::Dpll] {
            let config = SolverConfig::default().with_sat_solver(choice);
            assert_eq!(run(&index, &["numpy>=1.19"], &config), ["defaults::numpy-1.20-0"]);
        }
    }

    #[test]
    fn channel_priority_dominates_version() {
        let index = Index::with_channels(
            ["a", "b"],
            [
                Arc::new(rec("foo", "1.0").with_channel("a")),
                Arc::new(rec("foo", "2.0").with_channel("b")),
            ],
        )
        .unwrap();
        let flexible = SolverConfig::default();
        assert_eq!(run(&index, &["foo"], &flexible), ["a::foo-1.0-0"]);
        let disabled = SolverConfig::default().with_channel_priority(ChannelPriority::Disabled);
        assert_eq!(run(&index, &["foo"], &disabled), ["b::foo-2.0-0"]);
    }

    #[test]
    fn requested_version_beats_dependency_version() {
        let index = Index::new([
            Arc::new(rec("app", "2").with_depends(["lib 1"])),
            Arc::new(rec("app", "1").with_depends(["lib 2"])),
            Arc::new(rec("lib", "1")),
            Arc::new(rec("lib", "2")),
        ])
        .unwrap();
        let solution = run(&index, &["app"], &SolverConfig::default());
        assert_eq!(solution, ["defaults::app-2-0", "defaults::lib-1-0"]);
    }

    #[test]
    fn unneeded_packages_are_left_out() {
        let index = Index::new([
            Arc::new(rec("app", "1").with_depends(["lib"])),
            Arc::new(rec("lib", "1")),
            Arc::new(rec("extra", "1")),
        ])
        .unwrap();
        let solution = run(&index, &["app"], &SolverConfig::default());
        assert_eq!(solution, ["defaults::app-1-0", "defaults::lib-1-0"]);
    }

    #[test]
    fn targets_are_kept_when_possible() {
        let old = Arc::new(rec("lib", "1"));
        let index = Index::new([
            Arc::new(rec("app", "1").with_depends(["lib"])),
            Arc::clone(&old),
            Arc::new(rec("lib", "2")),
        ])
        .unwrap();
        let target = format!("lib[target='{}']", old.dist_str());
        let solution = run(&index, &["app", &target], &SolverConfig::default());
        assert_eq!(solution, ["defaults::app-1-0", "defaults::lib-1-0"]);
    }

    #[test]
    fn removal_minimizes_removed_packages() {
        let index = Index::new([
            Arc::new(rec("a", "1").with_depends(["b"])),
            Arc::new(rec("b", "1")),
            Arc::new(rec("c", "1")),
        ])
        .unwrap();
        let specs = [spec("b[version='@', optional]"), spec("a[optional]"), spec("c[optional]")];
        let config = SolverConfig::default();
        // The reduction drops every record of b, and a along with it.
        let reduced = index.reduced(&specs, config.channel_priority, true).unwrap();
        assert_eq!(reduced.len(), 1);
        let solution = optimize(&reduced, &specs, &config, true).unwrap().unwrap();
        assert_eq!(dists(&solution), ["defaults::c-1-0"]);
    }

    #[test]
    fn unsatisfiable_specs_give_none() {
        let index = Index::new([Arc::new(rec("a", "1"))]).unwrap();
        let specs = [spec("a 2")];
        assert!(optimize(&index, &specs, &SolverConfig::default(), false)
            .unwrap()
            .is_none());
    }
}
