// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use proptest::prelude::*;

use envsolve::{resolve, Index, MatchSpec, PackageRecord, Request, SatSolverChoice, Solution, SolverConfig};

const NAMES: usize = 5;
const VERSIONS: u32 = 3;

/// A dependency on `name`, either `< bound` or `>= bound`.
#[derive(Debug, Clone, Copy)]
struct Dep {
    name: usize,
    upper: bool,
    bound: u32,
}

impl Dep {
    fn matches(self, version: u32) -> bool {
        if self.upper {
            version < self.bound
        } else {
            version >= self.bound
        }
    }

    fn to_spec_string(self) -> String {
        let op = if self.upper { "<" } else { ">=" };
        format!("p{} {op}{}", self.name, self.bound)
    }
}

/// The dependencies of every record, indexed by `name * VERSIONS + version`.
fn registry_strategy() -> impl Strategy<Value = Vec<Vec<Dep>>> {
    let dep = (0..NAMES, any::<bool>(), 0..=VERSIONS).prop_map(|(name, upper, bound)| Dep {
        name,
        upper,
        bound,
    });
    prop::collection::vec(prop::collection::vec(dep, 0..3), NAMES * VERSIONS as usize)
}

fn deps_of(registry: &[Vec<Dep>], name: usize, version: u32) -> impl Iterator<Item = Dep> + '_ {
    registry[name * VERSIONS as usize + version as usize]
        .iter()
        .copied()
        .filter(move |d| d.name != name)
}

fn index(registry: &[Vec<Dep>]) -> Index {
    let records = (0..NAMES).flat_map(|name| {
        (0..VERSIONS).map(move |version| {
            let depends: Vec<String> = deps_of(registry, name, version).map(Dep::to_spec_string).collect();
            Arc::new(
                PackageRecord::new(format!("p{name}"), &version.to_string(), "0")
                    .unwrap()
                    .with_depends(depends),
            )
        })
    });
    Index::new(records).unwrap()
}

/// The newest version of `requested` over every valid assignment, found by
/// enumeration.
fn brute_force_best(registry: &[Vec<Dep>], requested: usize) -> Option<u32> {
    let choices = VERSIONS as usize + 1;
    let mut best = None;
    for code in 0..choices.pow(NAMES as u32) {
        let assignment: Vec<Option<u32>> = (0..NAMES)
            .map(|i| {
                let choice = (code / choices.pow(i as u32)) % choices;
                (choice > 0).then(|| choice as u32 - 1)
            })
            .collect();
        let Some(version) = assignment[requested] else {
            continue;
        };
        let valid = assignment.iter().enumerate().all(|(name, chosen)| match chosen {
            None => true,
            Some(v) => deps_of(registry, name, *v)
                .all(|d| assignment[d.name].is_some_and(|w| d.matches(w))),
        });
        if valid && best.is_none_or(|b| version > b) {
            best = Some(version);
        }
    }
    best
}

fn requested_version(solution: &Solution, requested: usize) -> Option<u32> {
    solution
        .get(&format!("p{requested}"))
        .map(|r| r.version.to_string().parse().unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn solutions_satisfy_every_dependency(registry in registry_strategy(), requested in 0..NAMES) {
        let index = index(&registry);
        let name = format!("p{}", requested);
        let request = Request::install([MatchSpec::from_name(name.as_str())]);
        if let Ok(solution) = resolve(&index, &request, &SolverConfig::default()) {
            let mut names: Vec<&str> = solution.names().collect();
            names.sort_unstable();
            names.dedup();
            prop_assert_eq!(names.len(), solution.records.len());
            prop_assert!(solution.get(&name).is_some(), "{} is missing", name);
            for record in &solution.records {
                for dep in &record.depends {
                    let dep: MatchSpec = dep.parse().unwrap();
                    prop_assert!(solution.records.iter().any(|r| dep.matches(r)), "{} needs {}", record, dep);
                }
            }
        }
    }

    #[test]
    fn same_result_on_repeated_runs(registry in registry_strategy(), requested in 0..NAMES) {
        let index = index(&registry);
        let request = Request::install([MatchSpec::from_name(format!("p{requested}"))]);
        let config = SolverConfig::default();
        let one = resolve(&index, &request, &config).ok();
        let two = resolve(&index, &request, &config).ok();
        prop_assert_eq!(one, two);
    }

    /// Ties between optimal solutions may break differently, the optimum
    /// itself may not.
    #[test]
    fn backends_reach_the_same_optimum(registry in registry_strategy(), requested in 0..NAMES) {
        let index = index(&registry);
        let name = format!("p{}", requested);
        let request = Request::install([MatchSpec::from_name(name.as_str())]);
        let solve = |backend| {
            let config = SolverConfig::default().with_sat_solver(backend);
            resolve(&index, &request, &config).ok()
        };
        match (solve(SatSolverChoice::Varisat), solve(SatSolverChoice::Dpll)) {
            (None, None) => {}
            (Some(varisat), Some(dpll)) => {
                prop_assert_eq!(varisat.get(&name), dpll.get(&name));
                prop_assert_eq!(varisat.records.len(), dpll.records.len());
            }
            (varisat, dpll) => prop_assert!(false, "varisat: {:?}, dpll: {:?}", varisat, dpll),
        }
    }

    #[test]
    fn requested_version_is_the_best_possible(registry in registry_strategy(), requested in 0..NAMES) {
        let index = index(&registry);
        let request = Request::install([MatchSpec::from_name(format!("p{requested}"))]);
        let best = brute_force_best(&registry, requested);
        for backend in [SatSolverChoice::Varisat, SatSolverChoice::Dpll] {
            let config = SolverConfig::default().with_sat_solver(backend);
            let found = resolve(&index, &request, &config)
                .ok()
                .and_then(|solution| requested_version(&solution, requested));
            prop_assert_eq!(found, best, "{:?}", backend);
        }
    }
}
