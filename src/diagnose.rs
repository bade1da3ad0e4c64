// SPDX-License-Identifier: MPL-2.0

//! Explaining why a set of specs cannot be satisfied.
//!
//! The explanation has two parts. A minimal unsatisfiable subset of the specs
//! is found by bisection over the satisfiability of spec subsets. Then the
//! dependency graphs of those specs are searched breadth first for package
//! names several of them reach; the chains leading to each such name are what
//! the user sees.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};

use log::debug;

use crate::compile::Problem;
use crate::index::Index;
use crate::sat::{new_backend, Lit};
use crate::{FxIndexMap, MatchSpec, ResolveError, Set, SolverConfig};

/// A path through the dependency graph, from a requested spec down to a
/// dependency spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyChain(pub Vec<MatchSpec>);

impl Display for DependencyChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.0.iter().enumerate() {
            if i == 0 {
                write!(f, "{spec}")?;
                continue;
            }
            write!(f, " -> {}", spec.name())?;
            let mut keys = Vec::new();
            if let Some(version) = spec.version() {
                keys.push(format!("version='{version}'"));
            }
            if let Some(build) = spec.build() {
                keys.push(format!("build='{build}'"));
            }
            if !keys.is_empty() {
                write!(f, "[{}]", keys.join(", "))?;
            }
        }
        Ok(())
    }
}

/// The chains of every spec that reaches one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The package the chains collide on.
    pub package: String,
    /// How each involved spec reaches the package.
    pub chains: Vec<DependencyChain>,
}

/// Conflicting dependency chains grouped by the package they collide on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    /// One entry per colliding package.
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    /// Whether nothing was found.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

impl Display for ConflictReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("The following specifications were found to be incompatible with each other:")?;
        for conflict in &self.conflicts {
            write!(f, "\n\nPackage {} conflicts for:", conflict.package)?;
            for chain in &conflict.chains {
                write!(f, "\n{chain}")?;
            }
        }
        Ok(())
    }
}

/// A minimal subset of `items` that `sat` rejects, given that `sat` rejects
/// all of `items`.
///
/// `sat` must be monotone: adding items never turns an unsatisfiable set
/// satisfiable.
pub(crate) fn minimal_unsatisfiable_subset<T: Clone, E>(
    items: &[T],
    sat: &mut impl FnMut(&[T]) -> Result<bool, E>,
) -> Result<Vec<T>, E> {
    fn minimal<T: Clone, E>(
        items: &[T],
        include: &[T],
        sat: &mut impl FnMut(&[T]) -> Result<bool, E>,
    ) -> Result<Vec<T>, E> {
        if items.len() <= 1 {
            return Ok(items.to_vec());
        }
        let (a, b) = items.split_at(items.len() / 2);
        let with = |half: &[T], include: &[T]| -> Vec<T> {
            half.iter().chain(include).cloned().collect()
        };
        if !sat(&with(a, include))? {
            return minimal(a, include, sat);
        }
        if !sat(&with(b, include))? {
            return minimal(b, include, sat);
        }
        let a_star = minimal(a, &with(b, include), sat)?;
        let b_star = minimal(b, &with(&a_star, include), sat)?;
        Ok(a_star.into_iter().chain(b_star).collect())
    }
    minimal(items, &[], sat)
}

/// The specs of `specs` in minimal conflict with each other and with
/// `explicit`.
///
/// An empty result means the specs are satisfiable together. `None` means
/// they are not and explanations are disabled.
pub(crate) fn conflicting_specs(
    index: &Index,
    specs: &[MatchSpec],
    explicit: &[MatchSpec],
    config: &SolverConfig,
) -> Result<Option<Vec<MatchSpec>>, ResolveError> {
    if specs.is_empty() {
        return Ok(Some(Vec::new()));
    }
    let mut all: Vec<MatchSpec> = specs.to_vec();
    for spec in explicit {
        if !all.contains(spec) {
            all.push(spec.clone());
        }
    }

    let reduced = index.reduced(&all, config.channel_priority, false)?;
    if !reduced.is_empty() {
        let mut problem = Problem::compile(&reduced, new_backend(config.sat_solver));
        let constraints = unit_clauses(problem.spec_constraints(&all));
        if problem.clauses.sat_with(&constraints, false)?.is_some() {
            return Ok(Some(Vec::new()));
        }
    }
    if !config.unsatisfiable_hints {
        return Ok(None);
    }

    config.check_deadline()?;
    debug!("searching a minimal conflict among {} specs", specs.len());
    let mut problem = Problem::compile(index, new_backend(config.sat_solver));
    let mut sat = |subset: &[MatchSpec]| -> Result<bool, ResolveError> {
        config.check_deadline()?;
        let lits = problem.spec_constraints(subset.iter().chain(explicit));
        Ok(problem.clauses.sat_with(&unit_clauses(lits), false)?.is_some())
    };
    if sat(specs)? {
        // Only the reduced index rejects them: the reduction dropped a
        // record the specs need together.
        return Ok(Some(Vec::new()));
    }
    minimal_unsatisfiable_subset(specs, &mut sat).map(Some)
}

fn unit_clauses(lits: Vec<Lit>) -> Vec<Vec<Lit>> {
    lits.into_iter().map(|lit| vec![lit]).collect()
}

/// Chains from each spec to every name it reaches, shortest first.
struct Reach {
    root: MatchSpec,
    chains: FxIndexMap<String, Vec<DependencyChain>>,
}

impl Reach {
    fn search(index: &Index, root: &MatchSpec, depth: usize) -> Self {
        let mut chains: FxIndexMap<String, Vec<DependencyChain>> = FxIndexMap::default();
        chains.insert(root.name().to_string(), vec![DependencyChain(vec![root.clone()])]);
        let mut visited: Set<MatchSpec> = Set::default();
        let mut queue: VecDeque<Vec<MatchSpec>> = VecDeque::from([vec![root.clone()]]);
        while let Some(path) = queue.pop_front() {
            let Some(node) = path.last() else {
                continue;
            };
            if !visited.insert(node.query()) {
                continue;
            }
            for &id in index.find_match_ids(node).iter() {
                for dep in &index.deps(id).depends {
                    let mut next = path.clone();
                    next.push(dep.clone());
                    let known = chains.entry(dep.name().to_string()).or_default();
                    let shortest = known.first().map_or(usize::MAX, |c| c.0.len());
                    let chain = DependencyChain(next.clone());
                    if next.len() <= shortest && !known.contains(&chain) {
                        if next.len() < shortest {
                            known.clear();
                        }
                        known.push(chain);
                    }
                    if next.len() <= depth {
                        queue.push_back(next);
                    }
                }
            }
        }
        Self {
            root: root.clone(),
            chains,
        }
    }
}

/// Groups the dependency chains of `specs` by the names several of them
/// reach, following dependencies `depth` levels deep.
pub(crate) fn build_conflict_report(
    index: &Index,
    specs: &[MatchSpec],
    depth: usize,
) -> ConflictReport {
    let mut roots: Vec<MatchSpec> = specs
        .iter()
        .filter(|s| !s.name().starts_with("__"))
        .cloned()
        .collect();
    if let [single] = roots.as_slice() {
        let matches = index.find_match_ids(single);
        if let [only] = matches.as_ref() {
            roots = index.deps(*only).depends.clone();
        }
    }
    let reaches: Vec<Reach> = roots
        .iter()
        .map(|root| Reach::search(index, root, depth.max(1)))
        .collect();

    let mut reached_by: FxIndexMap<&str, Vec<usize>> = FxIndexMap::default();
    for (i, reach) in reaches.iter().enumerate() {
        for name in reach.chains.keys() {
            let roots = reached_by.entry(name.as_str()).or_default();
            if !roots.contains(&i) {
                roots.push(i);
            }
        }
    }

    let mut groups: FxIndexMap<Vec<usize>, Vec<&str>> = FxIndexMap::default();
    for (&name, roots) in &reached_by {
        let missing_virtual = name.starts_with("__")
            && roots.iter().any(|&r| {
                reaches[r].root.name() != name
                    && reaches[r].chains[name]
                        .iter()
                        .all(|c| c.0.last().is_none_or(|s| index.find_match_ids(s).is_empty()))
            });
        if roots.len() > 1 || missing_virtual {
            groups.entry(roots.clone()).or_default().push(name);
        }
    }

    let mut report = ConflictReport::default();
    for (group_roots, names) in groups {
        let root_names: Vec<&str> = group_roots.iter().map(|&r| reaches[r].root.name()).collect();
        let package = names
            .iter()
            .find(|&&name| root_names.contains(&name))
            .or_else(|| {
                names.iter().min_by_key(|name| {
                    reaches[group_roots[0]].chains[**name]
                        .first()
                        .map_or(usize::MAX, |c| c.0.len())
                })
            })
            .copied();
        let Some(package) = package else {
            continue;
        };
        let chains = group_roots
            .iter()
            .flat_map(|&r| reaches[r].chains.get(package).cloned().unwrap_or_default())
            .collect();
        report.conflicts.push(Conflict {
            package: package.to_string(),
            chains,
        });
    }
    report
}

// TESTS #######################################################################
