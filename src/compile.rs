// SPDX-License-Identifier: MPL-2.0

//! Compiles an index and a set of specs to clauses.

use log::debug;

use crate::index::{Index, RecordId};
use crate::internal::{Clauses, Polarity};
use crate::sat::{Lit, Model, SatBackend};
use crate::{FxIndexMap, Map, MatchSpec};

/// The clauses of one index: a variable per record, a group variable per
/// name and a variable per tracked feature.
pub(crate) struct Problem<'i> {
    pub(crate) index: &'i Index,
    pub(crate) clauses: Clauses,
    record_vars: Vec<Lit>,
    group_vars: Map<String, Lit>,
    feature_vars: FxIndexMap<String, Lit>,
    spec_vars: Map<MatchSpec, Lit>,
}

impl<'i> Problem<'i> {
    /// Emits, for every group, "exactly one record or the group is off", and
    /// for every record, the implications of its dependencies, constraints
    /// and required features.
    pub(crate) fn compile(index: &'i Index, backend: Box<dyn SatBackend>) -> Self {
        let mut problem = Self {
            index,
            clauses: Clauses::new(backend),
            record_vars: vec![Lit::FALSE; index.len()],
            group_vars: Map::default(),
            feature_vars: FxIndexMap::default(),
            spec_vars: Map::default(),
        };

        for (name, ids) in index.groups() {
            let mut lits: Vec<Lit> = Vec::with_capacity(ids.len() + 1);
            for &id in ids {
                let var = problem.clauses.new_var();
                problem.record_vars[id.index()] = var;
                lits.push(var);
            }
            let group = problem.clauses.new_var();
            problem.group_vars.insert(name.to_string(), group);
            lits.push(!group);
            problem.clauses.require_exactly_one(&lits);
        }

        for (feature, trackers) in index.trackers() {
            let lits: Vec<Lit> = trackers.iter().map(|&id| problem.record_var(id)).collect();
            let var = problem.clauses.any(lits, Polarity::Both);
            problem.feature_vars.insert(feature.to_string(), var);
        }

        for (_, ids) in index.groups() {
            for &id in ids {
                let not_record = !problem.record_var(id);
                let deps = index.deps(id);
                for dep in &deps.depends {
                    let m = problem.push_spec(dep);
                    problem.clauses.require_any(&[not_record, m]);
                }
                for constraint in &deps.constrains {
                    let m = problem.push_spec(&constraint.clone().with_optional(true));
                    problem.clauses.require_any(&[not_record, m]);
                }
                for feature in &index.record(id).features {
                    let m = problem.feature_var(feature);
                    problem.clauses.require_any(&[not_record, m]);
                }
            }
        }
        debug!(
            "compiled {} records to {} variables and {} clauses",
            index.len(),
            problem.clauses.num_vars(),
            problem.clauses.clause_count()
        );
        problem
    }

    pub(crate) fn record_var(&self, id: RecordId) -> Lit {
        self.record_vars[id.index()]
    }

    /// The variable that is true iff some record of `name` is selected.
    pub(crate) fn group_var(&self, name: &str) -> Lit {
        self.group_vars.get(name).copied().unwrap_or(Lit::FALSE)
    }

    /// The variable that is true iff some record tracking `feature` is
    /// selected.
    pub(crate) fn feature_var(&self, feature: &str) -> Lit {
        self.feature_vars.get(feature).copied().unwrap_or(Lit::FALSE)
    }

    pub(crate) fn features(&self) -> impl Iterator<Item = (&str, Lit)> {
        self.feature_vars.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// The literal that is true iff `spec` is satisfied: some matching record
    /// is selected or, for an optional spec, no record of the name is.
    pub(crate) fn push_spec(&mut self, spec: &MatchSpec) -> Lit {
        let key = spec.clone().with_target(None);
        if let Some(&lit) = self.spec_vars.get(&key) {
            return lit;
        }
        let group = self.index.group_ids(spec.name());
        let matches = self.index.find_match_ids(spec);
        let lit = if matches.len() == group.len() {
            if spec.is_optional() {
                Lit::TRUE
            } else {
                self.group_var(spec.name())
            }
        } else {
            let mut lits: Vec<Lit> = matches.iter().map(|&id| self.record_var(id)).collect();
            if spec.is_optional() {
                lits.push(!self.group_var(spec.name()));
            }
            self.clauses.any(lits, Polarity::Both)
        };
        self.spec_vars.insert(key, lit);
        lit
    }

    /// The literals that must hold for every non-optional spec.
    pub(crate) fn spec_constraints<'s>(
        &mut self,
        specs: impl IntoIterator<Item = &'s MatchSpec>,
    ) -> Vec<Lit> {
        specs
            .into_iter()
            .filter(|s| !s.is_optional())
            .map(|s| self.push_spec(s))
            .collect()
    }

    /// The records selected by `model`, in index order.
    pub(crate) fn selected(&self, model: &Model) -> Vec<RecordId> {
        self.index
            .groups()
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|&id| model.value(self.record_var(id)))
            .collect()
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sat::new_backend;
    use crate::{PackageRecord, SatSolverChoice};

    fn rec(name: &str, version: &str) -> PackageRecord {
        PackageRecord::new(name, version, "0").unwrap()
    }

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn solve(index: &Index, specs: &[&str]) -> Option<Vec<String>> {
        let mut problem = Problem::compile(index, new_backend(SatSolverChoice::Varisat));
        let specs: Vec<MatchSpec> = specs.iter().map(|s| spec(s)).collect();
        for lit in problem.spec_constraints(&specs) {
            problem.clauses.require(lit);
        }
        let model = problem.clauses.sat().unwrap()?;
        Some(
            problem
                .selected(&model)
                .into_iter()
                .map(|id| index.record(id).to_string())
                .collect(),
        )
    }

    #[test]
    fn dependencies_are_implied() {
        let index = Index::new([
            Arc::new(rec("app", "1").with_depends(["lib >=2"])),
            Arc::new(rec("lib", "1")),
            Arc::new(rec("lib", "2")),
        ])
        .unwrap();
        let solution = solve(&index, &["app"]).unwrap();
        assert_eq!(solution, ["defaults::app-1-0", "defaults::lib-2-0"]);
        assert!(solve(&index, &["app", "lib 1"]).is_none());
    }

    #[test]
    fn constrains_only_apply_when_present() {
        let index = Index::new([
            Arc::new(rec("app", "1").with_constrains(["lib <2"])),
            Arc::new(rec("lib", "2")),
        ])
        .unwrap();
        assert_eq!(solve(&index, &["app"]).unwrap(), ["defaults::app-1-0"]);
        assert!(solve(&index, &["app", "lib"]).is_none());
    }

    #[test]
    fn features_need_a_tracker() {
        let index = Index::new([
            Arc::new(rec("blas", "1").with_track_features(["mkl"])),
            Arc::new(rec("numpy", "1").with_features(["mkl"])),
        ])
        .unwrap();
        let solution = solve(&index, &["numpy"]).unwrap();
        assert_eq!(solution, ["defaults::blas-1-0", "defaults::numpy-1-0"]);
    }

    #[test]
    fn push_spec_reuses_group_and_constant_literals() {
        let index = Index::new([Arc::new(rec("a", "1")), Arc::new(rec("a", "2"))]).unwrap();
        let mut problem = Problem::compile(&index, new_backend(SatSolverChoice::Dpll));
        assert_eq!(problem.push_spec(&spec("a")), problem.group_var("a"));
        assert_eq!(problem.push_spec(&spec("a[optional]")), Lit::TRUE);
        assert_eq!(problem.push_spec(&spec("missing")), Lit::FALSE);
        let narrow = problem.push_spec(&spec("a 2"));
        assert_eq!(problem.push_spec(&spec("a 2")), narrow);
    }
}
