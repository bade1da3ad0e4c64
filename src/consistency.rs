// SPDX-License-Identifier: MPL-2.0

//! Consistency of the installed state.
//!
//! An environment whose records cannot all be installed together is not an
//! error: the largest subset that can is kept and the rest is reported.

use std::sync::Arc;

use log::debug;

use crate::compile::Problem;
use crate::index::Index;
use crate::internal::Objective;
use crate::sat::new_backend;
use crate::{MatchSpec, PackageRecord, ResolveError, Set, SolverConfig};

/// The installed records that are not consistent with the others.
///
/// Consistency is checked over the installed records alone. When they
/// conflict, the largest consistent set of names is kept, together with
/// every name `new_specs` may reach through `index`; every other record is
/// returned.
pub(crate) fn inconsistent_records(
    index: &Index,
    installed: &[Arc<PackageRecord>],
    new_specs: &[MatchSpec],
    config: &SolverConfig,
) -> Result<Vec<Arc<PackageRecord>>, ResolveError> {
    if installed.is_empty() {
        return Ok(Vec::new());
    }
    debug!("checking if the current environment is consistent");
    let has_pip = installed.iter().any(|r| r.name == "pip");
    let records = installed.iter().map(|record| {
        if record.name == "python" && !has_pip && record.depends.iter().any(|d| d == "pip") {
            let mut stripped = PackageRecord::clone(record);
            stripped.depends.retain(|d| d != "pip");
            Arc::new(stripped)
        } else {
            Arc::clone(record)
        }
    });
    let sub_index = Index::with_channels(index.channels().iter().cloned(), records)?;

    let specs: Vec<MatchSpec> = installed
        .iter()
        .map(|r| {
            MatchSpec::from_name(r.name.as_str())
                .with_version(Some(version_order::VersionSpec::exactly(r.version.clone())))
                .with_build(Some(r.build.as_str()))
        })
        .collect();
    let mut problem = Problem::compile(&sub_index, new_backend(config.sat_solver));
    let constraints: Vec<Vec<_>> = problem
        .spec_constraints(&specs)
        .into_iter()
        .map(|lit| vec![lit])
        .collect();
    if problem.clauses.sat_with(&constraints, false)?.is_some() {
        return Ok(Vec::new());
    }

    let removed: Objective = specs
        .iter()
        .map(|s| (1, !problem.group_var(s.name())))
        .collect();
    let start = problem.clauses.sat()?;
    let Some((model, _)) = problem.clauses.minimize(&removed, start, false)? else {
        return Ok(installed.to_vec());
    };
    let mut keep: Set<String> = problem
        .selected(&model)
        .into_iter()
        .map(|id| sub_index.record(id).name.clone())
        .collect();
    for spec in new_specs {
        reach(index, spec.name(), &mut keep);
    }

    let inconsistent: Vec<Arc<PackageRecord>> = installed
        .iter()
        .filter(|r| !keep.contains(&r.name))
        .cloned()
        .collect();
    if !inconsistent.is_empty() {
        debug!(
            "limiting the solver to: {}",
            keep.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
        );
    }
    Ok(inconsistent)
}

/// Adds `name` and every name its records depend on, transitively.
fn reach(index: &Index, name: &str, names: &mut Set<String>) {
    if !names.insert(name.to_string()) {
        return;
    }
    for &id in index.group_ids(name) {
        for dep in &index.deps(id).depends {
            reach(index, dep.name(), names);
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SatSolverChoice;

    fn rec(name: &str, version: &str, depends: &[&str]) -> Arc<PackageRecord> {
        Arc::new(
            PackageRecord::new(name, version, "0")
                .unwrap()
                .with_depends(depends.iter().copied()),
        )
    }

    fn names(records: &[Arc<PackageRecord>]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn consistent_environment() {
        let installed = vec![rec("python", "3.9", &[]), rec("numpy", "1.20", &["python 3.9.*"])];
        let index = Index::new(installed.clone()).unwrap();
        for backend in [SatSolverChoice::Varisat, SatSolverChoice::Dpll] {
            let config = SolverConfig::default().with_sat_solver(backend);
            assert!(inconsistent_records(&index, &installed, &[], &config)
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn the_largest_consistent_subset_is_kept() {
        let installed = vec![
            rec("python", "3.9", &[]),
            rec("numpy", "1.20", &["python 3.9.*"]),
            rec("scipy", "1.5", &["python 3.8.*"]),
        ];
        let index = Index::new(installed.clone()).unwrap();
        let inconsistent =
            inconsistent_records(&index, &installed, &[], &SolverConfig::default()).unwrap();
        assert_eq!(names(&inconsistent), ["scipy"]);
    }

    #[test]
    fn requested_names_are_kept() {
        let installed = vec![
            rec("python", "3.9", &[]),
            rec("numpy", "1.20", &["python 3.9.*"]),
            rec("scipy", "1.5", &["python 3.8.*"]),
        ];
        let index = Index::new(installed.clone()).unwrap();
        let specs = ["scipy".parse().unwrap()];
        let inconsistent =
            inconsistent_records(&index, &installed, &specs, &SolverConfig::default()).unwrap();
        assert!(inconsistent.is_empty());
    }

    #[test]
    fn uninstalled_pip_is_ignored() {
        let installed = vec![rec("python", "3.9", &["pip"])];
        let index = Index::new(installed.clone()).unwrap();
        assert!(
            inconsistent_records(&index, &installed, &[], &SolverConfig::default())
                .unwrap()
                .is_empty()
        );
    }
}
