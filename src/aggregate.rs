// SPDX-License-Identifier: MPL-2.0

//! Aggregation of every constraint source of a command into one [SpecsMap].
//!
//! The sources are, from weakest to strongest: the specs requested in
//! earlier commands, the installed records, virtual packages, pins,
//! aggressively updated packages and finally the specs of the current
//! request. How installed records are constrained depends on the update
//! modifier in effect for the attempt.

use std::rc::Rc;
use std::sync::Arc;

use log::{debug, info, warn};
use version_order::VersionSpec;

use crate::consistency::inconsistent_records;
use crate::diagnose::conflicting_specs;
use crate::graph::PrefixGraph;
use crate::index::Index;
use crate::{
    FxIndexMap, MatchSpec, PackageRecord, Request, ResolveError, Set, SolverConfig, Spec, SpecsMap,
    Unsatisfiable, UpdateModifier,
};

/// An installed record taken out of the solve because the environment is
/// inconsistent, with the spec its name had before.
pub(crate) type Floated = FxIndexMap<String, (Arc<PackageRecord>, Option<Spec>)>;

pub(crate) struct Aggregator<'a> {
    index: &'a Index,
    request: &'a Request,
    config: &'a SolverConfig,
    pub(crate) modifier: UpdateModifier,
    pub(crate) specs_to_add: Vec<MatchSpec>,
    pub(crate) history: FxIndexMap<String, MatchSpec>,
    pub(crate) pinned: Vec<MatchSpec>,
    pub(crate) specs_map: SpecsMap,
    /// Pins of names outside the explicit request's candidates.
    optional_pins: Vec<MatchSpec>,
    pin_overrides: Set<String>,
    /// Installed records that are not removed nor inconsistent.
    pub(crate) solution: Vec<Arc<PackageRecord>>,
    conflict_names: Set<String>,
}

impl<'a> Aggregator<'a> {
    pub(crate) fn new(
        index: &'a Index,
        request: &'a Request,
        config: &'a SolverConfig,
        modifier: UpdateModifier,
        specs_to_add: Vec<MatchSpec>,
    ) -> Self {
        let mut history: FxIndexMap<String, MatchSpec> = FxIndexMap::default();
        for spec in &request.history {
            history.insert(spec.name().to_string(), spec.clone());
        }
        let pinned = if request.ignore_pinned {
            Vec::new()
        } else {
            request
                .pinned
                .iter()
                .map(|p| p.clone().with_optional(true))
                .collect()
        };
        Self {
            index,
            request,
            config,
            modifier,
            specs_to_add,
            history,
            pinned,
            specs_map: SpecsMap::new(),
            optional_pins: Vec::new(),
            pin_overrides: Set::default(),
            solution: request.installed.clone(),
            conflict_names: Set::default(),
        }
    }

    fn is_aggressive(&self, name: &str) -> bool {
        self.config
            .aggressive_update_packages
            .iter()
            .any(|s| s.name() == name)
    }

    fn is_pinned(&self, name: &str) -> bool {
        self.pinned.iter().any(|p| p.name() == name)
    }

    fn is_pin(&self, spec: &MatchSpec) -> bool {
        let optional = spec.clone().with_optional(true);
        self.pinned.contains(&optional)
    }

    fn installed(&self, name: &str) -> Option<&Arc<PackageRecord>> {
        self.request.installed.iter().find(|r| r.name == name)
    }

    /// Seeds the map with history, kept legacy names, virtual packages and,
    /// when there is no history to go by, every installed package.
    ///
    /// Pruning ignores all of it.
    pub(crate) fn collect(&mut self) {
        if self.request.prune {
            return;
        }
        for spec in self.history.values() {
            self.specs_map.insert(Spec::from(spec.clone()));
        }
        for name in &self.config.do_not_remove {
            if !self.specs_map.contains(name) && self.installed(name).is_some() {
                self.specs_map.insert(Spec::bare(name.as_str()));
            }
        }
        for record in &self.request.virtual_packages {
            self.specs_map.insert_if_absent(Spec::bare(record.name.as_str()));
        }
        for record in &self.request.installed {
            if self.history.is_empty() || self.is_aggressive(&record.name) || record.subdir == "pypi" {
                self.specs_map.insert(Spec::bare(record.name.as_str()));
            }
        }
    }

    /// Takes the records matching the removal specs, and everything that
    /// depends on them, out of the solution.
    ///
    /// Names matched directly get a spec that no record satisfies, so the
    /// solver cannot bring them back.
    pub(crate) fn remove_specs(&mut self) -> Result<(), ResolveError> {
        if self.request.specs_to_remove.is_empty() {
            return Ok(());
        }
        let mut graph = PrefixGraph::new(self.solution.iter().cloned(), [])?;
        let mut removed: Vec<Arc<PackageRecord>> = Vec::new();
        let mut not_removing: Vec<&MatchSpec> = Vec::new();
        for spec in &self.request.specs_to_remove {
            let records = graph.remove_spec(spec);
            if records.is_empty() {
                not_removing.push(spec);
            }
            removed.extend(records);
        }
        let unmatched: Vec<MatchSpec> = not_removing
            .into_iter()
            .filter(|spec| !removed.iter().any(|r| spec.matches(r)))
            .cloned()
            .collect();
        if !unmatched.is_empty() {
            return Err(ResolveError::PackagesNotFound { specs: unmatched });
        }

        for record in &removed {
            self.specs_map.remove(&record.name);
        }
        for spec in &self.request.specs_to_remove {
            if removed.iter().any(|r| spec.matches(r)) {
                let impossible = MatchSpec::from_name(spec.name())
                    .with_version(Some(VersionSpec::Exact("@".into())))
                    .with_optional(true);
                self.specs_map.insert(Spec::Constrained(impossible));
            }
        }
        debug!(
            "removing {}",
            removed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        );
        self.solution = graph.into_records();
        Ok(())
    }

    fn should_freeze(&self, target: &PackageRecord, explicit_pool: Option<&Index>) -> bool {
        if self.history.is_empty() || self.modifier != UpdateModifier::FreezeInstalled {
            return false;
        }
        let name = target.name.as_str();
        !self.conflict_names.contains(name)
            && explicit_pool.is_none_or(|pool| !pool.contains_name(name) || pool.lookup(target).is_some())
    }

    /// The spec requesting the newest record of `spec`'s name if it is newer
    /// than the installed one, otherwise `spec` itself.
    fn with_updates(&self, spec: &MatchSpec) -> MatchSpec {
        let Some(installed) = self.installed(spec.name()) else {
            return spec.clone();
        };
        let newer = self.index.group(spec.name()).find(|r| {
            r.version > installed.version
                || r.version == installed.version && r.build_number > installed.build_number
        });
        match newer {
            Some(record) => MatchSpec::from_name(spec.name())
                .with_version(Some(VersionSpec::exactly(record.version.clone())))
                .with_build_number(Some(record.build_number)),
            None => spec.clone(),
        }
    }

    /// Constrains installed packages according to the update modifier, then
    /// layers pins, aggressive updates and the request on top.
    pub(crate) fn add_specs(&mut self) -> Result<(), ResolveError> {
        let index = self.index;
        let config = self.config;
        let explicit_pool: Option<Rc<Index>> = if self.specs_to_add.is_empty() {
            None
        } else {
            Some(index.reduced(&self.specs_to_add, config.channel_priority, false)?)
        };
        let installed_specs: Vec<MatchSpec> = if self.request.prune {
            Vec::new()
        } else {
            self.request.installed.iter().map(|r| MatchSpec::exact(r)).collect()
        };
        self.conflict_names = conflicting_specs(index, &installed_specs, &self.specs_to_add, config)?
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.name().to_string())
            .collect();

        self.refine_installed(explicit_pool.as_deref())?;
        self.add_pins(explicit_pool.as_deref());

        if self.modifier == UpdateModifier::FreezeInstalled {
            let remaining: Vec<Arc<PackageRecord>> = self
                .solution
                .iter()
                .filter(|r| !self.specs_map.contains(&r.name))
                .cloned()
                .collect();
            for record in remaining {
                if self.conflict_names.contains(&record.name) {
                    self.specs_map
                        .insert(Spec::bare(record.name.as_str()).targeted(&record).with_optional(true));
                } else {
                    self.specs_map.insert(Spec::frozen_from(&record));
                }
            }
        }
        debug!("specs map with targets: {}", self.specs_map);

        match self.modifier {
            UpdateModifier::UpdateAll => self.float_all(),
            UpdateModifier::UpdateSpecs => self.unblock_request()?,
            _ => {}
        }

        self.keep_python_minor()?;

        for spec in &config.aggressive_update_packages {
            if self.specs_map.contains(spec.name()) {
                self.specs_map.insert(Spec::from(spec.clone()));
            }
        }
        for spec in &self.specs_to_add {
            if !self.pin_overrides.contains(spec.name()) {
                self.specs_map.insert(Spec::from(spec.clone()));
            }
        }
        debug!("specs map: {}", self.specs_map);
        Ok(())
    }

    fn refine_installed(&mut self, explicit_pool: Option<&Index>) -> Result<(), ResolveError> {
        let names: Vec<String> = self.specs_map.names().map(str::to_string).collect();
        for name in names {
            let Some(spec) = self.specs_map.get(&name).map(Spec::to_match_spec) else {
                continue;
            };
            let matches: Vec<&Arc<PackageRecord>> =
                self.solution.iter().filter(|r| spec.matches(r)).collect();
            let target = match matches.as_slice() {
                [] => continue,
                [target] => Arc::clone(target),
                _ => {
                    return Err(ResolveError::InconsistentEnvironment {
                        name,
                        records: matches.iter().map(|r| r.dist_str()).collect(),
                    })
                }
            };
            let refined = if target.is_unmanageable()
                || !self.is_aggressive(&name) && self.should_freeze(&target, explicit_pool)
            {
                Spec::frozen_from(&target)
            } else if self.is_aggressive(&name) {
                Spec::bare(name.as_str())
            } else if let Some(historic) = self.history.get(&name) {
                Spec::from(historic.clone()).targeted(&target)
            } else {
                Spec::bare(name.as_str())
                    .targeted(&target)
                    .with_optional(self.request.is_removal())
            };
            self.specs_map.insert(refined);
        }
        Ok(())
    }

    fn add_pins(&mut self, explicit_pool: Option<&Index>) {
        let pinned = self.pinned.clone();
        for pin in pinned {
            let Some(pool) = explicit_pool.filter(|pool| pool.contains_name(pin.name())) else {
                self.optional_pins.push(pin);
                continue;
            };
            let requested = self.specs_to_add.iter().any(|s| s.name() == pin.name());
            if !requested {
                self.specs_map.insert(Spec::from(pin.with_optional(false)));
            } else if !pool.find_match_ids(&pin).is_empty() {
                self.pin_overrides.insert(pin.name().to_string());
                self.specs_map.insert(Spec::from(pin.with_optional(false)));
            } else {
                warn!("pinned spec {pin} conflicts with explicit specs; overriding pinned spec");
            }
        }
    }

    /// Every package floats: only the history, or the installed names, stay
    /// requested.
    fn float_all(&mut self) {
        let mut next = SpecsMap::new();
        let names: Vec<String> = if self.history.is_empty() {
            self.request.installed.iter().map(|r| r.name.clone()).collect()
        } else {
            self.history.keys().cloned().collect()
        };
        for name in names {
            let spec = match self.specs_map.get(&name) {
                Some(spec) if self.is_pinned(&name) => spec.clone(),
                _ => Spec::bare(name.as_str()),
            };
            next.insert(spec);
        }
        if !self.history.is_empty() {
            for record in &self.request.installed {
                if record.subdir == "pypi" {
                    next.insert(Spec::bare(record.name.as_str()));
                }
            }
        }
        self.specs_map = next;
    }

    /// Neuters the installed constraints that keep the request from its
    /// newest versions, unless they are pinned or historic.
    fn unblock_request(&mut self) -> Result<(), ResolveError> {
        let updates: Vec<MatchSpec> = self
            .specs_to_add
            .iter()
            .filter(|s| {
                let pinned = !self.pin_overrides.contains(s.name()) && self.is_pinned(s.name());
                !pinned && !self.history.contains_key(s.name())
            })
            .map(|s| self.with_updates(s))
            .collect();
        let current = self.specs_map.to_match_specs();
        let conflicts = conflicting_specs(self.index, &current, &updates, self.config)?;
        for conflict in conflicts.unwrap_or_default() {
            let name = conflict.name();
            if self.specs_map.contains(name) && !self.is_pin(&conflict) && !self.history.contains_key(name)
            {
                self.specs_map.insert(Spec::bare(name));
            }
        }
        Ok(())
    }

    /// Keeps an installed python at its major and minor version unless the
    /// request names python.
    fn keep_python_minor(&mut self) -> Result<(), ResolveError> {
        let Some(python) = self.solution.iter().find(|r| r.name == "python").cloned() else {
            return Ok(());
        };
        if self.specs_to_add.iter().any(|s| s.name() == "python") {
            return Ok(());
        }
        let freeze = self.modifier == UpdateModifier::FreezeInstalled;
        if freeze && !self.conflict_names.contains("python") {
            self.specs_map.insert(Spec::frozen_from(&python));
            return Ok(());
        }

        let mut spec = self
            .specs_map
            .get("python")
            .map_or_else(|| MatchSpec::from_name("python"), Spec::to_match_spec);
        if spec.version().is_none() {
            if let Some(minor) = python.version.major_minor() {
                spec = spec.with_version(Some(format!("{minor}.*").parse()?));
            }
        }
        let mut spec_set = vec![spec.clone()];
        spec_set.extend(self.specs_to_add.iter().cloned());
        let conflicts = conflicting_specs(self.index, &spec_set, &self.specs_to_add, self.config)?;
        if conflicts.is_none_or(|c| !c.is_empty()) {
            if freeze {
                return Err(ResolveError::unsatisfiable(Unsatisfiable::with_specs(spec_set)));
            }
            info!("{spec} conflicts with the requested specs; python may change its minor version");
            return Ok(());
        }
        self.specs_map.insert(Spec::from(spec));
        Ok(())
    }

    /// Takes the installed records that are inconsistent with the rest out
    /// of the solution and lets their names float.
    pub(crate) fn float_inconsistent(&mut self) -> Result<Floated, ResolveError> {
        let mut floated = Floated::default();
        let mut inconsistent = inconsistent_records(self.index, &self.solution, &[], self.config)?;
        if !inconsistent.is_empty() {
            // Installed metadata may be stale; retry with the index's.
            self.solution = self
                .solution
                .iter()
                .map(|r| match self.index.lookup(r) {
                    Some(id) => Arc::clone(self.index.record(id)),
                    None => Arc::clone(r),
                })
                .collect();
            inconsistent = inconsistent_records(self.index, &self.solution, &[], self.config)?;
        }
        if inconsistent.is_empty() {
            return Ok(floated);
        }
        warn!(
            "the environment is inconsistent; the following packages are causing it:\n  - {}",
            inconsistent
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n  - ")
        );
        for record in &inconsistent {
            let previous = self.specs_map.remove(&record.name);
            self.specs_map
                .insert(Spec::bare(record.name.as_str()).targeted(record));
            if record.name == "python" {
                if let Some(spec) = &previous {
                    self.specs_map.insert(spec.clone());
                }
            }
            floated.insert(record.name.clone(), (Arc::clone(record), previous));
        }
        self.solution
            .retain(|r| !inconsistent.iter().any(|i| i.key() == r.key()));
        Ok(floated)
    }

    /// The specs handed to the solver.
    pub(crate) fn final_specs(&self) -> Vec<MatchSpec> {
        let mut specs = self.specs_map.to_match_specs();
        for pin in &self.optional_pins {
            if !specs.contains(pin) {
                specs.push(pin.clone());
            }
        }
        specs
    }

    /// Relaxes targeted specs that are part of a minimal conflict until no
    /// conflict remains or nothing more can be relaxed.
    ///
    /// Returns the final specs. Fails with [ResolveError::PackagesNotFound]
    /// if a required name is absent from the index, as unsatisfiable if a
    /// required spec matches none of the records of its name, and with
    /// [ResolveError::SpecsConfigurationConflict] if a pin is part of the
    /// conflict.
    pub(crate) fn neuter_conflicts(&mut self) -> Result<Vec<MatchSpec>, ResolveError> {
        let mut specs = self.final_specs();
        let (absent, wrong_version): (Vec<MatchSpec>, Vec<MatchSpec>) = specs
            .iter()
            .filter(|s| !s.is_optional() && self.index.find_match_ids(s).is_empty())
            .cloned()
            .partition(|s| !self.index.contains_name(s.name()));
        if !absent.is_empty() {
            return Err(ResolveError::PackagesNotFound { specs: absent });
        }
        if !wrong_version.is_empty() {
            return Err(ResolveError::unsatisfiable(Unsatisfiable::with_specs(
                wrong_version,
            )));
        }

        let bound = self.specs_map.len();
        for _ in 0..bound {
            let conflicts = conflicting_specs(self.index, &specs, &self.specs_to_add, self.config)?
                .unwrap_or_default();
            if conflicts.is_empty() {
                break;
            }
            debug!(
                "conflicting specs: {}",
                conflicts.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            );

            let pinned: Vec<&MatchSpec> = conflicts.iter().filter(|c| self.is_pin(c)).collect();
            if !pinned.is_empty() {
                let mut requested: Vec<MatchSpec> = conflicts
                    .iter()
                    .chain(&self.specs_to_add)
                    .filter(|s| !pinned.contains(s))
                    .cloned()
                    .collect();
                requested.sort_by_key(ToString::to_string);
                requested.dedup();
                let mut pinned: Vec<MatchSpec> = pinned.into_iter().cloned().collect();
                pinned.sort_by_key(ToString::to_string);
                return Err(ResolveError::SpecsConfigurationConflict { requested, pinned });
            }

            let mut modified = false;
            for conflict in &conflicts {
                if conflict.target().is_none() || conflict.is_optional() {
                    continue;
                }
                let Some(current) = self.specs_map.get(conflict.name()) else {
                    continue;
                };
                if current.to_match_spec() != *conflict {
                    continue;
                }
                let neutered = current.neutered();
                debug!("neutering {conflict} to {neutered}");
                self.specs_map.insert(neutered);
                modified = true;
            }
            if !modified {
                break;
            }
            specs = self.final_specs();
        }
        Ok(specs)
    }

    /// The historic specs the final map holds in a looser form.
    pub(crate) fn neutered_history(&self) -> Vec<MatchSpec> {
        self.specs_map
            .iter()
            .filter_map(|spec| {
                let historic = self.history.get(spec.name())?;
                let current = spec.to_match_spec();
                (current.strictness() < historic.strictness()).then_some(current)
            })
            .collect()
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

    fn index(installed: &[Arc<PackageRecord>]) -> Index {
        Index::new(
            [
                rec("python", "3.9.7", &[]),
                rec("python", "3.10.4", &[]),
                rec("numpy", "1.20", &["python >=3.9"]),
                rec("numpy", "1.21", &["python >=3.9"]),
                rec("requests", "2.0", &["python"]),
            ]
            .into_iter()
            .chain(installed.iter().cloned()),
        )
        .unwrap()
    }

    fn aggregate(request: &Request, modifier: UpdateModifier) -> SpecsMap {
        let index = index(&request.installed);
        let config = SolverConfig::default();
        let mut aggregator =
            Aggregator::new(&index, request, &config, modifier, request.specs_to_add.clone());
        aggregator.collect();
        aggregator.remove_specs().unwrap();
        aggregator.add_specs().unwrap();
        aggregator.specs_map
    }

    fn rendered(map: &SpecsMap) -> Vec<String> {
        map.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn frozen_installed_packages() {
        let python = rec("python", "3.9.7", &[]);
        let numpy = rec("numpy", "1.20", &["python >=3.9"]);
        let request = Request::install([spec("requests")])
            .with_installed([python, numpy])
            .with_history([spec("numpy")]);
        let map = aggregate(&request, UpdateModifier::FreezeInstalled);
        assert_eq!(
            rendered(&map),
            [
                "defaults::numpy ==1.20 0",
                "defaults::python ==3.9.7 0",
                "requests"
            ]
        );
    }

    #[test]
    fn update_specs_targets_installed_packages() {
        let python = rec("python", "3.9.7", &[]);
        let numpy = rec("numpy", "1.20", &["python >=3.9"]);
        let request = Request::install([spec("requests")])
            .with_installed([python, numpy])
            .with_history([spec("numpy")]);
        let map = aggregate(&request, UpdateModifier::UpdateSpecs);
        assert_eq!(
            rendered(&map),
            [
                "numpy[target='defaults::numpy-1.20-0']",
                "python 3.9.*",
                "requests"
            ]
        );
    }

    #[test]
    fn duplicate_installed_records_are_fatal() {
        let request = Request::install([spec("requests")])
            .with_installed([rec("numpy", "1.20", &[]), rec("numpy", "1.21", &[])]);
        let index = index(&request.installed);
        let config = SolverConfig::default();
        let mut aggregator = Aggregator::new(
            &index,
            &request,
            &config,
            UpdateModifier::UpdateSpecs,
            request.specs_to_add.clone(),
        );
        aggregator.collect();
        assert!(matches!(
            aggregator.add_specs(),
            Err(ResolveError::InconsistentEnvironment { name, .. }) if name == "numpy"
        ));
    }

    #[test]
    fn removing_an_absent_package() {
        let request = Request::remove([spec("flask")]).with_installed([rec("python", "3.9.7", &[])]);
        let index = index(&request.installed);
        let config = SolverConfig::default();
        let mut aggregator =
            Aggregator::new(&index, &request, &config, UpdateModifier::UpdateSpecs, Vec::new());
        aggregator.collect();
        assert!(matches!(
            aggregator.remove_specs(),
            Err(ResolveError::PackagesNotFound { .. })
        ));
    }

    #[test]
    fn removed_names_cannot_come_back() {
        let python = rec("python", "3.9.7", &[]);
        let numpy = rec("numpy", "1.20", &["python >=3.9"]);
        let request = Request::remove([spec("numpy")]).with_installed([python, numpy]);
        let map = aggregate(&request, UpdateModifier::UpdateSpecs);
        assert_eq!(
            rendered(&map),
            [
                "python 3.9.*[optional=true, target='defaults::python-3.9.7-0']",
                "numpy @[optional=true]"
            ]
        );
    }

    #[test]
    fn pins_constrain_requested_names() {
        let request = Request::install([spec("numpy")]).with_pinned([spec("numpy 1.20")]);
        let map = aggregate(&request, UpdateModifier::UpdateSpecs);
        assert_eq!(rendered(&map), ["numpy ==1.20"]);

        let request = Request::install([spec("numpy 1.21")]).with_pinned([spec("numpy 1.20")]);
        let map = aggregate(&request, UpdateModifier::UpdateSpecs);
        assert_eq!(rendered(&map), ["numpy ==1.21"]);
    }

    #[test]
    fn conflicting_targets_are_neutered() {
        let python = Arc::new(PackageRecord::new("python", "3.9.7", "h1").unwrap());
        let request = Request::install([spec("python >=3.10")])
            .with_installed([python.clone()])
            .with_history([spec("requests")]);
        let index = index(&request.installed);
        let config = SolverConfig::default();
        let mut aggregator = Aggregator::new(
            &index,
            &request,
            &config,
            UpdateModifier::UpdateSpecs,
            request.specs_to_add.clone(),
        );
        aggregator.collect();
        aggregator.add_specs().unwrap();
        aggregator
            .specs_map
            .insert(Spec::from(spec("python * h1")).targeted(&python));
        let specs = aggregator.neuter_conflicts().unwrap();
        assert!(specs.contains(&spec("python")));
    }
}
