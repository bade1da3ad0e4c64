// SPDX-License-Identifier: MPL-2.0

//! Index reduction: the records reachable from a set of specs.
//!
//! Reduction runs in two stages. The first prunes each group named by a spec
//! down to the records matching it whose dependencies still have a candidate,
//! and propagates to dependency names shared by every surviving record. The
//! queue of specs is processed twice so that pruning one group gets a chance
//! to prune another ("double elimination"). The second stage walks the
//! dependency edges from every matching record and collects what is reachable,
//! never letting a looser dependency spec broaden a tighter one.

use std::cmp::Reverse;
use std::rc::Rc;

use log::debug;
use priority_queue::PriorityQueue;

use crate::index::{Index, RecordId};
use crate::{ChannelPriority, FxIndexSet, Map, MatchSpec, ResolveError, Set};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unknown,
    Valid,
    Filtered,
}

struct Reducer<'a> {
    index: &'a Index,
    strict: bool,
    state: Vec<State>,
    explicit_pool: Map<&'a str, Set<RecordId>>,
    seen_names: Set<String>,
    channel_filtered: Set<String>,
}

impl Index {
    /// The reduced index for `specs`.
    ///
    /// A non-optional spec naming a package absent from the index fails with
    /// [ResolveError::PackagesNotFound]. With `exit_on_conflict`, an index
    /// empty of records is returned as soon as some spec is pruned down to
    /// nothing.
    pub(crate) fn reduced(
        &self,
        specs: &[MatchSpec],
        priority: ChannelPriority,
        exit_on_conflict: bool,
    ) -> Result<Rc<Index>, ResolveError> {
        let key = (priority, specs.to_vec());
        if let Some(reduced) = self.reduced_cache.borrow().get(&key) {
            return Ok(Rc::clone(reduced));
        }
        debug!(
            "retrieving packages for: {}",
            specs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        );

        let missing: Vec<MatchSpec> = specs
            .iter()
            .filter(|s| !s.is_optional() && !self.contains_name(s.name()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ResolveError::PackagesNotFound { specs: missing });
        }

        let mut ordered: Vec<(usize, String, &MatchSpec)> = specs
            .iter()
            .map(|s| (self.exactness(s), s.to_string(), s))
            .collect();
        ordered.sort_by(|a, b| (b.0, &b.1).cmp(&(a.0, &a.1)));
        let specs: Vec<&MatchSpec> = ordered.into_iter().map(|(_, _, s)| s).collect();

        let mut reducer = Reducer::new(self, priority == ChannelPriority::Strict, &specs);
        let pruned_to_zero = reducer.eliminate(&specs);
        if pruned_to_zero && exit_on_conflict {
            debug!("a spec was pruned to zero candidates");
            return Ok(Rc::new(self.subset([])));
        }

        let reduced = Rc::new(self.subset(reducer.reachable(&specs)));
        debug!("reduced index: {} of {} records", reduced.len(), self.len());
        self.reduced_cache.borrow_mut().insert(key, Rc::clone(&reduced));
        Ok(reduced)
    }

    /// Exact specs whose candidate has many exact dependencies reduce the
    /// index the most, so they are processed first.
    fn exactness(&self, spec: &MatchSpec) -> usize {
        let strictness = spec.strictness() as usize;
        if strictness < 3 {
            return strictness;
        }
        let deps_strictness = self
            .find_match_ids(spec)
            .first()
            .map(|&id| {
                self.deps(id)
                    .depends
                    .iter()
                    .map(|d| d.strictness() as usize)
                    .sum()
            })
            .unwrap_or(0);
        strictness + deps_strictness
    }
}

impl<'a> Reducer<'a> {
    fn new(index: &'a Index, strict: bool, specs: &[&'a MatchSpec]) -> Self {
        let mut explicit_pool: Map<&str, Set<RecordId>> = Map::default();
        for spec in specs {
            explicit_pool
                .entry(spec.name())
                .or_default()
                .extend(index.find_match_ids(spec).iter().copied());
        }
        Self {
            index,
            strict,
            state: vec![State::Unknown; index.len()],
            explicit_pool,
            seen_names: Set::default(),
            channel_filtered: Set::default(),
        }
    }

    fn kept(&self, id: RecordId) -> bool {
        self.state[id.index()] != State::Filtered
    }

    /// Runs the elimination queue twice; returns whether some spec was
    /// pruned down to no candidate.
    fn eliminate(&mut self, specs: &[&'a MatchSpec]) -> bool {
        let mut pruned_to_zero = false;
        for _ in 0..2 {
            self.seen_names.clear();
            // Popping the greatest priority is first in, first out.
            let mut queue: PriorityQueue<usize, (Reverse<usize>, Reverse<usize>)> =
                PriorityQueue::new();
            for position in 0..specs.len() {
                queue.push(position, (Reverse(0), Reverse(position)));
            }
            while let Some((position, (Reverse(generation), _))) = queue.pop() {
                match self.filter_group(&[specs[position]]) {
                    Some(true) => {
                        queue.push(position, (Reverse(generation + 1), Reverse(position)));
                    }
                    Some(false) => {}
                    None => pruned_to_zero = true,
                }
            }
        }
        pruned_to_zero
    }

    /// Prunes the group named by `specs`, then the groups of dependencies
    /// shared by every surviving record. `None` means nothing survived.
    fn filter_group(&mut self, specs: &[&MatchSpec]) -> Option<bool> {
        let index = self.index;
        let name = specs[0].name();
        let group = index.group_ids(name);

        if self.strict && !group.is_empty() && !self.channel_filtered.contains(name) {
            if let Some(channel) = index.strict_channel(name) {
                for &id in group {
                    if index.record(id).channel != channel {
                        self.state[id.index()] = State::Filtered;
                    }
                }
            }
            self.channel_filtered.insert(name.to_string());
        }

        let (mut before, mut after) = (0usize, 0usize);
        for &id in group {
            if self.state[id.index()] == State::Filtered {
                continue;
            }
            before += 1;
            let record = index.record(id);
            let in_pool = self
                .explicit_pool
                .get(name)
                .is_none_or(|pool| pool.is_empty() || pool.contains(&id));
            if !specs.iter().any(|s| s.matches(record)) || !in_pool {
                self.state[id.index()] = State::Filtered;
                continue;
            }
            let satisfiable = index.deps(id).depends.iter().all(|dep| {
                dep.is_optional()
                    || index
                        .find_match_ids(dep)
                        .iter()
                        .any(|&candidate| self.kept(candidate))
            });
            if !satisfiable {
                self.state[id.index()] = State::Filtered;
                continue;
            }
            self.state[id.index()] = State::Valid;
            after += 1;
        }

        let mut reduced = after < before;
        if reduced {
            debug!("{name}: pruned from {before} -> {after}");
        }
        if specs.iter().any(|s| s.is_optional()) {
            return Some(reduced);
        }
        if after == 0 {
            return None;
        }

        if reduced || !self.seen_names.contains(name) {
            self.seen_names.insert(name.to_string());
            let mut shared: crate::FxIndexMap<&str, Vec<&MatchSpec>> = Default::default();
            for &id in group {
                if !self.kept(id) {
                    continue;
                }
                for dep in &index.deps(id).depends {
                    if !dep.is_optional() {
                        shared.entry(dep.name()).or_default().push(dep);
                    }
                }
            }
            for (_, deps) in shared {
                if deps.len() < after {
                    continue;
                }
                let mut unique: Vec<&MatchSpec> = Vec::with_capacity(deps.len());
                for dep in deps {
                    if !unique.contains(&dep) {
                        unique.push(dep);
                    }
                }
                match self.filter_group(&unique) {
                    Some(true) => reduced = true,
                    Some(false) => {}
                    None => return None,
                }
            }
        }
        Some(reduced)
    }

    /// Whether `id` has satisfiable dependencies, assuming cycles are.
    fn valid(&mut self, id: RecordId) -> bool {
        match self.state[id.index()] {
            State::Valid => true,
            State::Filtered => false,
            State::Unknown => {
                self.state[id.index()] = State::Valid;
                let index = self.index;
                let valid = index
                    .deps(id)
                    .depends
                    .iter()
                    .all(|dep| self.valid_spec(dep));
                if !valid {
                    self.state[id.index()] = State::Filtered;
                }
                valid
            }
        }
    }

    fn valid_spec(&mut self, spec: &MatchSpec) -> bool {
        spec.is_optional()
            || self
                .index
                .find_match_ids(spec)
                .iter()
                .any(|&candidate| self.valid(candidate))
    }

    fn in_strict_channel(&self, id: RecordId) -> bool {
        let record = self.index.record(id);
        !self.strict || self.index.strict_channel(&record.name) == Some(record.channel.as_str())
    }

    /// The records reachable from `specs` through valid candidates.
    fn reachable(&mut self, specs: &[&'a MatchSpec]) -> FxIndexSet<RecordId> {
        let index = self.index;
        let mut reduced: FxIndexSet<RecordId> = FxIndexSet::default();
        let mut seed: Map<&str, Vec<&MatchSpec>> = Map::default();
        for spec in specs {
            seed.entry(spec.name()).or_default().push(spec);
        }

        for spec in specs {
            let mut roots: Vec<RecordId> = Vec::new();
            for &id in index.find_match_ids(spec).iter() {
                if !reduced.contains(&id) && self.valid(id) {
                    roots.push(id);
                }
            }
            if self.strict {
                if let Some(&first) = roots.first() {
                    let channel = index.strict_channel(&index.record(first).name);
                    roots.retain(|&id| Some(index.record(id).channel.as_str()) == channel);
                }
            }
            reduced.extend(roots.iter().copied());

            for &root in &roots {
                let mut seen: Set<&MatchSpec> = Set::default();
                let mut by_name = seed.clone();
                let mut pending: FxIndexSet<&MatchSpec> =
                    index.deps(root).depends.iter().collect();
                for &dep in &pending {
                    let known = by_name.entry(dep.name()).or_default();
                    if !known.contains(&dep)
                        && known.first().is_none_or(|k| dep.strictness() >= k.strictness())
                    {
                        known.insert(0, dep);
                    }
                }

                while let Some(spec) = pending.pop() {
                    seen.insert(spec);
                    for &candidate in index.find_match_ids(spec).iter() {
                        if reduced.contains(&candidate)
                            || !self.valid(candidate)
                            || !self.in_strict_channel(candidate)
                        {
                            continue;
                        }
                        reduced.insert(candidate);
                        for next in &index.deps(candidate).depends {
                            if seen.contains(next) {
                                continue;
                            }
                            let broader = by_name
                                .get(next.name())
                                .and_then(|known| known.first())
                                .is_some_and(|k| next.strictness() < k.strictness());
                            if broader {
                                seen.insert(next);
                            } else {
                                pending.insert(next);
                            }
                        }
                    }
                }
            }
        }
        reduced
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::PackageRecord;

    fn rec(name: &str, version: &str, channel: &str, depends: &[&str]) -> Arc<PackageRecord> {
        Arc::new(
            PackageRecord::new(name, version, "0")
                .unwrap()
                .with_channel(channel)
                .with_depends(depends.iter().copied()),
        )
    }

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn names(index: &Index) -> Vec<String> {
        index.records().map(|r| format!("{}-{}", r.name, r.version)).collect()
    }

    #[test]
    fn keeps_the_reachable_closure() {
        let index = Index::new([
            rec("app", "1", "c", &["lib >=2"]),
            rec("lib", "1", "c", &[]),
            rec("lib", "2", "c", &["base"]),
            rec("base", "1", "c", &[]),
            rec("unrelated", "1", "c", &[]),
        ])
        .unwrap();
        let reduced = index.reduced(&[spec("app")], ChannelPriority::Flexible, false).unwrap();
        assert_eq!(names(&reduced), ["app-1", "base-1", "lib-2"]);
    }

    #[test]
    fn prunes_records_with_unsatisfiable_dependencies() {
        let index = Index::new([
            rec("app", "2", "c", &["missing"]),
            rec("app", "1", "c", &[]),
        ])
        .unwrap();
        let reduced = index.reduced(&[spec("app")], ChannelPriority::Flexible, false).unwrap();
        assert_eq!(names(&reduced), ["app-1"]);
    }

    #[test]
    fn strict_priority_hides_lower_channels() {
        let index = Index::with_channels(
            ["a", "b"],
            [rec("foo", "1.0", "a", &[]), rec("foo", "1.0", "b", &[])],
        )
        .unwrap();
        let strict = index.reduced(&[spec("foo")], ChannelPriority::Strict, false).unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict.records().next().unwrap().channel, "a");
        let flexible = index.reduced(&[spec("foo")], ChannelPriority::Flexible, false).unwrap();
        assert_eq!(flexible.len(), 2);
    }

    #[test]
    fn absent_name_and_absent_version_differ() {
        let index = Index::new([rec("numpy", "1.18", "c", &[])]).unwrap();
        let missing = index.reduced(&[spec("scipy")], ChannelPriority::Flexible, false);
        assert!(matches!(missing, Err(ResolveError::PackagesNotFound { .. })));
        let wrong = index
            .reduced(&[spec("numpy>=2")], ChannelPriority::Flexible, true)
            .unwrap();
        assert!(wrong.is_empty());
    }

    #[test]
    fn looser_dependencies_do_not_broaden() {
        let index = Index::new([
            rec("app", "1", "c", &["lib 1.*", "tool"]),
            rec("tool", "1", "c", &["lib"]),
            rec("lib", "1.0", "c", &[]),
            rec("lib", "2.0", "c", &[]),
        ])
        .unwrap();
        let reduced = index.reduced(&[spec("app")], ChannelPriority::Flexible, false).unwrap();
        assert_eq!(names(&reduced), ["app-1", "lib-1.0", "tool-1"]);
    }

    #[test]
    fn results_are_cached() {
        let index = Index::new([rec("a", "1", "c", &[])]).unwrap();
        let first = index.reduced(&[spec("a")], ChannelPriority::Flexible, false).unwrap();
        let second = index.reduced(&[spec("a")], ChannelPriority::Flexible, false).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }
}
