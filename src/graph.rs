// SPDX-License-Identifier: MPL-2.0

//! Dependency graph of a set of records, as found in an environment or a
//! solution.
//!
//! A record's parents are the records of the graph matching one of its
//! dependencies; its children are the records depending on it. The graph is
//! kept in topological order: every record comes after its parents.

use std::sync::Arc;

use log::debug;

use crate::{FxIndexSet, MatchSpec, PackageRecord, SpecParseError};

pub(crate) struct PrefixGraph {
    records: Vec<Arc<PackageRecord>>,
    parents: Vec<FxIndexSet<usize>>,
    anchored: Vec<bool>,
    /// Live nodes, sorted.
    order: Vec<usize>,
}

impl PrefixGraph {
    /// The graph of `records`. Records matching one of `specs` are anchored:
    /// [PrefixGraph::prune] keeps them.
    pub(crate) fn new<'s>(
        records: impl IntoIterator<Item = Arc<PackageRecord>>,
        specs: impl IntoIterator<Item = &'s MatchSpec>,
    ) -> Result<Self, SpecParseError> {
        let records: Vec<Arc<PackageRecord>> = records.into_iter().collect();
        let specs: Vec<&MatchSpec> = specs.into_iter().collect();
        let mut parents = Vec::with_capacity(records.len());
        for (own, record) in records.iter().enumerate() {
            let depends = record
                .depends
                .iter()
                .map(|d| d.parse::<MatchSpec>())
                .collect::<Result<Vec<_>, _>>()?;
            let edges: FxIndexSet<usize> = records
                .iter()
                .enumerate()
                .filter(|&(i, candidate)| i != own && depends.iter().any(|d| d.matches(candidate)))
                .map(|(i, _)| i)
                .collect();
            parents.push(edges);
        }
        let anchored = records
            .iter()
            .map(|r| specs.iter().any(|s| s.matches(r)))
            .collect();
        let mut graph = Self {
            order: (0..records.len()).collect(),
            records,
            parents,
            anchored,
        };
        graph.toposort();
        Ok(graph)
    }

    /// The records, dependencies first.
    pub(crate) fn records(&self) -> impl Iterator<Item = &Arc<PackageRecord>> + '_ {
        self.order.iter().map(|&i| &self.records[i])
    }

    pub(crate) fn into_records(self) -> Vec<Arc<PackageRecord>> {
        self.order
            .iter()
            .map(|&i| Arc::clone(&self.records[i]))
            .collect()
    }

    fn children(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.order
            .iter()
            .copied()
            .filter(move |&other| self.parents[other].contains(&node))
    }

    fn remove_nodes(&mut self, nodes: &FxIndexSet<usize>) -> Vec<Arc<PackageRecord>> {
        let removed: Vec<Arc<PackageRecord>> = self
            .order
            .iter()
            .filter(|i| nodes.contains(*i))
            .map(|&i| Arc::clone(&self.records[i]))
            .collect();
        self.order.retain(|i| !nodes.contains(i));
        for &node in &self.order {
            self.parents[node].retain(|p| !nodes.contains(p));
        }
        removed
    }

    /// Removes the records matching `spec` and everything depending on them.
    pub(crate) fn remove_spec(&mut self, spec: &MatchSpec) -> Vec<Arc<PackageRecord>> {
        let matching: Vec<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&i| spec.matches(&self.records[i]))
            .collect();
        let mut doomed: FxIndexSet<usize> = FxIndexSet::default();
        for node in matching {
            doomed.insert(node);
            doomed.extend(self.descendants(node));
        }
        self.remove_nodes(&doomed)
    }

    /// Removes the anchored records nothing else depends on.
    pub(crate) fn remove_youngest_anchored(&mut self) -> Vec<Arc<PackageRecord>> {
        let youngest: FxIndexSet<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&i| self.anchored[i] && self.children(i).next().is_none())
            .collect();
        self.remove_nodes(&youngest)
    }

    /// Removes, until none is left, the records that are neither anchored
    /// nor depended upon. Returns them in their original order.
    pub(crate) fn prune(&mut self) -> Vec<Arc<PackageRecord>> {
        let original = self.order.clone();
        let mut pruned: FxIndexSet<usize> = FxIndexSet::default();
        loop {
            let prunable: FxIndexSet<usize> = self
                .order
                .iter()
                .copied()
                .filter(|&i| !self.anchored[i] && self.children(i).next().is_none())
                .collect();
            if prunable.is_empty() {
                break;
            }
            self.remove_nodes(&prunable);
            pruned.extend(prunable);
        }
        original
            .into_iter()
            .filter(|i| pruned.contains(i))
            .map(|i| Arc::clone(&self.records[i]))
            .collect()
    }

    fn node_by_name(&self, name: &str) -> Option<usize> {
        self.order
            .iter()
            .copied()
            .find(|&i| self.records[i].name == name)
    }

    fn descendants(&self, node: usize) -> FxIndexSet<usize> {
        let mut seen: FxIndexSet<usize> = FxIndexSet::default();
        let mut queue = vec![node];
        let mut next = 0;
        while next < queue.len() {
            for child in self.children(queue[next]) {
                if seen.insert(child) {
                    queue.push(child);
                }
            }
            next += 1;
        }
        seen
    }

    /// Every record the record named `name` depends on, directly or not.
    pub(crate) fn all_ancestors(&self, name: &str) -> Vec<Arc<PackageRecord>> {
        let Some(node) = self.node_by_name(name) else {
            return Vec::new();
        };
        let mut seen: FxIndexSet<usize> = FxIndexSet::default();
        let mut queue = vec![node];
        let mut next = 0;
        while next < queue.len() {
            for &parent in &self.parents[queue[next]] {
                if seen.insert(parent) {
                    queue.push(parent);
                }
            }
            next += 1;
        }
        self.order
            .iter()
            .filter(|i| seen.contains(*i))
            .map(|&i| Arc::clone(&self.records[i]))
            .collect()
    }

    /// Sorts live nodes so that parents come first, breaking ties by name.
    ///
    /// Records without any edge go first. Cycles are broken by emitting the
    /// node with the fewest remaining parents. A `python -> pip` edge is
    /// ignored.
    fn toposort(&mut self) {
        let mut remaining: FxIndexSet<usize> = self.order.iter().copied().collect();
        let mut edges: Vec<FxIndexSet<usize>> = self.parents.clone();
        for &node in &remaining {
            let is_python = self.records[node].name == "python";
            let records = &self.records;
            edges[node].retain(|&p| !(is_python && records[p].name == "pip"));
        }
        let sort_key = |i: &usize| (self.records[*i].name.clone(), self.records[*i].dist_str());

        let mut sorted: Vec<usize> = Vec::with_capacity(remaining.len());
        let mut disconnected: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| edges[i].is_empty() && !remaining.iter().any(|&j| edges[j].contains(&i)))
            .collect();
        disconnected.sort_by_key(sort_key);
        for node in disconnected {
            remaining.shift_remove(&node);
            sorted.push(node);
        }

        while !remaining.is_empty() {
            let mut ready: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| edges[i].iter().all(|p| !remaining.contains(p)))
                .collect();
            if ready.is_empty() {
                let Some(&breaker) = remaining.iter().min_by_key(|&&i| {
                    let open = edges[i].iter().filter(|p| remaining.contains(*p)).count();
                    (open, sort_key(&i))
                }) else {
                    break;
                };
                debug!("breaking dependency cycle at {}", self.records[breaker]);
                ready.push(breaker);
            }
            ready.sort_by_key(sort_key);
            for node in ready {
                remaining.shift_remove(&node);
                sorted.push(node);
            }
        }
        self.order = sorted;
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, depends: &[&str]) -> Arc<PackageRecord> {
        Arc::new(
            PackageRecord::new(name, "1", "0")
                .unwrap()
                .with_depends(depends.iter().copied()),
        )
    }

    fn names<'a>(records: impl IntoIterator<Item = &'a Arc<PackageRecord>>) -> Vec<&'a str> {
        records.into_iter().map(|r| r.name.as_str()).collect()
    }

    fn spec(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn env() -> Vec<Arc<PackageRecord>> {
        vec![
            rec("flask", &["python", "werkzeug"]),
            rec("werkzeug", &["python"]),
            rec("python", &["pip", "openssl"]),
            rec("pip", &["python"]),
            rec("openssl", &[]),
            rec("zlib", &[]),
        ]
    }

    #[test]
    fn dependencies_come_first() {
        let graph = PrefixGraph::new(env(), []).unwrap();
        assert_eq!(
            names(graph.records()),
            ["zlib", "openssl", "python", "pip", "werkzeug", "flask"]
        );
    }

    #[test]
    fn cycles_are_broken() {
        let graph = PrefixGraph::new([rec("a", &["b"]), rec("b", &["a"])], []).unwrap();
        assert_eq!(names(graph.records()), ["a", "b"]);
    }

    #[test]
    fn removing_a_spec_removes_dependents() {
        let mut graph = PrefixGraph::new(env(), []).unwrap();
        let removed = graph.remove_spec(&spec("werkzeug"));
        assert_eq!(names(&removed), ["werkzeug", "flask"]);
        assert_eq!(names(graph.records()), ["zlib", "openssl", "python", "pip"]);
        assert!(graph.remove_spec(&spec("missing")).is_empty());
    }

    #[test]
    fn prune_keeps_anchored_records_and_their_dependencies() {
        let specs = [spec("werkzeug")];
        let mut graph = PrefixGraph::new(env(), &specs).unwrap();
        let pruned = graph.prune();
        assert_eq!(names(&pruned), ["zlib", "flask"]);
        assert_eq!(names(graph.records()), ["openssl", "python", "pip", "werkzeug"]);
    }

    #[test]
    fn youngest_anchored_records_are_removed() {
        let specs = [spec("flask"), spec("python")];
        let mut graph = PrefixGraph::new(env(), &specs).unwrap();
        assert_eq!(names(&graph.remove_youngest_anchored()), ["flask"]);
        assert!(graph.records().any(|r| r.name == "python"));
    }

    #[test]
    fn ancestors_are_transitive() {
        let graph = PrefixGraph::new(env(), []).unwrap();
        assert_eq!(
            names(&graph.all_ancestors("flask")),
            ["openssl", "python", "pip", "werkzeug"]
        );
        assert!(graph.all_ancestors("missing").is_empty());
    }
}
