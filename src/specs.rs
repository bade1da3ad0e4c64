// SPDX-License-Identifier: MPL-2.0

//! The aggregated constraints of one solve: one [Spec] per package name.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::{FxIndexMap, MatchSpec, PackageRecord};

/// What the solver is asked to do about one package name.
///
/// Specs are never mutated in place; relaxing a spec produces a new value
/// through [Spec::neutered], and tightening one goes through
/// [Spec::frozen_from] or [Spec::targeted].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Spec {
    /// Any record of the name.
    Bare {
        /// The package name.
        name: String,
        /// Whether the package only gets constrained if it ends up installed.
        optional: bool,
    },
    /// A query with version, build or channel constraints.
    Constrained(MatchSpec),
    /// A query with a preferred record, usually the installed one.
    Targeted {
        /// The constraint itself. A bare name when nothing else restricts it.
        query: MatchSpec,
        /// The record the solver should prefer to keep.
        target: Arc<PackageRecord>,
    },
    /// Exactly this record.
    Frozen(Arc<PackageRecord>),
}

impl Spec {
    /// A mandatory bare spec.
    pub fn bare(name: impl Into<String>) -> Self {
        Spec::Bare {
            name: name.into(),
            optional: false,
        }
    }

    /// A spec pinning exactly `record`.
    pub fn frozen_from(record: &Arc<PackageRecord>) -> Self {
        Spec::Frozen(Arc::clone(record))
    }

    /// The package name.
    pub fn name(&self) -> &str {
        match self {
            Spec::Bare { name, .. } => name,
            Spec::Constrained(spec) | Spec::Targeted { query: spec, .. } => spec.name(),
            Spec::Frozen(record) => &record.name,
        }
    }

    /// Whether the spec only applies if the package ends up installed.
    pub fn is_optional(&self) -> bool {
        match self {
            Spec::Bare { optional, .. } => *optional,
            Spec::Constrained(spec) | Spec::Targeted { query: spec, .. } => spec.is_optional(),
            Spec::Frozen(_) => false,
        }
    }

    /// Whether the spec prefers a particular record.
    pub fn is_targeted(&self) -> bool {
        match self {
            Spec::Targeted { .. } => true,
            Spec::Constrained(spec) => spec.target().is_some(),
            _ => false,
        }
    }

    /// The same spec, optional or mandatory.
    pub fn with_optional(self, optional: bool) -> Self {
        match self {
            Spec::Bare { name, .. } => Spec::Bare { name, optional },
            Spec::Constrained(spec) => Spec::Constrained(spec.with_optional(optional)),
            Spec::Targeted { query, target } => Spec::Targeted {
                query: query.with_optional(optional),
                target,
            },
            Spec::Frozen(record) if optional => Spec::Constrained(
                MatchSpec::exact(&record).with_optional(true),
            ),
            frozen @ Spec::Frozen(_) => frozen,
        }
    }

    /// This spec's constraint, preferring `target`.
    pub fn targeted(&self, target: &Arc<PackageRecord>) -> Self {
        let mut query = self.to_match_spec().with_target(None);
        if let Spec::Frozen(_) = self {
            query = query.with_optional(false);
        }
        Spec::Targeted {
            query,
            target: Arc::clone(target),
        }
    }

    /// The relaxed form of this spec: its version constraint alone, or the
    /// bare name if it has none. Build, channel and target are dropped.
    pub fn neutered(&self) -> Self {
        let optional = self.is_optional();
        let version = match self {
            Spec::Bare { .. } => None,
            Spec::Constrained(spec) | Spec::Targeted { query: spec, .. } => spec.version().cloned(),
            Spec::Frozen(_) => None,
        };
        match version {
            Some(version) => Spec::Constrained(
                MatchSpec::from_name(self.name())
                    .with_version(Some(version))
                    .with_optional(optional),
            ),
            None => Spec::Bare {
                name: self.name().to_string(),
                optional,
            },
        }
    }

    /// The match spec handed to the index and the clause compiler.
    pub fn to_match_spec(&self) -> MatchSpec {
        match self {
            Spec::Bare { name, optional } => MatchSpec::from_name(name.as_str()).with_optional(*optional),
            Spec::Constrained(spec) => spec.clone(),
            Spec::Targeted { query, target } => query.clone().with_target(Some(target.dist_str())),
            Spec::Frozen(record) => MatchSpec::exact(record),
        }
    }
}

impl From<MatchSpec> for Spec {
    fn from(spec: MatchSpec) -> Self {
        if spec.is_name_only() && spec.target().is_none() {
            Spec::Bare {
                name: spec.name().to_string(),
                optional: spec.is_optional(),
            }
        } else {
            Spec::Constrained(spec)
        }
    }
}

impl Display for Spec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_match_spec())
    }
}

/// Name to spec, in insertion order.
///
/// Inserting a spec for a name already present replaces it in place, so the
/// order in which names were first mentioned is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecsMap {
    entries: FxIndexMap<String, Spec>,
}

impl SpecsMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the spec of its name.
    pub fn insert(&mut self, spec: Spec) {
        self.entries.insert(spec.name().to_string(), spec);
    }

    /// Sets the spec of its name unless one exists already.
    pub fn insert_if_absent(&mut self, spec: Spec) {
        self.entries
            .entry(spec.name().to_string())
            .or_insert(spec);
    }

    /// Removes the spec of `name`, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Spec> {
        self.entries.shift_remove(name)
    }

    /// The spec of `name`.
    pub fn get(&self, name: &str) -> Option<&Spec> {
        self.entries.get(name)
    }

    /// Whether a spec exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The number of names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The specs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Spec> {
        self.entries.values()
    }

    /// The names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// A new map where each of `replacements` takes the place of the spec
    /// of its name.
    pub fn relaxed(&self, replacements: impl IntoIterator<Item = Spec>) -> Self {
        let mut next = self.clone();
        for spec in replacements {
            next.insert(spec);
        }
        next
    }

    /// The match specs of every entry.
    pub fn to_match_specs(&self) -> Vec<MatchSpec> {
        self.iter().map(Spec::to_match_spec).collect()
    }
}

impl Display for SpecsMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{spec}")?;
        }
        Ok(())
    }
}

impl FromIterator<Spec> for SpecsMap {
    fn from_iter<T: IntoIterator<Item = Spec>>(iter: T) -> Self {
        let mut map = SpecsMap::new();
        for spec in iter {
            map.insert(spec);
        }
        map
    }
}

// TESTS #######################################################################
