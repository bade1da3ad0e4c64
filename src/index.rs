// SPDX-License-Identifier: MPL-2.0

//! The package index: records grouped by name, with parsed dependencies and
//! channel ranks.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::rc::Rc;
use std::sync::Arc;

use version_order::VersionOrder;

use crate::record::RecordKey;
use crate::{ChannelPriority, FxIndexMap, Map, MatchSpec, PackageRecord, SpecParseError};

/// Position of a record inside one [Index].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RecordId(u32);

impl RecordId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The parsed `depends` and `constrains` of a record.
#[derive(Debug, Default)]
pub(crate) struct RecordDeps {
    pub(crate) depends: Vec<MatchSpec>,
    pub(crate) constrains: Vec<MatchSpec>,
}

/// One half of the leading pair of a [VersionKey]; which half comes first
/// depends on the channel priority mode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum KeyPart {
    Channel(Reverse<usize>),
    Version(VersionOrder),
}

/// Sort key of a record inside its group: greater is better.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct VersionKey {
    pub(crate) first: KeyPart,
    pub(crate) second: KeyPart,
    pub(crate) build_number: u64,
    pub(crate) arch: bool,
    pub(crate) timestamp: u64,
    build: String,
}

/// An immutable collection of package records.
///
/// Records are grouped by name; within a group they are sorted newest first
/// by version, build number and timestamp. If a group contains records that
/// cannot be managed by the solver (foreign or virtual packages), only those
/// are kept.
///
/// Lookups are memoized, which makes the index cheap to query repeatedly but
/// not [Sync].
#[derive(Debug)]
pub struct Index {
    channels: Vec<String>,
    records: Vec<Arc<PackageRecord>>,
    deps: Vec<Arc<RecordDeps>>,
    groups: FxIndexMap<String, Vec<RecordId>>,
    by_key: Map<RecordKey, RecordId>,
    by_dist: Map<String, RecordId>,
    trackers: FxIndexMap<String, Vec<RecordId>>,
    match_cache: RefCell<Map<MatchSpec, Rc<[RecordId]>>>,
    pub(crate) reduced_cache: RefCell<Map<(ChannelPriority, Vec<MatchSpec>), Rc<Index>>>,
}

impl Index {
    /// An index whose channel priority is the order in which channels first
    /// appear among `records`.
    pub fn new(
        records: impl IntoIterator<Item = Arc<PackageRecord>>,
    ) -> Result<Self, SpecParseError> {
        let records: Vec<Arc<PackageRecord>> = records.into_iter().collect();
        let mut channels: Vec<String> = Vec::new();
        for record in &records {
            if !channels.contains(&record.channel) {
                channels.push(record.channel.clone());
            }
        }
        Self::with_channels(channels, records)
    }

    /// An index with an explicit channel priority, highest first. Channels not
    /// listed rank below every listed one.
    pub fn with_channels<I, S>(
        channels: I,
        records: impl IntoIterator<Item = Arc<PackageRecord>>,
    ) -> Result<Self, SpecParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts = records
            .into_iter()
            .map(|record| {
                let deps = RecordDeps {
                    depends: parse_all(&record.depends)?,
                    constrains: parse_all(&record.constrains)?,
                };
                Ok((record, Arc::new(deps)))
            })
            .collect::<Result<Vec<_>, SpecParseError>>()?;
        Ok(Self::from_parts(
            channels.into_iter().map(Into::into).collect(),
            parts,
        ))
    }

    fn from_parts(channels: Vec<String>, parts: Vec<(Arc<PackageRecord>, Arc<RecordDeps>)>) -> Self {
        let mut by_name: FxIndexMap<String, Vec<(Arc<PackageRecord>, Arc<RecordDeps>)>> =
            FxIndexMap::default();
        let mut seen: Map<RecordKey, ()> = Map::default();
        for (record, deps) in parts {
            if seen.insert(record.key(), ()).is_some() {
                continue;
            }
            by_name
                .entry(record.name.clone())
                .or_default()
                .push((record, deps));
        }
        by_name.sort_keys();

        let mut index = Self {
            channels,
            records: Vec::new(),
            deps: Vec::new(),
            groups: FxIndexMap::default(),
            by_key: Map::default(),
            by_dist: Map::default(),
            trackers: FxIndexMap::default(),
            match_cache: RefCell::default(),
            reduced_cache: RefCell::default(),
        };
        for (name, mut group) in by_name {
            if group.iter().any(|(r, _)| r.is_unmanageable()) {
                group.retain(|(r, _)| r.is_unmanageable());
            }
            group.sort_by(|(a, _), (b, _)| {
                (&b.version, b.build_number, b.timestamp, &b.build)
                    .cmp(&(&a.version, a.build_number, a.timestamp, &a.build))
            });
            let mut ids = Vec::with_capacity(group.len());
            for (record, deps) in group {
                let id = RecordId(index.records.len() as u32);
                index.by_key.insert(record.key(), id);
                index.by_dist.insert(record.dist_str(), id);
                for feature in &record.track_features {
                    index.trackers.entry(feature.clone()).or_default().push(id);
                }
                index.records.push(record);
                index.deps.push(deps);
                ids.push(id);
            }
            index.groups.insert(name, ids);
        }
        index
    }

    /// A new index with the same channels, made of `ids` only.
    pub(crate) fn subset(&self, ids: impl IntoIterator<Item = RecordId>) -> Index {
        let parts = ids
            .into_iter()
            .map(|id| (Arc::clone(&self.records[id.index()]), Arc::clone(&self.deps[id.index()])))
            .collect();
        Self::from_parts(self.channels.clone(), parts)
    }

    /// This index plus every record of `extra` it does not know yet.
    ///
    /// Records already present, by channel, subdir, name, version and build,
    /// keep the index's metadata.
    pub fn extended<'a>(
        &self,
        extra: impl IntoIterator<Item = &'a Arc<PackageRecord>>,
    ) -> Result<Index, SpecParseError> {
        let mut parts: Vec<(Arc<PackageRecord>, Arc<RecordDeps>)> = (0..self.records.len())
            .map(|i| (Arc::clone(&self.records[i]), Arc::clone(&self.deps[i])))
            .collect();
        for record in extra {
            if self.by_key.contains_key(&record.key()) {
                continue;
            }
            let deps = RecordDeps {
                depends: parse_all(&record.depends)?,
                constrains: parse_all(&record.constrains)?,
            };
            parts.push((Arc::clone(record), Arc::new(deps)));
        }
        Ok(Self::from_parts(self.channels.clone(), parts))
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The channels, highest priority first.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Whether some record is named `name`.
    pub fn contains_name(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// The package names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// The records named `name`, newest first.
    pub fn group(&self, name: &str) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.group_ids(name).iter().map(|&id| self.record(id))
    }

    /// Every record, grouped by name.
    pub fn records(&self) -> impl Iterator<Item = &Arc<PackageRecord>> {
        self.records.iter()
    }

    /// The records satisfying `spec`, newest first. Optional flags and
    /// targets are ignored.
    pub fn find_matches(&self, spec: &MatchSpec) -> Vec<Arc<PackageRecord>> {
        self.find_match_ids(spec)
            .iter()
            .map(|&id| Arc::clone(self.record(id)))
            .collect()
    }

    pub(crate) fn groups(&self) -> impl Iterator<Item = (&str, &[RecordId])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub(crate) fn group_ids(&self, name: &str) -> &[RecordId] {
        self.groups.get(name).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn record(&self, id: RecordId) -> &Arc<PackageRecord> {
        &self.records[id.index()]
    }

    pub(crate) fn deps(&self, id: RecordId) -> &RecordDeps {
        &self.deps[id.index()]
    }

    pub(crate) fn trackers(&self) -> impl Iterator<Item = (&str, &[RecordId])> {
        self.trackers.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// The id of the record with the same identity as `record`.
    pub(crate) fn lookup(&self, record: &PackageRecord) -> Option<RecordId> {
        self.by_key.get(&record.key()).copied()
    }

    /// The id of the record whose `dist_str` is `dist`.
    pub(crate) fn lookup_dist(&self, dist: &str) -> Option<RecordId> {
        self.by_dist.get(dist).copied()
    }

    pub(crate) fn find_match_ids(&self, spec: &MatchSpec) -> Rc<[RecordId]> {
        let query = spec.query();
        if let Some(ids) = self.match_cache.borrow().get(&query) {
            return Rc::clone(ids);
        }
        let ids: Rc<[RecordId]> = self
            .group_ids(query.name())
            .iter()
            .copied()
            .filter(|&id| query.matches(self.record(id)))
            .collect();
        self.match_cache.borrow_mut().insert(query, Rc::clone(&ids));
        ids
    }

    /// The rank of `channel`: 0 is the highest priority.
    pub(crate) fn channel_rank(&self, channel: &str) -> usize {
        self.channels
            .iter()
            .position(|c| c == channel)
            .unwrap_or(self.channels.len())
    }

    /// The highest priority channel providing `name`.
    pub(crate) fn strict_channel(&self, name: &str) -> Option<&str> {
        self.group(name)
            .min_by_key(|record| self.channel_rank(&record.channel))
            .map(|record| record.channel.as_str())
    }

    pub(crate) fn version_key(
        &self,
        id: RecordId,
        priority: ChannelPriority,
        ignore_timestamps: bool,
    ) -> VersionKey {
        let record = self.record(id);
        let channel = KeyPart::Channel(Reverse(self.channel_rank(&record.channel)));
        let version = KeyPart::Version(record.version.clone());
        let (first, second) = match priority {
            ChannelPriority::Disabled => (version, channel),
            ChannelPriority::Strict | ChannelPriority::Flexible => (channel, version),
        };
        VersionKey {
            first,
            second,
            build_number: record.build_number,
            arch: !record.is_noarch(),
            timestamp: if ignore_timestamps { 0 } else { record.timestamp },
            build: record.build.clone(),
        }
    }

    /// The group of `name` with the version key of each record, best first.
    pub(crate) fn ranked_group(
        &self,
        name: &str,
        priority: ChannelPriority,
        ignore_timestamps: bool,
    ) -> Vec<(VersionKey, RecordId)> {
        let mut ranked: Vec<(VersionKey, RecordId)> = self
            .group_ids(name)
            .iter()
            .map(|&id| (self.version_key(id, priority, ignore_timestamps), id))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked
    }
}

fn parse_all(specs: &[String]) -> Result<Vec<MatchSpec>, SpecParseError> {
    specs.iter().map(|s| s.parse()).collect()
}

// TESTS #######################################################################
