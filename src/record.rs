// SPDX-License-Identifier: MPL-2.0

//! Package records: one built artifact of one version of one package.

use std::fmt::{self, Display, Formatter};

use version_order::{VersionOrder, VersionParseError};

/// Channel name given to records that were built without one.
pub const DEFAULT_CHANNEL: &str = "defaults";

/// Channel name of virtual packages describing the host system.
pub const VIRTUAL_CHANNEL: &str = "@";

/// An immutable package record.
///
/// Records are shared through [`Arc`](std::sync::Arc) between the index,
/// the installed state and solutions, and are never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackageRecord {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: VersionOrder,
    /// Build string, e.g. `py39h06a4308_0`.
    pub build: String,
    /// Build number; larger is newer for the same version.
    #[cfg_attr(feature = "serde", serde(default))]
    pub build_number: u64,
    /// Match spec strings of the run dependencies.
    #[cfg_attr(feature = "serde", serde(default))]
    pub depends: Vec<String>,
    /// Match spec strings that constrain other packages only if they are present.
    #[cfg_attr(feature = "serde", serde(default))]
    pub constrains: Vec<String>,
    /// Name of the channel the record comes from.
    #[cfg_attr(feature = "serde", serde(default = "default_channel"))]
    pub channel: String,
    /// Platform subdirectory, e.g. `linux-64` or `noarch`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub subdir: String,
    /// Features this record activates when installed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub track_features: Vec<String>,
    /// Features this record requires to be active.
    #[cfg_attr(feature = "serde", serde(default))]
    pub features: Vec<String>,
    /// Build time, in milliseconds since the epoch.
    #[cfg_attr(feature = "serde", serde(default))]
    pub timestamp: u64,
}

#[cfg(feature = "serde")]
fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// Identity of a record across index snapshots and the installed state:
/// two records with the same key are the same artifact, even if their
/// metadata was patched in between.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    channel: String,
    subdir: String,
    name: String,
    version: String,
    build: String,
}

impl PackageRecord {
    /// A record with no dependencies, on the default channel.
    pub fn new(
        name: impl Into<String>,
        version: &str,
        build: impl Into<String>,
    ) -> Result<Self, VersionParseError> {
        Ok(Self {
            name: name.into(),
            version: version.parse()?,
            build: build.into(),
            build_number: 0,
            depends: Vec::new(),
            constrains: Vec::new(),
            channel: DEFAULT_CHANNEL.to_string(),
            subdir: String::new(),
            track_features: Vec::new(),
            features: Vec::new(),
            timestamp: 0,
        })
    }

    /// A virtual package describing the host system, such as `__glibc`.
    pub fn virtual_package(name: impl Into<String>, version: &str) -> Result<Self, VersionParseError> {
        Ok(Self::new(name, version, "0")?.with_channel(VIRTUAL_CHANNEL))
    }

    /// Sets the build number.
    pub fn with_build_number(mut self, build_number: u64) -> Self {
        self.build_number = build_number;
        self
    }

    /// Sets the run dependencies.
    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the run constraints.
    pub fn with_constrains<I, S>(mut self, constrains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constrains = constrains.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the channel name.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Sets the platform subdirectory.
    pub fn with_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = subdir.into();
        self
    }

    /// Sets the tracked features.
    pub fn with_track_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.track_features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the required features.
    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the build timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// `channel::name-version-build`.
    pub fn dist_str(&self) -> String {
        format!(
            "{}::{}-{}-{}",
            self.channel, self.name, self.version, self.build
        )
    }

    /// The identity of this record.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            channel: self.channel.clone(),
            subdir: self.subdir.clone(),
            name: self.name.clone(),
            version: self.version.to_string(),
            build: self.build.clone(),
        }
    }

    /// Virtual packages describe the host system and cannot be changed by a solve.
    pub fn is_virtual(&self) -> bool {
        self.name.starts_with("__")
    }

    /// Records the solver may not replace: virtual packages and packages
    /// installed by a foreign package manager.
    pub fn is_unmanageable(&self) -> bool {
        self.subdir == "pypi" || self.is_virtual()
    }

    /// Whether this record is built for every platform.
    pub fn is_noarch(&self) -> bool {
        self.subdir == "noarch"
    }
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dist_str())
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dist_str_and_flags() {
        let rec = PackageRecord::new("numpy", "1.20.1", "py39_0")
            .unwrap()
            .with_channel("conda-forge");
        assert_eq!(rec.dist_str(), "conda-forge::numpy-1.20.1-py39_0");
        assert!(!rec.is_unmanageable());
        assert!(rec.clone().with_subdir("pypi").is_unmanageable());
        assert!(PackageRecord::virtual_package("__glibc", "2.31")
            .unwrap()
            .is_unmanageable());
    }

    #[test]
    fn key_ignores_metadata() {
        let rec = PackageRecord::new("flask", "2.0", "0").unwrap();
        let patched = rec.clone().with_depends(["werkzeug >=2"]).with_timestamp(7);
        assert_eq!(rec.key(), patched.key());
        assert_ne!(rec, patched);
    }
}
