// SPDX-License-Identifier: MPL-2.0

//! Conda-style version ordering and version-spec expressions.
//!
//! A [VersionOrder] is a parsed version string such as `1.2.3`, `1!2.0`,
//! `1.0rc1` or `2.1+local.7`. Versions are split into components on `.` and
//! `_`, and each component into runs of digits and non-digits. Components are
//! compared element by element, missing elements count as `0`, and the special
//! strings `dev` and `post` sort before every other string and after every
//! number respectively:
//!
//! ```
//! use version_order::VersionOrder;
//!
//! let parse = |s: &str| s.parse::<VersionOrder>().unwrap();
//! assert!(parse("1.0dev") < parse("1.0a"));
//! assert!(parse("1.0a") < parse("1.0"));
//! assert!(parse("1.0") < parse("1.0post1"));
//! assert_eq!(parse("1.1"), parse("1.1.0"));
//! assert!(parse("1.0") < parse("1!0.1"));
//! ```
//!
//! A [VersionSpec] is a boolean expression over versions:
//!
//! ```
//! use version_order::{VersionOrder, VersionSpec};
//!
//! let spec: VersionSpec = ">=1.19,<2|1.16.*".parse().unwrap();
//! assert!(spec.matches(&"1.20.1".parse::<VersionOrder>().unwrap()));
//! assert!(spec.matches(&"1.16.5".parse::<VersionOrder>().unwrap()));
//! assert!(!spec.matches(&"1.17".parse::<VersionOrder>().unwrap()));
//! ```

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use smallvec::SmallVec;

mod glob;
mod spec;
#[cfg(any(feature = "proptest", test))]
pub mod testing;

pub use glob::glob_match;
pub use spec::{Logic, Operator, VersionSpec};

/// Errors raised while parsing a version or a version spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    /// The string is not a valid version.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion {
        /// The offending input.
        version: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// The string is not a valid version spec expression.
    #[error("invalid version spec '{spec}': {reason}")]
    InvalidSpec {
        /// The offending input.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// One element of a version component.
///
/// The declaration order is the sort order: strings sort before numbers and
/// `post` sorts after everything. `dev` is stored upper-cased so that it sorts
/// before every other (lower-cased) string, but after `*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Part {
    Str(Box<str>),
    Num(u128),
    Post,
}

/// Value of missing elements: `1.1` compares like `1.1.0`.
static FILL: Part = Part::Num(0);

impl Part {
    fn parse(token: &str) -> Option<Self> {
        if token.bytes().all(|b| b.is_ascii_digit()) {
            return token.parse().ok().map(Part::Num);
        }
        Some(match token {
            "post" => Part::Post,
            "dev" => Part::Str("DEV".into()),
            _ => Part::Str(token.into()),
        })
    }
}

type Component = SmallVec<[Part; 2]>;
type Components = SmallVec<[Component; 4]>;

/// A parsed, totally ordered conda version.
///
/// Equality and hashing are semantic: `1.1` and `1.1.0` are equal and hash
/// alike. The normalized (lower-cased) source string is kept for display.
#[derive(Debug, Clone)]
pub struct VersionOrder {
    norm: Box<str>,
    version: Components,
    local: Components,
}

impl VersionOrder {
    /// The normalized version string: trimmed and lower-cased.
    pub fn as_str(&self) -> &str {
        &self.norm
    }

    /// Whether this version starts with `prefix`, component-wise.
    ///
    /// `1.2.3` starts with `1.2` and with `1`, but not with `1.23`. Inside
    /// the last component of the prefix, string elements are compared by
    /// string prefix, so `1.2rc1` starts with `1.2r`.
    pub fn starts_with(&self, prefix: &VersionOrder) -> bool {
        let (t1, t2) = if prefix.local.is_empty() {
            (&self.version, &prefix.version)
        } else {
            if !components_eq(&self.version, &prefix.version) {
                return false;
            }
            (&self.local, &prefix.local)
        };
        let Some(last) = t2.len().checked_sub(1) else {
            return true;
        };
        if !components_eq(&t1[..last.min(t1.len())], &t2[..last]) {
            return false;
        }
        let empty = Component::new();
        let v1 = t1.get(last).unwrap_or(&empty);
        let v2 = &t2[last];
        let Some(nt) = v2.len().checked_sub(1) else {
            return true;
        };
        if !component_eq(&v1[..nt.min(v1.len())], &v2[..nt]) {
            return false;
        }
        let c1 = v1.get(nt).unwrap_or(&FILL);
        match (&v2[nt], c1) {
            (Part::Str(s2), Part::Str(s1)) => s1.starts_with(&**s2),
            (Part::Str(_), _) => false,
            (c2, c1) => c1 == c2,
        }
    }

    /// Compatible release (`~=`): at least `base`, and starting with `base`
    /// with its last component dropped.
    pub fn is_compatible_with(&self, base: &VersionOrder) -> bool {
        if self < base {
            return false;
        }
        let stem = match base.norm.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => return true,
        };
        match stem.parse::<VersionOrder>() {
            Ok(stem) => self.starts_with(&stem),
            Err(_) => false,
        }
    }

    /// The `major.minor` prefix of this version, as written.
    pub fn major_minor(&self) -> Option<String> {
        let mut parts = self.norm.split(['.', '_']);
        let major = parts.next()?;
        let minor = parts.next()?;
        Some(format!("{major}.{minor}"))
    }

    fn canonical(components: &Components) -> impl Iterator<Item = &[Part]> {
        let trimmed: SmallVec<[&[Part]; 4]> = components
            .iter()
            .map(|c| {
                let end = c.iter().rposition(|p| *p != FILL).map_or(0, |i| i + 1);
                &c[..end]
            })
            .collect();
        let end = trimmed
            .iter()
            .rposition(|c| !c.is_empty())
            .map_or(0, |i| i + 1);
        trimmed.into_iter().take(end)
    }
}

fn component_eq(c1: &[Part], c2: &[Part]) -> bool {
    cmp_component(c1, c2) == Ordering::Equal
}

fn components_eq(t1: &[Component], t2: &[Component]) -> bool {
    cmp_components(t1, t2) == Ordering::Equal
}

fn cmp_component(c1: &[Part], c2: &[Part]) -> Ordering {
    for i in 0..c1.len().max(c2.len()) {
        let p1 = c1.get(i).unwrap_or(&FILL);
        let p2 = c2.get(i).unwrap_or(&FILL);
        match p1.cmp(p2) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn cmp_components(t1: &[Component], t2: &[Component]) -> Ordering {
    for i in 0..t1.len().max(t2.len()) {
        let c1 = t1.get(i).map_or(&[][..], |c| &c[..]);
        let c2 = t2.get(i).map_or(&[][..], |c| &c[..]);
        match cmp_component(c1, c2) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn split_component(component: &str, source: &str) -> Result<Component, VersionParseError> {
    let invalid = |reason| VersionParseError::InvalidVersion {
        version: source.to_string(),
        reason,
    };
    if component.is_empty() {
        return Err(invalid("empty version component"));
    }
    let mut parts = Component::new();
    if !component.starts_with(|c: char| c.is_ascii_digit()) {
        parts.push(FILL.clone());
    }
    let bytes = component.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let class = |b: u8| match b {
            b'0'..=b'9' => 0,
            b'*' => 1,
            _ => 2,
        };
        let kind = class(bytes[start]);
        let mut end = start + 1;
        while end < bytes.len() && class(bytes[end]) == kind {
            end += 1;
        }
        let part = Part::parse(&component[start..end]).ok_or_else(|| invalid("number too large"))?;
        parts.push(part);
        start = end;
    }
    Ok(parts)
}

fn split_components(
    text: &str,
    source: &str,
    trailing_underscore: bool,
) -> Result<Components, VersionParseError> {
    let mut pieces: Vec<String> = text.split(['.', '_']).map(str::to_string).collect();
    if trailing_underscore {
        if let Some(last) = pieces.last_mut() {
            last.push('_');
        }
    }
    pieces
        .iter()
        .map(|piece| split_component(piece, source))
        .collect()
}

impl FromStr for VersionOrder {
    type Err = VersionParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| VersionParseError::InvalidVersion {
            version: source.to_string(),
            reason,
        };
        let mut norm = source.trim().to_lowercase();
        if norm.is_empty() {
            return Err(invalid("empty version string"));
        }
        let valid = |s: &str| {
            s.bytes()
                .all(|b| matches!(b, b'*' | b'.' | b'+' | b'!' | b'_' | b'0'..=b'9' | b'a'..=b'z'))
        };
        if !valid(&norm) && norm.contains('-') && !norm.contains('_') {
            norm = norm.replace('-', "_");
        }
        if !valid(&norm) {
            return Err(invalid("invalid character(s)"));
        }

        let (epoch, rest) = match norm.split('!').collect::<SmallVec<[&str; 2]>>()[..] {
            [rest] => ("0", rest),
            [epoch, rest] => {
                if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("epoch must be an integer"));
                }
                (epoch, rest)
            }
            _ => return Err(invalid("duplicated epoch separator '!'")),
        };
        let (public, local) = match rest.split('+').collect::<SmallVec<[&str; 2]>>()[..] {
            [public] => (public, None),
            [public, local] => (public, Some(local)),
            _ => return Err(invalid("duplicated local version separator '+'")),
        };
        if public.is_empty() {
            return Err(invalid("missing version before local version separator '+'"));
        }

        let mut version = Components::new();
        version.push(split_component(epoch, source)?);
        match public.strip_suffix('_') {
            Some(stripped) => version.extend(split_components(stripped, source, true)?),
            None => version.extend(split_components(public, source, false)?),
        }
        let local = match local {
            Some(local) => split_components(local, source, false)?,
            None => Components::new(),
        };

        Ok(VersionOrder {
            norm: norm.into(),
            version,
            local,
        })
    }
}

impl Display for VersionOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.norm)
    }
}

impl PartialEq for VersionOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionOrder {}

impl PartialOrd for VersionOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_components(&self.version, &other.version)
            .then_with(|| cmp_components(&self.local, &other.local))
    }
}

impl Hash for VersionOrder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for component in Self::canonical(&self.version) {
            component.hash(state);
        }
        0xffu8.hash(state);
        for component in Self::canonical(&self.local) {
            component.hash(state);
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for VersionOrder {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.norm)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for VersionOrder {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// TESTS #######################################################################

#[cfg(test)]
pub mod tests {
    use std::collections::hash_map::DefaultHasher;

    use proptest::prelude::*;

    use super::*;

    fn v(s: &str) -> VersionOrder {
        s.parse().unwrap()
    }

    fn hash_of(version: &VersionOrder) -> u64 {
        let mut hasher = DefaultHasher::new();
        version.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn documented_ordering() {
        let ordered = [
            "0.4",
            "0.4.0",
            "0.4.1.rc",
            "0.4.1.RC",
            "0.4.1",
            "0.5a1",
            "0.5b3",
            "0.5C1",
            "0.5z",
            "0.5",
            "0.9.6",
            "0.960923",
            "1.0",
            "1.1dev1",
            "1.1_",
            "1.1a1",
            "1.1.0dev1",
            "1.1.a1",
            "1.1.0rc1",
            "1.1.0",
            "1.1.0post1",
            "1.1post1",
            "1996.07.12",
            "1!0.4.1",
            "1!3.1.1.6",
            "2!0.4.1",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) <= v(pair[1]), "{} <= {}", pair[0], pair[1]);
        }
        assert_eq!(v("0.4"), v("0.4.0"));
        assert_eq!(v("0.4.1.rc"), v("0.4.1.RC"));
        assert_eq!(v("1.1.0dev1"), v("1.1.dev1"));
        assert_eq!(v("1.1.0post1"), v("1.1.post1"));
    }

    #[test]
    fn openssl_convention() {
        assert!(v("1.0.1_") < v("1.0.1a"));
        assert!(v("1.0.1") > v("1.0.1a"));
    }

    #[test]
    fn dashes_become_underscores() {
        assert_eq!(v("1.2-3"), v("1.2_3"));
        assert!("1.2-3_4".parse::<VersionOrder>().is_err());
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "  ", "1..2", "a!1", "1!2!3", "1+2+3", "+1", "1.2$"] {
            assert!(bad.parse::<VersionOrder>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn starts_with() {
        assert!(v("1.2.3").starts_with(&v("1.2")));
        assert!(v("1.2").starts_with(&v("1.2")));
        assert!(!v("1.23").starts_with(&v("1.2")));
        assert!(v("1.2rc1").starts_with(&v("1.2r")));
        assert!(!v("1.3").starts_with(&v("1.2")));
        assert!(v("1.2+abc.1").starts_with(&v("1.2+abc")));
    }

    #[test]
    fn compatible_release() {
        assert!(v("2.2").is_compatible_with(&v("2.2")));
        assert!(v("2.9").is_compatible_with(&v("2.2")));
        assert!(!v("3.0").is_compatible_with(&v("2.2")));
        assert!(!v("2.1").is_compatible_with(&v("2.2")));
        assert!(v("1.4.7").is_compatible_with(&v("1.4.5")));
        assert!(!v("1.5").is_compatible_with(&v("1.4.5")));
    }

    #[test]
    fn equal_versions_hash_alike() {
        assert_eq!(hash_of(&v("1.1")), hash_of(&v("1.1.0")));
        assert_eq!(hash_of(&v("1.a")), hash_of(&v("1.0a")));
    }

    #[test]
    fn major_minor() {
        assert_eq!(v("3.10.4").major_minor().as_deref(), Some("3.10"));
        assert_eq!(v("3").major_minor(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize_checks_syntax() {
        let ok: VersionOrder = ron::de::from_str("\"1.2.3\"").unwrap();
        assert_eq!(ok, v("1.2.3"));
        assert!(ron::de::from_str::<VersionOrder>("\"1..2\"").is_err());
    }

    proptest! {

        #[test]
        fn total_order_is_consistent(a in testing::version_strategy(), b in testing::version_strategy()) {
            let (a, b) = (v(&a), v(&b));
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            if a == b {
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }
        }

        #[test]
        fn version_starts_with_itself(a in testing::version_strategy()) {
            let a = v(&a);
            prop_assert!(a.starts_with(&a));
        }

        #[test]
        fn trailing_zeros_are_ignored(a in testing::version_strategy()) {
            let padded = v(&format!("{a}.0"));
            let a = v(&a);
            prop_assert_eq!(&padded, &a);
            prop_assert_eq!(hash_of(&padded), hash_of(&a));
        }
    }
}
