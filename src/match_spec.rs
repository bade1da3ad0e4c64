// SPDX-License-Identifier: MPL-2.0

//! Match specs: queries selecting package records.
//!
//! The textual form is `[channel::]name[ version[ build]][[key=value, ...]]`,
//! for instance `conda-forge::numpy >=1.19,<2 py39*` or
//! `python[version='3.9.*', build_number=2]`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use version_order::{glob_match, Operator, VersionSpec};

use crate::{PackageRecord, SpecParseError};

/// Known platform subdirectory prefixes, used to split `channel/subdir::name`.
const PLATFORMS: [&str; 6] = ["linux-", "osx-", "win-", "emscripten-", "wasi-", "zos-"];

/// Constraint on the build number of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildNumberSpec {
    op: Operator,
    value: u64,
}

impl BuildNumberSpec {
    /// Whether `build_number` satisfies the constraint.
    pub fn matches(&self, build_number: u64) -> bool {
        match self.op {
            Operator::Ne => build_number != self.value,
            Operator::Lt => build_number < self.value,
            Operator::Le => build_number <= self.value,
            Operator::Gt => build_number > self.value,
            Operator::Ge => build_number >= self.value,
            _ => build_number == self.value,
        }
    }

    fn is_exact(&self) -> bool {
        self.op == Operator::Eq
    }
}

impl FromStr for BuildNumberSpec {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let s = s.trim();
        let (op, rest) = [
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ]
        .into_iter()
        .find_map(|(symbol, op)| s.strip_prefix(symbol).map(|rest| (op, rest)))
        .unwrap_or((Operator::Eq, s));
        let value = rest.parse().map_err(|_| ())?;
        Ok(Self { op, value })
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let symbol = match self.op {
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            _ => "",
        };
        write!(f, "{symbol}{}", self.value)
    }
}

/// A query over package records of a single name.
///
/// Besides matching constraints, a spec carries two solver hints: `optional`
/// specs only constrain a package if it ends up installed, and a `target`
/// names the installed record (by its `channel::name-version-build` string)
/// that the solver should prefer to keep.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    name: String,
    version: Option<VersionSpec>,
    build: Option<Box<str>>,
    build_number: Option<BuildNumberSpec>,
    channel: Option<String>,
    subdir: Option<String>,
    optional: bool,
    target: Option<Box<str>>,
}

impl MatchSpec {
    /// A spec matching every record of `name`.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            build: None,
            build_number: None,
            channel: None,
            subdir: None,
            optional: false,
            target: None,
        }
    }

    /// The exact spec of a record: its channel, subdir, version and build.
    pub fn exact(record: &PackageRecord) -> Self {
        Self {
            name: record.name.clone(),
            version: Some(VersionSpec::exactly(record.version.clone())),
            build: Some(record.build.as_str().into()),
            build_number: None,
            channel: Some(record.channel.clone()),
            subdir: (!record.subdir.is_empty()).then(|| record.subdir.clone()),
            optional: false,
            target: None,
        }
    }

    /// Sets the version constraint.
    pub fn with_version(mut self, version: Option<VersionSpec>) -> Self {
        self.version = version.filter(|v| !v.is_any());
        self
    }

    /// Sets the build string glob.
    pub fn with_build(mut self, build: Option<&str>) -> Self {
        self.build = build.filter(|b| *b != "*").map(Into::into);
        self
    }

    /// Requires exactly `build_number`, or clears the constraint.
    pub fn with_build_number(mut self, build_number: Option<u64>) -> Self {
        self.build_number = build_number.map(|value| BuildNumberSpec {
            op: Operator::Eq,
            value,
        });
        self
    }

    /// Marks the spec optional or mandatory.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Sets or clears the target record, given as a `dist_str`.
    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target.map(Into::into);
        self
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version constraint, if any.
    pub fn version(&self) -> Option<&VersionSpec> {
        self.version.as_ref()
    }

    /// The build string glob, if any.
    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// The channel constraint, if any.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Whether the spec only applies if the package is installed.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The `dist_str` of the record the solver should prefer, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether the spec constrains nothing but the name.
    pub fn is_name_only(&self) -> bool {
        self.version.is_none()
            && self.build.is_none()
            && self.build_number.is_none()
            && self.channel.is_none()
            && self.subdir.is_none()
    }

    /// How tightly the spec pins a package: 3 for an exact build, 2 for
    /// any other constraint, 1 for a bare name.
    pub fn strictness(&self) -> u8 {
        if self.build.as_deref().is_some_and(|b| !b.contains('*')) {
            3
        } else if self.is_name_only() {
            1
        } else {
            2
        }
    }

    /// Whether the spec pins exactly one artifact of its name.
    pub fn is_exact(&self) -> bool {
        self.version.as_ref().is_some_and(VersionSpec::is_exact) && self.strictness() == 3
            || self.build_number.is_some_and(|b| b.is_exact()) && self.strictness() == 3
    }

    /// The same spec without its optional flag and target: the query alone.
    pub fn query(&self) -> MatchSpec {
        Self {
            optional: false,
            target: None,
            ..self.clone()
        }
    }

    /// Whether `record` satisfies every constraint of this spec.
    pub fn matches(&self, record: &PackageRecord) -> bool {
        record.name == self.name
            && self
                .version
                .as_ref()
                .is_none_or(|v| v.matches(&record.version))
            && self
                .build
                .as_deref()
                .is_none_or(|b| glob_match(b, &record.build))
            && self
                .build_number
                .is_none_or(|b| b.matches(record.build_number))
            && self
                .channel
                .as_deref()
                .is_none_or(|c| c == record.channel)
            && self
                .subdir
                .as_deref()
                .is_none_or(|s| s == record.subdir)
    }
}

/// Splits a trailing build string off a version expression:
/// `>=1.0 , < 2.0 py34_0` gives `(">=1.0 , < 2.0", Some("py34_0"))`.
///
/// The build is the text after the last space or `=` that is not part of an
/// operator and whose remainder contains no operator characters.
fn split_version_build(text: &str) -> (&str, Option<&str>) {
    const OPERATOR_CHARS: [char; 7] = ['=', '!', '|', ',', '<', '>', '~'];
    let Some(i) = text.rfind([' ', '=']) else {
        return (text, None);
    };
    let (version, build) = (&text[..i], &text[i + 1..]);
    let build_ok = !build.is_empty()
        && !build.contains(['-', '=', ',', '|', '<', '>', '~', ' ']);
    let version_ok = version
        .chars()
        .last()
        .is_some_and(|c| !OPERATOR_CHARS.contains(&c));
    if build_ok && version_ok {
        (version, Some(build))
    } else {
        (text, None)
    }
}

/// Splits `key=value, key='value'` pairs, honoring quotes.
fn parse_brackets(text: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut pieces = Vec::new();
    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ',') => pieces.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quote.is_some() {
        return None;
    }
    pieces.push(current);
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (key, value) = piece.split_once('=').unwrap_or((piece, "true"));
        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
            .unwrap_or(value);
        if key.trim().is_empty() || value.is_empty() {
            return None;
        }
        pairs.push((key.trim().to_string(), value.to_string()));
    }
    Some(pairs)
}

fn split_channel(channel: &str) -> (String, Option<String>) {
    if let Some((base, last)) = channel.rsplit_once('/') {
        if last == "noarch" || PLATFORMS.iter().any(|p| last.starts_with(p)) {
            return (base.to_string(), Some(last.to_string()));
        }
    }
    (channel.to_string(), None)
}

impl FromStr for MatchSpec {
    type Err = SpecParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| SpecParseError::Invalid {
            spec: input.to_string(),
            reason,
        };
        let version_error = |source| SpecParseError::Version {
            spec: input.to_string(),
            source,
        };

        let mut text = input.split('#').next().unwrap_or_default().trim();
        if text.is_empty() {
            return Err(invalid("empty spec"));
        }

        let mut brackets = Vec::new();
        if let Some(stripped) = text.strip_suffix(']') {
            let open = stripped.find('[').ok_or_else(|| invalid("unbalanced brackets"))?;
            brackets = parse_brackets(&stripped[open + 1..])
                .ok_or_else(|| invalid("key-value mismatch in brackets"))?;
            text = stripped[..open].trim_end();
        }
        if text.contains(['[', ']']) {
            return Err(invalid("multiple bracket sections are not allowed"));
        }

        let (channel, text) = match text.rsplit_once("::") {
            Some((channel, rest)) => (Some(channel.trim()), rest.trim()),
            None => (None, text),
        };

        let name_end = text
            .find([' ', '=', '<', '>', '!', '~'])
            .unwrap_or(text.len());
        let name = &text[..name_end];
        if name.is_empty() {
            return Err(invalid("no package name found"));
        }
        let mut spec = MatchSpec::from_name(name);
        if let Some(channel) = channel.filter(|c| !c.is_empty()) {
            let (channel, subdir) = split_channel(channel);
            spec.channel = Some(channel);
            spec.subdir = subdir;
        }

        let mut version: Option<String> = None;
        let mut build: Option<String> = None;
        let rest = text[name_end..].trim();
        if !rest.is_empty() {
            let (v, b) = split_version_build(rest);
            let mut v: String = v.chars().filter(|c| !c.is_whitespace()).collect();
            if v == "=" || v == "==" {
                return Err(invalid("missing version"));
            }
            if let Some(test) = v.strip_prefix('=') {
                let unary = !test.contains(['=', ',', '|']);
                if let Some(exact) = test.strip_prefix('=').filter(|e| !e.contains(['=', ',', '|'])) {
                    if b.is_none() {
                        v = exact.to_string();
                    }
                } else if unary {
                    v = if b.is_none() && !test.ends_with('*') {
                        format!("{test}*")
                    } else {
                        test.to_string()
                    };
                }
            }
            version = Some(v);
            build = b.map(str::to_string);
        }

        for (key, value) in brackets {
            match key.as_str() {
                "version" => version = Some(value.chars().filter(|c| !c.is_whitespace()).collect()),
                "build" => build = Some(value),
                "build_number" => {
                    spec.build_number = Some(
                        value
                            .parse()
                            .map_err(|()| invalid("invalid build number"))?,
                    )
                }
                "channel" => {
                    let (channel, subdir) = split_channel(&value);
                    spec.channel = Some(channel);
                    if subdir.is_some() {
                        spec.subdir = subdir;
                    }
                }
                "subdir" => spec.subdir = Some(value),
                "optional" => {
                    spec.optional = match value.as_str() {
                        "true" | "True" | "1" => true,
                        "false" | "False" | "0" => false,
                        _ => return Err(invalid("optional must be true or false")),
                    }
                }
                "target" => spec.target = Some(value.into()),
                "name" => {}
                _ => return Err(invalid("unsupported bracket key")),
            }
        }

        if let Some(version) = version {
            let version: VersionSpec = version.parse().map_err(version_error)?;
            spec = spec.with_version(Some(version));
        }
        spec = spec.with_build(build.as_deref());
        Ok(spec)
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut extras: Vec<String> = Vec::new();
        match (&self.channel, &self.subdir) {
            (Some(channel), Some(subdir)) => write!(f, "{channel}/{subdir}::")?,
            (Some(channel), None) => write!(f, "{channel}::")?,
            (None, Some(subdir)) => extras.push(format!("subdir={subdir}")),
            (None, None) => {}
        }
        f.write_str(&self.name)?;
        match (&self.version, &self.build) {
            (Some(version), Some(build)) => write!(f, " {version} {build}")?,
            (Some(version), None) => write!(f, " {version}")?,
            (None, Some(build)) => write!(f, " * {build}")?,
            (None, None) => {}
        }
        if let Some(build_number) = &self.build_number {
            extras.push(format!("build_number='{build_number}'"));
        }
        if self.optional {
            extras.push("optional=true".to_string());
        }
        if let Some(target) = &self.target {
            extras.push(format!("target='{target}'"));
        }
        if !extras.is_empty() {
            write!(f, "[{}]", extras.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for MatchSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for MatchSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(s: &str) -> MatchSpec {
        s.parse().unwrap()
    }

    fn rec(name: &str, version: &str, build: &str) -> PackageRecord {
        PackageRecord::new(name, version, build).unwrap()
    }

    #[test]
    fn version_and_build_split() {
        assert_eq!(split_version_build("=1.2.3 0"), ("=1.2.3", Some("0")));
        assert_eq!(split_version_build("1.2.3=0"), ("1.2.3", Some("0")));
        assert_eq!(
            split_version_build(">=1.0 , < 2.0 py34_0"),
            (">=1.0 , < 2.0", Some("py34_0"))
        );
        assert_eq!(split_version_build("* openblas_0"), ("*", Some("openblas_0")));
        assert_eq!(split_version_build("==1.7"), ("==1.7", None));
        assert_eq!(split_version_build(">=1.8,<2"), (">=1.8,<2", None));
        assert_eq!(split_version_build("< 2.0"), ("< 2.0", None));
    }

    #[test]
    fn single_equals_is_a_prefix() {
        let spec = ms("numpy=1.2");
        assert!(spec.matches(&rec("numpy", "1.2.5", "0")));
        assert!(!spec.matches(&rec("numpy", "1.20", "0")));
        assert_eq!(spec, ms("numpy 1.2.*"));
    }

    #[test]
    fn double_equals_and_plain_versions_are_exact() {
        assert!(ms("numpy==1.2").matches(&rec("numpy", "1.2", "0")));
        assert!(!ms("numpy==1.2").matches(&rec("numpy", "1.2.5", "0")));
        assert!(!ms("numpy 1.2").matches(&rec("numpy", "1.2.5", "0")));
        let with_build = ms("numpy=1.2=py39_0");
        assert!(with_build.matches(&rec("numpy", "1.2", "py39_0")));
        assert!(!with_build.matches(&rec("numpy", "1.2.1", "py39_0")));
        assert_eq!(with_build.strictness(), 3);
    }

    #[test]
    fn build_globs_and_channels() {
        let spec = ms("conda-forge::numpy >=1.19 py39*");
        let r = rec("numpy", "1.20", "py39h1_0").with_channel("conda-forge");
        assert!(spec.matches(&r));
        assert!(!spec.matches(&r.clone().with_channel("defaults")));
        assert!(!spec.matches(&rec("numpy", "1.20", "py38h1_0").with_channel("conda-forge")));
        assert_eq!(spec.strictness(), 2);
    }

    #[test]
    fn channel_with_subdir() {
        let spec = ms("conda-forge/linux-64::numpy");
        assert_eq!(spec.channel(), Some("conda-forge"));
        assert_eq!(spec.to_string(), "conda-forge/linux-64::numpy");
    }

    #[test]
    fn bracket_keys() {
        let spec = ms("python[version='>=3.8,<3.10', build_number='>=2', optional=true]");
        assert!(spec.is_optional());
        assert!(spec.matches(&rec("python", "3.9.1", "h_0").with_build_number(3)));
        assert!(!spec.matches(&rec("python", "3.9.1", "h_0").with_build_number(1)));
        assert!(!spec.matches(&rec("python", "3.10", "h_0").with_build_number(3)));
        let targeted = ms("python[target='defaults::python-3.9.1-h_0']");
        assert_eq!(targeted.target(), Some("defaults::python-3.9.1-h_0"));
        assert!(targeted.is_name_only());
    }

    #[test]
    fn comments_and_stars() {
        let spec = ms("numpy * # the array library");
        assert!(spec.is_name_only());
        assert_eq!(spec.strictness(), 1);
        assert_eq!(ms("numpy * py39_0").build(), Some("py39_0"));
    }

    #[test]
    fn canonical_text_parses_back() {
        for text in [
            "numpy",
            "numpy >=1.19,<2",
            "numpy ==1.2 py39_0",
            "numpy 1.2.*",
            "numpy * py39*",
            "conda-forge::numpy ==1.20.1 py39_0",
            "numpy (==1.2|==1.3),<2",
            "numpy ==1.2|==1.3",
            "python[optional=true, target='defaults::python-3.9.1-h_0']",
            "python >=3[build_number='>=2']",
        ] {
            let spec = ms(text);
            assert_eq!(ms(&spec.to_string()), spec, "{text}");
        }
    }

    #[test]
    fn malformed_specs() {
        for bad in [
            "",
            "# only a comment",
            ">=1.2",
            "numpy==",
            "numpy >=",
            "numpy[version=]",
            "numpy[foo=1]",
            "numpy >=1.2,<",
        ] {
            assert!(bad.parse::<MatchSpec>().is_err(), "{bad:?} should not parse");
        }
    }
}
