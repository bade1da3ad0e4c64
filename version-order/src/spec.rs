// SPDX-License-Identifier: MPL-2.0

//! Version spec expressions: `>=1.19,<2|1.16.*`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::{glob_match, VersionOrder, VersionParseError};

/// Boolean connective of a [VersionSpec::Group].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    /// `,`: every member must match.
    And,
    /// `|`: at least one member must match.
    Or,
}

impl Logic {
    fn symbol(self) -> char {
        match self {
            Logic::And => ',',
            Logic::Or => '|',
        }
    }
}

/// Relation between a candidate version and the version written in a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `==1.2`, or a plain `1.2`.
    Eq,
    /// `!=1.2`
    Ne,
    /// `<1.2`
    Lt,
    /// `<=1.2`
    Le,
    /// `>1.2`
    Gt,
    /// `>=1.2`
    Ge,
    /// `1.2.*`, `1.2*` or `=1.2`.
    StartsWith,
    /// `!=1.2.*`
    NotStartsWith,
    /// `~=1.2`: compatible release.
    Compatible,
}

impl Operator {
    /// Applies the relation `candidate <op> reference`.
    pub fn apply(self, candidate: &VersionOrder, reference: &VersionOrder) -> bool {
        match self {
            Operator::Eq => candidate == reference,
            Operator::Ne => candidate != reference,
            Operator::Lt => candidate < reference,
            Operator::Le => candidate <= reference,
            Operator::Gt => candidate > reference,
            Operator::Ge => candidate >= reference,
            Operator::StartsWith => candidate.starts_with(reference),
            Operator::NotStartsWith => !candidate.starts_with(reference),
            Operator::Compatible => candidate.is_compatible_with(reference),
        }
    }

    fn split(spec: &str) -> Option<(Self, &str)> {
        const OPERATORS: [(&str, Operator); 8] = [
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("~=", Operator::Compatible),
            ("<", Operator::Lt),
            (">", Operator::Gt),
            ("=", Operator::StartsWith),
        ];
        OPERATORS
            .iter()
            .find_map(|&(symbol, op)| spec.strip_prefix(symbol).map(|rest| (op, rest)))
    }
}

/// A parsed version spec.
///
/// The grammar is the conda one: atoms such as `1.2`, `==1.2`, `>=1.2`,
/// `1.2.*`, `1.*.3` or `*`, joined with `,` (and) and `|` (or), with
/// parentheses for grouping. `,` binds tighter than `|`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// `*`: every version.
    Any,
    /// A literal that is compared as a string, used for specs containing `@`.
    Exact(Box<str>),
    /// A pattern with inner `*` wildcards, matched against the version text.
    Glob(Box<str>),
    /// A relation to a single version.
    Range(Operator, VersionOrder),
    /// A conjunction or disjunction of specs.
    Group(Logic, Vec<VersionSpec>),
}

impl VersionSpec {
    /// Whether `version` satisfies this spec.
    pub fn matches(&self, version: &VersionOrder) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Exact(literal) => version.as_str() == &**literal,
            VersionSpec::Glob(pattern) => glob_match(pattern, version.as_str()),
            VersionSpec::Range(op, reference) => op.apply(version, reference),
            VersionSpec::Group(Logic::And, specs) => specs.iter().all(|s| s.matches(version)),
            VersionSpec::Group(Logic::Or, specs) => specs.iter().any(|s| s.matches(version)),
        }
    }

    /// Whether this spec pins a single version.
    pub fn is_exact(&self) -> bool {
        matches!(
            self,
            VersionSpec::Exact(_) | VersionSpec::Range(Operator::Eq, _)
        )
    }

    /// Whether this spec accepts every version.
    pub fn is_any(&self) -> bool {
        matches!(self, VersionSpec::Any)
    }

    /// The version spec pinning exactly `version`.
    pub fn exactly(version: VersionOrder) -> Self {
        VersionSpec::Range(Operator::Eq, version)
    }

    fn parse_atom(atom: &str) -> Result<Self, VersionParseError> {
        let invalid = |reason: &str| VersionParseError::InvalidSpec {
            spec: atom.to_string(),
            reason: reason.to_string(),
        };
        let atom = atom.trim();
        if atom.is_empty() {
            return Err(invalid("empty version spec"));
        }
        if atom.starts_with('^') || atom.ends_with('$') {
            return Err(invalid("regular expression version specs are not supported"));
        }
        if atom.starts_with(['=', '<', '>', '!', '~']) {
            let (mut op, mut version) = Operator::split(atom).ok_or_else(|| invalid("invalid operator"))?;
            if version.is_empty()
                || version.starts_with(['=', '<', '>', '!', '~'])
                || version.contains(char::is_whitespace)
            {
                return Err(invalid("invalid operator"));
            }
            if let Some(stem) = version.strip_suffix(".*") {
                match op {
                    Operator::Ne => op = Operator::NotStartsWith,
                    Operator::Compatible => return Err(invalid("invalid operator with '.*'")),
                    _ => {}
                }
                version = stem;
            }
            return Ok(VersionSpec::Range(op, version.parse()?));
        }
        if atom == "*" {
            return Ok(VersionSpec::Any);
        }
        let stem = atom.trim_end_matches('*');
        if stem.contains('*') {
            return Ok(VersionSpec::Glob(atom.into()));
        }
        if stem.len() < atom.len() {
            let version = stem.trim_end_matches('.');
            return Ok(VersionSpec::Range(Operator::StartsWith, version.parse()?));
        }
        if atom.contains('@') {
            return Ok(VersionSpec::Exact(atom.into()));
        }
        Ok(VersionSpec::Range(Operator::Eq, atom.parse()?))
    }

    fn from_tree(tree: Tree<'_>) -> Result<Self, VersionParseError> {
        match tree {
            Tree::Leaf(atom) => Self::parse_atom(atom),
            Tree::Node(logic, children) => Ok(VersionSpec::Group(
                logic,
                children
                    .into_iter()
                    .map(Self::from_tree)
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    fn fmt_nested(&self, f: &mut Formatter<'_>, in_and: bool, depth: usize) -> fmt::Result {
        let VersionSpec::Group(logic, specs) = self else {
            return write!(f, "{self}");
        };
        let parenthesize = match logic {
            Logic::Or => in_and || depth > 0,
            Logic::And => depth > 0,
        };
        if parenthesize {
            f.write_str("(")?;
        }
        for (i, spec) in specs.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", logic.symbol())?;
            }
            spec.fmt_nested(f, *logic == Logic::And, depth + 1)?;
        }
        if parenthesize {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => f.write_str("*"),
            VersionSpec::Exact(text) | VersionSpec::Glob(text) => f.write_str(text),
            VersionSpec::Range(op, version) => match op {
                Operator::Eq => write!(f, "=={version}"),
                Operator::Ne => write!(f, "!={version}"),
                Operator::Lt => write!(f, "<{version}"),
                Operator::Le => write!(f, "<={version}"),
                Operator::Gt => write!(f, ">{version}"),
                Operator::Ge => write!(f, ">={version}"),
                Operator::StartsWith => write!(f, "{version}.*"),
                Operator::NotStartsWith => write!(f, "!={version}.*"),
                Operator::Compatible => write!(f, "~={version}"),
            },
            VersionSpec::Group(..) => self.fmt_nested(f, false, 0),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = VersionParseError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        if spec.contains(['(', ')', '|', ',']) {
            Self::from_tree(treeify(spec)?)
        } else {
            Self::parse_atom(spec)
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for VersionSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for VersionSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Expression tree of a spec string, before its atoms are parsed.
#[derive(Debug, PartialEq)]
enum Tree<'a> {
    Leaf(&'a str),
    Node(Logic, Vec<Tree<'a>>),
}

/// Shunting-yard over `(`, `)`, `|` and `,`, fusing nested nodes that share
/// an operator so that `a|b|c` is one three-way node.
fn treeify(spec: &str) -> Result<Tree<'_>, VersionParseError> {
    let invalid = |reason: &str| VersionParseError::InvalidSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };
    let mut output: Vec<Tree<'_>> = Vec::new();
    let mut stack: Vec<char> = vec!['('];

    let mut rest = spec;
    loop {
        let rest_trimmed = rest.trim_start();
        let Some(first) = rest_trimmed.chars().next() else {
            break;
        };
        match first {
            '|' => {
                apply_ops(&['('], &mut stack, &mut output).map_err(invalid)?;
                stack.push('|');
                rest = &rest_trimmed[1..];
            }
            ',' => {
                apply_ops(&['|', '('], &mut stack, &mut output).map_err(invalid)?;
                stack.push(',');
                rest = &rest_trimmed[1..];
            }
            '(' => {
                stack.push('(');
                rest = &rest_trimmed[1..];
            }
            ')' => {
                apply_ops(&['('], &mut stack, &mut output).map_err(invalid)?;
                if stack.pop() != Some('(') || stack.is_empty() {
                    return Err(invalid("unbalanced parentheses"));
                }
                rest = &rest_trimmed[1..];
            }
            _ => {
                let end = rest_trimmed
                    .find(['(', ')', '|', ','])
                    .unwrap_or(rest_trimmed.len());
                output.push(Tree::Leaf(rest_trimmed[..end].trim()));
                rest = &rest_trimmed[end..];
            }
        }
    }
    apply_ops(&['('], &mut stack, &mut output).map_err(invalid)?;
    if stack.pop() != Some('(') || !stack.is_empty() {
        return Err(invalid("unbalanced parentheses"));
    }
    match (output.pop(), output.is_empty()) {
        (Some(tree), true) => Ok(tree),
        _ => Err(invalid("unable to determine version from spec")),
    }
}

/// Pops operators until one of `stops` is on top, joining the operands.
fn apply_ops<'a>(
    stops: &[char],
    stack: &mut Vec<char>,
    output: &mut Vec<Tree<'a>>,
) -> Result<(), &'static str> {
    while let Some(&top) = stack.last() {
        if stops.contains(&top) {
            break;
        }
        stack.pop();
        let (Some(right), Some(left)) = (output.pop(), output.pop()) else {
            return Err("cannot join single expression");
        };
        let logic = if top == '|' { Logic::Or } else { Logic::And };
        let flatten = |tree: Tree<'a>| -> Vec<Tree<'a>> {
            match tree {
                Tree::Node(l, children) if l == logic => children,
                other => vec![other],
            }
        };
        let mut joined = flatten(left);
        joined.extend(flatten(right));
        output.push(Tree::Node(logic, joined));
    }
    Ok(())
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionOrder {
        s.parse().unwrap()
    }

    fn spec(s: &str) -> VersionSpec {
        s.parse().unwrap()
    }

    #[test]
    fn treeify_precedence() {
        assert_eq!(treeify("1.2.3").unwrap(), Tree::Leaf("1.2.3"));
        assert_eq!(
            treeify("1.2.3,4.5.6|<=7.8.9").unwrap(),
            Tree::Node(
                Logic::Or,
                vec![
                    Tree::Node(Logic::And, vec![Tree::Leaf("1.2.3"), Tree::Leaf("4.5.6")]),
                    Tree::Leaf("<=7.8.9"),
                ]
            )
        );
        assert_eq!(
            treeify("((1.5|((1.6|1.7), 1.8), 1.9 |2.0))|2.1").unwrap(),
            treeify("1.5|(1.6|1.7),1.8,1.9|2.0|2.1").unwrap(),
        );
    }

    #[test]
    fn renders_canonically() {
        assert_eq!(spec("1.2.3,>4.5.6").to_string(), "==1.2.3,>4.5.6");
        assert_eq!(spec("(1.2.3|4.5.6),<=7.8.9").to_string(), "(==1.2.3|==4.5.6),<=7.8.9");
        assert_eq!(
            spec("1.5|(1.6|1.7),1.8,1.9|2.0").to_string(),
            "==1.5|((==1.6|==1.7),==1.8,==1.9)|==2.0"
        );
        assert_eq!(spec("1.8*").to_string(), "1.8.*");
        assert_eq!(spec("=1.8").to_string(), "1.8.*");
        assert_eq!(spec("!=1.8.*").to_string(), "!=1.8.*");
    }

    #[test]
    fn operators() {
        assert!(spec(">=1.19").matches(&v("1.20")));
        assert!(!spec(">=1.19").matches(&v("1.18.5")));
        assert!(spec("<2").matches(&v("1.99")));
        assert!(spec("!=1.7").matches(&v("1.7.1")));
        assert!(!spec("!=1.7").matches(&v("1.7.0")));
        assert!(spec("~=1.4.5").matches(&v("1.4.9")));
        assert!(!spec("~=1.4.5").matches(&v("1.5")));
        assert!(spec("1.7").matches(&v("1.7.0")));
        assert!(!spec("1.7").matches(&v("1.7.1")));
    }

    #[test]
    fn wildcards() {
        assert!(spec("*").matches(&v("0.0.1")));
        assert!(spec("1.7*").matches(&v("1.7.1")));
        assert!(spec("1.7.*").matches(&v("1.7")));
        assert!(!spec("1.7.*").matches(&v("1.70")));
        assert!(spec(">=1.7.*").matches(&v("1.8")));
        assert!(!spec("!=1.7.*").matches(&v("1.7.3")));
        assert!(spec("!=1.7.*").matches(&v("1.8")));
        assert!(spec("1.*.3").matches(&v("1.22.3")));
        assert!(!spec("1.*.3").matches(&v("1.22.4")));
    }

    #[test]
    fn exact_literal_only_matches_itself() {
        let literal = spec("1.2@never");
        assert!(literal.is_exact());
        assert!(!literal.matches(&v("1.2")));
    }

    #[test]
    fn groups() {
        let s = spec(">=1.19,<2|1.16.*");
        assert!(s.matches(&v("1.19")));
        assert!(s.matches(&v("1.16.2")));
        assert!(!s.matches(&v("2.0")));
        assert!(!s.matches(&v("1.17")));
    }

    #[test]
    fn malformed_specs() {
        for bad in ["", ">=", "<>1.2", ">= 1.2", "(1.2", "1.2)", "1.2,", "~=1.2.*", "^1.2$", "|"] {
            assert!(bad.parse::<VersionSpec>().is_err(), "{bad:?} should not parse");
        }
    }
}
