// SPDX-License-Identifier: MPL-2.0

//! Proptest strategies for versions and version specs.

use proptest::prelude::*;

/// A strategy for version strings in proptests.
///
/// Generates dotted versions from one to four components, each a number or a
/// number followed by one of a few pre-release or post-release tags, with an
/// occasional epoch.
pub fn version_strategy() -> impl Strategy<Value = String> {
    let component = (0u32..20, prop::option::weighted(0.2, tag_strategy()))
        .prop_map(|(n, tag)| format!("{n}{}", tag.unwrap_or_default()));
    (
        prop::option::weighted(0.1, 1u32..3),
        prop::collection::vec(component, 1..4),
    )
        .prop_map(|(epoch, components)| {
            let version = components.join(".");
            match epoch {
                Some(epoch) => format!("{epoch}!{version}"),
                None => version,
            }
        })
}

fn tag_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(vec!["dev", "a", "b", "rc", "post"]), 0u32..4)
        .prop_map(|(tag, n)| format!("{tag}{n}"))
}

/// A strategy for version spec strings in proptests.
///
/// Each spec is a disjunction of up to two conjunctions of up to two
/// relational or wildcard atoms over [version_strategy] versions.
pub fn version_spec_strategy() -> impl Strategy<Value = String> {
    let atom = (
        prop::sample::select(vec!["", "==", "!=", "<", "<=", ">", ">=", "="]),
        version_strategy(),
        any::<bool>(),
    )
        .prop_map(|(op, version, wildcard)| {
            if wildcard && op.is_empty() {
                format!("{version}.*")
            } else {
                format!("{op}{version}")
            }
        });
    let conjunction = prop::collection::vec(atom, 1..3).prop_map(|atoms| atoms.join(","));
    prop::collection::vec(conjunction, 1..3).prop_map(|terms| terms.join("|"))
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{VersionOrder, VersionSpec};

    proptest! {
        #[test]
        fn generated_versions_parse(version in version_strategy()) {
            prop_assert!(version.parse::<VersionOrder>().is_ok());
        }

        #[test]
        fn generated_specs_survive_rendering(spec in version_spec_strategy(), version in version_strategy()) {
            let parsed: VersionSpec = spec.parse().unwrap();
            let reparsed: VersionSpec = parsed.to_string().parse().unwrap();
            let version: VersionOrder = version.parse().unwrap();
            prop_assert_eq!(parsed.matches(&version), reparsed.matches(&version));
        }
    }
}
