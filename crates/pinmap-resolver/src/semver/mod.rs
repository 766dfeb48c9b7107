//! Version selection over installed packages
//!
//! The registry answers "latest in range" lookups itself; this module picks
//! among versions already present in the lock, which is what the dedup
//! heuristic and best-match lookups need.

use std::collections::BTreeSet;

use pinmap_core::types::{Version, VersionRange};

/// Version selector for finding best matching versions
#[derive(Debug, Clone, Default)]
pub struct VersionSelector {
    /// Available versions, ascending
    available_versions: BTreeSet<Version>,
}

impl VersionSelector {
    pub fn new(versions: impl IntoIterator<Item = Version>) -> Self {
        Self {
            available_versions: versions.into_iter().collect(),
        }
    }

    /// Highest version admitted by any of `ranges`
    pub fn select_best(&self, ranges: &[VersionRange], unstable: bool) -> Option<&Version> {
        self.available_versions
            .iter()
            .rev()
            .find(|version| matches_any(ranges, version, unstable))
    }

    /// Versions admitted by any of `ranges`, ascending
    pub fn find_matching(&self, ranges: &[VersionRange], unstable: bool) -> Vec<&Version> {
        self.available_versions
            .iter()
            .filter(|version| matches_any(ranges, version, unstable))
            .collect()
    }
}

/// A target's ranges are alternatives: one match is enough
pub fn matches_any(ranges: &[VersionRange], version: &Version, unstable: bool) -> bool {
    ranges.iter().any(|range| range.has(version, unstable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn v(version: &str) -> Version {
        Version::from_str(version).unwrap()
    }

    fn ranges(input: &str) -> Vec<VersionRange> {
        VersionRange::parse_list(input).unwrap()
    }

    fn create_selector() -> VersionSelector {
        VersionSelector::new(
            ["1.0.0", "1.1.0", "1.2.0", "2.0.0-alpha.1", "2.0.0", "2.1.0"]
                .into_iter()
                .map(v),
        )
    }

    #[test]
    fn test_select_best() {
        let selector = create_selector();
        assert_eq!(selector.select_best(&ranges("^1.0.0"), false), Some(&v("1.2.0")));
        assert_eq!(selector.select_best(&ranges("~1.1.0"), false), Some(&v("1.1.0")));
        assert_eq!(selector.select_best(&ranges("^3.0.0"), false), None);
    }

    #[test]
    fn test_alternatives() {
        let selector = create_selector();
        assert_eq!(selector.select_best(&ranges("^1.0.0 || ^2.0.0"), false), Some(&v("2.1.0")));
    }

    #[test]
    fn test_prereleases() {
        let selector = VersionSelector::new([v("1.0.0"), v("2.0.0-beta.1")]);
        assert_eq!(selector.select_best(&ranges("*"), false), Some(&v("1.0.0")));
        assert_eq!(selector.select_best(&ranges("*"), true), Some(&v("2.0.0-beta.1")));
    }

    #[test]
    fn test_find_matching() {
        let selector = create_selector();
        assert_eq!(selector.find_matching(&ranges("^2.0.0"), false), vec![&v("2.0.0"), &v("2.1.0")]);
        assert_eq!(
            selector.find_matching(&ranges("~1.1.0 || ^2.1.0"), false),
            vec![&v("1.1.0"), &v("2.1.0")]
        );
        assert!(selector.find_matching(&ranges("^3"), false).is_empty());
    }
}
