//! Semantic version and version range types.
//!
//! Ranges are reduced to the shapes a CDN lookup can answer directly:
//! latest, a dist-tag, an exact version, the newest release in a major line,
//! or the newest patch in a minor line.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Semantic version (major.minor.patch-prerelease+build)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

/// Partial version for ranges (may have missing components)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialVersion {
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub prerelease: Option<String>,
}

/// A single version range, reduced to a lookup shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRange {
    /// `*`, `""`, `latest`, `>=x` with no upper bound
    Wildcard,
    /// A dist-tag such as `next` or `beta`
    Tag(String),
    /// A single pinned version
    Exact(Version),
    /// Any version in a major line at or above the lower bound (`^1.2.3`, `1.x`)
    Major(PartialVersion),
    /// Any version in a minor line at or above the lower bound (`~1.2.3`, `1.2`)
    Stable(PartialVersion),
}

/// What a registry lookup has to answer for a range
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Latest,
    Tag(String),
    Major(u64),
    Minor(u64, u64),
}

/// Version parsing and validation errors
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Invalid version format: {input}")]
    InvalidFormat { input: String },

    #[error("Invalid number in version: {component}")]
    InvalidNumber { component: String },

    #[error("Invalid version range: {input}")]
    InvalidRange { input: String },
}

impl Version {
    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Get the precedence for comparison (ignores build metadata)
    fn precedence_cmp(&self, other: &Self) -> Ordering {
        match (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch)) {
            Ordering::Equal => match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            },
            other => other,
        }
    }
}

/// Compare dot-separated prerelease identifiers, numeric parts numerically
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            },
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let input = input.strip_prefix('v').unwrap_or(input);

        // Split on '+' for build metadata
        let (version_part, build) = match input.split_once('+') {
            Some((v, b)) => (v, Some(b.to_string())),
            None => (input, None),
        };

        // Split on '-' for prerelease
        let (core_part, prerelease) = match version_part.split_once('-') {
            Some((c, p)) => (c, Some(p.to_string())),
            None => (version_part, None),
        };

        let parts: Vec<&str> = core_part.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::InvalidFormat {
                input: input.to_string(),
            });
        }

        let major = parse_number(parts[0])?;
        let minor = parse_number(parts[1])?;
        let patch = parse_number(parts[2])?;

        Ok(Version {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

fn parse_number(component: &str) -> Result<u64, VersionError> {
    component.parse().map_err(|_| VersionError::InvalidNumber {
        component: component.to_string(),
    })
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;

        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }

        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }

        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence_cmp(other)
    }
}

impl PartialVersion {
    /// Parse `1`, `1.2`, `1.2.3`, `1.x`, `1.2.*`, `1.2.3-beta`
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let input = input.trim();
        let input = input.strip_prefix('v').unwrap_or(input);
        let invalid = || VersionError::InvalidRange {
            input: input.to_string(),
        };

        let without_build = input.split_once('+').map_or(input, |(v, _)| v);
        let (core_part, prerelease) = match without_build.split_once('-') {
            Some((c, p)) => (c, Some(p.to_string())),
            None => (without_build, None),
        };

        let mut parts = core_part.split('.');
        let major = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let major = parse_number(major).map_err(|_| invalid())?;

        let mut rest = Vec::new();
        for part in parts {
            if is_wildcard_component(part) {
                break;
            }
            rest.push(parse_number(part).map_err(|_| invalid())?);
        }
        if rest.len() > 2 {
            return Err(invalid());
        }

        Ok(PartialVersion {
            major,
            minor: rest.first().copied(),
            patch: rest.get(1).copied(),
            prerelease,
        })
    }

    /// Convert to a full version (filling missing parts with 0)
    pub fn to_version(&self) -> Version {
        Version {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            prerelease: self.prerelease.clone(),
            build: None,
        }
    }

    /// Check tilde match (~1.2.3 allows >=1.2.3 <1.3.0)
    fn matches_tilde(&self, version: &Version) -> bool {
        if version.major != self.major {
            return false;
        }

        match self.minor {
            Some(minor) => version.minor == minor && version >= &self.to_version(),
            None => true,
        }
    }

    /// Check caret match (^1.2.3 allows >=1.2.3 <2.0.0)
    fn matches_caret(&self, version: &Version) -> bool {
        if version.major != self.major {
            return false;
        }

        version >= &self.to_version()
    }
}

impl fmt::Display for PartialVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
        }
        if let Some(patch) = self.patch {
            write!(f, ".{}", patch)?;
        }
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

fn is_wildcard_component(part: &str) -> bool {
    matches!(part, "x" | "X" | "*" | "")
}

impl VersionRange {
    /// Parse a single range (no `||`)
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let input = input.trim();

        if matches!(input, "" | "*" | "x" | "X" | "latest") {
            return Ok(VersionRange::Wildcard);
        }

        if let Some(stripped) = input.strip_prefix('^') {
            let version = PartialVersion::parse(stripped)?;
            // ^0.x only admits patch updates within its minor line
            if version.major == 0 && version.minor.is_some() {
                return Ok(VersionRange::Stable(version));
            }
            return Ok(VersionRange::Major(version));
        }

        if let Some(stripped) = input.strip_prefix('~') {
            let stripped = stripped.strip_prefix('>').unwrap_or(stripped);
            let version = PartialVersion::parse(stripped)?;
            if version.minor.is_none() {
                return Ok(VersionRange::Major(version));
            }
            return Ok(VersionRange::Stable(version));
        }

        if let Some(stripped) = input.strip_prefix(">=") {
            return Self::parse_lower_bounded(input, stripped);
        }

        let unprefixed = input.strip_prefix('=').unwrap_or(input).trim();
        if unprefixed.starts_with(|c: char| c.is_ascii_digit())
            || (unprefixed.starts_with('v') && unprefixed[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            let version = PartialVersion::parse(unprefixed)?;
            return Ok(match (version.minor, version.patch) {
                (Some(_), Some(_)) => VersionRange::Exact(Version::from_str(unprefixed)?),
                (Some(_), None) => VersionRange::Stable(version),
                _ => VersionRange::Major(version),
            });
        }

        if is_tag(input) {
            return Ok(VersionRange::Tag(input.to_string()));
        }

        Err(VersionError::InvalidRange {
            input: input.to_string(),
        })
    }

    /// `>=a` (open) or `>=a <b` where `b` closes the major or minor line of `a`
    fn parse_lower_bounded(input: &str, stripped: &str) -> Result<Self, VersionError> {
        let mut parts = stripped.split_whitespace();
        let lower = parts.next().ok_or_else(|| VersionError::InvalidRange {
            input: input.to_string(),
        })?;
        let lower = PartialVersion::parse(lower)?;

        let upper = match parts.next() {
            None => return Ok(VersionRange::Wildcard),
            Some(upper) => upper.strip_prefix('<').ok_or_else(|| VersionError::InvalidRange {
                input: input.to_string(),
            })?,
        };
        let upper = PartialVersion::parse(upper)?.to_version();

        if upper == Version::new(lower.major + 1, 0, 0) {
            return Ok(VersionRange::Major(lower));
        }
        if upper == Version::new(lower.major, lower.minor.unwrap_or(0) + 1, 0) {
            return Ok(VersionRange::Stable(PartialVersion {
                minor: Some(lower.minor.unwrap_or(0)),
                ..lower
            }));
        }
        Err(VersionError::InvalidRange {
            input: input.to_string(),
        })
    }

    /// Parse a `||`-separated list, returned most-specific-first
    pub fn parse_list(input: &str) -> Result<Vec<Self>, VersionError> {
        let mut ranges = input
            .split("||")
            .map(VersionRange::parse)
            .collect::<Result<Vec<_>, _>>()?;
        ranges.reverse();
        Ok(ranges)
    }

    /// Check whether a version falls in this range.
    ///
    /// Prereleases only match exact ranges, ranges that name a prerelease on
    /// the same release line, or when `unstable` is set.
    pub fn has(&self, version: &Version, unstable: bool) -> bool {
        match self {
            VersionRange::Wildcard => unstable || !version.is_prerelease(),
            VersionRange::Tag(_) => false,
            VersionRange::Exact(exact) => exact == version,
            VersionRange::Major(lower) => {
                allows_prerelease(lower, version, unstable) && lower.matches_caret(version)
            },
            VersionRange::Stable(lower) => {
                allows_prerelease(lower, version, unstable) && lower.matches_tilde(version)
            },
        }
    }

    /// The registry lookup that answers this range; `None` for exact versions
    pub fn lookup_kind(&self) -> Option<LookupKind> {
        match self {
            VersionRange::Wildcard => Some(LookupKind::Latest),
            VersionRange::Tag(tag) => Some(LookupKind::Tag(tag.clone())),
            VersionRange::Exact(_) => None,
            VersionRange::Major(lower) => Some(LookupKind::Major(lower.major)),
            VersionRange::Stable(lower) => {
                Some(LookupKind::Minor(lower.major, lower.minor.unwrap_or(0)))
            },
        }
    }
}

fn allows_prerelease(lower: &PartialVersion, version: &Version, unstable: bool) -> bool {
    if unstable || !version.is_prerelease() {
        return true;
    }
    lower.prerelease.is_some()
        && lower.major == version.major
        && lower.minor.unwrap_or(0) == version.minor
        && lower.patch.unwrap_or(0) == version.patch
}

fn is_tag(input: &str) -> bool {
    input.starts_with(|c: char| c.is_ascii_alphabetic())
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Wildcard => write!(f, "*"),
            VersionRange::Tag(tag) => write!(f, "{}", tag),
            VersionRange::Exact(version) => write!(f, "{}", version),
            VersionRange::Major(lower) if lower.minor.is_none() => write!(f, "{}", lower.major),
            VersionRange::Major(lower) => write!(f, "^{}", lower),
            VersionRange::Stable(lower) if lower.patch.is_none() && lower.prerelease.is_none() => {
                write!(f, "{}.{}", lower.major, lower.minor.unwrap_or(0))
            },
            VersionRange::Stable(lower) => write!(f, "~{}", lower),
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::Latest => Ok(()),
            LookupKind::Tag(tag) => write!(f, "{}", tag),
            LookupKind::Major(major) => write!(f, "{}", major),
            LookupKind::Minor(major, minor) => write!(f, "{}.{}", major, minor),
        }
    }
}

/// Render a most-specific-first range list back in declaration order
pub fn format_ranges(ranges: &[VersionRange]) -> String {
    ranges
        .iter()
        .rev()
        .map(|range| range.to_string())
        .collect::<Vec<_>>()
        .join(" || ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = Version::from_str("1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));

        let v = Version::from_str("1.2.3-alpha.1+build.5").unwrap();
        assert_eq!(v.prerelease, Some("alpha.1".to_string()));
        assert_eq!(v.build, Some("build.5".to_string()));

        assert!(Version::from_str("1.2").is_err());
    }

    #[test]
    fn test_prerelease_ordering() {
        let alpha2 = Version::from_str("1.0.0-alpha.2").unwrap();
        let alpha10 = Version::from_str("1.0.0-alpha.10").unwrap();
        let release = Version::new(1, 0, 0);

        assert!(alpha2 < alpha10);
        assert!(alpha10 < release);
    }

    #[test]
    fn test_range_shapes() {
        assert_eq!(VersionRange::parse("*").unwrap(), VersionRange::Wildcard);
        assert_eq!(VersionRange::parse("").unwrap(), VersionRange::Wildcard);
        assert_eq!(
            VersionRange::parse("next").unwrap(),
            VersionRange::Tag("next".to_string())
        );
        assert_eq!(
            VersionRange::parse("1.2.3").unwrap(),
            VersionRange::Exact(Version::new(1, 2, 3))
        );
        assert!(matches!(VersionRange::parse("^1.0.0").unwrap(), VersionRange::Major(_)));
        assert!(matches!(VersionRange::parse("1.x").unwrap(), VersionRange::Major(_)));
        assert!(matches!(VersionRange::parse("~1.2.0").unwrap(), VersionRange::Stable(_)));
        assert!(matches!(VersionRange::parse("1.2").unwrap(), VersionRange::Stable(_)));
        assert!(matches!(VersionRange::parse("^0.4.1").unwrap(), VersionRange::Stable(_)));
        assert_eq!(VersionRange::parse(">=2.0.0").unwrap(), VersionRange::Wildcard);
        assert!(matches!(
            VersionRange::parse(">=1.2.0 <2.0.0").unwrap(),
            VersionRange::Major(_)
        ));
        assert!(VersionRange::parse(">=1.2.0 <4.0.0").is_err());
        assert!(VersionRange::parse("%%").is_err());
    }

    #[test]
    fn test_range_list_is_most_specific_first() {
        let ranges = VersionRange::parse_list("^1.0.0 || ^2.0.0").unwrap();
        assert_eq!(ranges[0].lookup_kind(), Some(LookupKind::Major(2)));
        assert_eq!(ranges[1].lookup_kind(), Some(LookupKind::Major(1)));
        assert_eq!(format_ranges(&ranges), "^1.0.0 || ^2.0.0");
    }

    #[test]
    fn test_range_has() {
        let caret = VersionRange::parse("^1.2.3").unwrap();
        assert!(caret.has(&Version::new(1, 2, 3), false));
        assert!(caret.has(&Version::new(1, 9, 0), false));
        assert!(!caret.has(&Version::new(2, 0, 0), false));
        assert!(!caret.has(&Version::new(1, 2, 2), false));
        assert!(!caret.has(&Version::from_str("1.3.0-beta.1").unwrap(), false));
        assert!(caret.has(&Version::from_str("1.3.0-beta.1").unwrap(), true));

        let tilde = VersionRange::parse("~1.2.3").unwrap();
        assert!(tilde.has(&Version::new(1, 2, 9), false));
        assert!(!tilde.has(&Version::new(1, 3, 0), false));

        let pre = VersionRange::parse("^2.0.0-rc.1").unwrap();
        assert!(pre.has(&Version::from_str("2.0.0-rc.2").unwrap(), false));

        assert!(!VersionRange::Tag("beta".to_string()).has(&Version::new(1, 0, 0), false));
    }

    #[test]
    fn test_lookup_kinds() {
        assert_eq!(VersionRange::parse("*").unwrap().lookup_kind(), Some(LookupKind::Latest));
        assert_eq!(VersionRange::parse("1.2.3").unwrap().lookup_kind(), None);
        assert_eq!(
            VersionRange::parse("~1.4.2").unwrap().lookup_kind(),
            Some(LookupKind::Minor(1, 4))
        );
        assert_eq!(LookupKind::Minor(1, 4).to_string(), "1.4");
        assert_eq!(LookupKind::Latest.to_string(), "");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn version_round_trip(
            major in 0u64..1000,
            minor in 0u64..1000,
            patch in 0u64..1000,
            prerelease in prop::option::of("[a-z][a-z0-9]{0,6}(\\.[0-9]{1,3})?"),
        ) {
            let original = Version { major, minor, patch, prerelease, build: None };
            let parsed = Version::from_str(&original.to_string()).unwrap();
            prop_assert_eq!(parsed, original);
        }

        #[test]
        fn range_display_reparses(major in 0u64..50, minor in 0u64..50, patch in 0u64..50, op in 0usize..4) {
            let source = match op {
                0 => format!("^{}.{}.{}", major, minor, patch),
                1 => format!("~{}.{}.{}", major, minor, patch),
                2 => format!("{}.{}.{}", major, minor, patch),
                _ => format!("{}.{}", major, minor),
            };
            let range = VersionRange::parse(&source).unwrap();
            let reparsed = VersionRange::parse(&range.to_string()).unwrap();
            prop_assert_eq!(reparsed, range);
        }

        #[test]
        fn caret_contains_its_lower_bound(major in 1u64..50, minor in 0u64..50, patch in 0u64..50) {
            let range = VersionRange::parse(&format!("^{}.{}.{}", major, minor, patch)).unwrap();
            prop_assert!(range.has(&Version::new(major, minor, patch), false));
            prop_assert!(!range.has(&Version::new(major + 1, 0, 0), false));
        }
    }
}
