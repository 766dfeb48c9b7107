//! Package identities and install targets.
//!
//! A [`PackageTarget`] is an unresolved constraint (`npm:react@^18`), an
//! [`ExactPackage`] is what a registry lookup turns it into, and an
//! [`InstallTarget`] is either of the former or a direct URL that bypasses
//! the registry entirely.

use std::fmt;
use std::str::FromStr;

use url::Url;

use super::version::{format_ranges, Version, VersionRange};
use crate::error::{PinmapError, PinmapResult};
use crate::utils::url::is_relative;

/// Registry used when a target names none
pub const DEFAULT_REGISTRY: &str = "npm";

/// A fully resolved package identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactPackage {
    pub registry: String,
    pub name: String,
    pub version: String,
}

/// An unresolved dependency constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTarget {
    pub registry: String,
    pub name: String,
    /// Most-specific first
    pub ranges: Vec<VersionRange>,
}

/// Either a registry constraint or a direct URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    Package(PackageTarget),
    Url(Url),
}

/// A bare specifier split into its package name and `./`-prefixed subpath
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgSpecifier {
    pub name: String,
    pub subpath: String,
}

/// A user request to add a package: `alias=target/subpath`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Import name the package is installed under
    pub alias: Option<String>,
    pub target: InstallTarget,
    /// `.` or `./sub/path`
    pub subpath: String,
}

impl ExactPackage {
    pub fn new(registry: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parsed semver, `None` for non-semver versions such as git refs
    pub fn semver(&self) -> Option<Version> {
        Version::from_str(&self.version).ok()
    }
}

impl fmt::Display for ExactPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}:", self.registry)?;
        }
        write!(f, "{}", self.name)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

impl PackageTarget {
    pub fn new(registry: impl Into<String>, name: impl Into<String>, ranges: Vec<VersionRange>) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            ranges,
        }
    }

    /// The pinned version when the target is a single untagged exact range
    pub fn exact_version(&self) -> Option<&Version> {
        match self.ranges.as_slice() {
            [VersionRange::Exact(version)] => Some(version),
            _ => None,
        }
    }

    /// Same registry and name as `pkg`
    pub fn names(&self, pkg: &ExactPackage) -> bool {
        self.registry == pkg.registry && self.name == pkg.name
    }
}

impl fmt::Display for PackageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.registry, self.name, format_ranges(&self.ranges))
    }
}

impl InstallTarget {
    /// Parse a target string as found in a manifest dependency field or on
    /// the command line.
    ///
    /// Relative paths and `file:` targets resolve against `parent_pkg_url`.
    /// When `dep_name` is given, a bare range (`^1.2.0`, `npm:^1.2.0`) names
    /// that dependency.
    pub fn parse(target: &str, parent_pkg_url: &Url, dep_name: Option<&str>) -> PinmapResult<Self> {
        let target = target.trim();
        let invalid = |reason: &str| PinmapError::invalid_specifier(target, reason);

        let registry_index = target.find(':');
        // A single letter before ':' is a Windows drive
        if is_relative(target) || registry_index == Some(1) {
            return join(parent_pkg_url, target).map(InstallTarget::Url);
        }

        let mut registry = match registry_index {
            Some(index) if index > 0 => &target[..index],
            _ => DEFAULT_REGISTRY,
        };
        match registry {
            "file" => return join(parent_pkg_url, &target[5..]).map(InstallTarget::Url),
            "https" | "http" | "data" => {
                return Url::parse(target)
                    .map(InstallTarget::Url)
                    .map_err(|e| invalid(&e.to_string()));
            },
            _ => {},
        }

        let rest_start = registry_index.map_or(0, |index| index + 1);
        let rest = &target[rest_start..];
        let version_index = target.rfind('@').filter(|&index| index > rest_start);

        let (name, ranges) = if let Some(index) = version_index {
            let ranges = parse_ranges(&target[index + 1..]).map_err(|reason| invalid(&reason))?;
            (&target[rest_start..index], ranges)
        } else if let Some(dep_name) = dep_name.filter(|_| registry_index.is_none() || is_range(rest)) {
            let ranges = parse_ranges(rest).map_err(|reason| invalid(&reason))?;
            (dep_name, ranges)
        } else {
            (rest, vec![VersionRange::Wildcard])
        };

        if registry_index.is_none() && name.contains('/') && !name.starts_with('@') {
            registry = "github";
        }

        let segments = name.split('/').count();
        if name.is_empty() || segments > 2 || (segments == 1 && name.starts_with('@')) {
            return Err(invalid("invalid package name"));
        }

        Ok(InstallTarget::Package(PackageTarget::new(registry, name, ranges)))
    }
}

impl fmt::Display for InstallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallTarget::Package(target) => write!(f, "{}", target),
            InstallTarget::Url(url) => write!(f, "{}", url),
        }
    }
}

fn join(base: &Url, target: &str) -> PinmapResult<Url> {
    base.join(target)
        .map_err(|e| PinmapError::invalid_specifier(target, e.to_string()))
}

fn parse_ranges(input: &str) -> Result<Vec<VersionRange>, String> {
    VersionRange::parse_list(input).map_err(|e| e.to_string())
}

/// A bare range, as opposed to a package name that happens to parse as a tag
fn is_range(input: &str) -> bool {
    VersionRange::parse_list(input)
        .map(|ranges| !ranges.iter().any(|range| matches!(range, VersionRange::Tag(_))))
        .unwrap_or(false)
}

impl PkgSpecifier {
    /// Split `name/sub/path` or `@scope/name/sub/path`
    pub fn parse(specifier: &str) -> Option<Self> {
        let mut sep_index = specifier.find('/');
        if specifier.starts_with('@') {
            let scope_end = sep_index?;
            sep_index = specifier[scope_end + 1..]
                .find('/')
                .map(|index| index + scope_end + 1);
        }
        match sep_index {
            None if specifier.is_empty() => None,
            None => Some(Self {
                name: specifier.to_string(),
                subpath: ".".to_string(),
            }),
            Some(index) => Some(Self {
                name: specifier[..index].to_string(),
                subpath: format!(".{}", &specifier[index..]),
            }),
        }
    }
}

impl InstallRequest {
    /// Parse `[alias=]target`, where target is a package (`npm:react@18/jsx-runtime`)
    /// or a URL or path with an optional `|sub/path`.
    ///
    /// URL targets leave `alias` unset unless given explicitly; the caller
    /// derives it from the target's package.json.
    pub fn parse(input: &str, base: &Url) -> PinmapResult<Self> {
        let (alias, target_str) = match input.split_once('=') {
            Some((alias, target)) if !alias.is_empty() && !alias.contains(':') => {
                (Some(alias.to_string()), target)
            },
            _ => (None, input),
        };

        if is_url_target(target_str) {
            let (target_str, subpath) = match target_str.split_once('|') {
                Some((target, subpath)) => (target, format!("./{}", subpath)),
                None => (target_str, ".".to_string()),
            };
            let target_str = target_str.strip_prefix("file:").unwrap_or(target_str);
            let with_slash = if target_str.ends_with('/') {
                target_str.to_string()
            } else {
                format!("{}/", target_str)
            };
            let url = join(base, &with_slash)?;
            return Ok(Self {
                alias,
                target: InstallTarget::Url(url),
                subpath,
            });
        }

        let (prefix, rest) = match target_str.split_once(':') {
            Some((registry, rest)) if is_registry_name(registry) => {
                (&target_str[..registry.len() + 1], rest)
            },
            _ => ("", target_str),
        };
        let pkg = PkgSpecifier::parse(rest)
            .ok_or_else(|| PinmapError::invalid_specifier(input, "invalid package name"))?;
        let name = match pkg.name.char_indices().skip(1).find(|&(_, c)| c == '@') {
            Some((index, _)) => &pkg.name[..index],
            None => pkg.name.as_str(),
        };
        let target = InstallTarget::parse(&format!("{}{}", prefix, pkg.name), base, None)?;

        Ok(Self {
            alias: Some(alias.unwrap_or_else(|| name.to_string())),
            target,
            subpath: pkg.subpath,
        })
    }
}

fn is_registry_name(input: &str) -> bool {
    !input.is_empty() && input.chars().all(|c| c.is_ascii_lowercase())
}

fn is_url_target(target: &str) -> bool {
    if is_relative(target) {
        return true;
    }
    matches!(
        target.split_once(':').map(|(scheme, _)| scheme),
        Some("https" | "http" | "data" | "file")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("file:///project/").unwrap()
    }

    fn package(target: &str, dep_name: Option<&str>) -> PackageTarget {
        match InstallTarget::parse(target, &base(), dep_name).unwrap() {
            InstallTarget::Package(target) => target,
            other => panic!("expected package target, got {}", other),
        }
    }

    #[test]
    fn test_parse_registry_targets() {
        let target = package("npm:react@^18.2.0", None);
        assert_eq!(target.registry, "npm");
        assert_eq!(target.name, "react");
        assert_eq!(target.to_string(), "npm:react@^18.2.0");

        let target = package("@lit/reactive-element@1", None);
        assert_eq!(target.registry, "npm");
        assert_eq!(target.name, "@lit/reactive-element");

        let target = package("lodash", None);
        assert_eq!(target.ranges, vec![VersionRange::Wildcard]);
    }

    #[test]
    fn test_parse_dependency_ranges() {
        let target = package("^1.0.0", Some("app"));
        assert_eq!(target.name, "app");
        assert_eq!(target.to_string(), "npm:app@^1.0.0");

        let target = package("npm:^1.0.0", Some("app"));
        assert_eq!(target.registry, "npm");
        assert_eq!(target.name, "app");

        // Aliased dependency keeps the real package name
        let target = package("npm:preact@10", Some("react"));
        assert_eq!(target.name, "preact");
    }

    #[test]
    fn test_parse_github_and_invalid() {
        let target = package("owner/repo", None);
        assert_eq!(target.registry, "github");

        assert!(InstallTarget::parse("a/b/c", &base(), None).is_err());
        assert!(InstallTarget::parse("@scope", &base(), None).is_err());
        assert!(InstallTarget::parse("npm:react@%%", &base(), None).is_err());
    }

    #[test]
    fn test_parse_url_targets() {
        let target = InstallTarget::parse("./vendor/lib", &base(), Some("lib")).unwrap();
        assert_eq!(target, InstallTarget::Url(Url::parse("file:///project/vendor/lib").unwrap()));

        let target = InstallTarget::parse("file:../shared", &base(), Some("shared")).unwrap();
        assert_eq!(target, InstallTarget::Url(Url::parse("file:///shared").unwrap()));

        let target = InstallTarget::parse("https://cdn.example.com/x/", &base(), None).unwrap();
        assert!(matches!(target, InstallTarget::Url(_)));
    }

    #[test]
    fn test_exact_version() {
        let target = package("npm:app@1.2.3", None);
        assert_eq!(target.exact_version(), Some(&Version::new(1, 2, 3)));
        assert_eq!(package("npm:app@^1.2.3", None).exact_version(), None);
    }

    #[test]
    fn test_pkg_specifier() {
        assert_eq!(
            PkgSpecifier::parse("react-dom/server"),
            Some(PkgSpecifier { name: "react-dom".to_string(), subpath: "./server".to_string() })
        );
        assert_eq!(
            PkgSpecifier::parse("@scope/pkg/a/b.js"),
            Some(PkgSpecifier { name: "@scope/pkg".to_string(), subpath: "./a/b.js".to_string() })
        );
        assert_eq!(PkgSpecifier::parse("@scope").map(|p| p.name), None);
        assert_eq!(PkgSpecifier::parse("lit").map(|p| p.subpath), Some(".".to_string()));
    }

    #[test]
    fn test_install_request() {
        let request = InstallRequest::parse("npm:react@18/jsx-runtime", &base()).unwrap();
        assert_eq!(request.alias.as_deref(), Some("react"));
        assert_eq!(request.subpath, "./jsx-runtime");

        let request = InstallRequest::parse("npm:@scope/pkg@2", &base()).unwrap();
        assert_eq!(request.alias.as_deref(), Some("@scope/pkg"));

        let request = InstallRequest::parse("ui=./packages/ui|button.js", &base()).unwrap();
        assert_eq!(request.alias.as_deref(), Some("ui"));
        assert_eq!(request.subpath, "./button.js");
        assert_eq!(
            request.target,
            InstallTarget::Url(Url::parse("file:///project/packages/ui/").unwrap())
        );
    }

    #[test]
    fn test_exact_package_display() {
        let pkg = ExactPackage::new("npm", "@babel/core", "7.0.0");
        assert_eq!(pkg.to_string(), "npm:@babel/core@7.0.0");
        assert_eq!(pkg.semver(), Some(Version::new(7, 0, 0)));
    }
}
