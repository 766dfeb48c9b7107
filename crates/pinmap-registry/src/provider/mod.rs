//! Provider contract between the resolver and a registry CDN
//!
//! A provider owns one CDN URL and knows how packages map onto it. The
//! resolver and installer never build registry URLs themselves; everything
//! registry-specific goes through [`Provider`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use pinmap_config::PackageConfig;
use pinmap_core::error::PinmapError;
use pinmap_core::types::{ExactPackage, LookupKind, PackageTarget, VersionRange, DEFAULT_REGISTRY};

use crate::client::FetchClient;
use crate::RegistryResult;

/// A CDN URL split into its package and the `./`-prefixed subpath within it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPackageUrl {
    pub pkg: ExactPackage,
    /// `.` for the package root
    pub subpath: String,
}

#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Every package URL served by this provider starts with this URL
    fn cdn_url(&self) -> &Url;

    /// Registries this provider answers lookups for
    fn registries(&self) -> &[String];

    /// Package root URL, ending in `/`
    fn pkg_to_url(&self, pkg: &ExactPackage) -> RegistryResult<Url>;

    /// Inverse of [`Provider::pkg_to_url`]; `None` if the URL isn't served here
    fn parse_url_pkg(&self, url: &str) -> Option<ParsedPackageUrl>;

    /// One registry lookup: the version answering `kind` for `registry:name`,
    /// or `None` when the registry has no match.
    async fn lookup_range(
        &self,
        client: &FetchClient,
        registry: &str,
        name: &str,
        kind: &LookupKind,
        unstable: bool,
        parent: Option<&str>,
    ) -> RegistryResult<Option<ExactPackage>>;

    /// Uncached resolution of a target: the first range with a match wins
    async fn resolve_latest_target(
        &self,
        client: &FetchClient,
        target: &PackageTarget,
        unstable: bool,
        parent: Option<&str>,
    ) -> RegistryResult<Option<ExactPackage>> {
        for range in &target.ranges {
            if let VersionRange::Exact(version) = range {
                return Ok(Some(ExactPackage::new(&target.registry, &target.name, version.to_string())));
            }
            let Some(kind) = range.lookup_kind() else {
                continue;
            };
            if let Some(pkg) = self
                .lookup_range(client, &target.registry, &target.name, &kind, unstable, parent)
                .await?
            {
                return Ok(Some(pkg));
            }
        }
        Ok(None)
    }

    /// Provider-specific package config; `None` defers to fetching
    /// `package.json` from the package URL
    async fn get_package_config(
        &self,
        _client: &FetchClient,
        _pkg_url: &Url,
    ) -> RegistryResult<Option<PackageConfig>> {
        Ok(None)
    }

    /// Files published in the package, when the provider can list them
    async fn get_file_list(&self, _client: &FetchClient, _pkg_url: &Url) -> RegistryResult<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Provider for a `<cdn><registry>:<name>@<version>/` layout
#[derive(Debug, Clone)]
pub struct CdnProvider {
    cdn_url: Url,
    registries: Vec<String>,
}

impl CdnProvider {
    pub fn new(cdn_url: Url, registries: Vec<String>) -> Self {
        Self { cdn_url, registries }
    }

    /// `npm` and `github` on the given CDN
    pub fn with_defaults(cdn_url: Url) -> Self {
        Self::new(cdn_url, vec![DEFAULT_REGISTRY.to_string(), "github".to_string()])
    }

    fn lookup_url(&self, registry: &str, name: &str, kind: &LookupKind, unstable: bool) -> RegistryResult<Url> {
        let key = kind.to_string();
        let version = if !key.is_empty() {
            format!("@{}", key)
        } else if unstable {
            "@".to_string()
        } else {
            String::new()
        };
        Url::parse(&format!("{}{}:{}{}", self.cdn_url, registry, name, version))
            .map_err(|e| PinmapError::invalid_specifier(format!("{}:{}", registry, name), e.to_string()))
    }
}

#[async_trait]
impl Provider for CdnProvider {
    fn cdn_url(&self) -> &Url {
        &self.cdn_url
    }

    fn registries(&self) -> &[String] {
        &self.registries
    }

    fn pkg_to_url(&self, pkg: &ExactPackage) -> RegistryResult<Url> {
        Url::parse(&format!("{}{}:{}@{}/", self.cdn_url, pkg.registry, pkg.name, pkg.version))
            .map_err(|e| PinmapError::invalid_specifier(pkg.to_string(), e.to_string()))
    }

    fn parse_url_pkg(&self, url: &str) -> Option<ParsedPackageUrl> {
        parse_pkg_path(url.strip_prefix(self.cdn_url.as_str())?)
    }

    async fn lookup_range(
        &self,
        client: &FetchClient,
        registry: &str,
        name: &str,
        kind: &LookupKind,
        unstable: bool,
        parent: Option<&str>,
    ) -> RegistryResult<Option<ExactPackage>> {
        let url = self.lookup_url(registry, name, kind, unstable)?;
        let response = client.fetch(&url).await?;
        match response.status {
            200 | 304 => {
                let version = response.text().trim().to_string();
                debug!("Lookup {}:{}@{} -> {}", registry, name, kind, version);
                Ok(Some(ExactPackage::new(registry, name, version)))
            },
            404 => Ok(None),
            status => Err(PinmapError::FetchFailed {
                url: url.to_string(),
                status: Some(status),
                message: format!(
                    "invalid status code {} looking up \"{}:{}\"{}",
                    status,
                    registry,
                    name,
                    parent.map(|p| format!(" imported from {}", p)).unwrap_or_default()
                ),
                source: None,
            }),
        }
    }
}

/// Parse `[registry:]name@version[/subpath]`.
///
/// Scoped names take exactly one `@scope/` prefix. Names may not start with
/// `.` and no component may contain `\`, `%` or `@`.
fn parse_pkg_path(path: &str) -> Option<ParsedPackageUrl> {
    let forbidden = |c: char| matches!(c, '/' | '\\' | '%' | '@');

    let (registry, rest) = match path.split_once(':') {
        Some((registry, rest)) if !registry.is_empty() && registry.bytes().all(|b| b.is_ascii_lowercase()) => {
            (registry, rest)
        },
        _ => ("", path),
    };

    let (scope, unscoped) = if let Some(after_at) = rest.strip_prefix('@') {
        let (scope, unscoped) = after_at.split_once('/')?;
        if scope.is_empty() || scope.contains(forbidden) {
            return None;
        }
        (Some(scope), unscoped)
    } else {
        (None, rest)
    };

    let (bare_name, after_name) = unscoped.split_once('@')?;
    if bare_name.is_empty() || bare_name.starts_with('.') || bare_name.contains(forbidden) {
        return None;
    }

    let (version, subpath) = match after_name.find('/') {
        Some(idx) => (&after_name[..idx], &after_name[idx..]),
        None => (after_name, ""),
    };
    if version.is_empty() {
        return None;
    }

    let name = match scope {
        Some(scope) => format!("@{}/{}", scope, bare_name),
        None => bare_name.to_string(),
    };
    let subpath = match subpath.trim_start_matches('/') {
        "" => ".".to_string(),
        sub => format!("./{}", sub),
    };
    Some(ParsedPackageUrl {
        pkg: ExactPackage::new(registry, name, version),
        subpath,
    })
}

/// Providers keyed by the registries they serve
#[derive(Debug, Clone)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// A single [`CdnProvider`] on `cdn_url`
    pub fn with_cdn(cdn_url: Url) -> Self {
        Self::new(vec![Arc::new(CdnProvider::with_defaults(cdn_url))])
    }

    pub fn for_registry(&self, registry: &str) -> RegistryResult<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|provider| provider.registries().iter().any(|r| r == registry))
            .ok_or_else(|| {
                PinmapError::invalid_specifier(registry, format!("no provider serves the '{}' registry", registry))
            })
    }

    /// The provider serving `url` and the package it names
    pub fn parse_url_pkg(&self, url: &str) -> Option<(&Arc<dyn Provider>, ParsedPackageUrl)> {
        self.providers
            .iter()
            .find_map(|provider| provider.parse_url_pkg(url).map(|parsed| (provider, parsed)))
    }

    pub fn pkg_to_url(&self, pkg: &ExactPackage) -> RegistryResult<Url> {
        self.for_registry(&pkg.registry)?.pkg_to_url(pkg)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cdn() -> Url {
        Url::parse("https://ga.jspm.io/").unwrap()
    }

    #[test]
    fn test_pkg_url_round_trip() {
        let provider = CdnProvider::with_defaults(cdn());
        let pkg = ExactPackage::new("npm", "@lit/reactive-element", "1.6.1");
        let url = provider.pkg_to_url(&pkg).unwrap();
        assert_eq!(url.as_str(), "https://ga.jspm.io/npm:@lit/reactive-element@1.6.1/");

        let parsed = provider.parse_url_pkg(url.as_str()).unwrap();
        assert_eq!(parsed.pkg, pkg);
        assert_eq!(parsed.subpath, ".");
    }

    #[test]
    fn test_parse_url_pkg_with_subpath() {
        let provider = CdnProvider::with_defaults(cdn());
        let parsed = provider
            .parse_url_pkg("https://ga.jspm.io/npm:react@18.2.0/cjs/react.development.js")
            .unwrap();
        assert_eq!(parsed.pkg, ExactPackage::new("npm", "react", "18.2.0"));
        assert_eq!(parsed.subpath, "./cjs/react.development.js");
    }

    #[test]
    fn test_parse_url_pkg_rejects() {
        let provider = CdnProvider::with_defaults(cdn());
        assert!(provider.parse_url_pkg("https://unpkg.com/npm:react@18.2.0/").is_none());
        assert!(provider.parse_url_pkg("https://ga.jspm.io/npm:react/").is_none());
        assert!(provider.parse_url_pkg("https://ga.jspm.io/npm:.hidden@1.0.0/").is_none());
        assert!(provider.parse_url_pkg("https://ga.jspm.io/npm:@/x@1.0.0/").is_none());
        assert!(provider.parse_url_pkg("https://ga.jspm.io/npm:react@/").is_none());
    }

    #[test]
    fn test_provider_set_lookup() {
        let providers = ProviderSet::with_cdn(cdn());
        assert!(providers.for_registry("npm").is_ok());
        assert!(providers.for_registry("github").is_ok());
        assert!(matches!(
            providers.for_registry("deno"),
            Err(PinmapError::InvalidSpecifier { .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_range_statuses() {
        let mock_server = MockServer::start().await;
        let cdn = Url::parse(&format!("{}/", mock_server.uri())).unwrap();

        Mock::given(method("GET"))
            .and(path("/npm:app@1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3\n"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/npm:app@9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/npm:broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let provider = CdnProvider::with_defaults(cdn);
        let client = FetchClient::new().unwrap();

        let found = provider
            .lookup_range(&client, "npm", "app", &LookupKind::Major(1), false, None)
            .await
            .unwrap();
        assert_eq!(found, Some(ExactPackage::new("npm", "app", "1.2.3")));

        let missing = provider
            .lookup_range(&client, "npm", "app", &LookupKind::Major(9), false, None)
            .await
            .unwrap();
        assert_eq!(missing, None);

        let err = provider
            .lookup_range(&client, "npm", "broken", &LookupKind::Latest, false, Some("file:///app/"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("imported from file:///app/"));
    }

    #[tokio::test]
    async fn test_exact_target_needs_no_network() {
        // Nothing listens here; an exact target must not fetch
        let provider = CdnProvider::with_defaults(Url::parse("http://127.0.0.1:9/").unwrap());
        let client = FetchClient::new().unwrap();
        let target = PackageTarget::new("npm", "lit", vec![VersionRange::parse("2.7.0").unwrap()]);

        let pkg = provider
            .resolve_latest_target(&client, &target, false, None)
            .await
            .unwrap();
        assert_eq!(pkg, Some(ExactPackage::new("npm", "lit", "2.7.0")));
    }
}
