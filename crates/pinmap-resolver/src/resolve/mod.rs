//! Package resolution: configs, version lookups, exports and module analysis
//!
//! A [`Resolver`] holds every cache used during resolution. Nothing here is
//! global; the installer and tracer share one instance through an `Arc`.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use pinmap_config::options::ProjectConfig;
use pinmap_config::PackageConfig;
use pinmap_core::error::PinmapError;
use pinmap_core::types::{ExactPackage, PackageTarget, VersionRange};
use pinmap_registry::provider::ParsedPackageUrl;
use pinmap_registry::{CacheStats, CoalescingCache, FetchClient, ProviderSet};

use crate::analyze::{analyze_source, Analysis};
use crate::exports::{resolve_exports, ExportsMap};
use crate::ResolverResult;

const MANIFEST_FILE: &str = "package.json";

/// Resolver with per-instance caches for configs, lookups and analyses
#[derive(Debug)]
pub struct Resolver {
    client: FetchClient,
    providers: ProviderSet,
    /// Package URL -> config; `None` is a confirmed absence
    configs: CoalescingCache<Option<Arc<PackageConfig>>>,
    /// `registry:name:kind` -> lookup answer
    lookups: CoalescingCache<Option<ExactPackage>>,
    /// Module URL -> analysis
    analyses: CoalescingCache<Arc<Analysis>>,
}

impl Resolver {
    pub fn new(client: FetchClient, providers: ProviderSet) -> Self {
        Self {
            client,
            providers,
            configs: CoalescingCache::new(),
            lookups: CoalescingCache::new(),
            analyses: CoalescingCache::new(),
        }
    }

    /// Resolver for a loaded project: its CDN and fetch concurrency
    pub fn from_config(config: &ProjectConfig) -> ResolverResult<Self> {
        let client = FetchClient::with_concurrency(config.fetch_concurrency)?;
        Ok(Self::new(client, ProviderSet::with_cdn(config.cdn_url.clone())))
    }

    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Config of the package rooted at `pkg_url`, or `None` if it has none.
    ///
    /// 404/406 and non-JSON responses count as no config. Concurrent calls
    /// for the same URL share one fetch.
    pub async fn get_package_config(&self, pkg_url: &Url) -> ResolverResult<Option<Arc<PackageConfig>>> {
        if !pkg_url.as_str().ends_with('/') {
            return Err(PinmapError::internal(format!(
                "package URL must end in \"/\", got {}",
                pkg_url
            )));
        }
        self.configs
            .get_or_try_init(pkg_url.as_str(), || self.fetch_package_config(pkg_url))
            .await
    }

    async fn fetch_package_config(&self, pkg_url: &Url) -> ResolverResult<Option<Arc<PackageConfig>>> {
        if let Some((provider, _)) = self.providers.parse_url_pkg(pkg_url.as_str()) {
            if let Some(config) = provider.get_package_config(&self.client, pkg_url).await? {
                return Ok(Some(Arc::new(config)));
            }
        }

        let url = pkg_url
            .join(MANIFEST_FILE)
            .map_err(|e| PinmapError::internal(format!("invalid package URL {}: {}", pkg_url, e)))?;
        let response = self.client.fetch(&url).await?;
        match response.status {
            200 | 304 => {},
            404 | 406 => return Ok(None),
            status => {
                return Err(PinmapError::FetchFailed {
                    url: url.to_string(),
                    status: Some(status),
                    message: format!("invalid status code {} reading package config for {}", status, pkg_url),
                    source: None,
                })
            },
        }
        if !response.is_json() {
            debug!("Ignoring non-JSON package config at {}", url);
            return Ok(None);
        }
        Ok(PackageConfig::parse(&response.text()).map(Arc::new))
    }

    /// Replace the cached config for `pkg_url`, e.g. after the manifest was
    /// rewritten
    pub fn set_package_config(&self, pkg_url: &Url, config: Option<PackageConfig>) {
        self.configs.set(pkg_url.as_str(), config.map(Arc::new));
    }

    /// Root URL of the package containing `url`.
    ///
    /// Provider URLs map directly to their package; `node:` URLs are their
    /// own base. Anything else walks up the directories until one has a
    /// package.json, stopping at the origin root.
    pub async fn get_package_base(&self, url: &Url) -> ResolverResult<Url> {
        if let Some((provider, parsed)) = self.providers.parse_url_pkg(url.as_str()) {
            return provider.pkg_to_url(&parsed.pkg);
        }
        if url.scheme() == "node" {
            return Ok(url.clone());
        }

        let mut test_url = join_dir(url, "./")?;
        loop {
            if self.get_package_config(&test_url).await?.is_some() {
                return Ok(test_url);
            }
            if test_url.path() == "/" {
                return Ok(test_url);
            }
            test_url = join_dir(&test_url, "../")?;
        }
    }

    /// Dependency names declared by the package at `pkg_url`
    pub async fn get_dep_list(&self, pkg_url: &Url, dev: bool) -> ResolverResult<Vec<String>> {
        Ok(self
            .get_package_config(pkg_url)
            .await?
            .map(|config| config.dep_list(dev))
            .unwrap_or_default())
    }

    /// Newest version satisfying `target`, trying its ranges in order.
    ///
    /// A lone exact range never touches the network. Every other lookup is
    /// cached per registry, name and lookup kind.
    pub async fn resolve_latest_target(
        &self,
        target: &PackageTarget,
        unstable: bool,
        parent: Option<&Url>,
    ) -> ResolverResult<ExactPackage> {
        if let Some(version) = target.exact_version() {
            return Ok(ExactPackage::new(&target.registry, &target.name, version.to_string()));
        }

        let provider = self.providers.for_registry(&target.registry)?;
        let parent_str = parent.map(Url::as_str);

        for range in &target.ranges {
            if let VersionRange::Exact(version) = range {
                return Ok(ExactPackage::new(&target.registry, &target.name, version.to_string()));
            }
            let Some(kind) = range.lookup_kind() else {
                continue;
            };
            let key = format!(
                "{}:{}:{}{}",
                target.registry,
                target.name,
                kind,
                if unstable { ":unstable" } else { "" }
            );
            let found = self
                .lookups
                .get_or_try_init(&key, || {
                    provider.lookup_range(&self.client, &target.registry, &target.name, &kind, unstable, parent_str)
                })
                .await?;
            if let Some(pkg) = found {
                debug!("Resolved {} -> {}", target, pkg);
                return Ok(pkg);
            }
        }

        Err(PinmapError::ResolutionNotFound {
            target: target.to_string(),
            parent: parent.map(Url::to_string),
        })
    }

    pub fn pkg_to_url(&self, pkg: &ExactPackage) -> ResolverResult<Url> {
        self.providers.pkg_to_url(pkg)
    }

    /// The package a provider URL belongs to
    pub fn parse_url_pkg(&self, url: &str) -> Option<ExactPackage> {
        self.parse_url(url).map(|parsed| parsed.pkg)
    }

    pub fn parse_url(&self, url: &str) -> Option<ParsedPackageUrl> {
        self.providers.parse_url_pkg(url).map(|(_, parsed)| parsed)
    }

    /// Flat subpath exports of the package at `pkg_url`
    pub async fn resolve_exports(
        &self,
        pkg_url: &Url,
        env: &[String],
        subpath_filter: Option<&str>,
    ) -> ResolverResult<ExportsMap> {
        let config = self.get_package_config(pkg_url).await?;
        Ok(resolve_exports(config.as_deref(), env, subpath_filter))
    }

    /// Fetch and analyze a module.
    ///
    /// A source that fails to lex is fetched and analyzed once more before
    /// the failure is reported.
    pub async fn analyze(&self, url: &Url, parent: Option<&Url>) -> ResolverResult<Arc<Analysis>> {
        self.analyses
            .get_or_try_init(url.as_str(), || async {
                let source = self.fetch_module(url, parent).await?;
                match analyze_source(&source, url.as_str()) {
                    Ok(analysis) => Ok(Arc::new(analysis)),
                    Err(first) => {
                        debug!("Retrying {} after parse error: {}", url, first);
                        let source = self.fetch_module(url, parent).await?;
                        analyze_source(&source, url.as_str())
                            .map(Arc::new)
                            .map_err(|e| PinmapError::ModuleParse {
                                url: url.to_string(),
                                message: e.to_string(),
                            })
                    },
                }
            })
            .await
    }

    async fn fetch_module(&self, url: &Url, parent: Option<&Url>) -> ResolverResult<Vec<u8>> {
        let response = self.client.fetch(url).await?;
        if response.status == 404 {
            return Err(PinmapError::FetchFailed {
                url: url.to_string(),
                status: Some(404),
                message: format!(
                    "Module not found{}",
                    parent.map(|p| format!(" imported from {}", p)).unwrap_or_default()
                ),
                source: None,
            });
        }
        Ok(response.error_for_status()?.body)
    }

    pub fn config_cache_stats(&self) -> CacheStats {
        self.configs.stats()
    }

    pub fn analysis_cache_stats(&self) -> CacheStats {
        self.analyses.stats()
    }
}

fn join_dir(url: &Url, relative: &str) -> ResolverResult<Url> {
    url.join(relative)
        .map_err(|e| PinmapError::internal(format!("cannot resolve {} against {}: {}", relative, url, e)))
}
