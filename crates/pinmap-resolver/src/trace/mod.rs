//! Module tracing and import map synthesis
//!
//! A [`Tracer`] walks the import graph from a set of entry specifiers,
//! installing packages as bare specifiers are met. Installing can change
//! what later specifiers resolve to, so the whole trace is repeated until a
//! pass installs nothing new. The converged trace is then turned into an
//! [`ImportMap`].

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

use pinmap_core::error::PinmapError;
use pinmap_core::types::{InstallRequest, InstallTarget, PkgSpecifier};
use pinmap_core::utils::is_plain;

use crate::exports::match_export_subpath;
use crate::graph::{EdgeKind, TraceGraph};
use crate::importmap::ImportMap;
use crate::install::{package_url, InstallTransaction, Installer};
use crate::resolve::Resolver;
use crate::ResolverResult;

/// Options for one trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    /// Condition environment for exports resolution
    pub env: Vec<String>,
    /// Do not follow dynamic imports
    pub static_only: bool,
    /// Emit `integrity` for every traced module
    pub integrity: bool,
    /// Emit `depcache` hints for dynamic imports
    pub depcache: bool,
    /// Install packages missing from the lock; otherwise only locked
    /// resolutions are used
    pub install: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            env: vec!["browser".to_string(), "development".to_string()],
            static_only: false,
            integrity: false,
            depcache: false,
            install: true,
        }
    }
}

/// Everything recorded about one traced module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceEntry {
    /// Static specifier -> resolved URL; `None` when excluded
    pub deps: IndexMap<String, Option<String>>,
    /// Dynamic specifier -> resolved URL; `None` when excluded
    pub dynamic_deps: IndexMap<String, Option<String>>,
    /// Only reachable from the entries through a dynamic import
    pub dynamic_only: bool,
    pub size: usize,
    pub integrity: String,
    /// Position in the dependencies-first ordering of the trace
    pub order: usize,
    pub system: bool,
}

/// Output of an install or link
#[derive(Debug, Clone)]
pub struct TraceResult {
    pub map: ImportMap,
    /// Module URL -> entry, dependencies first
    pub trace: IndexMap<String, TraceEntry>,
    /// Whether the manifest or lockfile changed on disk
    pub changed: bool,
}

/// Traces modules for one project through its [`Installer`]
#[derive(Debug)]
pub struct Tracer {
    installer: Arc<Installer>,
    opts: TraceOptions,
    input_map: RwLock<ImportMap>,
    map_base: Url,
    /// Module URL -> entry; `None` while the module is being traced
    memo: Mutex<IndexMap<String, Option<TraceEntry>>>,
}

impl Tracer {
    pub fn new(installer: Arc<Installer>, opts: TraceOptions) -> Self {
        let base = installer.base_url().clone();
        Self {
            installer,
            opts,
            input_map: RwLock::new(ImportMap::new(base.clone())),
            map_base: base,
            memo: Mutex::new(IndexMap::new()),
        }
    }

    /// Use `map` for scope and import overrides while resolving
    pub fn with_input_map(mut self, map: ImportMap) -> Self {
        self.input_map = RwLock::new(map);
        self
    }

    /// Write the output map relative to `base` instead of the project root
    pub fn with_map_base(mut self, base: Url) -> Self {
        self.map_base = base;
        self
    }

    pub fn options(&self) -> &TraceOptions {
        &self.opts
    }

    fn resolver(&self) -> &Arc<Resolver> {
        self.installer.resolver()
    }

    /// Install `requests` into the project and trace them.
    ///
    /// Each request is saved under its alias. With no requests, every
    /// dependency the manifest declares is traced instead.
    pub async fn install(&self, requests: &[InstallRequest]) -> ResolverResult<TraceResult> {
        let txn = self.installer.start_install().await?;
        let base = self.installer.base_url().clone();

        let traced = async {
            let mut specifiers = Vec::with_capacity(requests.len());
            let frozen = self.installer.options().freeze_lock;
            for request in requests {
                let alias = self.request_alias(request).await?;
                if frozen && self.installer.satisfies(&base, &alias, &request.target) {
                    debug!("{} is already locked to {}", alias, request.target);
                } else {
                    self.installer
                        .install_target(&alias, &request.target, &base, true, &base)
                        .await?;
                }
                specifiers.push(match request.subpath.strip_prefix('.') {
                    Some(rest) => format!("{}{}", alias, rest),
                    None => alias,
                });
            }
            if requests.is_empty() {
                specifiers = self.resolver().get_dep_list(&base, false).await?;
            }
            self.trace_specifiers(&specifiers).await
        }
        .await;

        self.finish(txn, traced).await
    }

    /// Re-resolve the project dependencies `names` from their declared
    /// ranges and trace them. With latest mode on, other installs that accept
    /// the new versions move onto them.
    pub async fn update(&self, names: &[String]) -> ResolverResult<TraceResult> {
        let txn = self.installer.start_install().await?;
        let base = self.installer.base_url().clone();

        let traced = async {
            for name in names {
                if !self.installer.remove(&base, name)? {
                    return Err(PinmapError::invalid_specifier(name, "not installed in the project"));
                }
                self.input_map.write().remove_import(name);
            }
            self.trace_specifiers(names).await
        }
        .await;

        self.finish(txn, traced).await
    }

    /// Trace local modules, installing whatever they import
    pub async fn link(&self, specifiers: &[String]) -> ResolverResult<TraceResult> {
        let txn = self.installer.start_install().await?;
        let traced = self.trace_specifiers(specifiers).await;
        self.finish(txn, traced).await
    }

    async fn finish(
        &self,
        txn: InstallTransaction<'_>,
        traced: ResolverResult<(ImportMap, IndexMap<String, TraceEntry>)>,
    ) -> ResolverResult<TraceResult> {
        match traced {
            Ok((map, trace)) => {
                let changed = txn.complete().await?;
                let (configs, analyses) = (
                    self.resolver().config_cache_stats(),
                    self.resolver().analysis_cache_stats(),
                );
                debug!(
                    "Cache hits: {} package configs ({} fetched), {} modules ({} analyzed)",
                    configs.hits, configs.misses, analyses.hits, analyses.misses
                );
                info!("Traced {} modules", trace.len());
                Ok(TraceResult { map, trace, changed })
            },
            Err(e) => {
                txn.abort();
                Err(e)
            },
        }
    }

    async fn request_alias(&self, request: &InstallRequest) -> ResolverResult<String> {
        if let Some(alias) = &request.alias {
            return Ok(alias.clone());
        }
        let name = match &request.target {
            InstallTarget::Url(url) => self
                .resolver()
                .get_package_config(url)
                .await?
                .and_then(|config| config.name.clone()),
            InstallTarget::Package(target) => Some(target.name.clone()),
        };
        name.ok_or_else(|| {
            PinmapError::invalid_specifier(
                request.target.to_string(),
                "unable to determine an alias; use alias=target",
            )
        })
    }

    /// Trace `specifiers` from the project root until no pass installs
    /// anything new, then build the import map
    async fn trace_specifiers(
        &self,
        specifiers: &[String],
    ) -> ResolverResult<(ImportMap, IndexMap<String, TraceEntry>)> {
        let base = self.installer.base_url().clone();
        let mut pass = 0;
        let roots = loop {
            pass += 1;
            self.installer.clear_new_installs();
            self.memo.lock().clear();

            let roots: Vec<(String, Option<Url>)> = try_join_all(specifiers.iter().map(|specifier| {
                let base = &base;
                async move {
                    let resolved = self.resolve(specifier, base).await?;
                    Ok::<_, PinmapError>((specifier.clone(), resolved))
                }
            }))
            .await?;

            try_join_all(
                roots
                    .iter()
                    .filter_map(|(_, resolved)| resolved.clone())
                    .filter(is_traceable)
                    .map(|url| self.trace_url(url, None)),
            )
            .await?;

            if !self.installer.has_new_installs() {
                break roots;
            }
            debug!("Trace pass {} installed new packages; tracing again", pass);
        };

        let entries: IndexMap<String, TraceEntry> = std::mem::take(&mut *self.memo.lock())
            .into_iter()
            .filter_map(|(url, entry)| entry.map(|entry| (url, entry)))
            .collect();
        self.build_map(&roots, entries).await
    }

    /// Resolve `specifier` imported from `parent`.
    ///
    /// Layers are tried in order: URLs and relative paths, input map scopes
    /// at or under the parent package, the lock (installing when allowed),
    /// then input map imports. `Ok(None)` is an excluded specifier.
    pub async fn resolve(&self, specifier: &str, parent: &Url) -> ResolverResult<Option<Url>> {
        if !is_plain(specifier) && !specifier.starts_with("node:") {
            let url = parent
                .join(specifier)
                .map_err(|e| PinmapError::invalid_specifier(specifier, e.to_string()))?;
            return match url.scheme() {
                "file" | "http" | "https" => Ok(Some(url)),
                scheme => Err(PinmapError::invalid_specifier(
                    specifier,
                    format!("unsupported URL scheme '{}'", scheme),
                )),
            };
        }

        let parent_pkg = if parent == self.installer.base_url() {
            parent.clone()
        } else {
            self.resolver().get_package_base(parent).await?
        };
        if let Some(resolved) = self.scope_override(specifier, parent, &parent_pkg) {
            return Ok(resolved);
        }

        let pkg = PkgSpecifier::parse(specifier)
            .ok_or_else(|| PinmapError::invalid_specifier(specifier, "invalid package name"))?;
        let resolution = if self.opts.install {
            match self.installer.install(&pkg.name, &parent_pkg, parent).await {
                Ok(resolution) => Some(resolution),
                Err(e @ (PinmapError::NotInstalled { .. } | PinmapError::ResolutionNotFound { .. })) => {
                    return match self.import_override(specifier) {
                        Some(resolved) => {
                            debug!("{} has no install; using the input map import", specifier);
                            Ok(resolved)
                        },
                        None => Err(e),
                    };
                },
                Err(e) => return Err(e),
            }
        } else {
            self.installer.lookup(&parent_pkg, &pkg.name)
        };

        if let Some(resolution) = resolution {
            return self.resolve_subpath(&resolution, &pkg.subpath, parent).await;
        }
        self.import_override(specifier).ok_or_else(|| PinmapError::UnresolvedSpecifier {
            specifier: specifier.to_string(),
            parent: Some(parent.to_string()),
        })
    }

    /// Input map scope binding for `specifier`, from the most specific scope
    /// at or under `parent_pkg` that applies to `parent`
    fn scope_override(&self, specifier: &str, parent: &Url, parent_pkg: &Url) -> Option<Option<Url>> {
        let map = self.input_map.read();
        map.get_scope_matches(parent)
            .into_iter()
            .filter(|(_, url)| url.as_str().starts_with(parent_pkg.as_str()))
            .find_map(|(scope, _)| map.resolve_in(&map.scopes[scope], specifier))
    }

    fn import_override(&self, specifier: &str) -> Option<Option<Url>> {
        let map = self.input_map.read();
        map.resolve_in(&map.imports, specifier)
    }

    /// Map `subpath` through the exports of a lock resolution
    async fn resolve_subpath(&self, resolution: &str, subpath: &str, parent: &Url) -> ResolverResult<Option<Url>> {
        let pkg_url = package_url(resolution)?;
        let filter = resolution.split_once('|').map(|(_, filter)| filter);
        let exports = self.resolver().resolve_exports(&pkg_url, &self.opts.env, filter).await?;

        match match_export_subpath(&exports, subpath) {
            None => Err(PinmapError::NoExportMatch {
                subpath: subpath.to_string(),
                package_url: pkg_url.to_string(),
                parent: Some(parent.to_string()),
            }),
            Some(None) => Ok(None),
            Some(Some(target)) => pkg_url
                .join(&target)
                .map(Some)
                .map_err(|e| PinmapError::invalid_specifier(target, e.to_string())),
        }
    }

    /// Trace `url` and everything it imports.
    ///
    /// The memo entry is claimed before any dependency is visited, so a
    /// module reached again through a cycle or a sibling is skipped.
    pub fn trace_url(&self, url: Url, parent: Option<Url>) -> BoxFuture<'_, ResolverResult<()>> {
        Box::pin(async move {
            if url.as_str().ends_with('/') {
                return Err(PinmapError::invalid_specifier(
                    url.as_str(),
                    format!(
                        "trailing \"/\" installs are not supported tracing{}",
                        parent.as_ref().map(|p| format!(" from {}", p)).unwrap_or_default()
                    ),
                ));
            }
            {
                let mut memo = self.memo.lock();
                if memo.contains_key(url.as_str()) {
                    return Ok(());
                }
                memo.insert(url.to_string(), None);
            }

            let analysis = self.resolver().analyze(&url, parent.as_ref()).await?;
            let deps = self.resolve_all(&analysis.deps, &url).await?;
            let dynamic_deps = if self.opts.static_only {
                Vec::new()
            } else {
                self.resolve_all(&analysis.dynamic_deps, &url).await?
            };

            let children: Vec<Url> = deps
                .iter()
                .chain(dynamic_deps.iter())
                .filter_map(|(_, resolved)| resolved.clone())
                .filter(is_traceable)
                .collect();

            let entry = TraceEntry {
                deps: into_entry_deps(deps),
                dynamic_deps: into_entry_deps(dynamic_deps),
                size: analysis.size,
                integrity: analysis.integrity.clone(),
                system: analysis.system,
                ..TraceEntry::default()
            };
            self.memo.lock().insert(url.to_string(), Some(entry));

            try_join_all(children.into_iter().map(|child| self.trace_url(child, Some(url.clone())))).await?;
            Ok(())
        })
    }

    async fn resolve_all(&self, specifiers: &[String], parent: &Url) -> ResolverResult<Vec<(String, Option<Url>)>> {
        try_join_all(specifiers.iter().map(|specifier| async move {
            let resolved = self.resolve(specifier, parent).await?;
            Ok::<_, PinmapError>((specifier.clone(), resolved))
        }))
        .await
    }

    /// Order the trace, flag dynamic-only modules and bind every bare
    /// specifier that was observed
    async fn build_map(
        &self,
        roots: &[(String, Option<Url>)],
        mut entries: IndexMap<String, TraceEntry>,
    ) -> ResolverResult<(ImportMap, IndexMap<String, TraceEntry>)> {
        let mut graph = TraceGraph::new();
        for (url, entry) in &entries {
            graph.add_module(url);
            for dep in entry.deps.values().flatten() {
                graph.add_dependency(url, dep, EdgeKind::Static);
            }
            for dep in entry.dynamic_deps.values().flatten() {
                graph.add_dependency(url, dep, EdgeKind::Dynamic);
            }
        }
        let root_urls: Vec<&str> = roots
            .iter()
            .filter_map(|(_, resolved)| resolved.as_ref().map(Url::as_str))
            .collect();
        let order = graph.post_order(root_urls.iter().copied(), true);
        let dynamic_only = graph.dynamic_only(root_urls.iter().copied());
        debug!(
            "Module graph: {} modules, {} imports",
            graph.module_count(),
            graph.dependency_count()
        );
        if graph.has_cycles() {
            for cycle in graph.cycles() {
                debug!("Import cycle: {}", TraceGraph::format_cycle(&cycle));
            }
        }

        let mut map = ImportMap::new(self.map_base.clone());
        for (specifier, resolved) in roots {
            if binds(specifier) {
                map.add_mapping(specifier, resolved.as_ref(), None);
            }
        }

        let mut ordered = IndexMap::with_capacity(entries.len());
        for (index, url) in order.iter().enumerate() {
            let Some(mut entry) = entries.swap_remove(url) else {
                continue;
            };
            entry.order = index;
            entry.dynamic_only = dynamic_only.contains(url);

            let module_url = Url::parse(url)
                .map_err(|e| PinmapError::internal(format!("invalid traced URL {}: {}", url, e)))?;
            let pkg_base = self.resolver().get_package_base(&module_url).await?;
            let scope = (pkg_base != *self.installer.base_url()).then_some(&pkg_base);

            for (specifier, resolved) in entry.deps.iter().chain(entry.dynamic_deps.iter()) {
                if !binds(specifier) {
                    continue;
                }
                let target = resolved.as_deref().and_then(|resolved| Url::parse(resolved).ok());
                map.add_mapping(specifier, target.as_ref(), scope);
            }
            if self.opts.integrity {
                map.set_integrity(&module_url, entry.integrity.clone());
            }
            if self.opts.depcache {
                for specifier in entry.dynamic_deps.keys() {
                    map.add_depcache(&module_url, specifier);
                }
            }
            ordered.insert(url.clone(), entry);
        }

        map.flatten().sort();
        Ok((map, ordered))
    }
}

/// Bare specifiers are the ones an import map has to bind
fn binds(specifier: &str) -> bool {
    is_plain(specifier) || specifier.starts_with("node:")
}

fn is_traceable(url: &Url) -> bool {
    matches!(url.scheme(), "file" | "http" | "https")
}

fn into_entry_deps(deps: Vec<(String, Option<Url>)>) -> IndexMap<String, Option<String>> {
    deps.into_iter()
        .map(|(specifier, resolved)| (specifier, resolved.map(String::from)))
        .collect()
}
