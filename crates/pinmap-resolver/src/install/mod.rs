//! Lock-aware installer
//!
//! The [`Installer`] owns the lock table for one project. Every change goes
//! through a transaction opened with [`Installer::start_install`]; only one
//! transaction is open at a time and later callers queue in arrival order.

mod builtins;

use std::collections::HashSet;
use std::sync::Arc;

use camino::Utf8PathBuf;
use futures::future::{try_join_all, BoxFuture};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use url::Url;

use pinmap_config::json::Manifest;
use pinmap_config::options::InstallOptions;
use pinmap_config::{load_lockfile, save_lockfile, LockResolutions};
use pinmap_core::error::PinmapError;
use pinmap_core::types::{format_ranges, DependencyKind, ExactPackage, InstallTarget, PackageTarget, Version, VersionRange};
use pinmap_core::utils::{relative_url, with_trailing_slash};

use crate::resolve::Resolver;
use crate::semver::{matches_any, VersionSelector};
use crate::ResolverResult;

pub use builtins::{builtin_name, is_builtin, NODE_BUILTINS};

/// An installed package together with the range its installer declared
#[derive(Debug, Clone)]
struct InstalledPackage {
    pkg: ExactPackage,
    version: Version,
    ranges: Vec<VersionRange>,
    name: String,
    scope: String,
}

#[derive(Debug, Default)]
struct InstallState {
    installs: LockResolutions,
    /// Top-level names to persist into the manifest
    added: IndexMap<String, InstallTarget>,
    new_installs: bool,
    installing: bool,
    /// `(scope, name)` pairs already reinstalled under `force`
    reinstalled: HashSet<(String, String)>,
}

/// Installs packages into a lock table and persists it
#[derive(Debug)]
pub struct Installer {
    resolver: Arc<Resolver>,
    opts: InstallOptions,
    /// Project package URL, ending in `/`
    base_url: Url,
    lockfile_path: Option<Utf8PathBuf>,
    has_lock: bool,
    stdlib: InstallTarget,
    turnstile: Arc<Semaphore>,
    state: Mutex<InstallState>,
}

/// An open install transaction.
///
/// Dropping it without calling [`InstallTransaction::complete`] discards
/// every lock change made since it was opened.
#[must_use = "a transaction must be completed or aborted"]
pub struct InstallTransaction<'a> {
    installer: &'a Installer,
    snapshot: Option<LockResolutions>,
    _permit: OwnedSemaphorePermit,
}

impl Installer {
    /// Installer for the project at `base_url`, loading the lockfile at
    /// `lockfile_path` unless `no_lock` is set
    pub async fn load(
        resolver: Arc<Resolver>,
        base_url: Url,
        lockfile_path: Utf8PathBuf,
        opts: InstallOptions,
    ) -> ResolverResult<Self> {
        opts.validate()?;
        let base_url = directory_url(base_url)?;

        let (installs, has_lock) = if opts.no_lock {
            (LockResolutions::new(), false)
        } else {
            load_lockfile(&lockfile_path, &base_url).await?
        };
        if opts.freeze_lock && !has_lock {
            debug!("Lockfile {} not found; every install will fail while frozen", lockfile_path);
        }

        let stdlib = parse_stdlib(&opts.stdlib, &base_url)?;
        Ok(Self {
            resolver,
            base_url,
            lockfile_path: (!opts.no_lock).then_some(lockfile_path),
            has_lock,
            stdlib,
            opts,
            turnstile: Arc::new(Semaphore::new(1)),
            state: Mutex::new(InstallState {
                installs,
                ..Default::default()
            }),
        })
    }

    /// In-memory installer that never touches a lockfile
    pub fn in_memory(resolver: Arc<Resolver>, base_url: Url, opts: InstallOptions) -> ResolverResult<Self> {
        opts.validate()?;
        let base_url = directory_url(base_url)?;
        let stdlib = parse_stdlib(&opts.stdlib, &base_url)?;
        Ok(Self {
            resolver,
            base_url,
            lockfile_path: None,
            has_lock: false,
            stdlib,
            opts,
            turnstile: Arc::new(Semaphore::new(1)),
            state: Mutex::new(InstallState::default()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn options(&self) -> &InstallOptions {
        &self.opts
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn has_lock(&self) -> bool {
        self.has_lock
    }

    /// Snapshot of the current lock table
    pub fn installs(&self) -> LockResolutions {
        self.state.lock().installs.clone()
    }

    /// Existing resolution for `name` imported from `scope`
    pub fn lookup(&self, scope: &Url, name: &str) -> Option<String> {
        self.state.lock().installs.get(scope.as_str(), name).map(String::from)
    }

    /// Whether the lock already resolves `name` in `scope` to something
    /// `target` accepts
    pub fn satisfies(&self, scope: &Url, name: &str, target: &InstallTarget) -> bool {
        let Some(locked) = self.lookup(scope, name) else {
            return false;
        };
        match target {
            InstallTarget::Url(url) => locked == with_trailing_slash(url.as_str()),
            InstallTarget::Package(target) => self
                .resolver
                .parse_url_pkg(&locked)
                .filter(|pkg| target.names(pkg))
                .and_then(|pkg| pkg.semver())
                .map_or(false, |version| matches_any(&target.ranges, &version, true)),
        }
    }

    /// Whether anything was newly installed since the flag was last cleared
    pub fn has_new_installs(&self) -> bool {
        self.state.lock().new_installs
    }

    pub fn clear_new_installs(&self) {
        self.state.lock().new_installs = false;
    }

    /// Open a transaction, waiting for any open one to finish first
    pub async fn start_install(&self) -> ResolverResult<InstallTransaction<'_>> {
        let permit = self
            .turnstile
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PinmapError::internal("install turnstile closed"))?;

        let snapshot = {
            let mut state = self.state.lock();
            state.installing = true;
            state.new_installs = false;
            state.added.clear();
            state.reinstalled.clear();
            state.installs.clone()
        };
        debug!("Install transaction opened for {}", self.base_url);

        Ok(InstallTransaction {
            installer: self,
            snapshot: Some(snapshot),
            _permit: permit,
        })
    }

    fn ensure_installing(&self) -> ResolverResult<()> {
        if self.state.lock().installing {
            Ok(())
        } else {
            Err(PinmapError::internal("install attempted outside of an install transaction"))
        }
    }

    /// Resolve `name` imported from the package at `pkg_url`, installing
    /// it if the lock has no entry yet. Returns the resolved package URL,
    /// possibly with a `|subpath` suffix.
    pub async fn install(&self, name: &str, pkg_url: &Url, parent: &Url) -> ResolverResult<String> {
        self.ensure_installing()?;
        if let Some(existing) = self.existing_install(pkg_url, name) {
            return Ok(existing);
        }

        let config = self.resolver.get_package_config(pkg_url).await?;
        if let Some((declared, _)) = config.as_ref().and_then(|config| config.dependency(name)) {
            let target = InstallTarget::parse(declared, pkg_url, Some(name))?;
            return self.install_target(name, &target, pkg_url, false, parent).await;
        }

        if let Some(builtin) = builtin_name(name) {
            let installed = self.install_target(name, &self.stdlib, pkg_url, false, parent).await?;
            let resolution = format!("{}|nodelibs/{}", installed.trim_end_matches('/'), builtin);
            self.state.lock().installs.set(pkg_url.as_str(), name, &resolution);
            return Ok(resolution);
        }

        let target = InstallTarget::parse("*", pkg_url, Some(name))?;
        self.install_target(name, &target, pkg_url, true, parent).await
    }

    fn existing_install(&self, pkg_url: &Url, name: &str) -> Option<String> {
        let mut state = self.state.lock();
        let existing = state.installs.get(pkg_url.as_str(), name)?.to_string();
        if !self.opts.force {
            return Some(existing);
        }
        // Force reinstalls each entry once per transaction
        let key = (pkg_url.to_string(), name.to_string());
        if state.reinstalled.contains(&key) {
            Some(existing)
        } else {
            None
        }
    }

    /// Drop the lock entry for `name` in `scope` so the next install
    /// resolves it afresh. Returns whether there was one.
    pub fn remove(&self, scope: &Url, name: &str) -> ResolverResult<bool> {
        self.ensure_installing()?;
        let removed = self.state.lock().installs.remove(scope.as_str(), name);
        Ok(removed.is_some())
    }

    /// Install `target` as `name` for `scope` and record it in the lock.
    ///
    /// With `persist` set, a name installed for the project itself is saved
    /// to the manifest when the transaction completes.
    pub async fn install_target(
        &self,
        name: &str,
        target: &InstallTarget,
        scope: &Url,
        persist: bool,
        parent: &Url,
    ) -> ResolverResult<String> {
        self.ensure_installing()?;
        if self.opts.freeze_lock {
            return Err(PinmapError::NotInstalled {
                name: name.to_string(),
                parent: Some(parent.to_string()),
            });
        }

        let pkg_url = match target {
            InstallTarget::Url(url) => with_trailing_slash(url.as_str()),
            InstallTarget::Package(target) => {
                let latest = self.resolver.resolve_latest_target(target, false, Some(parent)).await?;
                let chosen = self.dedup(target, &latest).await?;
                self.resolver.pkg_to_url(&chosen)?.to_string()
            },
        };

        // Nothing is recorded for a target that failed to resolve
        let mut state = self.state.lock();
        state.new_installs = true;
        if self.opts.force {
            state.reinstalled.insert((scope.to_string(), name.to_string()));
        }
        if persist {
            if *scope == self.base_url && scope.scheme() == "file" {
                state.added.insert(name.to_string(), target.clone());
            } else {
                info!(
                    "Package {} not declared in package.json dependencies imported from {}",
                    name, parent
                );
            }
        }

        info!("{} {} -> {}", name, scope, pkg_url);
        state.installs.set(scope.as_str(), name, &pkg_url);
        Ok(pkg_url)
    }

    /// Pick between the newly resolved `latest` and versions already in the
    /// lock.
    ///
    /// An installed version is a candidate when every installer of it still
    /// accepts it, it is not newer than `latest`, and `target` accepts it.
    /// The highest candidate is reused unless `latest` mode is on, in which
    /// case candidate installs that accept `latest` are moved onto it.
    async fn dedup(&self, target: &PackageTarget, latest: &ExactPackage) -> ResolverResult<ExactPackage> {
        if self.opts.force && !self.opts.latest {
            return Ok(latest.clone());
        }
        let Some(latest_version) = latest.semver() else {
            return Ok(latest.clone());
        };

        let installed = self.installed_packages(target).await?;
        // Versions every installer still accepts, up to the new latest
        let upgradeable = VersionSelector::new(
            installed
                .iter()
                .map(|install| &install.version)
                .filter(|version| {
                    **version <= latest_version
                        && installed
                            .iter()
                            .filter(|install| install.version == **version)
                            .all(|install| matches_any(&install.ranges, version, true))
                })
                .cloned(),
        );

        if !self.opts.latest {
            if let Some(best) = upgradeable.select_best(&target.ranges, true) {
                debug!("Reusing installed {}@{} for {}", target.name, best, target);
                return Ok(ExactPackage::new(&target.registry, &target.name, best.to_string()));
            }
            return Ok(latest.clone());
        }

        let candidates = upgradeable.find_matching(&target.ranges, true);
        let latest_url = self.resolver.pkg_to_url(latest)?.to_string();
        let mut state = self.state.lock();
        for install in installed.iter().filter(|install| {
            candidates.contains(&&install.version) && matches_any(&install.ranges, &latest_version, true)
        }) {
            if install.version != latest_version {
                debug!("Upgrading {} in {} to {}", install.pkg, install.scope, latest.version);
                state.installs.set(&install.scope, &install.name, &latest_url);
            }
        }
        Ok(latest.clone())
    }

    /// Every lock entry resolving to a version of `target`'s package, with
    /// the range its scope declares for it
    async fn installed_packages(&self, target: &PackageTarget) -> ResolverResult<Vec<InstalledPackage>> {
        let entries: Vec<(String, String, String)> = self
            .state
            .lock()
            .installs
            .entries()
            .map(|(scope, name, resolved)| (scope.to_string(), name.to_string(), resolved.to_string()))
            .collect();

        let mut installed = Vec::new();
        for (scope, name, resolved) in entries {
            // Subpath-pinned installs such as builtins are never deduplicated
            if resolved.contains('|') {
                continue;
            }
            let Some(pkg) = self.resolver.parse_url_pkg(&resolved) else {
                continue;
            };
            if !target.names(&pkg) {
                continue;
            }
            let Some(version) = pkg.semver() else {
                continue;
            };

            let ranges = match Url::parse(&scope) {
                Ok(scope_url) => self.declared_ranges(&scope_url, &name, target).await?,
                Err(_) => vec![VersionRange::Wildcard],
            };
            installed.push(InstalledPackage {
                pkg,
                version,
                ranges,
                name,
                scope,
            });
        }
        Ok(installed)
    }

    async fn declared_ranges(
        &self,
        scope: &Url,
        name: &str,
        target: &PackageTarget,
    ) -> ResolverResult<Vec<VersionRange>> {
        let config = self.resolver.get_package_config(scope).await?;
        let declared = config
            .as_ref()
            .and_then(|config| config.dependency(name))
            .and_then(|(declared, _)| InstallTarget::parse(declared, scope, Some(name)).ok());
        Ok(match declared {
            Some(InstallTarget::Package(declared)) if declared.registry == target.registry && declared.name == target.name => {
                declared.ranges
            },
            _ => vec![VersionRange::Wildcard],
        })
    }

    /// Highest locked version of `target`'s package within its ranges
    pub fn get_best_match(&self, target: &PackageTarget) -> Option<ExactPackage> {
        let state = self.state.lock();
        let mut urls: HashSet<&str> = HashSet::new();
        for (scope, _, resolved) in state.installs.entries() {
            urls.insert(scope);
            urls.insert(resolved);
        }

        urls.into_iter()
            .filter_map(|url| self.resolver.parse_url_pkg(url))
            .filter_map(|pkg| {
                let version = pkg.semver()?;
                (target.names(&pkg) && matches_any(&target.ranges, &version, true)).then_some((version, pkg))
            })
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, pkg)| pkg)
    }

    /// Point every lock entry for `target` at `new_scope`, moving its own
    /// dependencies along. Returns whether anything changed.
    pub fn replace(&self, target: &InstallTarget, new_scope: &Url) -> ResolverResult<bool> {
        let new_scope = with_trailing_slash(new_scope.as_str());
        let target_url = match target {
            InstallTarget::Url(url) => with_trailing_slash(url.as_str()),
            InstallTarget::Package(package) => match self.get_best_match(package) {
                Some(pkg) => self.resolver.pkg_to_url(&pkg)?.to_string(),
                None => {
                    if self.state.lock().installs.contains_scope(&new_scope) {
                        return Ok(false);
                    }
                    return Err(PinmapError::invalid_specifier(
                        package.to_string(),
                        "no installation found to replace",
                    ));
                },
            },
        };

        let changed = self.state.lock().installs.replace_url(&target_url, &new_scope);
        if changed {
            info!("Replaced {} with {}", target_url, new_scope);
        }
        Ok(changed)
    }

    /// Install `names` for `scope` and everything they depend on, each
    /// `(name, scope)` pair once. With `prune`, the lock is cut down to
    /// exactly the visited pairs.
    pub async fn lock_install(
        &self,
        names: Vec<String>,
        scope: &Url,
        prune: bool,
    ) -> ResolverResult<HashSet<(String, String)>> {
        let visited = Mutex::new(HashSet::new());
        try_join_all(
            names
                .into_iter()
                .map(|name| self.visit_install(name, scope.clone(), &visited)),
        )
        .await?;

        let visited = visited.into_inner();
        if prune {
            let mut state = self.state.lock();
            let before = state.installs.len();
            state.installs = state.installs.prune(&visited);
            debug!("Pruned lock from {} to {} entries", before, state.installs.len());
        }
        Ok(visited)
    }

    fn visit_install<'a>(
        &'a self,
        name: String,
        pkg_url: Url,
        visited: &'a Mutex<HashSet<(String, String)>>,
    ) -> BoxFuture<'a, ResolverResult<()>> {
        Box::pin(async move {
            if !visited.lock().insert((name.clone(), pkg_url.to_string())) {
                return Ok(());
            }

            let install_url = self.install(&name, &pkg_url, &pkg_url).await?;
            let install_pkg_url = package_url(&install_url)?;

            let mut deps = self.resolver.get_dep_list(&install_pkg_url, false).await?;
            if let Some(existing) = self.state.lock().installs.scope(install_pkg_url.as_str()) {
                for dep in existing.keys() {
                    if !deps.contains(dep) {
                        deps.push(dep.clone());
                    }
                }
            }

            try_join_all(
                deps.into_iter()
                    .map(|dep| self.visit_install(dep, install_pkg_url.clone(), visited)),
            )
            .await?;
            Ok(())
        })
    }

    /// Persist manifest additions, prune if asked, and write the lockfile
    async fn finish(&self) -> ResolverResult<bool> {
        let added = std::mem::take(&mut self.state.lock().added);
        let manifest_changed = self.save_manifest(added).await?;

        if self.opts.prune || manifest_changed {
            let mut deps = self.resolver.get_dep_list(&self.base_url, true).await?;
            let builtins: Vec<String> = self
                .state
                .lock()
                .installs
                .scope(self.base_url.as_str())
                .map(|scope| scope.keys().filter(|name| is_builtin(name)).cloned().collect())
                .unwrap_or_default();
            for name in builtins {
                if !deps.contains(&name) {
                    deps.push(name);
                }
            }
            self.lock_install(deps, &self.base_url, true).await?;
        }

        let lock_changed = match &self.lockfile_path {
            Some(path) => {
                let installs = self.installs();
                save_lockfile(&installs, path, &self.base_url).await?
            },
            None => false,
        };
        Ok(manifest_changed || lock_changed)
    }

    async fn save_manifest(&self, added: IndexMap<String, InstallTarget>) -> ResolverResult<bool> {
        if added.is_empty() {
            return Ok(false);
        }
        let Ok(root) = self.base_url.to_file_path() else {
            return Ok(false);
        };
        let Ok(root) = Utf8PathBuf::from_path_buf(root) else {
            return Ok(false);
        };
        let path = root.join("package.json");
        let mut manifest = match Manifest::load(&path).await? {
            Some(manifest) => manifest,
            None => Manifest::empty(&path),
        };

        let kind = self.opts.save.unwrap_or(DependencyKind::Normal);
        let mut changed = false;
        for (name, target) in &added {
            let declared = self.manifest_target(name, target).await?;
            changed |= manifest.set_dependency(name, &declared, kind);
        }
        if !changed {
            return Ok(false);
        }

        manifest.save().await?;
        info!("Saved {} to {} in {}", added.keys().cloned().collect::<Vec<_>>().join(", "), kind, path);
        self.resolver.set_package_config(&self.base_url, Some(manifest.config()));
        Ok(true)
    }

    /// How a newly added dependency is written into the manifest
    async fn manifest_target(&self, name: &str, target: &InstallTarget) -> ResolverResult<String> {
        match target {
            InstallTarget::Url(url) if url.scheme() == "file" => {
                let relative = relative_url(url, &self.base_url);
                let relative = relative.strip_prefix("./").unwrap_or(&relative);
                Ok(format!("file:{}", relative.trim_end_matches('/')))
            },
            InstallTarget::Url(url) => Ok(url.to_string()),
            InstallTarget::Package(package) => {
                let mut range = format_ranges(&package.ranges);
                if range == "*" {
                    if let Some(version) = self.installed_version(name).await? {
                        range = format!("^{}", version);
                    }
                }
                if package.name == name {
                    Ok(range)
                } else {
                    Ok(format!("{}:{}@{}", package.registry, package.name, range))
                }
            },
        }
    }

    /// Version installed for the project under `name`
    async fn installed_version(&self, name: &str) -> ResolverResult<Option<String>> {
        let Some(resolved) = self.lookup(&self.base_url, name) else {
            return Ok(None);
        };
        let pkg_url = package_url(&resolved)?;
        if let Some(version) = self
            .resolver
            .get_package_config(&pkg_url)
            .await?
            .and_then(|config| config.version.clone())
        {
            return Ok(Some(version));
        }
        Ok(self.resolver.parse_url_pkg(pkg_url.as_str()).map(|pkg| pkg.version))
    }
}

impl InstallTransaction<'_> {
    pub fn installer(&self) -> &Installer {
        self.installer
    }

    /// Finish the transaction, writing the manifest and lockfile. Returns
    /// whether either changed on disk. On failure the lock changes are
    /// discarded.
    pub async fn complete(mut self) -> ResolverResult<bool> {
        let changed = self.installer.finish().await?;
        self.snapshot = None;
        debug!("Install transaction completed for {}", self.installer.base_url);
        Ok(changed)
    }

    /// Discard the transaction's lock changes
    pub fn abort(self) {
        debug!("Install transaction aborted for {}", self.installer.base_url);
    }
}

impl Drop for InstallTransaction<'_> {
    fn drop(&mut self) {
        let mut state = self.installer.state.lock();
        if let Some(snapshot) = self.snapshot.take() {
            state.installs = snapshot;
            state.added.clear();
        }
        state.installing = false;
    }
}

/// Package URL of a lock resolution, dropping any `|subpath`
pub fn package_url(resolved: &str) -> ResolverResult<Url> {
    let url = match resolved.split_once('|') {
        Some((url, _)) => format!("{}/", url),
        None => resolved.to_string(),
    };
    Url::parse(&url).map_err(|e| PinmapError::internal(format!("invalid resolution {}: {}", resolved, e)))
}

fn directory_url(url: Url) -> ResolverResult<Url> {
    if url.as_str().ends_with('/') {
        return Ok(url);
    }
    Url::parse(&with_trailing_slash(url.as_str()))
        .map_err(|e| PinmapError::internal(format!("invalid base URL {}: {}", url, e)))
}

/// The stdlib target: a URL or relative path, or a package target
fn parse_stdlib(stdlib: &str, base_url: &Url) -> ResolverResult<InstallTarget> {
    let is_location = ["http:", "https:", "file:", ".", "/"]
        .iter()
        .any(|prefix| stdlib.starts_with(prefix));
    if is_location {
        let url = base_url
            .join(stdlib)
            .map_err(|e| PinmapError::invalid_specifier(stdlib, e.to_string()))?;
        return Ok(InstallTarget::Url(url));
    }
    InstallTarget::parse(stdlib, base_url, None)
}

#[cfg(test)]
mod tests;
