//! Lockfile persistence
//!
//! The lockfile records, per owning package URL, which URL each imported
//! package name resolves to. It is written as TOML with one `[[package]]`
//! table per scope, sorted, with same-origin URLs relative to the project
//! directory so that lockfiles diff cleanly and survive moving the project.

use std::collections::{BTreeMap, HashSet};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use pinmap_core::error::PinmapError;
use pinmap_core::utils::{relative_url, with_trailing_slash};

use crate::ConfigResult;

/// Default lockfile name in the project root
pub const LOCKFILE_NAME: &str = "pinmap.lock";

const LOCKFILE_HEADER: &str = "# Generated by pinmap. Do not edit by hand.\n\n";

/// Resolution table: owning scope URL -> import name -> resolved URL.
///
/// Scope URLs always end in `/`. Resolved URLs are package URLs ending in `/`,
/// optionally followed by `|subpath` for subpath-pinned installs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockResolutions {
    scopes: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockfileDocument {
    #[serde(default)]
    package: Vec<LockfilePackage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockfilePackage {
    url: String,
    #[serde(default)]
    deps: BTreeMap<String, String>,
}

impl LockResolutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &str, name: &str) -> Option<&str> {
        self.scopes.get(scope)?.get(name).map(String::as_str)
    }

    /// Record a resolution; the scope is normalized to end in `/`
    pub fn set(&mut self, scope: &str, name: &str, resolved: &str) -> bool {
        let deps = self.scopes.entry(with_trailing_slash(scope)).or_default();
        deps.insert(name.to_string(), resolved.to_string()).as_deref() != Some(resolved)
    }

    pub fn remove(&mut self, scope: &str, name: &str) -> Option<String> {
        let deps = self.scopes.get_mut(scope)?;
        let removed = deps.remove(name);
        if deps.is_empty() {
            self.scopes.remove(scope);
        }
        removed
    }

    pub fn scope(&self, scope: &str) -> Option<&BTreeMap<String, String>> {
        self.scopes.get(scope)
    }

    pub fn contains_scope(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    /// All `(scope, name, resolved)` entries in sorted order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.scopes.iter().flat_map(|(scope, deps)| {
            deps.iter()
                .map(move |(name, resolved)| (scope.as_str(), name.as_str(), resolved.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.values().all(BTreeMap::is_empty)
    }

    pub fn len(&self) -> usize {
        self.scopes.values().map(BTreeMap::len).sum()
    }

    /// Keep exactly the `(name, scope)` pairs in `visited`
    pub fn prune(&self, visited: &HashSet<(String, String)>) -> Self {
        let mut pruned = LockResolutions::new();
        for (scope, name, resolved) in self.entries() {
            if visited.contains(&(name.to_string(), scope.to_string())) {
                pruned.set(scope, name, resolved);
            }
        }
        pruned
    }

    /// Point every resolution of `from` at `to`, and move the `from` scope
    /// itself to `to`. Returns whether anything changed.
    pub fn replace_url(&mut self, from: &str, to: &str) -> bool {
        let mut changed = false;
        for deps in self.scopes.values_mut() {
            for resolved in deps.values_mut() {
                if resolved == from {
                    *resolved = to.to_string();
                    changed = true;
                } else if let Some(subpath) = resolved.strip_prefix(from.trim_end_matches('/')) {
                    if subpath.starts_with('|') {
                        *resolved = format!("{}{}", to.trim_end_matches('/'), subpath);
                        changed = true;
                    }
                }
            }
        }
        if let Some(deps) = self.scopes.remove(from) {
            self.scopes.entry(to.to_string()).or_default().extend(deps);
            changed = true;
        }
        changed
    }

    /// Parse lockfile text; relative URLs resolve against `base`
    pub fn parse(source: &str, base: &Url, path: &str) -> ConfigResult<Self> {
        let invalid = |message: String| PinmapError::InvalidLockfile {
            path: path.to_string(),
            message,
        };
        let document: LockfileDocument = toml::from_str(source).map_err(|e| invalid(e.to_string()))?;

        let mut resolutions = LockResolutions::new();
        for package in document.package {
            let scope = base
                .join(&package.url)
                .map_err(|e| invalid(format!("invalid package url '{}': {}", package.url, e)))?;
            if !scope.as_str().ends_with('/') {
                return Err(invalid(format!("package url '{}' must end in '/'", package.url)));
            }
            for (name, target) in package.deps {
                let (target_url, subpath) = match target.split_once('|') {
                    Some((url, subpath)) => (url, Some(subpath)),
                    None => (target.as_str(), None),
                };
                let resolved = base
                    .join(target_url)
                    .map_err(|e| invalid(format!("invalid resolution '{}' for {}: {}", target, name, e)))?;
                let resolved = match subpath {
                    Some(subpath) => format!("{}|{}", resolved.as_str().trim_end_matches('/'), subpath),
                    None => resolved.to_string(),
                };
                resolutions.set(scope.as_str(), &name, &resolved);
            }
        }
        Ok(resolutions)
    }

    /// Canonical lockfile text with URLs relative to `base` where possible
    pub fn render(&self, base: &Url) -> ConfigResult<String> {
        let relative = |url: &str| -> String {
            let (url_part, subpath) = match url.split_once('|') {
                Some((url_part, subpath)) => (format!("{}/", url_part), Some(subpath)),
                None => (url.to_string(), None),
            };
            let rendered = match Url::parse(&url_part) {
                Ok(parsed) => relative_url(&parsed, base),
                Err(_) => url_part,
            };
            match subpath {
                Some(subpath) => format!("{}|{}", rendered.trim_end_matches('/'), subpath),
                None => rendered,
            }
        };

        let document = LockfileDocument {
            package: self
                .scopes
                .iter()
                .filter(|(_, deps)| !deps.is_empty())
                .map(|(scope, deps)| LockfilePackage {
                    url: relative(scope),
                    deps: deps
                        .iter()
                        .map(|(name, resolved)| (name.clone(), relative(resolved)))
                        .collect(),
                })
                .collect(),
        };

        let body = toml::to_string(&document)
            .map_err(|e| PinmapError::internal(format!("Failed to serialize lockfile: {}", e)))?;
        Ok(format!("{}{}", LOCKFILE_HEADER, body))
    }
}

/// Load the lockfile at `path`. Returns the resolutions and whether the
/// file existed.
pub async fn load_lockfile(path: &Utf8Path, base: &Url) -> ConfigResult<(LockResolutions, bool)> {
    match tokio::fs::read_to_string(path).await {
        Ok(source) => {
            let resolutions = LockResolutions::parse(&source, base, path.as_str())?;
            debug!("Loaded {} lock entries from {}", resolutions.len(), path);
            Ok((resolutions, true))
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((LockResolutions::new(), false)),
        Err(e) => Err(PinmapError::io(format!("Failed to read lockfile {}", path), e)),
    }
}

/// Write the lockfile if its canonical text differs from what is on disk.
/// Returns whether the file was written.
pub async fn save_lockfile(resolutions: &LockResolutions, path: &Utf8Path, base: &Url) -> ConfigResult<bool> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(existing) => Some(existing),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(PinmapError::io(format!("Failed to read lockfile {}", path), e)),
    };
    if existing.is_none() && resolutions.is_empty() {
        return Ok(false);
    }

    let rendered = resolutions.render(base)?;
    if existing.as_deref() == Some(rendered.as_str()) {
        return Ok(false);
    }

    write_atomic(path, &rendered).await?;
    debug!("Wrote {} lock entries to {}", resolutions.len(), path);
    Ok(true)
}

/// Write through a sibling temp file and rename over the target
pub(crate) async fn write_atomic(path: &Utf8Path, contents: &str) -> ConfigResult<()> {
    let file_name = path.file_name().unwrap_or("pinmap");
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    tokio::fs::write(&temp_path, contents)
        .await
        .map_err(|e| PinmapError::io(format!("Failed to write {}", temp_path), e))?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(PinmapError::io(format!("Failed to replace {}", path), e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    const CDN: &str = "https://ga.jspm.io/";

    fn base() -> Url {
        Url::parse("file:///project/").unwrap()
    }

    fn sample() -> LockResolutions {
        let mut lock = LockResolutions::new();
        lock.set("file:///project/", "react", &format!("{}npm:react@18.2.0/", CDN));
        lock.set("file:///project/", "fs", &format!("{}npm:@jspm/core@2.0.1|nodelibs/fs", CDN));
        lock.set("file:///project/", "ui", "file:///project/packages/ui/");
        lock.set(
            &format!("{}npm:react@18.2.0", CDN),
            "loose-envify",
            &format!("{}npm:loose-envify@1.4.0/", CDN),
        );
        lock
    }

    #[test]
    fn test_set_normalizes_scope() {
        let lock = sample();
        assert!(lock.contains_scope("https://ga.jspm.io/npm:react@18.2.0/"));
        assert_eq!(
            lock.get("https://ga.jspm.io/npm:react@18.2.0/", "loose-envify"),
            Some("https://ga.jspm.io/npm:loose-envify@1.4.0/")
        );
        assert_eq!(lock.len(), 4);
    }

    #[test]
    fn test_render_is_sorted_and_relative() {
        let rendered = sample().render(&base()).unwrap();
        assert!(rendered.starts_with("# Generated by pinmap"));
        assert!(rendered.contains("url = \"./\""));
        assert!(rendered.contains("ui = \"./packages/ui/\""));
        assert!(rendered.contains("fs = \"https://ga.jspm.io/npm:@jspm/core@2.0.1|nodelibs/fs\""));

        let project = rendered.find("url = \"./\"").unwrap();
        let react = rendered.find("url = \"https://ga.jspm.io/npm:react@18.2.0/\"").unwrap();
        // scope order follows the absolute URLs
        assert!(project < react);
    }

    #[test]
    fn test_parse_render_round_trip() {
        let lock = sample();
        let rendered = lock.render(&base()).unwrap();
        let parsed = LockResolutions::parse(&rendered, &base(), "pinmap.lock").unwrap();
        assert_eq!(parsed, lock);
    }

    #[test]
    fn test_parse_rejects_bad_scope() {
        let source = "[[package]]\nurl = \"./no-slash\"\n[package.deps]\na = \"./a/\"\n";
        let err = LockResolutions::parse(source, &base(), "pinmap.lock").unwrap_err();
        assert!(matches!(err, PinmapError::InvalidLockfile { .. }));

        let err = LockResolutions::parse("[[package]\n", &base(), "pinmap.lock").unwrap_err();
        assert!(matches!(err, PinmapError::InvalidLockfile { .. }));
    }

    #[test]
    fn test_prune_keeps_visited_pairs() {
        let lock = sample();
        let visited: HashSet<(String, String)> = [("react".to_string(), "file:///project/".to_string())]
            .into_iter()
            .collect();
        let pruned = lock.prune(&visited);
        assert_eq!(pruned.len(), 1);
        assert!(pruned.get("file:///project/", "react").is_some());
        assert!(!pruned.contains_scope("https://ga.jspm.io/npm:react@18.2.0/"));
    }

    #[test]
    fn test_replace_url() {
        let mut lock = sample();
        let from = "https://ga.jspm.io/npm:react@18.2.0/";
        let to = "file:///project/deps/react/";
        assert!(lock.replace_url(from, to));
        assert_eq!(lock.get("file:///project/", "react"), Some(to));
        assert_eq!(
            lock.get(to, "loose-envify"),
            Some("https://ga.jspm.io/npm:loose-envify@1.4.0/")
        );
        assert!(!lock.replace_url(from, to));
    }

    #[tokio::test]
    async fn test_save_writes_only_on_change() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let base = Url::from_directory_path(&root).unwrap();
        let path = root.join(LOCKFILE_NAME);

        // Nothing to write and no file yet
        assert!(!save_lockfile(&LockResolutions::new(), &path, &base).await.unwrap());
        assert!(!path.exists());

        let mut lock = LockResolutions::new();
        lock.set(base.as_str(), "lit", "https://ga.jspm.io/npm:lit@2.7.0/");
        assert!(save_lockfile(&lock, &path, &base).await.unwrap());
        assert!(!save_lockfile(&lock, &path, &base).await.unwrap());

        let (loaded, existed) = load_lockfile(&path, &base).await.unwrap();
        assert!(existed);
        assert_eq!(loaded, lock);

        let (empty, existed) = load_lockfile(&root.join("missing.lock"), &base).await.unwrap();
        assert!(!existed);
        assert!(empty.is_empty());
    }
}
