//! Import map model and canonicalization
//!
//! Values are stored the way they are written out: relative to the map's
//! base URL when same-origin (`./x`, `../x`) and absolute otherwise. Every
//! lookup resolves them against the base first.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use pinmap_config::json::{parse_styled, stringify_styled};
use pinmap_config::JsonStyle;
use pinmap_core::error::PinmapError;
use pinmap_core::utils::{is_plain, relative_url, resolve_url};

use crate::ResolverResult;

/// Specifier (or prefix) to target; `None` blocks the specifier
pub type Mappings = IndexMap<String, Option<String>>;

/// A browser import map plus the base its relative URLs are written against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportMap {
    #[serde(skip)]
    base_url: Url,
    #[serde(skip)]
    style: JsonStyle,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub imports: Mappings,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub scopes: IndexMap<String, Mappings>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub integrity: IndexMap<String, String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub depcache: IndexMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawImportMap {
    #[serde(default)]
    imports: Mappings,
    #[serde(default)]
    scopes: IndexMap<String, Mappings>,
    #[serde(default)]
    integrity: IndexMap<String, String>,
    #[serde(default)]
    depcache: IndexMap<String, Vec<String>>,
}

impl ImportMap {
    /// Empty map; `base_url` is treated as a directory
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: directory(base_url),
            style: JsonStyle::default(),
            imports: Mappings::new(),
            scopes: IndexMap::new(),
            integrity: IndexMap::new(),
            depcache: IndexMap::new(),
        }
    }

    /// Parse an existing map, remembering its whitespace style for output
    pub fn from_json(source: &str, base_url: Url) -> ResolverResult<Self> {
        let (value, style) = parse_styled(source, base_url.as_str())?;
        let raw: RawImportMap = serde_json::from_value(value).map_err(|e| PinmapError::ManifestParse {
            path: base_url.to_string(),
            message: format!("invalid import map: {}", e),
        })?;
        Ok(Self {
            style,
            imports: raw.imports,
            scopes: raw.scopes,
            integrity: raw.integrity,
            depcache: raw.depcache,
            ..Self::new(base_url)
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.is_empty() && self.integrity.is_empty() && self.depcache.is_empty()
    }

    /// Bind `name` to `target`, at top level or inside `scope`
    pub fn add_mapping(&mut self, name: &str, target: Option<&Url>, scope: Option<&Url>) {
        let value = target.map(|target| self.relative(target));
        match scope {
            Some(scope) => {
                let key = self.relative(scope);
                self.scopes.entry(key).or_default().insert(name.to_string(), value);
            },
            None => {
                self.imports.insert(name.to_string(), value);
            },
        }
    }

    pub fn set_integrity(&mut self, url: &Url, integrity: impl Into<String>) {
        let key = self.relative(url);
        self.integrity.insert(key, integrity.into());
    }

    /// Record that `url` may dynamically import `specifier`
    pub fn add_depcache(&mut self, url: &Url, specifier: &str) {
        let key = self.relative(url);
        let entry = self.depcache.entry(key).or_default();
        if !entry.iter().any(|existing| existing == specifier) {
            entry.push(specifier.to_string());
        }
    }

    /// Drop the top-level binding for `name` and its subpath bindings
    pub fn remove_import(&mut self, name: &str) {
        let prefix = format!("{}/", name);
        self.imports.retain(|key, _| key != name && !key.starts_with(&prefix));
    }

    /// Resolve `specifier` imported from `parent` with import map semantics.
    ///
    /// URL-like specifiers resolve against `parent`. The outer `None` means
    /// no mapping applies; `Some(None)` means the specifier is blocked.
    pub fn resolve(&self, specifier: &str, parent: &Url) -> Option<Option<Url>> {
        if !is_plain(specifier) {
            return Some(parent.join(specifier).ok());
        }

        for (scope, _) in self.get_scope_matches(parent) {
            if let Some(resolved) = self.resolve_in(&self.scopes[scope], specifier) {
                return Some(resolved);
            }
        }
        self.resolve_in(&self.imports, specifier)
    }

    pub(crate) fn resolve_in(&self, mappings: &Mappings, specifier: &str) -> Option<Option<Url>> {
        let key = Self::get_map_match(mappings, specifier)?;
        let resolved = mappings[key]
            .as_ref()
            .and_then(|target| resolve_url(&format!("{}{}", target, &specifier[key.len()..]), &self.base_url));
        Some(resolved)
    }

    /// Exact key, else the longest `/`-terminated key prefixing `specifier`
    pub fn get_map_match<'a>(mappings: &'a Mappings, specifier: &str) -> Option<&'a str> {
        if let Some((key, _)) = mappings.get_key_value(specifier) {
            return Some(key.as_str());
        }
        mappings
            .keys()
            .filter(|key| key.ends_with('/') && specifier.starts_with(key.as_str()))
            .max_by_key(|key| key.len())
            .map(String::as_str)
    }

    /// Scopes applying to `parent`, most specific first
    pub fn get_scope_matches(&self, parent: &Url) -> Vec<(&str, Url)> {
        let mut matches: Vec<(&str, Url)> = self
            .scopes
            .keys()
            .filter_map(|scope| {
                let url = resolve_url(scope, &self.base_url)?;
                let applies = url == *parent || (url.as_str().ends_with('/') && parent.as_str().starts_with(url.as_str()));
                applies.then_some((scope.as_str(), url))
            })
            .collect();
        matches.sort_by(|a, b| b.1.as_str().len().cmp(&a.1.as_str().len()));
        matches
    }

    /// Hoist remote scope bindings into a per-origin scope.
    ///
    /// A binding moves when the origin scope has no conflicting binding for
    /// the same name. Scopes left empty are removed, as are empty depcache
    /// entries. `file:` scopes are never hoisted.
    pub fn flatten(&mut self) -> &mut Self {
        let scope_keys: Vec<String> = self.scopes.keys().cloned().collect();
        for scope in scope_keys {
            let Some(scope_url) = resolve_url(&scope, &self.base_url) else {
                continue;
            };
            let Some(base_key) = self.hoist_target(&scope_url) else {
                continue;
            };
            if resolve_url(&base_key, &self.base_url) == Some(scope_url.clone()) {
                continue;
            }

            let mut hoisted = self.scopes.get(&base_key).cloned().unwrap_or_default();
            let mut flattened_all = true;
            let mut remaining = Mappings::new();

            for (name, target) in &self.scopes[&scope] {
                let Some(target_url) = target.as_deref().and_then(|t| resolve_url(t, &self.base_url)) else {
                    // Exclusions stay where they were declared
                    flattened_all = false;
                    remaining.insert(name.clone(), target.clone());
                    continue;
                };
                let existing = hoisted
                    .get(name)
                    .map(|existing| existing.as_deref().and_then(|e| resolve_url(e, &self.base_url)));
                match existing {
                    None => {
                        hoisted.insert(name.clone(), Some(self.relative(&target_url)));
                    },
                    Some(Some(existing)) if existing == target_url => {},
                    Some(_) => {
                        flattened_all = false;
                        remaining.insert(name.clone(), target.clone());
                    },
                }
            }

            if !hoisted.is_empty() {
                hoisted.sort_keys();
                self.scopes.insert(base_key, hoisted);
            }
            if flattened_all {
                self.scopes.shift_remove(&scope);
            } else if let Some(mappings) = self.scopes.get_mut(&scope) {
                *mappings = remaining;
            }
        }

        self.depcache.retain(|_, specifiers| !specifiers.is_empty());
        self
    }

    /// Key of the scope that bindings under `scope_url` hoist into
    fn hoist_target(&self, scope_url: &Url) -> Option<String> {
        if scope_url.scheme() == "file" {
            return None;
        }
        let origin = scope_url.origin();
        if !origin.is_tuple() {
            return None;
        }
        if origin == self.base_url.origin() {
            Some("/".to_string())
        } else {
            Some(format!("{}/", origin.ascii_serialization()))
        }
    }

    /// Re-express every URL in the map relative to `new_base`
    pub fn rebase(&mut self, new_base: Url) -> &mut Self {
        let old = self.clone();
        self.base_url = directory(new_base);

        self.imports = old
            .imports
            .iter()
            .map(|(name, target)| (name.clone(), old.rebased_value(target.as_deref(), self)))
            .collect();
        self.scopes = old
            .scopes
            .iter()
            .map(|(scope, mappings)| {
                let mappings = mappings
                    .iter()
                    .map(|(name, target)| (name.clone(), old.rebased_value(target.as_deref(), self)))
                    .collect();
                (old.rebased_key(scope, self), mappings)
            })
            .collect();
        self.integrity = old
            .integrity
            .iter()
            .map(|(url, integrity)| (old.rebased_key(url, self), integrity.clone()))
            .collect();
        self.depcache = old
            .depcache
            .iter()
            .map(|(url, specifiers)| {
                let specifiers = specifiers
                    .iter()
                    .map(|specifier| {
                        if is_plain(specifier) {
                            specifier.clone()
                        } else {
                            old.rebased_key(specifier, self)
                        }
                    })
                    .collect();
                (old.rebased_key(url, self), specifiers)
            })
            .collect();
        self
    }

    /// Canonical ordering: every key set sorted
    pub fn sort(&mut self) -> &mut Self {
        self.imports.sort_keys();
        self.scopes.sort_keys();
        for mappings in self.scopes.values_mut() {
            mappings.sort_keys();
        }
        self.integrity.sort_keys();
        self.depcache.sort_keys();
        self
    }

    /// Serialize in the detected style, or without whitespace when `minify`
    pub fn to_json_string(&self, minify: bool) -> ResolverResult<String> {
        stringify_styled(self, &self.style, minify)
    }

    fn relative(&self, url: &Url) -> String {
        relative_url(url, &self.base_url)
    }

    /// A stored key resolved against this map's base and written for `into`
    fn rebased_key(&self, value: &str, into: &ImportMap) -> String {
        match resolve_url(value, &self.base_url) {
            Some(url) => into.relative(&url),
            None => value.to_string(),
        }
    }

    fn rebased_value(&self, value: Option<&str>, into: &ImportMap) -> Option<String> {
        value.map(|value| self.rebased_key(value, into))
    }
}

fn directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
