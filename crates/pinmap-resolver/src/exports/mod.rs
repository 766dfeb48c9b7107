//! Conditional exports resolution
//!
//! Flattens a package's `exports` (or legacy `browser`/`main`) fields into a
//! map from `./`-prefixed subpath to target, picking conditional branches
//! against a condition environment.

use indexmap::IndexMap;
use tracing::debug;

use pinmap_config::{BrowserField, ExportsTarget, PackageConfig};

/// Subpath to target; `None` marks an explicitly excluded subpath
pub type ExportsMap = IndexMap<String, Option<String>>;

/// Fallback entry point for packages that declare none
const DEFAULT_MAIN: &str = "./index.js";

/// Pick a concrete target from a conditional tree.
///
/// Condition keys are walked in declaration order and the first key that is
/// `default` or in `env` is descended into; lists yield their first non-null
/// resolution.
pub fn get_exports_target(target: &ExportsTarget, env: &[String]) -> Option<String> {
    match target {
        ExportsTarget::Leaf(target) => Some(target.clone()),
        ExportsTarget::Null => None,
        ExportsTarget::Conditional(conditions) => conditions
            .iter()
            .filter(|(condition, _)| condition.as_str() == "default" || env.iter().any(|c| c == *condition))
            .find_map(|(_, target)| get_exports_target(target, env)),
        ExportsTarget::List(targets) => targets.iter().find_map(|target| get_exports_target(target, env)),
    }
}

/// Flatten a package config into its subpath exports.
///
/// With a `subpath_filter` (the part after `|` in a subpath-pinned install),
/// only keys under `./<filter>` are kept, re-rooted at `.`.
pub fn resolve_exports(config: Option<&PackageConfig>, env: &[String], subpath_filter: Option<&str>) -> ExportsMap {
    let mut exports = ExportsMap::new();

    match config.and_then(|config| config.exports.as_ref()) {
        Some(ExportsTarget::Conditional(entries)) if entries.keys().all(|key| key.starts_with('.')) => {
            for (subpath, target) in entries {
                exports.insert(subpath.clone(), get_exports_target(target, env));
            }
        },
        Some(target) => {
            exports.insert(".".to_string(), get_exports_target(target, env));
        },
        None => legacy_exports(config, &mut exports),
    }

    match subpath_filter {
        Some(filter) if !filter.is_empty() => filter_exports(&exports, filter),
        _ => exports,
    }
}

fn legacy_exports(config: Option<&PackageConfig>, exports: &mut ExportsMap) {
    if let Some(config) = config {
        let main = match &config.browser {
            Some(BrowserField::Main(main)) => Some(main),
            _ => config.main.as_ref(),
        };
        if let Some(main) = main {
            exports.insert(".".to_string(), Some(dot_relative(main)));
        }

        if let Some(BrowserField::Map(remaps)) = &config.browser {
            for (subpath, target) in remaps {
                if !subpath.starts_with("./") {
                    debug!(
                        "Skipping non-relative browser remap {}['{}']",
                        config.name.as_deref().unwrap_or("<unnamed>"),
                        subpath
                    );
                    continue;
                }
                if exports.get(".").and_then(Option::as_deref) == Some(subpath.as_str()) {
                    exports.insert(".".to_string(), target.clone());
                }
                exports.insert(subpath.clone(), target.clone());
            }
        }
    }

    exports
        .entry("./".to_string())
        .or_insert_with(|| Some("./".to_string()));
    exports
        .entry(".".to_string())
        .or_insert_with(|| Some(DEFAULT_MAIN.to_string()));
}

fn dot_relative(path: &str) -> String {
    if path.starts_with("./") {
        path.to_string()
    } else {
        format!("./{}", path.trim_start_matches('/'))
    }
}

fn filter_exports(exports: &ExportsMap, filter: &str) -> ExportsMap {
    let filter = format!("./{}", filter.trim_start_matches("./"));
    let mut filtered = ExportsMap::new();

    for (key, target) in exports {
        if let Some(rest) = key.strip_prefix(filter.as_str()) {
            if rest.is_empty() || rest.starts_with('/') {
                filtered.insert(format!(".{}", rest), target.clone());
                continue;
            }
        }
        if let Some(pattern_base) = key.strip_suffix('*') {
            if let Some(replacement) = filter.strip_prefix(pattern_base) {
                filtered.insert(".".to_string(), substitute(target, replacement));
                filtered.insert("./*".to_string(), substitute(target, &format!("{}/*", replacement)));
            }
        }
    }
    filtered
}

fn substitute(target: &Option<String>, replacement: &str) -> Option<String> {
    target.as_ref().map(|target| target.replace('*', replacement))
}

/// Match a `./`-prefixed subpath against an exports map.
///
/// Exact keys win, then `*` patterns, then `/`-terminated directory keys,
/// the longest match winning within each kind. The outer `None` means no key
/// matched; `Some(None)` is an excluded subpath.
pub fn match_export_subpath(exports: &ExportsMap, subpath: &str) -> Option<Option<String>> {
    if let Some(target) = exports.get(subpath) {
        return Some(target.clone());
    }

    let pattern = exports
        .iter()
        .filter_map(|(key, target)| {
            let (prefix, suffix) = key.split_once('*')?;
            let middle = subpath.strip_prefix(prefix)?.strip_suffix(suffix)?;
            Some((prefix.len(), target, middle))
        })
        .max_by_key(|(len, _, _)| *len);
    if let Some((_, target, middle)) = pattern {
        return Some(substitute(target, middle));
    }

    exports
        .iter()
        .filter(|(key, _)| key.ends_with('/') && subpath.starts_with(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(key, target)| target.as_ref().map(|target| format!("{}{}", target, &subpath[key.len()..])))
}
