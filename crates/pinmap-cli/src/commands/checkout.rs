//! `pinmap checkout` command implementation.
//!
//! Copies an installed package into a local directory and points every lock
//! entry for it at that directory, so it can be edited in place.

use std::collections::HashMap;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;
use url::Url;

use pinmap_config::options::directory_url;
use pinmap_core::types::InstallTarget;
use pinmap_core::utils::with_trailing_slash;
use pinmap_resolver::Resolver;

use super::{open_project, CommandContext};

pub async fn execute(package: String, dir: Utf8PathBuf, cdn: Option<String>, ctx: &CommandContext) -> anyhow::Result<()> {
    let mut overrides = HashMap::new();
    if let Some(cdn) = cdn {
        overrides.insert("cdn".to_string(), cdn);
    }
    let project = open_project(ctx, &overrides).await?;
    let installer = &project.installer;
    let resolver = installer.resolver();

    let root = project.config.root_url()?;
    let target = InstallTarget::parse(&package, &root, None)?;
    let dir = ctx.cwd.join(&dir);
    let new_scope = directory_url(&dir)?;

    let source = match &target {
        InstallTarget::Url(url) => Some(Url::parse(&with_trailing_slash(url.as_str()))?),
        InstallTarget::Package(pkg) => match installer.get_best_match(pkg) {
            Some(best) => Some(resolver.pkg_to_url(&best)?),
            None => None,
        },
    };

    let txn = installer.start_install().await?;
    if !installer.replace(&target, &new_scope)? {
        txn.abort();
        ctx.output.warn(&format!("{} is already checked out to {}", package, dir));
        return Ok(());
    }

    if let Some(source) = source {
        let copied = copy_package(resolver, &source, &dir, &project.config.env).await?;
        ctx.output.info(&format!("Copied {} files from {}", copied, source));
    }
    txn.complete().await?;
    ctx.output.success(&format!("Checked out {} to {}", package, dir));
    Ok(())
}

/// Download the files of the package at `source` into `dir`.
///
/// Uses the provider's file list when it has one; otherwise copies the
/// manifest and every concrete export target.
pub async fn copy_package(resolver: &Resolver, source: &Url, dir: &Utf8Path, env: &[String]) -> anyhow::Result<usize> {
    let listed = match resolver.providers().parse_url_pkg(source.as_str()) {
        Some((provider, _)) => provider.get_file_list(resolver.client(), source).await?,
        None => None,
    };
    let files = match listed {
        Some(files) => files,
        None => entry_files(resolver, source, env).await?,
    };

    let mut copied = 0;
    for file in &files {
        let url = source
            .join(file)
            .with_context(|| format!("Invalid file {} in {}", file, source))?;
        let response = resolver.client().fetch(&url).await?;
        if !response.is_ok() {
            warn!("Skipping {} ({})", url, response.status);
            continue;
        }
        let dest = dir.join(file);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent))?;
        }
        tokio::fs::write(&dest, &response.body)
            .await
            .with_context(|| format!("Failed to write {}", dest))?;
        copied += 1;
    }
    Ok(copied)
}

async fn entry_files(resolver: &Resolver, source: &Url, env: &[String]) -> anyhow::Result<Vec<String>> {
    let mut files = vec!["package.json".to_string()];
    let exports = resolver.resolve_exports(source, env, None).await?;
    for target in exports.values().flatten() {
        if target.contains('*') || target.ends_with('/') {
            continue;
        }
        let file = target.trim_start_matches("./").to_string();
        if !files.contains(&file) {
            files.push(file);
        }
    }
    Ok(files)
}
