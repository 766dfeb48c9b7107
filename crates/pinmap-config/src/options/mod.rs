//! Install options, project discovery, and environment/CLI overrides

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;
use url::Url;

use pinmap_core::error::PinmapError;
use pinmap_core::types::DependencyKind;

use crate::lock::LOCKFILE_NAME;
use crate::ConfigResult;

pub const MANIFEST_NAME: &str = "package.json";
pub const DEFAULT_CDN_URL: &str = "https://ga.jspm.io/";
pub const DEFAULT_STDLIB: &str = "npm:@jspm/core@2";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 32;

/// Flags governing one install transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Never resolve anything that is not already in the lockfile
    pub freeze_lock: bool,
    /// Neither read nor write the lockfile
    pub no_lock: bool,
    /// Resolve to the latest matching version, upgrading existing installs
    pub latest: bool,
    /// Ignore existing lock entries
    pub force: bool,
    /// Target that provides browser builds of Node built-ins
    pub stdlib: String,
    /// Manifest field for newly added top-level dependencies
    pub save: Option<DependencyKind>,
    /// Rewrite the lockfile to exactly the reachable set
    pub prune: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            freeze_lock: false,
            no_lock: false,
            latest: false,
            force: false,
            stdlib: DEFAULT_STDLIB.to_string(),
            save: None,
            prune: false,
        }
    }
}

impl InstallOptions {
    /// Reject contradictory flag combinations
    pub fn validate(&self) -> ConfigResult<()> {
        if self.freeze_lock && self.latest {
            return Err(PinmapError::InvalidOptions {
                reason: "a frozen lockfile cannot be updated to latest versions".to_string(),
            });
        }
        if self.freeze_lock && self.force {
            return Err(PinmapError::InvalidOptions {
                reason: "a frozen lockfile cannot be force-reinstalled".to_string(),
            });
        }
        if self.freeze_lock && self.no_lock {
            return Err(PinmapError::InvalidOptions {
                reason: "freezing requires a lockfile but --no-lock was given".to_string(),
            });
        }
        if self.stdlib.trim().is_empty() {
            return Err(PinmapError::InvalidOptions {
                reason: "stdlib target must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Where the project configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// A package.json found in the working directory or a parent
    Manifest(Utf8PathBuf),
    /// No manifest; the working directory is the project root
    WorkingDirectory(Utf8PathBuf),
}

/// Resolved project configuration
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub root: Utf8PathBuf,
    pub manifest_path: Utf8PathBuf,
    pub lockfile_path: Utf8PathBuf,
    pub cdn_url: Url,
    pub fetch_concurrency: usize,
    /// Condition environment for exports resolution
    pub env: Vec<String>,
    pub install: InstallOptions,
    pub source: ConfigSource,
}

impl ProjectConfig {
    /// Defaults for a project rooted at `root`
    pub fn for_root(root: Utf8PathBuf, source: ConfigSource) -> ConfigResult<Self> {
        Ok(Self {
            manifest_path: root.join(MANIFEST_NAME),
            lockfile_path: root.join(LOCKFILE_NAME),
            root,
            cdn_url: parse_cdn_url("cdn", DEFAULT_CDN_URL)?,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            env: vec!["browser".to_string(), "development".to_string()],
            install: InstallOptions::default(),
            source,
        })
    }

    /// The project root as a directory URL
    pub fn root_url(&self) -> ConfigResult<Url> {
        directory_url(&self.root)
    }
}

/// Directory path to a `file:` URL ending in `/`
pub fn directory_url(path: &Utf8Path) -> ConfigResult<Url> {
    Url::from_directory_path(path).map_err(|()| PinmapError::InvalidOptions {
        reason: format!("'{}' is not an absolute directory path", path),
    })
}

/// Locates the project and loads its configuration
pub struct ConfigLoader {
    /// Current working directory
    cwd: Utf8PathBuf,
}

impl ConfigLoader {
    pub fn new(cwd: Utf8PathBuf) -> Self {
        Self { cwd }
    }

    /// Find the project configuration, falling back to the working directory
    pub fn load(&self) -> ConfigResult<ProjectConfig> {
        let manifest_path = self.resolve_config_path(MANIFEST_NAME);
        if manifest_path.exists() {
            let root = manifest_path
                .parent()
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| self.cwd.clone());
            debug!("Using project root {}", root);
            return ProjectConfig::for_root(root, ConfigSource::Manifest(manifest_path));
        }

        debug!("No {} found, using {} as project root", MANIFEST_NAME, self.cwd);
        ProjectConfig::for_root(self.cwd.clone(), ConfigSource::WorkingDirectory(self.cwd.clone()))
    }

    /// Find a file in the working directory or its parents
    pub fn resolve_config_path(&self, filename: &str) -> Utf8PathBuf {
        let mut current = self.cwd.as_path();

        loop {
            let config_path = current.join(filename);
            if config_path.exists() {
                return config_path;
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        // Path in the working directory even though it doesn't exist
        self.cwd.join(filename)
    }
}

/// Layers environment and command line overrides onto a loaded config
pub struct ConfigLayering;

impl ConfigLayering {
    /// Apply env overrides, then CLI overrides (highest priority)
    pub fn merge(
        mut config: ProjectConfig,
        env_overrides: &HashMap<String, String>,
        cli_overrides: &HashMap<String, String>,
    ) -> ConfigResult<ProjectConfig> {
        Self::apply_env_overrides(&mut config, env_overrides)?;
        Self::apply_cli_overrides(&mut config, cli_overrides)?;
        config.install.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(config: &mut ProjectConfig, overrides: &HashMap<String, String>) -> ConfigResult<()> {
        for (key, value) in overrides {
            match key.as_str() {
                "PINMAP_CDN_URL" => config.cdn_url = parse_cdn_url(key, value)?,
                "PINMAP_ENV" => config.env = parse_env_list(value),
                "PINMAP_FETCH_CONCURRENCY" => config.fetch_concurrency = parse_concurrency(key, value)?,
                "PINMAP_FREEZE_LOCK" => config.install.freeze_lock = parse_flag(key, value)?,
                "PINMAP_STDLIB" => config.install.stdlib = value.clone(),
                _ => {
                    // Unknown environment variable, ignore
                },
            }
        }
        Ok(())
    }

    fn apply_cli_overrides(config: &mut ProjectConfig, overrides: &HashMap<String, String>) -> ConfigResult<()> {
        for (key, value) in overrides {
            match key.as_str() {
                "cdn" => config.cdn_url = parse_cdn_url(key, value)?,
                "env" => config.env = parse_env_list(value),
                "fetch-concurrency" => config.fetch_concurrency = parse_concurrency(key, value)?,
                "freeze" => config.install.freeze_lock = parse_flag(key, value)?,
                "no-lock" => config.install.no_lock = parse_flag(key, value)?,
                "latest" => config.install.latest = parse_flag(key, value)?,
                "force" => config.install.force = parse_flag(key, value)?,
                "prune" => config.install.prune = parse_flag(key, value)?,
                "stdlib" => config.install.stdlib = value.clone(),
                "save" => {
                    let kind = value
                        .parse::<DependencyKind>()
                        .map_err(|reason| PinmapError::InvalidOptions { reason })?;
                    config.install.save = Some(kind);
                },
                "lockfile" => config.lockfile_path = config.root.join(value),
                _ => {
                    // Unknown CLI override, ignore
                },
            }
        }
        Ok(())
    }

    /// Collect `PINMAP_*` variables from the process environment
    pub fn collect_env_overrides() -> HashMap<String, String> {
        std::env::vars().filter(|(key, _)| key.starts_with("PINMAP_")).collect()
    }
}

fn parse_flag(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PinmapError::InvalidOptions {
            reason: format!("{} expects a boolean, got '{}'", key, other),
        }),
    }
}

fn parse_concurrency(key: &str, value: &str) -> ConfigResult<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(PinmapError::InvalidOptions {
            reason: format!("{} expects a positive integer, got '{}'", key, value),
        }),
    }
}

fn parse_cdn_url(key: &str, value: &str) -> ConfigResult<Url> {
    let with_slash = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{}/", value)
    };
    Url::parse(&with_slash).map_err(|e| PinmapError::InvalidOptions {
        reason: format!("{} is not a valid URL: {}", key, e),
    })
}

fn parse_env_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|condition| !condition.is_empty())
        .map(String::from)
        .collect()
}
