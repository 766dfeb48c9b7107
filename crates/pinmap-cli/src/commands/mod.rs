//! Command implementations and dispatch logic.
//!
//! Each command loads the project, opens a tracer over its lockfile and
//! writes the resulting import map.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use tracing::info;
use url::Url;

use pinmap_config::options::directory_url;
use pinmap_config::{ConfigLayering, ConfigLoader, ProjectConfig};
use pinmap_core::utils::is_url;
use pinmap_resolver::{ImportMap, Installer, Resolver, TraceOptions, TraceResult, Tracer};

pub mod checkout;
pub mod install;
pub mod link;
pub mod update;


use crate::{output::OutputHandler, Commands, TraceArgs};

/// Shared context for all commands
pub struct CommandContext {
    pub cwd: Utf8PathBuf,
    pub output: OutputHandler,
}

impl CommandContext {
    pub fn new(no_color: bool) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|path| anyhow::anyhow!("Working directory {} is not valid UTF-8", path.display()))?;
        let output = if no_color {
            OutputHandler::plain()
        } else {
            OutputHandler::new()
        };
        Ok(Self { cwd, output })
    }
}

/// Dispatch a command to its handler
pub async fn dispatch_command(command: Commands, ctx: &CommandContext) -> anyhow::Result<()> {
    match command {
        Commands::Install { packages, args } => {
            info!("Installing {:?}", packages);
            install::execute(packages, args, ctx).await
        },
        Commands::Link { modules, args } => {
            info!("Linking {:?}", modules);
            link::execute(modules, args, ctx).await
        },
        Commands::Update { packages, args } => {
            info!("Updating {:?}", packages);
            update::execute(packages, args, ctx).await
        },
        Commands::Checkout { package, dir, cdn } => {
            info!("Checking out {} into {}", package, dir);
            checkout::execute(package, dir, cdn, ctx).await
        },
    }
}

/// A loaded project and the installer over its lockfile
pub struct Project {
    pub config: ProjectConfig,
    pub installer: Arc<Installer>,
}

/// Load the project around the working directory with `overrides` applied
pub async fn open_project(ctx: &CommandContext, overrides: &HashMap<String, String>) -> anyhow::Result<Project> {
    let config = ConfigLoader::new(ctx.cwd.clone()).load()?;
    let config = ConfigLayering::merge(config, &ConfigLayering::collect_env_overrides(), overrides)?;

    let resolver = Arc::new(Resolver::from_config(&config)?);
    let installer = Installer::load(
        resolver,
        config.root_url()?,
        config.lockfile_path.clone(),
        config.install.clone(),
    )
    .await?;
    Ok(Project {
        config,
        installer: Arc::new(installer),
    })
}

/// Tracer for `project`, seeded with the existing map at `--output`
pub async fn open_tracer(ctx: &CommandContext, project: &Project, args: &TraceArgs) -> anyhow::Result<Tracer> {
    let opts = TraceOptions {
        env: project.config.env.clone(),
        static_only: args.static_only,
        integrity: args.integrity,
        depcache: args.depcache,
        install: true,
    };
    let map_base = map_base(ctx, project, args)?;
    let mut tracer = Tracer::new(project.installer.clone(), opts);

    if let Some(output) = &args.output {
        let path = ctx.cwd.join(output);
        if path.exists() {
            let source = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path))?;
            tracer = tracer.with_input_map(ImportMap::from_json(&source, map_base.clone())?);
        }
    }
    Ok(tracer.with_map_base(map_base))
}

/// `--map-base` if given, else the directory of `--output`, else the
/// project root
fn map_base(ctx: &CommandContext, project: &Project, args: &TraceArgs) -> anyhow::Result<Url> {
    if let Some(base) = &args.map_base {
        if is_url(base) {
            return Url::parse(base).with_context(|| format!("Invalid --map-base {}", base));
        }
        return Ok(directory_url(&ctx.cwd.join(base))?);
    }
    if let Some(output) = &args.output {
        let path = ctx.cwd.join(output);
        if let Some(parent) = path.parent() {
            return Ok(directory_url(parent)?);
        }
    }
    Ok(project.config.root_url()?)
}

/// Write the map to `--output`, or stdout
pub async fn emit_map(ctx: &CommandContext, args: &TraceArgs, result: &TraceResult) -> anyhow::Result<()> {
    let json = result.map.to_json_string(args.minify)?;
    match &args.output {
        Some(output) => {
            let path = ctx.cwd.join(output);
            tokio::fs::write(&path, &json)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            ctx.output.success(&format!("Wrote import map for {} modules to {}", result.trace.len(), output));
        },
        None => ctx.output.raw(json.trim_end()),
    }
    if result.changed {
        ctx.output.info("Updated package.json / lockfile");
    }
    Ok(())
}
