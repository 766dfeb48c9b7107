//! # pinmap
//!
//! Generates import maps and lockfiles for browser ES module projects.
//!
//! This is the entry point for the CLI. It parses arguments, sets up logging
//! and dispatches to the command handlers.

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::CommandContext;
use output::colors::ColorSupport;
use output::errors::ErrorFormatter;

/// Import map generator and lockfile manager
#[derive(Parser, Debug)]
#[command(name = "pinmap", version, about = "Generate import maps from a lockfile")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never color output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add packages and trace them into the import map
    Install {
        /// Packages as [alias=]target[/subpath]; all manifest dependencies when empty
        packages: Vec<String>,
        #[command(flatten)]
        args: TraceArgs,
    },
    /// Trace local modules into the import map
    Link {
        #[arg(required = true)]
        modules: Vec<String>,
        #[command(flatten)]
        args: TraceArgs,
    },
    /// Move packages to the latest versions their ranges allow
    Update {
        /// Dependency names; every dependency when empty
        packages: Vec<String>,
        #[command(flatten)]
        args: TraceArgs,
    },
    /// Point a package's lock entries at a local copy
    Checkout {
        package: String,
        dir: Utf8PathBuf,
        /// CDN to resolve packages against
        #[arg(long)]
        cdn: Option<String>,
    },
}

/// Options shared by every tracing command
#[derive(Args, Debug, Clone, Default)]
pub struct TraceArgs {
    /// Condition environment, comma separated (e.g. browser,production)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Fail instead of adding anything to the lockfile
    #[arg(long)]
    pub freeze: bool,

    /// Neither read nor write the lockfile
    #[arg(long)]
    pub no_lock: bool,

    /// Re-resolve every package even if it is locked
    #[arg(long)]
    pub force: bool,

    /// Drop lock entries nothing depends on
    #[arg(long)]
    pub prune: bool,

    /// Save new packages to devDependencies
    #[arg(long, conflicts_with_all = ["save_peer", "save_optional"])]
    pub save_dev: bool,

    /// Save new packages to peerDependencies
    #[arg(long, conflicts_with = "save_optional")]
    pub save_peer: bool,

    /// Save new packages to optionalDependencies
    #[arg(long)]
    pub save_optional: bool,

    /// Only follow static imports
    #[arg(long = "static")]
    pub static_only: bool,

    /// Add integrity hashes to the map
    #[arg(long)]
    pub integrity: bool,

    /// Add depcache hints for dynamic imports
    #[arg(long)]
    pub depcache: bool,

    /// Write the map without whitespace
    #[arg(long)]
    pub minify: bool,

    /// File to write the map to; its existing contents seed the trace
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,

    /// URL or directory the map's relative URLs are written against
    #[arg(long)]
    pub map_base: Option<String>,

    /// CDN to resolve packages against
    #[arg(long)]
    pub cdn: Option<String>,

    /// Target serving Node.js built-ins
    #[arg(long)]
    pub stdlib: Option<String>,
}

impl TraceArgs {
    /// Config overrides these flags stand for, keyed as the config layer
    /// expects them
    pub fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        let flags = [
            ("freeze", self.freeze),
            ("no-lock", self.no_lock),
            ("force", self.force),
            ("prune", self.prune),
        ];
        for (key, set) in flags {
            if set {
                overrides.insert(key.to_string(), "true".to_string());
            }
        }
        let save = if self.save_dev {
            Some("dev")
        } else if self.save_peer {
            Some("peer")
        } else if self.save_optional {
            Some("optional")
        } else {
            None
        };
        if let Some(save) = save {
            overrides.insert("save".to_string(), save.to_string());
        }
        let values = [("env", &self.env), ("cdn", &self.cdn), ("stdlib", &self.stdlib)];
        for (key, value) in values {
            if let Some(value) = value {
                overrides.insert(key.to_string(), value.clone());
            }
        }
        overrides
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    debug!("Starting pinmap v{}", env!("CARGO_PKG_VERSION"));

    let no_color = cli.no_color;
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let formatter = if no_color {
                ErrorFormatter::with_colors(ColorSupport::disabled())
            } else {
                ErrorFormatter::new()
            };
            eprintln!("{}", formatter.format_anyhow(&e));
            ExitCode::FAILURE
        },
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(async {
        let ctx = CommandContext::new(cli.no_color)?;
        commands::dispatch_command(cli.command, &ctx).await
    })
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("PINMAP_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(format!("pinmap={0},pinmap_resolver={0},pinmap_config={0},pinmap_registry={0}", default_level)));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        error!("Logging was already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pinmap", "link", "./main.js", "--no-color", "-v"]).unwrap();
        assert!(cli.no_color);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Link { ref modules, .. } if modules == &["./main.js"]));
    }
}
