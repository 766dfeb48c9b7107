//! `pinmap install` command implementation.
//!
//! Adds the requested packages to the manifest and lockfile, then traces
//! them into the import map. Without packages every manifest dependency is
//! traced.

use std::time::Instant;

use pinmap_core::types::InstallRequest;

use super::{emit_map, open_project, open_tracer, CommandContext};
use crate::TraceArgs;

pub async fn execute(packages: Vec<String>, args: TraceArgs, ctx: &CommandContext) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let project = open_project(ctx, &args.overrides()).await?;
    let root = project.config.root_url()?;

    let requests = packages
        .iter()
        .map(|package| InstallRequest::parse(package, &root))
        .collect::<Result<Vec<_>, _>>()?;

    if requests.is_empty() {
        ctx.output.step("📦", "Installing manifest dependencies");
    } else {
        ctx.output.step("📦", &format!("Installing {}", packages.join(", ")));
    }

    let tracer = open_tracer(ctx, &project, &args).await?;
    let result = tracer.install(&requests).await?;
    emit_map(ctx, &args, &result).await?;

    ctx.output.success(&format!(
        "Done in {:.2}s",
        start_time.elapsed().as_secs_f64()
    ));
    Ok(())
}
