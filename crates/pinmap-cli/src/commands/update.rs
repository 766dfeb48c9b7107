//! `pinmap update` command implementation.
//!
//! Runs in latest mode. Named packages are re-resolved from their declared
//! ranges; with no names every lock entry is reinstalled.

use super::{emit_map, open_project, open_tracer, CommandContext};
use crate::TraceArgs;

pub async fn execute(packages: Vec<String>, args: TraceArgs, ctx: &CommandContext) -> anyhow::Result<()> {
    let mut overrides = args.overrides();
    overrides.insert("latest".to_string(), "true".to_string());
    if packages.is_empty() {
        overrides.insert("force".to_string(), "true".to_string());
    }
    let project = open_project(ctx, &overrides).await?;
    let tracer = open_tracer(ctx, &project, &args).await?;

    let result = if packages.is_empty() {
        ctx.output.step("⬆", "Updating all dependencies");
        tracer.install(&[]).await?
    } else {
        ctx.output.step("⬆", &format!("Updating {}", packages.join(", ")));
        tracer.update(&packages).await?
    };
    emit_map(ctx, &args, &result).await
}
