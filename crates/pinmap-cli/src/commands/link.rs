//! `pinmap link` command implementation.

use pinmap_core::utils::{is_plain, is_relative};

use super::{emit_map, open_project, open_tracer, CommandContext};
use crate::TraceArgs;

/// Trace `modules` into the import map. Paths are taken relative to the
/// working directory; bare specifiers resolve from the project root.
pub async fn execute(modules: Vec<String>, args: TraceArgs, ctx: &CommandContext) -> anyhow::Result<()> {
    let project = open_project(ctx, &args.overrides()).await?;
    let entries = modules
        .iter()
        .map(|module| entry_specifier(ctx, module))
        .collect::<anyhow::Result<Vec<_>>>()?;

    ctx.output.step("🔗", &format!("Linking {}", modules.join(", ")));
    let tracer = open_tracer(ctx, &project, &args).await?;
    let result = tracer.link(&entries).await?;
    emit_map(ctx, &args, &result).await
}

/// Module paths become `file:` URLs; URLs and bare specifiers pass through
pub fn entry_specifier(ctx: &CommandContext, module: &str) -> anyhow::Result<String> {
    let is_path = is_relative(module) || (is_plain(module) && ctx.cwd.join(module).is_file());
    if !is_path {
        return Ok(module.to_string());
    }
    let path = ctx.cwd.join(module);
    url::Url::from_file_path(&path)
        .map(String::from)
        .map_err(|()| anyhow::anyhow!("Cannot link {}: not an absolute path", path))
}
