//! gazette-cli: operator client for the Gazette admin listener.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod client;
mod print;

use clap::Parser;
use gazette_api_types::StatsEnvelope;
use reqwest::Method;

use args::{Cli, Commands};
use client::{CliError, Ctx, build_ctx_from_cli};
use print::print_json;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = build_ctx_from_cli(&cli)?;
    handle(&ctx, cli.command).await
}

pub(crate) async fn handle(ctx: &Ctx, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Stats => {
            let envelope = ctx.stats().await?;
            print_json(&envelope)?;
            if matches!(envelope, StatsEnvelope::Fallback(_)) {
                return Err(CliError::StatsUnavailable);
            }
        }
        Commands::Clear => ctx.request_unit(Method::POST, ctx.url("/cache/clear")?).await?,
        Commands::ResetStats => {
            ctx.request_unit(Method::POST, ctx.url("/cache/stats/reset")?)
                .await?;
        }
        Commands::Sweep => print_json(&ctx.sweep().await?)?,
        Commands::Invalidate { key } => {
            ctx.request_unit(Method::DELETE, ctx.entry_url(&key)?).await?;
        }
        Commands::Disable => {
            ctx.request_unit(Method::POST, ctx.url("/cache/disable")?)
                .await?;
        }
        Commands::Enable => ctx.request_unit(Method::POST, ctx.url("/cache/enable")?).await?,
    }
    Ok(())
}
