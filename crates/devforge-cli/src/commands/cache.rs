//! `devforge cache` — Inspect or clear the package cache.

use clap::{Args, Subcommand};
use devforge_features::PackageCache;

use super::Cli;
use crate::output::format_bytes;

/// Arguments for the `cache` command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache operation.
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache operations.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached packages.
    List,
    /// Remove every cached package and recorded resolution.
    Clear,
}

/// Executes the `cache` command.
///
/// # Errors
///
/// Returns an error if the cache cannot be read or cleared.
pub fn execute(cli: &Cli, args: &CacheArgs) -> anyhow::Result<()> {
    let settings = cli.settings()?;
    let cache = PackageCache::open(&settings.cache_dir)?;
    match args.action {
        CacheAction::List => {
            let entries = cache.list()?;
            println!("DIGEST\tSIZE\tFETCHED");
            for entry in &entries {
                println!(
                    "{}\t{}\t{}",
                    entry.digest,
                    format_bytes(entry.size_bytes),
                    entry.fetched_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            tracing::info!(count = entries.len(), "listed cache entries");
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("Removed {removed} cached package(s) from {}", cache.root().display());
        }
    }
    Ok(())
}
