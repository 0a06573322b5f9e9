//! Command-line surface for `gazette-cli`.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gazette-cli", version, about = "Gazette cache admin CLI", long_about = None)]
pub struct Cli {
    /// Admin listener base URL, e.g. <http://127.0.0.1:3001>
    #[arg(long, env = "GAZETTE_ADMIN_URL")]
    pub admin_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Print cache statistics
    Stats,
    /// Remove every cached entry and reset statistics
    Clear,
    /// Reset hit/miss counters, response times and key access counts
    ResetStats,
    /// Remove expired entries now
    Sweep,
    /// Drop a single cache key (the full feed URL)
    Invalidate {
        /// Cache key to remove
        key: String,
    },
    /// Bypass the cache until re-enabled
    Disable,
    /// Resume serving from the cache
    Enable,
}
