use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "dpx")]
#[command(
    author,
    version,
    about = "Harvests metadata from CKAN open data portals"
)]
#[command(after_help = "Examples:
  dpx --dest out extensions
  dpx --dest out --format csv packages --rows 500 --limit 1000
  dpx --dest out resources out/packages.json
  dpx --config ./portals.toml --dest out all")]
pub struct Config {
    /// Path to the portals.toml configuration file
    #[arg(long, short, env = "DPX_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory receiving the dumps; created if missing
    #[arg(long, short, env = "DPX_DEST", value_name = "DIR")]
    pub dest: PathBuf,

    /// Output format written next to the JSON dumps
    #[arg(long, short, default_value = "json")]
    pub format: ExportFormat,

    /// Worker pool size, overriding the configuration file
    #[arg(long, short, env = "DPX_WORKERS")]
    pub workers: Option<usize>,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, env = "DPX_LOG", default_value = "info")]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Gets the extensions installed on each portal
    Extensions,
    /// Gets the tags used by the packages of each portal
    Tags,
    /// Gets the themes used by the packages of each portal
    Themes,
    /// Gets package metadata from every portal
    #[command(after_help = "Example: dpx --dest out packages --rows 100 --limit 500")]
    Packages {
        /// Packages requested per search page
        #[arg(long, default_value = "100")]
        rows: u64,
        /// Maximum packages per portal, 0 for all
        #[arg(long, default_value = "0")]
        limit: u64,
    },
    /// Profiles the resources of previously harvested packages
    #[command(after_help = "Example: dpx --dest out resources out/packages.json")]
    Resources {
        /// packages.json written by the packages command
        #[arg(value_name = "PACKAGES_JSON")]
        packages_json: PathBuf,
    },
    /// Runs every stage in order
    All {
        /// Packages requested per search page
        #[arg(long, default_value = "100")]
        rows: u64,
        /// Maximum packages per portal, 0 for all
        #[arg(long, default_value = "0")]
        limit: u64,
    },
}

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// JSON only
    Json,
    /// JSON plus a flattened CSV table
    Csv,
}
