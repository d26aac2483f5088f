use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Metadata harvester service and control client.
#[derive(Debug, Parser)]
#[command(name = "harvd", version, about)]
pub struct Cli {
    /// Base URL of a running service, for the control commands.
    #[arg(long, global = true, env = "HARVD_REMOTE", default_value = "http://127.0.0.1:8080")]
    pub remote: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the harvester service with the built-in directory harvester.
    Serve {
        /// Bind address.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Listen port.
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Service module name; also names the cache directory.
        #[arg(long, default_value = "harvd")]
        module: String,
        /// Directory of JSON record files to harvest.
        #[arg(long, default_value = "records")]
        source_dir: PathBuf,
        /// Directory the disk loader writes documents to.
        #[arg(long, default_value = "harvested")]
        output_dir: PathBuf,
        /// Cache root override (defaults per DEPLOYMENT_TYPE).
        #[arg(long, env = "HARVD_CACHE_ROOT")]
        cache_root: Option<PathBuf>,
    },
    /// Start a harvest.
    Harvest,
    /// Abort the running harvest.
    Abort,
    /// Flush loaders to their sinks.
    Submit,
    /// Persist the service state.
    Save,
    /// Reset the service context.
    Reset,
    /// Show the service overview.
    Status,
    /// Show the aggregate health.
    Health,
    /// Show the current service state.
    State,
    /// Show the service version.
    Version,
    /// Show the tail of the service log.
    Log,
    /// Read or change configuration parameters.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Manage harvest schedules.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// List all registered parameters.
    Get,
    /// Set one parameter, e.g. `harvd config set MyEtl/enabled false`.
    Set { key: String, value: String },
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// List scheduled cron expressions.
    List,
    /// Add a 5-field cron expression, e.g. `harvd schedule add "0 3 * * *"`.
    Add { cron: String },
    /// Remove one expression, or `all` to clear.
    Remove { cron: String },
}
