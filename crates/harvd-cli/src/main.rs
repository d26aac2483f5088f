mod cli;
mod commands;
mod demo;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, ConfigCommand, ScheduleCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            port,
            module,
            source_dir,
            output_dir,
            cache_root,
        } => commands::serve(bind, port, module, source_dir, output_dir, cache_root).await,
        Command::Harvest => commands::post(&cli.remote, "/harvest").await,
        Command::Abort => commands::post(&cli.remote, "/harvest/abort").await,
        Command::Submit => commands::post(&cli.remote, "/harvest/submit").await,
        Command::Save => commands::post(&cli.remote, "/harvest/save").await,
        Command::Reset => commands::post(&cli.remote, "/reset").await,
        Command::Status => commands::get(&cli.remote, "/harvest").await,
        Command::Health => commands::get(&cli.remote, "/status/health").await,
        Command::State => commands::get(&cli.remote, "/status/state").await,
        Command::Version => commands::get(&cli.remote, "/version").await,
        Command::Log => commands::get(&cli.remote, "/log").await,
        Command::Config { command } => match command {
            ConfigCommand::Get => commands::get(&cli.remote, "/config").await,
            ConfigCommand::Set { key, value } => {
                commands::set_config(&cli.remote, &key, &value).await
            }
        },
        Command::Schedule { command } => match command {
            ScheduleCommand::List => commands::get(&cli.remote, "/schedule").await,
            ScheduleCommand::Add { cron } => commands::add_schedule(&cli.remote, &cron).await,
            ScheduleCommand::Remove { cron } => {
                commands::remove_schedule(&cli.remote, &cron).await
            }
        },
    }
}
