use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vstash_config::logging::init_logging;
use vstash_config::Config;

#[derive(Parser)]
#[command(name = "stashd")]
#[command(version, about = "vstash object daemon", long_about = None)]
struct Cli {
    /// Config file (default: ~/.vstash/config.toml then .vstash/config.toml)
    #[arg(long, short, global = true, env = "VSTASH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Start {
        /// Listen address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the effective configuration with secrets masked
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Commands::Start { bind: None }) {
        Commands::Start { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let _log_guard = init_logging(&config.logging)?;
            vstash_daemon::run_server(config, cli.config).await?;
        }
        Commands::PrintConfig => {
            print!("{}", config.redacted().to_toml()?);
        }
    }

    Ok(())
}
