//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod doctor;
pub mod run;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "groupwarden")]
#[command(version)]
#[command(about = "Telegram group assistant with intent routing and mention tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot: transport, router, and mention sweeper
    Run,
    /// Inspect or initialize the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run system diagnostics
    Doctor {
        /// Include online connectivity checks (store, Telegram API)
        #[arg(long)]
        online: bool,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (secrets masked)
    Show,
    /// Write a default config file if none exists
    Init,
}

pub async fn run() -> Result<()> {
    // Load .env before anything reads the environment, so its values
    // reach the GROUPWARDEN_* config overrides.
    dotenvy::dotenv().ok();

    // Initialize logging from config; fall back to defaults if the config
    // file is missing or unreadable.
    let logging_cfg = groupwarden::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    groupwarden::utils::logging::init_logging(&logging_cfg);

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Run) => {
            run::cmd_run().await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action).await?;
        }
        Some(Commands::Doctor { online }) => {
            doctor::cmd_doctor(online).await?;
        }
        Some(Commands::Version) => {
            println!("groupwarden {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
