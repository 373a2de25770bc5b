use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod document;

use commands::{ConfigCommand, JoinCommand, RoomCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "diagram-collab")]
#[command(version)]
#[command(about = "Collaborative BPMN diagram editing client", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room and keep a local document file in sync
    Join(JoinCommand),

    /// Show the room and endpoint for a hosting application path
    Room(RoomCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout belongs to the console.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diagram_collab=info,diagram_collab_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Join(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Room(cmd)) => {
            cmd.run(&config)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
