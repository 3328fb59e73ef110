mod commands;
mod console;
mod studio;
mod telemetry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use studio::CameraArgs;
use tetherconf::TetherConfig;

/// tetherctl - tethered capture from the command line
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to layer over the system and user files
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    camera: CameraArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take pictures and save them into the session
    Capture {
        /// Number of shots
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Leave files on the camera after download
        #[arg(long)]
        keep: bool,
    },

    /// Stream live view; Enter takes the shot, Ctrl-C aborts
    Preview {
        /// Shoot automatically after this many frames
        #[arg(long)]
        frames: Option<usize>,

        /// Write the last live-view frame to a scratch file in the session
        #[arg(long)]
        keep_frame: bool,
    },

    /// Save files created on the camera body until Ctrl-C
    Watch,

    /// Inspect the session directory
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Print the effective configuration and where it came from
    Config,
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// List images in the session
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show the filename the next capture would get
    Next {
        /// Camera-side name, used for its extension
        #[arg(long, default_value = "IMG.JPG")]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = TetherConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    telemetry::init(&config.infra.telemetry.log_level)?;
    tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    match cli.command {
        Commands::Capture { count, keep } => {
            commands::capture(&config, &cli.camera, count, keep).await?;
        }
        Commands::Preview { frames, keep_frame } => {
            commands::preview(&config, &cli.camera, frames, keep_frame).await?;
        }
        Commands::Watch => {
            commands::watch(&config, &cli.camera).await?;
        }
        Commands::Session { command } => match command {
            SessionCommands::List { json } => commands::session_list(&config, json)?,
            SessionCommands::Next { source } => commands::session_next(&config, &source)?,
        },
        Commands::Config => commands::show_config(&config, &sources),
    }

    Ok(())
}
