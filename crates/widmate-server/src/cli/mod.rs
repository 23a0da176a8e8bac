//! CLI for the WidMate download service.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use widmate_core::config;

use commands::{run_serve, run_status, ServeOverrides};

/// Top-level CLI for the WidMate download service.
#[derive(Debug, Parser)]
#[command(name = "widmate")]
#[command(about = "WidMate: yt-dlp download service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the HTTP service.
    Serve {
        /// Address to bind (overrides config).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides config).
        #[arg(long)]
        port: Option<u16>,
        /// Directory downloads are written to (overrides config).
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,
    },

    /// Show jobs recorded in the job database.
    Status,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Serve {
                host,
                port,
                download_dir,
            } => {
                let overrides = ServeOverrides {
                    host,
                    port,
                    download_dir,
                };
                run_serve(cfg, overrides).await?
            }
            CliCommand::Status => run_status().await?,
        }

        Ok(())
    }
}
