//! Smilescope CLI: camera discovery and still capture from the terminal.
//!
//! Usage:
//!   smilescope devices         List cameras in ranked order
//!   smilescope check           Check system capabilities
//!   smilescope capture         Capture one or more stills
//!   smilescope watch           Follow camera hot-plug events

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use smilescope_capture_engine::Resolution;
use smilescope_common::config::AppConfig;

mod commands;
mod host;

#[derive(Parser)]
#[command(
    name = "smilescope",
    about = "Intraoral and desktop camera capture",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the in-memory demo cameras instead of real hardware
    #[arg(long, global = true)]
    synthetic: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras, external ones first
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Query each camera for its recommended settings
        #[arg(long)]
        probe: bool,
    },

    /// Check system capabilities
    Check {
        /// Print JSON instead of a report
        #[arg(long)]
        json: bool,
    },

    /// Open a camera and save stills as JPEG
    Capture {
        /// Device id (defaults to the configured or highest ranked camera)
        #[arg(short, long)]
        device: Option<String>,

        /// Ideal resolution, e.g. 1920x1080
        #[arg(short, long)]
        resolution: Option<Resolution>,

        /// Ideal frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// JPEG quality in [0.0, 1.0]
        #[arg(short, long)]
        quality: Option<f32>,

        /// Number of stills to take
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Delay between stills in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Output directory (defaults to the configured capture directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report cameras as they are plugged and unplugged
    Watch {
        /// Stop after this many seconds (0 waits for Ctrl+C)
        #[arg(long, default_value = "0")]
        secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    smilescope_common::logging::init_cli_logging(&config.logging, cli.verbose);
    config.camera.validate()?;

    match cli.command {
        Commands::Devices { json, probe } => {
            let host = host::camera_host(cli.synthetic, &config, false);
            commands::devices::run(host, &config, json, probe).await
        }
        Commands::Check { json } => commands::check::run(cli.synthetic, json),
        Commands::Capture {
            device,
            resolution,
            fps,
            quality,
            count,
            interval_ms,
            output,
        } => {
            let host = host::camera_host(cli.synthetic, &config, false);
            commands::capture::run(
                host,
                &config,
                commands::capture::CaptureArgs {
                    device,
                    resolution,
                    fps,
                    quality,
                    count,
                    interval_ms,
                    output,
                },
            )
            .await
        }
        Commands::Watch { secs } => {
            let host = host::camera_host(cli.synthetic, &config, true);
            commands::watch::run(host, &config, secs).await
        }
    }
}
