//! Motion Recorder - log Klipper toolhead motion to CSV via the Moonraker API
//!
//! # Usage
//!
//! ```bash
//! motion-recorder <host> <port> <output.csv> [-q] [--metadata]
//! ```
//!
//! Stop with `q` followed by Enter, or Ctrl+C. After stopping, subscriptions are
//! cancelled and notifications still arriving within `--drain-grace` seconds are
//! recorded before the file is closed.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use klipper_motion_recorder::cli::Args;
use klipper_motion_recorder::commands::quit_signal;
use klipper_motion_recorder::controller::SessionController;
use klipper_motion_recorder::dispatch::EventDispatcher;
use klipper_motion_recorder::moonraker::MoonrakerClient;
use klipper_motion_recorder::recorder::{MotionRecorder, open_output_file};
use klipper_motion_recorder::report::{metadata_path, write_metadata};
use klipper_motion_recorder::RecorderError;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    if !args.quiet {
        klipper_motion_recorder::display_license_notice("motion-recorder");
    }

    let output = open_output_file(&args.output)
        .with_context(|| format!("Failed to open output file {}", args.output.display()))?;
    let recorder = MotionRecorder::new(output, !args.quiet)?;
    let dispatcher =
        EventDispatcher::new(recorder).with_ignored_methods(args.ignored_methods.clone());
    let client = MoonrakerClient::new(args.client_config());

    info!(
        "Connecting to Moonraker at {}",
        client.config().websocket_url()
    );
    let mut controller = SessionController::new(client, dispatcher, args.controller_config());

    let report = match controller.run(quit_signal()).await {
        Ok(report) => report,
        Err(RecorderError::StartupReadinessTimeout(_)) => {
            // already logged and disconnected; nothing was recorded
            return Ok(());
        }
        Err(e) => {
            error!("Recording aborted: {}", e);
            return Err(e.into());
        }
    };

    info!("Closed output file {}", args.output.display());

    if !args.quiet {
        report.print_summary();
    }

    if args.metadata {
        let path = metadata_path(&args.output);
        write_metadata(&path, &report, args.to_recorder_config_json())
            .with_context(|| format!("Failed to write metadata to {}", path.display()))?;
        info!("Wrote recording summary to {}", path.display());
    }

    Ok(())
}
