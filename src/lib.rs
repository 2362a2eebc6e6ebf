//! Klipper Motion Recorder - record toolhead motion from a Klipper printer to CSV
//!
//! This crate subscribes to the Moonraker status stream of a running Klipper printer and
//! logs every `motion_report` update (live position and velocity) as one CSV row, with a
//! timestamp aligned to the print job's `total_duration` counter.
//!
//! # Overview
//!
//! Moonraker multiplexes all subscribed printer objects onto a single
//! `notify_status_update` notification. Each bundle carries an `eventtime` from Klipper's
//! monotonic clock, which says nothing about where in the print a sample was taken. The
//! recorder waits for the first `print_stats` update carrying `total_duration`, freezes the
//! offset between the two clocks, and from then on writes
//! `time = eventtime + offset` next to the raw `eventtime` for every motion sample.
//! Samples that arrive before the offset is known are dropped.
//!
//! # Quick Start
//!
//! ```bash
//! # Record until q (then Enter) or Ctrl+C
//! motion-recorder printer.local 7125 benchy.csv
//!
//! # Without echoing every row, with a JSON summary next to the CSV
//! motion-recorder printer.local 7125 benchy.csv -q --metadata
//! ```
//!
//! # Output Format
//!
//! ```text
//! filename,rectime,time,origts,live_position_x,live_position_y,live_position_z,live_position_e,live_velocity
//! benchy.gcode,1718000000123456789,105.0,5.0,120.5,98.2,0.3,14.7,35.0
//! ```
//!
//! - `rectime`: local capture time, nanoseconds since the Unix epoch
//! - `time`: aligned time (`origts` + frozen origin)
//! - `origts`: raw Klipper `eventtime`
//! - position and velocity columns are empty when the update omitted them
//!
//! # Library Usage
//!
//! - [`moonraker`] - websocket JSON-RPC client and the [`moonraker::StatusChannel`] seam
//! - [`session`] - print session state and time origin
//! - [`recorder`] - motion samples and the CSV sink
//! - [`dispatch`] - routing of status update bundles
//! - [`controller`] - recording lifecycle
//! - [`cli`] - command-line argument definitions
//! - [`commands`] - interactive quit handling
//!
//! # License
//!
//! This project is licensed under the GNU General Public License v3.0.
//! See LICENSE.md for details.

pub mod cli;
pub mod commands;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod moonraker;
pub mod recorder;
pub mod report;
pub mod session;
pub mod subscription;

pub use error::{RecorderError, RecorderResult};

use chrono::Datelike;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let current_year = chrono::Utc::now().year();
    let copyright_year = if current_year == 2025 {
        "2025".to_string()
    } else {
        format!("2025-{}", current_year)
    };

    println!("{} {} Copyright (C) {} Raul C. Sîmpetru", program_name, version, copyright_year);
    println!("This program comes with ABSOLUTELY NO WARRANTY.");
    println!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
    println!("This is free software, and you are welcome to redistribute it under certain conditions.");
    println!();
}
