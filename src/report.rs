//! Summary of a finished recording, optionally written next to the CSV output.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::RecorderResult;
use crate::recorder::RecorderStats;

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub events_dispatched: u64,
    pub recorder: RecorderStats,
    pub time_origin: Option<f64>,
    pub last_file: Option<String>,
    pub last_print_state: Option<String>,
    /// `None` when the toolhead could not be queried.
    pub homed: Option<bool>,
    pub recorder_version: String,
}

impl SessionReport {
    pub fn print_summary(&self) {
        println!("RECORDING SUMMARY");
        println!("=================");
        println!("Rows written:\t\t{}", self.recorder.rows_written);
        println!(
            "Dropped (no origin):\t{}",
            self.recorder.samples_dropped
        );
        match self.time_origin {
            Some(origin) => println!("Time origin:\t\t{:.6}", origin),
            None => println!("Time origin:\t\tnever established"),
        }
        if let (Some(first), Some(last)) = (self.recorder.first_timestamp, self.recorder.last_timestamp) {
            println!("Recorded span:\t\t{:.3} seconds", last - first);
        }
        println!(
            "Last file:\t\t{}",
            self.last_file.as_deref().unwrap_or("-")
        );
        println!(
            "Last print state:\t{}",
            self.last_print_state.as_deref().unwrap_or("-")
        );
    }
}

/// Path of the metadata sidecar for an output file: `run.csv` -> `run.csv.json`.
pub fn metadata_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Write the session report together with the recorder configuration as pretty JSON.
pub fn write_metadata(path: &Path, report: &SessionReport, config: Value) -> RecorderResult<()> {
    let document = json!({
        "session": report,
        "config": config,
    });

    let mut file = File::create(path)?;
    file.write_all(serde_json::to_string_pretty(&document).map_err(std::io::Error::other)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
