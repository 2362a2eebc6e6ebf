//! Session state tracker fed by `print_stats` updates.
//!
//! The time origin is the offset between Klipper's `total_duration` counter and the
//! event timestamps of the notification stream. Both tick on the same clock, so their
//! difference is constant for a job. It is taken from the first update that carries
//! `total_duration` and never recomputed afterwards.

use serde_json::{Map, Value};
use tracing::info;

/// Placeholder written to the `filename` column before any file has been selected.
pub const UNKNOWN_FILE: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    current_file: Option<String>,
    print_state: Option<String>,
    time_origin: Option<f64>,
}

/// What a single `print_stats` update changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub state_changed: bool,
    pub file_changed: bool,
    pub origin_established: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the fields of one `print_stats` update received at `timestamp`.
    ///
    /// Missing or mistyped fields are ignored. `filename` is only sent when a file is
    /// first selected, so a repeat print of the same file keeps the previous name.
    pub fn update(&mut self, timestamp: f64, fields: &Map<String, Value>) -> SessionUpdate {
        let mut update = SessionUpdate::default();

        if let Some(state) = fields.get("state").and_then(Value::as_str) {
            self.print_state = Some(state.to_string());
            update.state_changed = true;
            info!("Print state changed to {}", state);
        }

        if let Some(filename) = fields.get("filename").and_then(Value::as_str) {
            self.current_file = Some(filename.to_string());
            update.file_changed = true;
            info!("Print file changed to {}", filename);
        }

        if self.time_origin.is_none()
            && let Some(total_duration) = fields.get("total_duration").and_then(Value::as_f64)
        {
            let origin = total_duration - timestamp;
            self.time_origin = Some(origin);
            update.origin_established = true;
            info!(
                "Set time origin to {}, gathering position data enabled",
                origin
            );
        }

        update
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    /// Name for the `filename` column; empty or absent names become [`UNKNOWN_FILE`].
    pub fn file_label(&self) -> &str {
        match self.current_file.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => UNKNOWN_FILE,
        }
    }

    pub fn print_state(&self) -> Option<&str> {
        self.print_state.as_deref()
    }

    pub fn time_origin(&self) -> Option<f64> {
        self.time_origin
    }

    pub fn is_origin_established(&self) -> bool {
        self.time_origin.is_some()
    }

    /// Shift a remote event timestamp onto the `total_duration` timeline.
    pub fn align(&self, timestamp: f64) -> Option<f64> {
        self.time_origin.map(|origin| timestamp + origin)
    }
}
