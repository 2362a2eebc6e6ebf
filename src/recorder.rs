//! Motion recorder: turns `motion_report` updates into CSV rows.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RecorderError, RecorderResult};
use crate::session::SessionState;

/// Header row of the output file. Column order is part of the file format.
pub const COLUMNS: [&str; 9] = [
    "filename",
    "rectime",
    "time",
    "origts",
    "live_position_x",
    "live_position_y",
    "live_position_z",
    "live_position_e",
    "live_velocity",
];

/// One observed toolhead reading, aligned to the print's duration timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    pub filename: String,
    /// Local wall-clock time the update was processed. Informational only.
    pub captured_at: DateTime<Utc>,
    /// `original_timestamp + time_origin`.
    pub aligned_time: f64,
    pub original_timestamp: f64,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
    pub position_z: Option<f64>,
    pub position_e: Option<f64>,
    pub velocity: Option<f64>,
}

impl MotionSample {
    /// Build a sample from a `motion_report` update, or `None` while the time origin is unknown.
    pub fn from_update(
        session: &SessionState,
        timestamp: f64,
        fields: &Map<String, Value>,
        captured_at: DateTime<Utc>,
    ) -> Option<Self> {
        let aligned_time = session.align(timestamp)?;

        let position = fields.get("live_position").and_then(Value::as_array);
        let axis = |i: usize| position.and_then(|p| p.get(i)).and_then(Value::as_f64);

        Some(Self {
            filename: session.file_label().to_string(),
            captured_at,
            aligned_time,
            original_timestamp: timestamp,
            position_x: axis(0),
            position_y: axis(1),
            position_z: axis(2),
            position_e: axis(3),
            velocity: fields.get("live_velocity").and_then(Value::as_f64),
        })
    }

    /// Capture time as nanoseconds since the Unix epoch.
    pub fn rectime(&self) -> i64 {
        self.captured_at.timestamp_nanos_opt().unwrap_or_default()
    }

    fn row(&self) -> MotionRow<'_> {
        MotionRow {
            filename: &self.filename,
            rectime: self.rectime(),
            time: self.aligned_time,
            origts: self.original_timestamp,
            live_position_x: self.position_x,
            live_position_y: self.position_y,
            live_position_z: self.position_z,
            live_position_e: self.position_e,
            live_velocity: self.velocity,
        }
    }
}

impl fmt::Display for MotionSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt(v: Option<f64>) -> String {
            v.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
        }

        write!(
            f,
            "{}\ttime={:.6}\torigts={:.6}\tpos=[{}, {}, {}, {}]\tv={}",
            self.filename,
            self.aligned_time,
            self.original_timestamp,
            opt(self.position_x),
            opt(self.position_y),
            opt(self.position_z),
            opt(self.position_e),
            opt(self.velocity)
        )
    }
}

// Field order must match COLUMNS
#[derive(Serialize)]
struct MotionRow<'a> {
    filename: &'a str,
    rectime: i64,
    time: f64,
    origts: f64,
    live_position_x: Option<f64>,
    live_position_y: Option<f64>,
    live_position_z: Option<f64>,
    live_position_e: Option<f64>,
    live_velocity: Option<f64>,
}

/// Running totals kept by the recorder for the session summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RecorderStats {
    pub rows_written: u64,
    pub samples_dropped: u64,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
}

/// Append-only CSV sink for [`MotionSample`]s.
pub struct MotionRecorder<W: Write> {
    writer: Option<csv::Writer<W>>,
    echo: bool,
    stats: RecorderStats,
}

impl<W: Write> MotionRecorder<W> {
    /// Wrap `sink` and write the header row immediately, so even an empty session
    /// leaves a well-formed file.
    pub fn new(sink: W, echo: bool) -> RecorderResult<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        writer.write_record(COLUMNS)?;
        writer.flush()?;

        Ok(Self {
            writer: Some(writer),
            echo,
            stats: RecorderStats::default(),
        })
    }

    /// Record one `motion_report` update.
    ///
    /// Returns `Ok(false)` when the update is dropped because the time origin is not yet
    /// known; such updates are discarded, never queued. A write failure is returned as is.
    pub fn record(
        &mut self,
        session: &SessionState,
        timestamp: f64,
        fields: &Map<String, Value>,
    ) -> RecorderResult<bool> {
        let Some(sample) = MotionSample::from_update(session, timestamp, fields, Utc::now()) else {
            self.stats.samples_dropped += 1;
            return Ok(false);
        };

        self.append(&sample)?;
        Ok(true)
    }

    /// Append an already built sample as one row and flush it to the sink.
    ///
    /// Updates arrive a few times per second, so every row goes straight to disk and an
    /// aborted session keeps everything recorded up to that point.
    pub fn append(&mut self, sample: &MotionSample) -> RecorderResult<()> {
        let writer = self.writer.as_mut().ok_or(RecorderError::SinkClosed)?;

        if self.echo {
            println!("{}", sample);
        }

        writer.serialize(sample.row())?;
        writer.flush()?;

        self.stats.rows_written += 1;
        if self.stats.first_timestamp.is_none() {
            self.stats.first_timestamp = Some(sample.original_timestamp);
        }
        self.stats.last_timestamp = Some(sample.original_timestamp);
        Ok(())
    }

    /// Flush and release the sink. Later appends fail with [`RecorderError::SinkClosed`].
    pub fn close(&mut self) -> RecorderResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }
}

/// Open `path` for a new recording, truncating it once an exclusive lock is held.
///
/// The lock lives as long as the returned file, so a second recorder pointed at the same
/// output fails instead of interleaving rows.
pub fn open_output_file(path: &Path) -> RecorderResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    if file.try_lock_exclusive().is_err() {
        return Err(RecorderError::OutputLocked(path.display().to_string()));
    }

    file.set_len(0)?;
    Ok(file)
}
