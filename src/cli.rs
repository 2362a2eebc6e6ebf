use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::ControllerConfig;
use crate::moonraker::ClientConfig;

#[derive(Parser, Clone, Debug)]
#[command(name = "motion-recorder")]
#[command(about = "Dump printer location data from Klipper using the Moonraker API into a CSV file")]
#[command(version)]
pub struct Args {
    #[arg(help = "Moonraker hostname")]
    pub host: String,

    #[arg(help = "Moonraker port")]
    pub port: u16,

    #[arg(help = "Output CSV file")]
    pub output: PathBuf,

    #[arg(long, short = 'q', help = "Do not echo every recorded row")]
    pub quiet: bool,

    #[arg(long, help = "Moonraker API key (sent as X-Api-Key)")]
    pub api_key: Option<String>,

    #[arg(
        long,
        default_value = "10.0",
        value_parser = parse_seconds,
        help = "Seconds to wait for Klippy to report ready"
    )]
    pub ready_timeout: f64,

    #[arg(
        long,
        default_value = "250",
        help = "Interval in milliseconds between readiness checks"
    )]
    pub ready_poll_interval_ms: u64,

    #[arg(
        long,
        default_value = "2.0",
        value_parser = parse_seconds,
        help = "Seconds to keep handling notifications after unsubscribing"
    )]
    pub drain_grace: f64,

    #[arg(
        long,
        default_value = "10.0",
        value_parser = parse_seconds,
        help = "Timeout in seconds for a single Moonraker request"
    )]
    pub request_timeout: f64,

    #[arg(
        long = "ignore-method",
        value_name = "METHOD",
        help = "Notification method to skip instead of aborting (repeatable)"
    )]
    pub ignored_methods: Vec<String>,

    #[arg(long, help = "Write a JSON summary next to the output file")]
    pub metadata: bool,
}

impl Args {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_secs_f64(self.request_timeout),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            ready_timeout: Duration::from_secs_f64(self.ready_timeout),
            ready_poll_interval: Duration::from_millis(self.ready_poll_interval_ms),
            drain_grace: Duration::from_secs_f64(self.drain_grace),
            ..ControllerConfig::default()
        }
    }

    /// Recorder configuration for the metadata sidecar. The API key is never included.
    pub fn to_recorder_config_json(&self) -> serde_json::Value {
        json!({
            "host": self.host,
            "port": self.port,
            "output": self.output.display().to_string(),
            "quiet": self.quiet,
            "ready_timeout": self.ready_timeout,
            "ready_poll_interval_ms": self.ready_poll_interval_ms,
            "drain_grace": self.drain_grace,
            "request_timeout": self.request_timeout,
            "ignored_methods": self.ignored_methods,
        })
    }
}

/// Parse a non-negative, finite number of seconds.
fn parse_seconds(value: &str) -> Result<f64, String> {
    let secs: f64 = value
        .parse()
        .map_err(|e| format!("'{}' is not a number: {}", value, e))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("'{}' is not a valid number of seconds", value));
    }
    Ok(secs)
}
