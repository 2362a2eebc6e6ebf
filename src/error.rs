//! Error taxonomy for a recording session.
//!
//! Schema mismatches (`UnhandledNotification*`, `MalformedNotification`) and sink failures
//! end the session. `StartupReadinessTimeout` is returned after the channel has already
//! been released, so the caller only needs to report it.

use std::time::Duration;

use thiserror::Error;

use crate::moonraker::ChannelError;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("notification method '{method}' is not handled")]
    UnhandledNotificationMethod { method: String },

    #[error("{timestamp}: notification class '{class}' is not handled")]
    UnhandledNotificationClass { class: String, timestamp: f64 },

    #[error("malformed '{method}' notification: {reason}")]
    MalformedNotification { method: String, reason: String },

    #[error("'{0}' is not in printer.objects.list")]
    SubscriptionRequestedForUnknownClass(String),

    #[error("Klippy did not report ready within {0:?}")]
    StartupReadinessTimeout(Duration),

    #[error("output sink is already closed")]
    SinkClosed,

    #[error("output file {0} is locked by another recorder")]
    OutputLocked(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl RecorderError {
    /// True for errors that mean the printer speaks a schema this recorder does not understand.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            RecorderError::UnhandledNotificationMethod { .. }
                | RecorderError::UnhandledNotificationClass { .. }
                | RecorderError::MalformedNotification { .. }
        )
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;
