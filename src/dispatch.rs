//! Event dispatcher: demultiplexes `notify_status_update` bundles.
//!
//! A bundle is `[{class: fields, ...}, eventtime]`. Every entry is checked before anything
//! is routed, so a bundle naming an unknown class changes neither the session state nor
//! the output file. Valid entries are routed in the order they appear in the bundle.

use std::io::Write;

use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{RecorderError, RecorderResult};
use crate::moonraker::{Notification, STATUS_UPDATE};
use crate::recorder::MotionRecorder;
use crate::session::SessionState;
use crate::subscription::{MOTION_REPORT, PRINT_STATS};

pub struct EventDispatcher<W: Write> {
    session: SessionState,
    recorder: MotionRecorder<W>,
    ignored_methods: Vec<String>,
}

impl<W: Write> EventDispatcher<W> {
    pub fn new(recorder: MotionRecorder<W>) -> Self {
        Self {
            session: SessionState::new(),
            recorder,
            ignored_methods: Vec::new(),
        }
    }

    /// Notification methods to skip instead of treating them as a schema mismatch.
    pub fn with_ignored_methods(mut self, methods: Vec<String>) -> Self {
        self.ignored_methods = methods;
        self
    }

    /// Route one notification. Returns the number of rows appended to the sink.
    pub fn dispatch(&mut self, notification: &Notification) -> RecorderResult<usize> {
        if notification.method != STATUS_UPDATE {
            if self.ignored_methods.contains(&notification.method) {
                debug!(method = %notification.method, "ignoring notification");
                return Ok(0);
            }
            error!("Notification method {} is not handled", notification.method);
            return Err(RecorderError::UnhandledNotificationMethod {
                method: notification.method.clone(),
            });
        }

        let (classes, timestamp) = parse_status_update(&notification.params)?;

        let mut routed = Vec::with_capacity(classes.len());
        for (class, fields) in classes {
            if class != MOTION_REPORT && class != PRINT_STATS {
                error!("{}: Notification {} is not handled", timestamp, class);
                return Err(RecorderError::UnhandledNotificationClass {
                    class: class.clone(),
                    timestamp,
                });
            }
            let Some(fields) = fields.as_object() else {
                return Err(malformed(format!("fields of '{}' are not an object", class)));
            };
            routed.push((class == MOTION_REPORT, fields));
        }

        let mut appended = 0;
        for (is_motion, fields) in routed {
            if is_motion {
                if self.recorder.record(&self.session, timestamp, fields)? {
                    appended += 1;
                }
            } else {
                self.session.update(timestamp, fields);
            }
        }

        Ok(appended)
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn recorder(&self) -> &MotionRecorder<W> {
        &self.recorder
    }

    /// Flush and close the output sink.
    pub fn close(&mut self) -> RecorderResult<()> {
        self.recorder.close()
    }
}

fn parse_status_update(params: &Value) -> RecorderResult<(&Map<String, Value>, f64)> {
    let items = params
        .as_array()
        .ok_or_else(|| malformed("params are not an array".to_string()))?;

    let classes = items
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("first parameter is not an object".to_string()))?;

    let timestamp = items
        .get(1)
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("second parameter is not a timestamp".to_string()))?;

    Ok((classes, timestamp))
}

fn malformed(reason: String) -> RecorderError {
    RecorderError::MalformedNotification {
        method: STATUS_UPDATE.to_string(),
        reason,
    }
}
