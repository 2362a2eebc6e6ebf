#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use klipper_motion_recorder::moonraker::{
    ChannelError, Notification, OBJECTS_LIST, OBJECTS_QUERY, OBJECTS_SUBSCRIBE, SERVER_INFO,
    STATUS_UPDATE, StatusChannel,
};

/// In-memory CSV sink that stays readable after the recorder is dropped.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Data rows (header excluded), split into fields.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.contents()
            .lines()
            .skip(1)
            .map(|line| line.split(',').map(str::to_owned).collect())
            .collect()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that accepts the header row and fails every write after it.
#[derive(Clone, Default)]
pub struct FailAfterHeader {
    accepted: SharedSink,
    writes: Arc<Mutex<usize>>,
}

impl FailAfterHeader {
    pub fn contents(&self) -> String {
        self.accepted.contents()
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.accepted.rows()
    }
}

impl Write for FailAfterHeader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writes = self.writes.lock().unwrap();
        *writes += 1;
        if *writes > 1 {
            return Err(io::Error::other("disk full"));
        }
        self.accepted.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn status_update(classes: Value, eventtime: f64) -> Notification {
    Notification::new(STATUS_UPDATE, json!([classes, eventtime]))
}

pub fn print_stats(fields: Value, eventtime: f64) -> Notification {
    status_update(json!({ "print_stats": fields }), eventtime)
}

pub fn motion_report(fields: Value, eventtime: f64) -> Notification {
    status_update(json!({ "motion_report": fields }), eventtime)
}

/// Scripted stand-in for a Moonraker connection.
///
/// `live` notifications are delivered while subscribed; `in_flight` ones are only
/// released once the subscription is cancelled, mimicking updates already on the wire.
pub struct FakeChannel {
    pub klippy_states: VecDeque<String>,
    pub objects: Vec<String>,
    pub homed_axes: String,
    pub live: VecDeque<Notification>,
    pub in_flight: VecDeque<Notification>,
    /// Report the connection as lost once `live` is exhausted.
    pub close_after_live: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
    unsubscribed: bool,
}

impl FakeChannel {
    pub fn ready() -> Self {
        Self {
            klippy_states: VecDeque::from(vec!["ready".to_string()]),
            objects: vec![
                "toolhead".to_string(),
                "motion_report".to_string(),
                "print_stats".to_string(),
                "webhooks".to_string(),
            ],
            homed_axes: "xyz".to_string(),
            live: VecDeque::new(),
            in_flight: VecDeque::new(),
            close_after_live: false,
            calls: Arc::new(Mutex::new(Vec::new())),
            unsubscribed: false,
        }
    }

    pub fn with_live(mut self, notifications: Vec<Notification>) -> Self {
        self.live = notifications.into();
        self
    }

    pub fn with_in_flight(mut self, notifications: Vec<Notification>) -> Self {
        self.in_flight = notifications.into();
        self
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    fn log(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl StatusChannel for FakeChannel {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.log("connect");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.log("disconnect");
        Ok(())
    }

    async fn call_method(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ChannelError> {
        match method {
            SERVER_INFO => {
                self.log(method);
                // the last scripted state repeats forever
                let state = if self.klippy_states.len() > 1 {
                    self.klippy_states.pop_front().unwrap()
                } else {
                    self.klippy_states.front().cloned().unwrap_or_default()
                };
                Ok(json!({ "klippy_connected": true, "klippy_state": state }))
            }
            OBJECTS_LIST => {
                self.log(method);
                Ok(json!({ "objects": self.objects }))
            }
            OBJECTS_QUERY => {
                self.log(method);
                Ok(json!({
                    "eventtime": 1.0,
                    "status": { "toolhead": { "homed_axes": self.homed_axes } }
                }))
            }
            OBJECTS_SUBSCRIBE => {
                let objects = params
                    .as_ref()
                    .and_then(|p| p.get("objects"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if objects.is_empty() {
                    self.unsubscribed = true;
                    self.log("unsubscribe");
                } else {
                    let names: Vec<&str> = objects.keys().map(String::as_str).collect();
                    self.log(format!("subscribe:{}", names.join(",")));
                }
                Ok(json!({ "eventtime": 1.0, "status": {} }))
            }
            other => Err(ChannelError::Rpc {
                method: other.to_string(),
                code: -32601,
                message: format!("Method not found: {}", other),
            }),
        }
    }

    async fn next_notification(&mut self) -> Option<Notification> {
        if let Some(notification) = self.live.pop_front() {
            return Some(notification);
        }
        if self.unsubscribed {
            if let Some(notification) = self.in_flight.pop_front() {
                return Some(notification);
            }
        }
        if self.close_after_live && !self.unsubscribed {
            return None;
        }
        std::future::pending().await
    }
}
