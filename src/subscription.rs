//! The set of printer objects the recorder asks Moonraker to report on.

use serde_json::{Map, Value, json};

use crate::error::{RecorderError, RecorderResult};

pub const MOTION_REPORT: &str = "motion_report";
pub const PRINT_STATS: &str = "print_stats";

/// Object classes the recorder cannot run without.
pub const REQUIRED_CLASSES: [&str; 2] = [MOTION_REPORT, PRINT_STATS];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subscription {
    classes: Vec<String>,
}

impl Subscription {
    /// Build a subscription, rejecting any class the printer does not advertise.
    ///
    /// Nothing is sent to the printer here, so an invalid request never reaches the wire.
    pub fn validated<S: AsRef<str>>(requested: &[S], catalogue: &[String]) -> RecorderResult<Self> {
        let mut classes = Vec::with_capacity(requested.len());
        for class in requested {
            let class = class.as_ref();
            if !catalogue.iter().any(|known| known == class) {
                return Err(RecorderError::SubscriptionRequestedForUnknownClass(
                    class.to_string(),
                ));
            }
            if !classes.iter().any(|c: &String| c == class) {
                classes.push(class.to_string());
            }
        }
        Ok(Self { classes })
    }

    /// The empty set; sending it cancels every subscription on the connection.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Parameters for `printer.objects.subscribe`: every class mapped to `null` (all fields).
    pub fn to_params(&self) -> Value {
        let objects: Map<String, Value> = self
            .classes
            .iter()
            .map(|class| (class.clone(), Value::Null))
            .collect();
        json!({ "objects": objects })
    }
}
