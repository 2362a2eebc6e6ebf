//! JSON-RPC 2.0 frames as spoken by the Moonraker websocket.
//!
//! Outgoing traffic is always a request with a numeric id. Incoming frames are either the
//! response to one of those requests or a server-initiated notification (no id).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChannelError;

/// JSON-RPC version marker, always serialized as "2.0".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected JSON-RPC version '2.0', got '{}'",
                s
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC error object returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i64,
    pub message: String,
}

/// A server-initiated message, e.g. `notify_status_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    Response {
        id: u64,
        result: Result<Value, ErrorData>,
    },
    Notification(Notification),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorData>,
}

impl IncomingFrame {
    /// Classify one websocket text frame.
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        let raw: RawFrame = serde_json::from_str(text)?;

        match (raw.id, raw.method) {
            (Some(id), _) => {
                let result = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(IncomingFrame::Response { id, result })
            }
            (None, Some(method)) => Ok(IncomingFrame::Notification(Notification {
                method,
                // notifications without params still carry the method name
                params: raw.params.unwrap_or(Value::Null),
            })),
            (None, None) => Err(ChannelError::UnexpectedResponse(format!(
                "frame has neither id nor method: {}",
                text
            ))),
        }
    }
}
