//! Remote status channel: the Moonraker websocket API.
//!
//! [`StatusChannel`] is the seam the session controller drives. It exposes the four
//! primitives of the remote API (connect, disconnect, call a method, receive the next
//! notification) plus the handful of typed calls the recorder needs. [`MoonrakerClient`]
//! implements it over `tokio-tungstenite`; tests substitute a scripted fake.
//!
//! Notifications are delivered through an unbounded queue in arrival order, so the
//! consumer sees exactly the order the server sent them and no frame is reordered.

pub mod jsonrpc;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

pub use jsonrpc::{ErrorData, IncomingFrame, JsonRpcRequest, Notification};

pub const SERVER_INFO: &str = "server.info";
pub const OBJECTS_LIST: &str = "printer.objects.list";
pub const OBJECTS_QUERY: &str = "printer.objects.query";
pub const OBJECTS_SUBSCRIBE: &str = "printer.objects.subscribe";

/// Notification method carrying subscribed object updates.
pub const STATUS_UPDATE: &str = "notify_status_update";

/// `klippy_state` value reported once the printer firmware is usable.
pub const KLIPPY_READY: &str = "ready";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid API key header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("{method} failed: {message} (code {code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[async_trait]
pub trait StatusChannel: Send {
    async fn connect(&mut self) -> Result<(), ChannelError>;

    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    async fn call_method(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ChannelError>;

    /// Next notification in arrival order, or `None` once the connection is gone.
    async fn next_notification(&mut self) -> Option<Notification>;

    /// Current `klippy_state` as reported by `server.info`.
    async fn klippy_state(&mut self) -> Result<String, ChannelError> {
        let info = self.call_method(SERVER_INFO, None).await?;
        info.get("klippy_state")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                ChannelError::UnexpectedResponse(format!("{} without klippy_state", SERVER_INFO))
            })
    }

    /// Names of every printer object that can be queried or subscribed to.
    async fn list_objects(&mut self) -> Result<Vec<String>, ChannelError> {
        let result = self.call_method(OBJECTS_LIST, None).await?;
        let objects = result
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ChannelError::UnexpectedResponse(format!("{} without objects", OBJECTS_LIST))
            })?;

        Ok(objects
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect())
    }

    /// Current status of a single printer object, e.g. `toolhead`.
    async fn query_object(&mut self, object: &str) -> Result<Value, ChannelError> {
        let result = self
            .call_method(OBJECTS_QUERY, Some(json!({ "objects": { object: null } })))
            .await?;
        result
            .get("status")
            .and_then(|status| status.get(object))
            .cloned()
            .ok_or_else(|| {
                ChannelError::UnexpectedResponse(format!("{} without status.{}", OBJECTS_QUERY, object))
            })
    }
}

/// Connection settings for [`MoonrakerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            api_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/websocket", self.host, self.port)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ErrorData>>>>>;

/// JSON-RPC client for the Moonraker websocket.
///
/// A background task reads every frame: responses are handed back to the waiting
/// [`call_method`](StatusChannel::call_method), notifications are queued for
/// [`next_notification`](StatusChannel::next_notification).
pub struct MoonrakerClient {
    config: ClientConfig,
    next_id: u64,
    writer: Option<SplitSink<WsStream, Message>>,
    pending: PendingCalls,
    notifications: Option<mpsc::UnboundedReceiver<Notification>>,
    reader: Option<JoinHandle<()>>,
}

impl MoonrakerClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            next_id: 1,
            writer: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            notifications: None,
            reader: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

#[async_trait]
impl StatusChannel for MoonrakerClient {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        let mut request = self.config.websocket_url().into_client_request()?;
        if let Some(key) = &self.config.api_key {
            request
                .headers_mut()
                .insert("X-Api-Key", HeaderValue::from_str(key)?);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        let (writer, reader) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        self.writer = Some(writer);
        self.notifications = Some(rx);
        self.reader = Some(tokio::spawn(read_frames(reader, self.pending.clone(), tx)));

        debug!(url = %self.config.websocket_url(), "websocket connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        if let Some(mut writer) = self.writer.take() {
            match writer.close().await {
                Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {}
                Err(e) => warn!("error closing websocket: {}", e),
            }
        }

        if let Some(mut reader) = self.reader.take() {
            // give the server a moment to acknowledge the close frame
            if tokio::time::timeout(Duration::from_secs(1), &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }

        self.notifications = None;
        self.pending.lock().await.clear();
        debug!("websocket disconnected");
        Ok(())
    }

    async fn call_method(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::NotConnected)?;

        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        debug!(id, method, "sending request");
        if let Err(e) = writer.send(Message::text(frame)).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ChannelError::Timeout {
                    method: method.to_string(),
                    timeout: self.config.request_timeout,
                })
            }
            Ok(Err(_)) => Err(ChannelError::Closed),
            Ok(Ok(Err(error))) => Err(ChannelError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    async fn next_notification(&mut self) -> Option<Notification> {
        match self.notifications.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

async fn read_frames(
    mut reader: SplitStream<WsStream>,
    pending: PendingCalls,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                debug!(?frame, "websocket closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("websocket read error: {}", e);
                break;
            }
        };

        match IncomingFrame::parse(text.as_str()) {
            Ok(IncomingFrame::Response { id, result }) => {
                match pending.lock().await.remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!(id, "response for unknown request"),
                }
            }
            Ok(IncomingFrame::Notification(notification)) => {
                if notifications.send(notification).is_err() {
                    break;
                }
            }
            Err(e) => warn!("dropping unparseable frame: {}", e),
        }
    }

    // Dropping the waiters turns outstanding calls into ChannelError::Closed
    pending.lock().await.clear();
}
