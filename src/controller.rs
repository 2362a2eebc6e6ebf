//! Session controller: the recording lifecycle from connect to close.
//!
//! ```text
//! Disconnected -> Connected -> AwaitingReady -> Subscribed -> Draining -> Closed
//!                                    |                             ^
//!                                    +--- readiness timeout -------+
//! ```
//!
//! Every path ends in `Closed` exactly once: the sink is flushed and closed and the
//! channel is disconnected whether the run finished normally or failed.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::dispatch::EventDispatcher;
use crate::error::{RecorderError, RecorderResult};
use crate::moonraker::{ChannelError, KLIPPY_READY, Notification, OBJECTS_SUBSCRIBE, StatusChannel};
use crate::report::SessionReport;
use crate::subscription::{REQUIRED_CLASSES, Subscription};

/// Axes Klipper reports once the machine is fully homed.
const HOMED_AXES: &str = "xyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connected,
    AwaitingReady,
    Subscribed,
    Draining,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Upper bound on waiting for Klippy to report ready.
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    /// How long to keep dispatching after unsubscribing. Notifications still in flight
    /// when it expires are lost.
    pub drain_grace: Duration,
    pub classes: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            ready_poll_interval: Duration::from_millis(250),
            drain_grace: Duration::from_secs(2),
            classes: REQUIRED_CLASSES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

pub struct SessionController<C: StatusChannel, W: Write> {
    channel: C,
    dispatcher: EventDispatcher<W>,
    config: ControllerConfig,
    phase: SessionPhase,
    started_at: DateTime<Utc>,
    homed: Option<bool>,
    events_dispatched: u64,
}

impl<C: StatusChannel, W: Write> SessionController<C, W> {
    pub fn new(channel: C, dispatcher: EventDispatcher<W>, config: ControllerConfig) -> Self {
        Self {
            channel,
            dispatcher,
            config,
            phase: SessionPhase::Disconnected,
            started_at: Utc::now(),
            homed: None,
            events_dispatched: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run one recording session until `quit` resolves or a fatal error occurs.
    ///
    /// `quit` is only observed between notifications; a notification that is being
    /// dispatched always finishes first. The controller is left in [`SessionPhase::Closed`]
    /// whether the run succeeds or fails.
    pub async fn run<Q>(&mut self, quit: Q) -> RecorderResult<SessionReport>
    where
        Q: Future<Output = ()>,
    {
        self.started_at = Utc::now();

        let result = self.record(quit).await;
        if let Err(e) = &result {
            if e.is_schema_mismatch() {
                error!("Printer schema mismatch, aborting: {}", e);
            } else if !matches!(e, RecorderError::StartupReadinessTimeout(_)) {
                error!("Recording failed: {}", e);
            }
        }

        let cleanup = self.shutdown().await;

        result?;
        cleanup?;
        Ok(self.report())
    }

    async fn record<Q>(&mut self, quit: Q) -> RecorderResult<()>
    where
        Q: Future<Output = ()>,
    {
        self.channel.connect().await?;
        self.transition(SessionPhase::Connected);

        self.transition(SessionPhase::AwaitingReady);
        self.wait_until_ready().await?;
        info!("Klipper ready");

        let catalogue = self.channel.list_objects().await?;
        self.check_homing().await;

        let subscription = Subscription::validated(&self.config.classes, &catalogue)?;
        info!("Subscribing to {}", subscription.classes().join(", "));
        self.channel
            .call_method(OBJECTS_SUBSCRIBE, Some(subscription.to_params()))
            .await?;
        self.transition(SessionPhase::Subscribed);

        info!("Listening for motion data and print stats");
        println!("Press q then Enter (or Ctrl+C) to stop recording");
        self.listen(quit).await?;

        self.transition(SessionPhase::Draining);
        info!("Cancelling subscriptions");
        self.channel
            .call_method(OBJECTS_SUBSCRIBE, Some(Subscription::empty().to_params()))
            .await?;

        info!(
            "Waiting {:?} for pending notifications to be handled",
            self.config.drain_grace
        );
        self.drain().await
    }

    async fn wait_until_ready(&mut self) -> RecorderResult<()> {
        let timeout = self.config.ready_timeout;
        let interval = self.config.ready_poll_interval;
        let channel = &mut self.channel;

        let poll = async {
            loop {
                match channel.klippy_state().await {
                    Ok(state) if state == KLIPPY_READY => return Ok(()),
                    Ok(state) => debug!(%state, "Klippy not ready yet"),
                    // Moonraker answers with an error while Klippy is still connecting
                    Err(ChannelError::Rpc { message, .. }) => debug!(%message, "Klippy not ready yet"),
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("Klippy isn't ready after {:?}", timeout);
                Err(RecorderError::StartupReadinessTimeout(timeout))
            }
        }
    }

    async fn check_homing(&mut self) {
        match self.channel.query_object("toolhead").await {
            Ok(toolhead) => {
                let homed_axes = toolhead
                    .get("homed_axes")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let homed = homed_axes == HOMED_AXES;
                if !homed {
                    warn!(
                        "Printer does not appear to be homed (homed axes: '{}'). Location data may be incorrect!",
                        homed_axes
                    );
                }
                self.homed = Some(homed);
            }
            Err(e) => warn!("Could not query toolhead homing state: {}", e),
        }
    }

    async fn listen<Q>(&mut self, quit: Q) -> RecorderResult<()>
    where
        Q: Future<Output = ()>,
    {
        tokio::pin!(quit);

        loop {
            tokio::select! {
                _ = &mut quit => {
                    info!("Quit requested");
                    return Ok(());
                }
                notification = self.channel.next_notification() => {
                    let Some(notification) = notification else {
                        return Err(ChannelError::Closed.into());
                    };
                    self.dispatch(&notification)?;
                }
            }
        }
    }

    async fn drain(&mut self) -> RecorderResult<()> {
        let deadline = tokio::time::sleep(self.config.drain_grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                notification = self.channel.next_notification() => {
                    match notification {
                        Some(notification) => self.dispatch(&notification)?,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, notification: &Notification) -> RecorderResult<()> {
        self.dispatcher.dispatch(notification)?;
        self.events_dispatched += 1;
        Ok(())
    }

    async fn shutdown(&mut self) -> RecorderResult<()> {
        let sink = self.dispatcher.close();
        match &sink {
            Ok(()) => info!("Closed output"),
            Err(e) => error!("Failed to close output: {}", e),
        }

        let channel = self.channel.disconnect().await;
        if let Err(e) = &channel {
            warn!("Failed to disconnect cleanly: {}", e);
        }
        self.transition(SessionPhase::Closed);

        sink?;
        channel?;
        Ok(())
    }

    fn transition(&mut self, next: SessionPhase) {
        debug!(from = ?self.phase, to = ?next, "session phase");
        self.phase = next;
    }

    fn report(&self) -> SessionReport {
        let session = self.dispatcher.session();
        SessionReport {
            started_at: self.started_at,
            finished_at: Utc::now(),
            events_dispatched: self.events_dispatched,
            recorder: self.dispatcher.recorder().stats(),
            time_origin: session.time_origin(),
            last_file: session.current_file().map(str::to_owned),
            last_print_state: session.print_state().map(str::to_owned),
            homed: self.homed,
            recorder_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
