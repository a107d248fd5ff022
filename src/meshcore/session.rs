//! Radio session boundary.
//!
//! The radio driver itself lives outside this crate. It is reached through the
//! [`RadioSession`] trait, whose async operations (start, stop, sends) are the
//! only suspension points in the pipeline. Everything the session observes is
//! buffered in an [`EventQueue`] and pulled out synchronously by the poll loop.
//!
//! [`SessionAdapter`] owns the current session object and the connect and
//! disconnect policy: both are bounded by timeouts, and a session that failed to
//! start or was stopped is discarded and replaced with a fresh one built by the
//! factory. A session whose runtime dropped on its own is restarted by the
//! next connect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::contact_book::SharedContactBook;
use super::events::MeshEvent;
use super::lpp::{self, LppError};
use crate::config::radio::{MeshcoreSettings, RuntimeRadioConfig};

/// Callback fired whenever new events are queued. Must not block.
pub type EventNotify = Arc<dyn Fn() + Send + Sync>;

/// Consulted by the driver when a peer asks this node for telemetry. Must not block.
pub type TelemetrySource = Arc<dyn Fn() -> LocalTelemetry + Send + Sync>;

/// Builds a fresh session for a config; used on every rotation.
pub type SessionFactory =
    Box<dyn Fn(&RuntimeRadioConfig, SharedContactBook) -> Box<dyn RadioSession> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("radio did not start within {0:?}")]
    ConnectTimeout(Duration),

    #[error("radio did not stop within {0:?}")]
    DisconnectTimeout(Duration),

    #[error("radio session is not connected")]
    NotConnected,

    #[error("radio driver error: {0}")]
    Driver(String),

    #[error("no contact named '{0}'")]
    UnknownContact(String),

    #[error("no channel named '{0}'")]
    UnknownChannel(String),

    #[error("no telemetry reply within {0:?}")]
    TelemetryTimeout(Duration),

    #[error("unreadable telemetry: {0}")]
    Telemetry(#[from] LppError),
}

/// What this node reports when a peer requests telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalTelemetry {
    pub allow: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl LocalTelemetry {
    /// Position is only offered when the user shares it and it is not the (0,0) placeholder.
    pub fn from_settings(settings: &MeshcoreSettings) -> Self {
        let located = settings.share_position && (settings.latitude != 0.0 || settings.longitude != 0.0);
        Self {
            allow: settings.allow_telemetry,
            lat: located.then_some(settings.latitude),
            lon: located.then_some(settings.longitude),
        }
    }

    /// CayenneLPP reply for an inbound request, or `None` when requests are refused.
    pub fn response_payload(&self) -> Option<Vec<u8>> {
        if !self.allow {
            return None;
        }
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(lpp::encode_gps(1, lat, lon, 0.0)),
            _ => Some(Vec::new()),
        }
    }
}

/// Outcome of a transmit request as reported by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_metadata: Option<serde_json::Value>,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            tx_metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub node_name: String,
}

#[async_trait]
pub trait RadioSession: Send {
    async fn start(&mut self) -> Result<(), TransportError>;

    async fn stop(&mut self) -> Result<(), TransportError>;

    /// Direct message to a contact, addressed by exact display name.
    async fn send_text(&mut self, peer: &str, body: &str) -> Result<SendResult, TransportError>;

    /// Group message; `channel` is the exact-case channel name without `#`.
    async fn send_group_text(&mut self, channel: &str, body: &str) -> Result<SendResult, TransportError>;

    async fn send_advert(&mut self, name: Option<&str>, route_type: &str) -> Result<SendResult, TransportError>;

    /// Ask a peer for its sensor readings. Returns the raw CayenneLPP payload.
    async fn request_telemetry(&mut self, peer: &str) -> Result<Vec<u8>, TransportError>;

    /// Up to `max` queued events, oldest first. Never blocks.
    fn drain_events(&mut self, max: usize) -> Vec<MeshEvent>;

    fn status(&self) -> SessionStatus;

    /// This node's public key as hex, once the driver knows it.
    fn public_key(&self) -> Option<String>;

    fn set_event_notify(&mut self, notify: Option<EventNotify>);

    fn set_telemetry_source(&mut self, source: Option<TelemetrySource>);
}

/// Unbounded FIFO between the session's async side and the poll loop.
pub struct EventQueue {
    tx: mpsc::UnboundedSender<MeshEvent>,
    rx: mpsc::UnboundedReceiver<MeshEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Sender half for driver callbacks.
    pub fn sender(&self) -> mpsc::UnboundedSender<MeshEvent> {
        self.tx.clone()
    }

    pub fn push(&self, event: MeshEvent) {
        // receiver is owned by self, so the channel cannot be closed here
        let _ = self.tx.send(event);
    }

    pub fn drain(&mut self, max: usize) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(event) => out.push(event),
                Err(_) => break,
            }
        }
        out
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionAdapter {
    factory: SessionFactory,
    config: RuntimeRadioConfig,
    session: Box<dyn RadioSession>,
    contacts: SharedContactBook,
    notify: Option<EventNotify>,
    telemetry: Option<TelemetrySource>,
    connected: bool,
    connect_timeout: Duration,
    disconnect_timeout: Duration,
}

impl SessionAdapter {
    pub fn new(
        factory: SessionFactory,
        config: RuntimeRadioConfig,
        contacts: SharedContactBook,
        connect_timeout: Duration,
        disconnect_timeout: Duration,
    ) -> Self {
        let session = factory(&config, contacts.clone());
        Self {
            factory,
            config,
            session,
            contacts,
            notify: None,
            telemetry: None,
            connected: false,
            connect_timeout,
            disconnect_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connected and the driver agrees its runtime is still up.
    pub fn is_live(&self) -> bool {
        self.connected && self.session.status().connected
    }

    pub fn config(&self) -> &RuntimeRadioConfig {
        &self.config
    }

    pub fn contact_book(&self) -> SharedContactBook {
        self.contacts.clone()
    }

    /// Start the session. A failed or timed-out start leaves a fresh session behind.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let runtime_up = self.session.status().connected;
        if self.connected && runtime_up {
            return Ok(());
        }
        if self.connected {
            warn!("Radio runtime dropped; restarting session");
            self.connected = false;
        }
        info!("Starting radio session for node '{}'", self.config.node_name);
        match timeout(self.connect_timeout, self.session.start()).await {
            Ok(Ok(())) => {
                self.connected = true;
                info!("Radio session connected");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Radio start failed: {}", e);
                self.rotate();
                Err(e)
            }
            Err(_) => {
                warn!("Radio start timed out after {:?}", self.connect_timeout);
                self.rotate();
                Err(TransportError::ConnectTimeout(self.connect_timeout))
            }
        }
    }

    /// Stop the session. The session is replaced whether or not stop succeeds.
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.connected && !self.session.status().connected {
            return Ok(());
        }
        let outcome = timeout(self.disconnect_timeout, self.session.stop()).await;
        self.connected = false;
        self.rotate();
        match outcome {
            Ok(Ok(())) => {
                info!("Radio session disconnected");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Radio stop failed, session discarded: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Radio stop timed out after {:?}, session discarded",
                    self.disconnect_timeout
                );
                Err(TransportError::DisconnectTimeout(self.disconnect_timeout))
            }
        }
    }

    /// Adopt a new config. An idle session is rebuilt immediately and `true`
    /// returned; a connected one picks the config up on its next rotation.
    pub fn reconfigure(&mut self, config: RuntimeRadioConfig) -> bool {
        self.config = config;
        if self.connected {
            return false;
        }
        self.rotate();
        true
    }

    pub fn drain_events(&mut self, max: usize) -> Vec<MeshEvent> {
        self.session.drain_events(max)
    }

    pub async fn send_text(&mut self, peer: &str, body: &str) -> Result<SendResult, TransportError> {
        self.require_connected()?;
        self.session.send_text(peer, body).await
    }

    pub async fn send_group_text(&mut self, channel: &str, body: &str) -> Result<SendResult, TransportError> {
        self.require_connected()?;
        self.session.send_group_text(channel, body).await
    }

    pub async fn send_advert(&mut self, name: Option<&str>, route_type: &str) -> Result<SendResult, TransportError> {
        self.require_connected()?;
        self.session.send_advert(name, route_type).await
    }

    /// Bounded by `limit`; a late reply is dropped.
    pub async fn request_telemetry(&mut self, peer: &str, limit: Duration) -> Result<Vec<u8>, TransportError> {
        self.require_connected()?;
        match timeout(limit, self.session.request_telemetry(peer)).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!("Telemetry request to '{}' timed out", peer);
                Err(TransportError::TelemetryTimeout(limit))
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        let status = self.session.status();
        SessionStatus {
            connected: self.connected && status.connected,
            node_name: status.node_name,
        }
    }

    pub fn public_key(&self) -> Option<String> {
        self.session.public_key()
    }

    pub fn set_event_notify(&mut self, notify: Option<EventNotify>) {
        self.notify = notify.clone();
        self.session.set_event_notify(notify);
    }

    pub fn set_telemetry_source(&mut self, source: Option<TelemetrySource>) {
        self.telemetry = source.clone();
        self.session.set_telemetry_source(source);
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn rotate(&mut self) {
        debug!("Replacing radio session");
        let mut session = (self.factory)(&self.config, self.contacts.clone());
        session.set_event_notify(self.notify.clone());
        session.set_telemetry_source(self.telemetry.clone());
        self.session = session;
    }
}
