//! In-memory radio session for tests and `start --mock`.
//!
//! Every session built by [`MockSession::factory`] shares one [`MockHandle`], so
//! a test can keep inspecting sends and injecting events after the adapter has
//! rotated its session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use tokio::sync::mpsc;

use super::contact_book::SharedContactBook;
use super::events::MeshEvent;
use super::session::{
    EventNotify, EventQueue, RadioSession, SendResult, SessionFactory, SessionStatus, TelemetrySource,
    TransportError,
};
use crate::config::radio::RuntimeRadioConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    Text { peer: String, body: String },
    GroupText { channel: String, body: String },
    Advert { name: Option<String>, route_type: String },
    TelemetryRequest { peer: String },
}

#[derive(Default)]
struct MockState {
    sent: Vec<SentItem>,
    sessions_built: usize,
    starts: usize,
    fail_start: Option<String>,
    fail_stop: Option<String>,
    fail_send: Option<String>,
    start_delay: Option<Duration>,
    stop_delay: Option<Duration>,
    strict_contacts: bool,
    /// Set when the current runtime died without a stop; cleared by the next start.
    runtime_dropped: bool,
    public_key: Option<String>,
    telemetry_replies: HashMap<String, Vec<u8>>,
    sender: Option<mpsc::UnboundedSender<MeshEvent>>,
    notify: Option<EventNotify>,
    telemetry_source: Option<TelemetrySource>,
}

/// Test-side control over the mock sessions.
#[derive(Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an event on the current session and fire its notify callback.
    pub fn push_event(&self, event: MeshEvent) {
        let notify = {
            let state = self.lock();
            if let Some(tx) = &state.sender {
                let _ = tx.send(event);
            }
            state.notify.clone()
        };
        if let Some(notify) = notify {
            notify();
        }
    }

    /// Kill the running session's runtime as a crashed driver would.
    pub fn drop_runtime(&self) {
        self.lock().runtime_dropped = true;
    }

    /// Payload the mock returns when `peer` is asked for telemetry.
    pub fn set_telemetry_reply(&self, peer: &str, payload: Vec<u8>) {
        self.lock().telemetry_replies.insert(peer.to_string(), payload);
    }

    /// Answer an inbound telemetry request the way the driver would:
    /// `None` when this node refuses, otherwise the CayenneLPP reply.
    pub fn answer_telemetry_request(&self) -> Option<Vec<u8>> {
        let source = self.lock().telemetry_source.clone()?;
        source().response_payload()
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.lock().sent.clone()
    }

    pub fn sessions_built(&self) -> usize {
        self.lock().sessions_built
    }

    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    /// Fixed identity key for every session; random per session otherwise.
    pub fn set_public_key(&self, key: &str) {
        self.lock().public_key = Some(key.to_ascii_lowercase());
    }

    pub fn fail_start(&self, reason: Option<&str>) {
        self.lock().fail_start = reason.map(str::to_string);
    }

    pub fn fail_stop(&self, reason: Option<&str>) {
        self.lock().fail_stop = reason.map(str::to_string);
    }

    pub fn fail_send(&self, reason: Option<&str>) {
        self.lock().fail_send = reason.map(str::to_string);
    }

    pub fn delay_start(&self, delay: Option<Duration>) {
        self.lock().start_delay = delay;
    }

    pub fn delay_stop(&self, delay: Option<Duration>) {
        self.lock().stop_delay = delay;
    }

    /// Reject direct sends to names missing from the contact book.
    pub fn strict_contacts(&self, strict: bool) {
        self.lock().strict_contacts = strict;
    }
}

pub struct MockSession {
    handle: MockHandle,
    node_name: String,
    public_key: String,
    contacts: SharedContactBook,
    queue: EventQueue,
    running: bool,
}

impl MockSession {
    pub fn new(config: &RuntimeRadioConfig, contacts: SharedContactBook, handle: MockHandle) -> Self {
        let queue = EventQueue::new();
        let public_key = {
            let mut state = handle.lock();
            state.sessions_built += 1;
            state.sender = Some(queue.sender());
            state.public_key.clone().unwrap_or_else(random_key_hex)
        };
        debug!("Mock session built for '{}'", config.node_name);
        Self {
            handle,
            node_name: config.node_name.clone(),
            public_key,
            contacts,
            queue,
            running: false,
        }
    }

    pub fn factory(handle: MockHandle) -> SessionFactory {
        Box::new(
            move |config: &RuntimeRadioConfig, contacts: SharedContactBook| -> Box<dyn RadioSession> {
                Box::new(MockSession::new(config, contacts, handle.clone()))
            },
        )
    }

    fn is_running(&self) -> bool {
        self.running && !self.handle.lock().runtime_dropped
    }

    fn check_send(&self) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotConnected);
        }
        match &self.handle.lock().fail_send {
            Some(reason) => Err(TransportError::Driver(reason.clone())),
            None => Ok(()),
        }
    }
}

fn random_key_hex() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill(&mut key);
    hex::encode(key)
}

#[async_trait]
impl RadioSession for MockSession {
    async fn start(&mut self) -> Result<(), TransportError> {
        let (delay, failure) = {
            let mut state = self.handle.lock();
            state.starts += 1;
            (state.start_delay, state.fail_start.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Err(TransportError::Driver(reason));
        }
        self.running = true;
        self.handle.lock().runtime_dropped = false;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        let (delay, failure) = {
            let state = self.handle.lock();
            (state.stop_delay, state.fail_stop.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.running = false;
        match failure {
            Some(reason) => Err(TransportError::Driver(reason)),
            None => Ok(()),
        }
    }

    async fn send_text(&mut self, peer: &str, body: &str) -> Result<SendResult, TransportError> {
        self.check_send()?;
        let strict = self.handle.lock().strict_contacts;
        let known = self
            .contacts
            .lock()
            .map(|book| book.get(peer).is_some())
            .unwrap_or(false);
        if strict && !known {
            return Err(TransportError::UnknownContact(peer.to_string()));
        }
        self.handle.lock().sent.push(SentItem::Text {
            peer: peer.to_string(),
            body: body.to_string(),
        });
        Ok(SendResult::ok())
    }

    async fn send_group_text(&mut self, channel: &str, body: &str) -> Result<SendResult, TransportError> {
        self.check_send()?;
        if channel.trim().is_empty() {
            return Err(TransportError::UnknownChannel(channel.to_string()));
        }
        self.handle.lock().sent.push(SentItem::GroupText {
            channel: channel.to_string(),
            body: body.to_string(),
        });
        Ok(SendResult::ok())
    }

    async fn send_advert(&mut self, name: Option<&str>, route_type: &str) -> Result<SendResult, TransportError> {
        self.check_send()?;
        self.handle.lock().sent.push(SentItem::Advert {
            name: name.map(str::to_string),
            route_type: route_type.to_string(),
        });
        Ok(SendResult {
            success: true,
            tx_metadata: Some(serde_json::json!({ "route_type": route_type })),
        })
    }

    async fn request_telemetry(&mut self, peer: &str) -> Result<Vec<u8>, TransportError> {
        self.check_send()?;
        let mut state = self.handle.lock();
        state.sent.push(SentItem::TelemetryRequest { peer: peer.to_string() });
        state
            .telemetry_replies
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::Driver(format!("no telemetry reply from '{}'", peer)))
    }

    fn drain_events(&mut self, max: usize) -> Vec<MeshEvent> {
        self.queue.drain(max)
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            connected: self.is_running(),
            node_name: self.node_name.clone(),
        }
    }

    fn public_key(&self) -> Option<String> {
        Some(self.public_key.clone())
    }

    fn set_event_notify(&mut self, notify: Option<EventNotify>) {
        self.handle.lock().notify = notify;
    }

    fn set_telemetry_source(&mut self, source: Option<TelemetrySource>) {
        self.handle.lock().telemetry_source = source;
    }
}
