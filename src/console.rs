//! # Console - the poll-driven pipeline
//!
//! [`MeshConsole`] ties the pieces together. It owns the radio session adapter,
//! the enrichment engine, the mesh state and the packet log. A UI (or the
//! `start` loop in the binary) calls [`MeshConsole::poll_events`] on a short
//! interval; each call drains the session, enriches the batch, applies it to
//! the state and persists packets, all on the caller's task.
//!
//! User actions (connect, send, settings changes) are async only where they
//! wait on the radio. Lifecycle events such as `session_connected` are
//! buffered locally and surface on the next poll, in order with radio events.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use crate::config::radio::{apply_preset, runtime_config_from_settings, MeshcoreSettings};
use crate::config::Config;
use crate::logutil::escape_log;
use crate::meshcore::contact_book::{ContactBook, SharedContactBook};
use crate::meshcore::enrich::{enrich_stored, Enricher, PacketPatch, PacketPatchSink, PeerLookup};
use crate::meshcore::events::{
    AdvertSentInfo, MeshEvent, MessageSentInfo, NodeInfo, RadioErrorInfo, TelemetryInfo,
};
use crate::meshcore::lpp::TelemetryReport;
use crate::meshcore::session::{
    EventNotify, LocalTelemetry, SendResult, SessionAdapter, SessionFactory, TelemetrySource, TransportError,
};
use crate::models::{Channel, DeviceStatus, Message, Peer};
use crate::state::{MeshState, NodeContext, OutboundTarget, PeerKey, StateLimits};
use crate::storage::{MeshStore, PacketStore, SettingsStore, StorageError, StoreLimits, StoredPacket};

pub struct MeshConsole {
    store: MeshStore,
    adapter: SessionAdapter,
    enricher: Enricher,
    state: MeshState,
    packets: PacketStore,
    settings_store: SettingsStore,
    settings: MeshcoreSettings,
    /// Locally generated events waiting for the next poll.
    outbox: Vec<MeshEvent>,
    history: VecDeque<MeshEvent>,
    history_limit: usize,
    telemetry_timeout: Duration,
    notify: Option<EventNotify>,
}

impl MeshConsole {
    /// Open the store under `config.storage.data_dir` and build a console on it.
    pub fn open(config: &Config, factory: SessionFactory) -> Result<Self, StorageError> {
        let limits = StoreLimits {
            max_messages: config.storage.max_messages,
            max_packets: config.storage.max_packets,
        };
        let store = MeshStore::open_with_limits(&config.storage.data_dir, limits)?;
        Self::with_store(store, config, factory)
    }

    pub fn with_store(store: MeshStore, config: &Config, factory: SessionFactory) -> Result<Self, StorageError> {
        let settings_store = store.settings()?;
        let settings = settings_store.load()?;
        let packets = store.packets()?;

        let ctx = NodeContext {
            node_name: settings.node_name.clone(),
            self_public_key: None,
        };
        let limits = StateLimits {
            dedup_window: config.storage.dedup_window,
            max_messages: config.storage.max_messages,
        };
        let mut state = MeshState::load(&store, ctx, limits)?;
        let added = state.sync_channel_secrets(&store.channel_secrets()?.list()?);
        if added > 0 {
            debug!("Created {} channel(s) from stored secrets", added);
        }

        let runtime = &config.runtime;
        let radio = runtime_config_from_settings(&settings);
        debug!("Radio hardware: {}", radio.hardware.to_log_string());
        let mut adapter = SessionAdapter::new(
            factory,
            radio,
            ContactBook::shared(),
            runtime.connect_timeout(),
            runtime.disconnect_timeout(),
        );
        adapter.set_telemetry_source(Some(telemetry_source(&settings)));
        info!("Console ready for node '{}'", escape_log(&settings.node_name));

        Ok(Self {
            store,
            adapter,
            enricher: Enricher::new(runtime.correlation_capacity),
            state,
            packets,
            settings_store,
            settings,
            outbox: Vec::new(),
            history: VecDeque::new(),
            history_limit: runtime.event_history.max(1),
            telemetry_timeout: runtime.telemetry_timeout(),
            notify: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    pub fn settings(&self) -> &MeshcoreSettings {
        &self.settings
    }

    pub fn store(&self) -> &MeshStore {
        &self.store
    }

    /// Read access to peers, channels and messages.
    pub fn state(&self) -> &MeshState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MeshState {
        &mut self.state
    }

    /// Start the radio, or restart it if its runtime dropped since the last connect.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.adapter.is_live() {
            return Ok(());
        }
        let seeded = self.seed_contact_book();
        self.adapter.connect().await?;
        self.state.set_self_public_key(self.adapter.public_key());
        info!("Connected; {} contact(s) loaded", seeded);
        self.emit(MeshEvent::SessionConnected(self.node_info()));
        Ok(())
    }

    /// Stop the radio. `session_disconnected` is emitted even when it was idle.
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        let result = self.adapter.disconnect().await;
        self.emit(MeshEvent::SessionDisconnected(self.node_info()));
        result
    }

    /// Drain up to `limit` session events, enrich and apply them, and return
    /// the last `limit` events of the batch including local ones.
    pub fn poll_events(&mut self, limit: usize) -> Vec<MeshEvent> {
        let mut batch = self.adapter.drain_events(limit);
        batch.append(&mut self.outbox);
        if batch.is_empty() {
            return batch;
        }

        let lookup = PeerLookup::from_peers(self.state.peers());
        let mut sink = PatchTargets {
            history: &mut self.history,
            packets: &self.packets,
        };
        self.enricher.enrich_batch(&mut batch, &lookup, &mut sink);

        let connected = self.adapter.is_connected();
        let mut new_keys = Vec::new();
        for event in &batch {
            self.history.push_back(event.clone());
            let ingested = self.state.ingest(event);
            if let Some(key) = ingested.peer_key {
                new_keys.push(key);
            }
            if event.is_packet() {
                if let Err(e) = self.packets.append(event) {
                    warn!("Failed to persist {} event: {}", event.kind(), e);
                }
            }
        }
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        if connected && !new_keys.is_empty() {
            let added = add_contacts(&self.adapter.contact_book(), &new_keys);
            debug!("Contact book updated with {} key(s)", added);
        }

        let start = batch.len().saturating_sub(limit);
        batch.split_off(start)
    }

    /// Send `body` to a channel or peer id. The message is echoed locally only
    /// after the radio accepted it.
    pub async fn send_message(&mut self, peer_or_channel_id: &str, body: &str) -> Result<Message, TransportError> {
        self.connect().await?;
        let route = self.state.resolve_outbound(peer_or_channel_id);
        let result = match &route.target {
            OutboundTarget::Group(name) => self.adapter.send_group_text(name, body).await?,
            OutboundTarget::Direct(name) => self.adapter.send_text(name, body).await?,
        };
        if !result.success {
            return Err(TransportError::Driver(format!(
                "radio rejected message to '{}'",
                peer_or_channel_id
            )));
        }

        let message = self.state.record_outgoing(&route.channel_id, body);
        self.emit(MeshEvent::MessageSent(MessageSentInfo {
            peer_id: peer_or_channel_id.to_string(),
            channel_id: route.channel_id,
            body: body.to_string(),
            at: message.created_at,
        }));
        Ok(message)
    }

    /// Broadcast an advert. An `advert_sent` event reports the outcome either way.
    pub async fn send_advert(&mut self, name: Option<&str>, route_type: &str) -> Result<SendResult, TransportError> {
        self.connect().await?;
        let outcome = self.adapter.send_advert(name, route_type).await;
        let (success, tx_metadata) = match &outcome {
            Ok(result) => (result.success, result.tx_metadata.clone()),
            Err(_) => (false, None),
        };
        self.emit(MeshEvent::AdvertSent(AdvertSentInfo {
            name: name.unwrap_or(self.settings.node_name.as_str()).to_string(),
            route_type: route_type.to_string(),
            success,
            tx_metadata,
        }));
        outcome
    }

    /// Ask `peer_name` for its sensor readings. The decoded report is also
    /// emitted as `telemetry_received`.
    pub async fn request_telemetry(&mut self, peer_name: &str) -> Result<TelemetryReport, TransportError> {
        self.connect().await?;
        let payload = self.adapter.request_telemetry(peer_name, self.telemetry_timeout).await?;
        let report = TelemetryReport::from_bytes(&payload)?;
        info!(
            "Telemetry from '{}': {} sensor(s)",
            escape_log(peer_name),
            report.sensor_count
        );
        self.emit(MeshEvent::TelemetryReceived(TelemetryInfo {
            peer_name: peer_name.to_string(),
            telemetry: report.clone(),
        }));
        Ok(report)
    }

    /// Persist new settings, applying the named radio preset first. An idle
    /// session is rebuilt immediately; a connected one keeps running until it
    /// is next rotated.
    pub fn update_settings(&mut self, settings: MeshcoreSettings) -> Result<MeshcoreSettings, StorageError> {
        let settings = apply_preset(&settings, &settings.radio_preset);
        self.settings_store.save(&settings)?;
        self.state.set_node_name(&settings.node_name);
        self.adapter.set_telemetry_source(Some(telemetry_source(&settings)));
        if !self.adapter.reconfigure(runtime_config_from_settings(&settings)) {
            debug!("Radio settings saved; active session keeps its config until reconnect");
        }
        self.settings = settings.clone();
        self.emit(MeshEvent::SettingsUpdated(self.node_info()));
        Ok(settings)
    }

    pub fn list_peers(&self) -> Vec<Peer> {
        self.state.list_peers()
    }

    pub fn list_channels(&mut self) -> Vec<Channel> {
        self.state.list_channels()
    }

    pub fn list_messages_for_channel(&self, channel_id: &str, limit: usize) -> Vec<Message> {
        self.state.list_messages_for_channel(channel_id, limit)
    }

    pub fn ensure_channel(&mut self, channel_id: &str, display_name: Option<&str>) -> Channel {
        self.state.ensure_channel(channel_id, display_name)
    }

    pub fn remove_channel(&mut self, channel_id: &str) -> bool {
        self.state.remove_channel(channel_id)
    }

    pub fn mark_channel_read(&mut self, channel_id: &str) -> bool {
        self.state.mark_channel_read(channel_id)
    }

    pub fn set_favorite(&mut self, peer_id: &str, favorite: bool) -> bool {
        self.state.set_favorite(peer_id, favorite)
    }

    /// Most recent `limit` events seen by the poll loop, oldest first.
    pub fn list_recent_events(&self, limit: usize) -> Vec<MeshEvent> {
        let start = self.history.len().saturating_sub(limit);
        self.history.iter().skip(start).cloned().collect()
    }

    /// Stored packets with sender names filled from the current peer list.
    pub fn list_stored_packets(&self, limit: usize) -> Result<Vec<StoredPacket>, StorageError> {
        let mut packets = self.packets.get_recent(limit)?;
        let lookup = PeerLookup::from_peers(self.state.peers());
        enrich_stored(packets.iter_mut().map(|p| &mut p.event), &lookup);
        Ok(packets)
    }

    pub fn stored_packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn get_status(&self) -> DeviceStatus {
        let status = self.adapter.status();
        DeviceStatus {
            node_id: status.node_name,
            connected: self.adapter.is_connected(),
            rssi: None,
            battery_percent: None,
            last_seen: Utc::now(),
        }
    }

    /// Register the refresh callback. It fires for local events here and is
    /// handed to the session for radio events.
    pub fn set_event_notify(&mut self, notify: Option<EventNotify>) {
        self.adapter.set_event_notify(notify.clone());
        self.notify = notify;
    }

    pub fn report_radio_error(&mut self, message: &str) {
        warn!("Radio error: {}", escape_log(message));
        self.emit(MeshEvent::RadioError(RadioErrorInfo {
            message: message.to_string(),
        }));
    }

    fn emit(&mut self, event: MeshEvent) {
        self.outbox.push(event);
        if let Some(notify) = &self.notify {
            notify();
        }
    }

    fn node_info(&self) -> NodeInfo {
        NodeInfo {
            node_name: self.settings.node_name.clone(),
        }
    }

    fn seed_contact_book(&self) -> usize {
        add_contacts(&self.adapter.contact_book(), &self.state.peer_keys())
    }
}

/// Snapshot of what inbound telemetry requests may see; replaced on every settings change.
fn telemetry_source(settings: &MeshcoreSettings) -> TelemetrySource {
    let local = LocalTelemetry::from_settings(settings);
    Arc::new(move || local.clone())
}

fn add_contacts(contacts: &SharedContactBook, keys: &[PeerKey]) -> usize {
    let mut book = contacts.lock().unwrap_or_else(PoisonError::into_inner);
    keys.iter().filter(|k| book.add(&k.name, &k.public_key)).count()
}

/// Enrichment patches for packets queued in earlier batches land in the
/// in-memory history as well as the packet log.
struct PatchTargets<'a> {
    history: &'a mut VecDeque<MeshEvent>,
    packets: &'a PacketStore,
}

impl PacketPatchSink for PatchTargets<'_> {
    type Error = StorageError;

    fn update_by_hash(&mut self, packet_hash: &str, patch: &PacketPatch) -> Result<usize, StorageError> {
        for event in self.history.iter_mut() {
            if let Some(record) = event.packet_record_mut() {
                if record.packet_hash.as_deref() == Some(packet_hash) {
                    patch.apply(record);
                }
            }
        }
        self.packets.update_by_hash(packet_hash, patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshcore::codec::PacketRecord;
    use crate::meshcore::events::{ContactAdvert, HandlerMessage};
    use crate::meshcore::mock::{MockHandle, MockSession, SentItem};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn console(dir: &TempDir) -> (MeshConsole, MockHandle) {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        let handle = MockHandle::new();
        let console = MeshConsole::open(&config, MockSession::factory(handle.clone())).unwrap();
        (console, handle)
    }

    #[tokio::test]
    async fn lifecycle_events_surface_on_poll() {
        let dir = TempDir::new().unwrap();
        let (mut console, _handle) = console(&dir);
        console.connect().await.unwrap();
        console.connect().await.unwrap();
        let events = console.poll_events(10);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MeshEvent::SessionConnected(_)));

        console.disconnect().await.unwrap();
        let events = console.poll_events(10);
        assert!(matches!(events[0], MeshEvent::SessionDisconnected(_)));
        assert_eq!(console.list_recent_events(10).len(), 2);

        // idle disconnect still reports the state
        console.disconnect().await.unwrap();
        let events = console.poll_events(10);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MeshEvent::SessionDisconnected(_)));
    }

    #[tokio::test]
    async fn telemetry_reply_is_decoded_and_emitted() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        // temperature on ch3, location on ch1
        let mut reply = vec![0x03, 0x67, 0x01, 0x10];
        reply.extend_from_slice(&[0x01, 0x88, 0x06, 0x76, 0x5F, 0xF2, 0x96, 0x0A, 0x00, 0x03, 0xE8]);
        handle.set_telemetry_reply("Relay", reply);

        let report = console.request_telemetry("Relay").await.unwrap();
        assert_eq!(report.sensor_count, 2);
        assert!(report.location().is_some());
        match console.poll_events(10).last() {
            Some(MeshEvent::TelemetryReceived(info)) => {
                assert_eq!(info.peer_name, "Relay");
                assert_eq!(info.telemetry, report);
            }
            other => panic!("unexpected {:?}", other),
        }

        handle.set_telemetry_reply("Broken", vec![0x01, 0xEE, 0x00]);
        assert!(matches!(
            console.request_telemetry("Broken").await,
            Err(TransportError::Telemetry(_))
        ));
    }

    #[test]
    fn inbound_telemetry_follows_settings() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        assert_eq!(handle.answer_telemetry_request(), Some(Vec::new()));

        let mut settings = console.settings().clone();
        settings.share_position = true;
        settings.latitude = 45.5;
        settings.longitude = -122.6;
        console.update_settings(settings.clone()).unwrap();
        assert_eq!(handle.answer_telemetry_request().map(|p| p.len()), Some(11));

        settings.allow_telemetry = false;
        console.update_settings(settings).unwrap();
        assert_eq!(handle.answer_telemetry_request(), None);
    }

    #[tokio::test]
    async fn advert_key_reaches_contact_book() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        handle.strict_contacts(true);
        console.connect().await.unwrap();
        handle.push_event(MeshEvent::ContactNew(ContactAdvert {
            advert_name: Some("Alice".into()),
            sender_pubkey: Some("ab".repeat(32)),
            ..Default::default()
        }));
        console.poll_events(10);
        console.send_message("Alice", "hi").await.unwrap();
        assert_eq!(
            handle.sent(),
            vec![SentItem::Text {
                peer: "Alice".into(),
                body: "hi".into()
            }]
        );
    }

    #[tokio::test]
    async fn failed_send_leaves_no_echo() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        handle.fail_send(Some("busy"));
        assert!(console.send_message("public", "hello").await.is_err());
        assert!(console.list_messages_for_channel("public", 10).is_empty());
    }

    #[tokio::test]
    async fn advert_outcome_is_reported() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        console.send_advert(None, "flood").await.unwrap();
        let events = console.poll_events(10);
        match events.last() {
            Some(MeshEvent::AdvertSent(info)) => {
                assert!(info.success);
                assert_eq!(info.name, "uconsole-node");
                assert_eq!(info.route_type, "flood");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn settings_update_applies_preset_and_notifies() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        console.set_event_notify(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let built = handle.sessions_built();

        let mut settings = console.settings().clone();
        settings.radio_preset = "meshcore-eu".into();
        settings.node_name = "ridge".into();
        let saved = console.update_settings(settings).unwrap();
        assert_eq!(saved.frequency, 869_525_000);
        assert_eq!(saved.spreading_factor, 11);
        assert_eq!(handle.sessions_built(), built + 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(console.store().settings().unwrap().load().unwrap(), saved);
        assert_eq!(console.state().node().node_name, "ridge");
    }

    #[test]
    fn stored_packets_pick_up_peer_names_on_read() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        handle.push_event(MeshEvent::Packet(PacketRecord {
            payload_type: 2,
            payload_type_name: "TXT_MSG".into(),
            sender_id: Some("cd".repeat(8)),
            packet_hash: Some("0102030405060708".into()),
            ..Default::default()
        }));
        console.poll_events(10);
        assert_eq!(console.stored_packet_count(), 1);

        console.state_mut().process_advert(&ContactAdvert {
            advert_name: Some("Dana".into()),
            sender_pubkey: Some("cd".repeat(32)),
            ..Default::default()
        });
        let packets = console.list_stored_packets(10).unwrap();
        let sender = packets[0].event.packet_record().and_then(|r| r.sender_name.clone());
        assert_eq!(sender.as_deref(), Some("Dana"));
    }

    #[test]
    fn poll_returns_tail_of_batch() {
        let dir = TempDir::new().unwrap();
        let (mut console, _handle) = console(&dir);
        for n in 0..3 {
            console.report_radio_error(&format!("e{}", n));
        }
        let events = console.poll_events(2);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MeshEvent::RadioError(e) if e.message == "e1"));
        assert_eq!(console.list_recent_events(10).len(), 3);
    }

    #[test]
    fn direct_message_without_channel_goes_to_sender() {
        let dir = TempDir::new().unwrap();
        let (mut console, handle) = console(&dir);
        handle.push_event(MeshEvent::MessageNew(HandlerMessage {
            message_id: Some("m1".into()),
            sender_name: Some("Erin".into()),
            text: Some("ping".into()),
            ..Default::default()
        }));
        console.poll_events(10);
        let messages = console.list_messages_for_channel("erin", 10);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_id, "Erin");
        assert_eq!(console.state().channel("erin").unwrap().unread_count, 1);
    }
}
