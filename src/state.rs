//! Authoritative mesh state: peers, channels and messages.
//!
//! [`MeshState`] holds the in-memory collections the UI reads from and
//! writes every change through to the sled stores. It is driven from the poll
//! loop only, one event at a time, so dedup and unread counting need no
//! locking. A failed write is logged and the in-memory change kept.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info, trace, warn};

use crate::logutil::{escape_log, truncate_for_log};
use crate::meshcore::codec::{repair_utf8, ADVERT_TYPE_REPEATER};
use crate::meshcore::events::{ContactAdvert, HandlerMessage, MeshEvent};
use crate::meshcore::registry::PayloadKind;
use crate::meshcore::signal::rssi_to_signal_percent;
use crate::models::{Channel, ChannelKind, Message, Peer, PUBLIC_CHANNEL_ID};
use crate::storage::{ChannelSecret, ChannelStore, MeshStore, MessageStore, PeerStore, StorageError};

pub const DEFAULT_DEDUP_WINDOW: usize = 100;

const UNKNOWN_SENDER: &str = "Unknown";

/// Identity of the local node, passed in by the owner of the radio session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeContext {
    pub node_name: String,
    /// Hex public key of this node, once the session reports it.
    pub self_public_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLimits {
    /// How many of the most recent messages are checked for a duplicate id.
    pub dedup_window: usize,
    pub max_messages: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            max_messages: crate::storage::DEFAULT_MAX_MESSAGES,
        }
    }
}

/// Peer whose public key was seen by an advert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerKey {
    pub name: String,
    pub public_key: String,
}

/// What [`MeshState::ingest`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ingested {
    pub peer: Option<String>,
    /// Set when the advert carried a public key, for the session contact book.
    pub peer_key: Option<PeerKey>,
    pub message_id: Option<String>,
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundTarget {
    /// Exact-case channel name, without the leading `#`.
    Group(String),
    /// Exact-case contact name.
    Direct(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRoute {
    pub channel_id: String,
    pub target: OutboundTarget,
}

pub struct MeshState {
    ctx: NodeContext,
    limits: StateLimits,
    peers: HashMap<String, Peer>,
    channels: HashMap<String, Channel>,
    messages: Vec<Message>,
    peer_store: PeerStore,
    channel_store: ChannelStore,
    message_store: MessageStore,
}

impl MeshState {
    /// Load persisted peers, channels and messages from `store`.
    pub fn load(store: &MeshStore, ctx: NodeContext, limits: StateLimits) -> Result<Self, StorageError> {
        let peer_store = store.peers()?;
        let channel_store = store.channels()?;
        let message_store = store.messages()?;

        let peers: HashMap<String, Peer> = peer_store
            .get_all()?
            .into_iter()
            .map(|p| (p.display_name.clone(), p))
            .collect();
        let channels: HashMap<String, Channel> = channel_store
            .get_all()?
            .into_iter()
            .map(|c| (c.channel_id.clone(), c))
            .collect();
        let messages = message_store.get_all()?;
        info!(
            "Loaded {} peer(s), {} channel(s), {} message(s)",
            peers.len(),
            channels.len(),
            messages.len()
        );

        Ok(Self {
            ctx,
            limits,
            peers,
            channels,
            messages,
            peer_store,
            channel_store,
            message_store,
        })
    }

    pub fn node(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn set_node_name(&mut self, name: &str) {
        self.ctx.node_name = name.to_string();
    }

    pub fn set_self_public_key(&mut self, key: Option<String>) {
        self.ctx.self_public_key = key.map(|k| k.to_ascii_lowercase());
    }

    /// Apply one event. `raw_packet` events are ignored here: every physical
    /// packet also arrives as a `packet` event.
    pub fn ingest(&mut self, event: &MeshEvent) -> Ingested {
        let mut out = Ingested::default();
        match event {
            MeshEvent::RawPacket(_) => {}
            MeshEvent::Packet(record) if record.kind() == PayloadKind::Advert => {
                self.apply_advert(&ContactAdvert::from(record), &mut out);
            }
            MeshEvent::ContactReceived(advert) | MeshEvent::AdvertReceived(advert) | MeshEvent::ContactNew(advert) => {
                self.apply_advert(advert, &mut out);
            }
            MeshEvent::ChannelMessageNew(msg) => {
                out.message_id = self.process_message(msg, false);
            }
            MeshEvent::MessageNew(msg) => {
                out.message_id = self.process_message(msg, true);
            }
            _ => {}
        }
        out
    }

    fn apply_advert(&mut self, advert: &ContactAdvert, out: &mut Ingested) {
        if let Some(name) = self.process_advert(advert) {
            out.peer_key = self
                .peers
                .get(&name)
                .and_then(|p| p.public_key.clone())
                .filter(|_| advert.sender_pubkey.is_some())
                .map(|public_key| PeerKey {
                    name: name.clone(),
                    public_key,
                });
            out.peer = Some(name);
        }
    }

    /// Create or update the advertising peer. Returns its display name, or
    /// `None` when the advert was discarded.
    pub fn process_advert(&mut self, advert: &ContactAdvert) -> Option<String> {
        let name = repair_utf8(advert.peer_name()?);
        let public_key = advert
            .sender_pubkey
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(str::to_ascii_lowercase);

        if let (Some(own), Some(key)) = (self.ctx.self_public_key.as_deref(), public_key.as_deref()) {
            if own == key {
                trace!("Ignoring own advert relayed back as '{}'", escape_log(&name));
                return None;
            }
        }

        let location = match (advert.advert_lat, advert.advert_lon) {
            (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => Some((lat, lon)),
            _ => None,
        };
        let signal = advert.rssi.map(rssi_to_signal_percent);
        let is_repeater = advert.advert_type == Some(ADVERT_TYPE_REPEATER);
        let now = Utc::now();

        let peer = match self.peers.get_mut(&name) {
            Some(existing) => {
                existing.signal_quality = signal.or(existing.signal_quality);
                existing.last_advert_time = Some(now);
                if !advert.path_hops.is_empty() {
                    existing.last_path = advert.path_hops.clone();
                }
                existing.rssi = advert.rssi.or(existing.rssi);
                existing.snr = advert.snr.or(existing.snr);
                existing.is_repeater = is_repeater;
                if public_key.is_some() {
                    existing.public_key = public_key;
                }
                if let Some((lat, lon)) = location {
                    existing.latitude = Some(lat);
                    existing.longitude = Some(lon);
                    existing.location_updated = Some(now);
                }
                existing.clone()
            }
            None => {
                let mut peer = Peer::new(advert.peer_id().unwrap_or(&name), name.clone());
                peer.signal_quality = signal;
                peer.public_key = public_key;
                peer.last_advert_time = Some(now);
                peer.last_path = advert.path_hops.clone();
                peer.is_repeater = is_repeater;
                peer.rssi = advert.rssi;
                peer.snr = advert.snr;
                if let Some((lat, lon)) = location {
                    peer.latitude = Some(lat);
                    peer.longitude = Some(lon);
                    peer.location_updated = Some(now);
                }
                info!("New peer '{}'", escape_log(&name));
                self.peers.insert(name.clone(), peer.clone());
                peer
            }
        };
        persist("peer", self.peer_store.add_or_update(&peer));
        Some(name)
    }

    /// Store a decrypted inbound message. Returns the message id when it was
    /// new; duplicates and empty messages yield `None`.
    pub fn process_message(&mut self, msg: &HandlerMessage, direct_event: bool) -> Option<String> {
        let body = msg.body()?.to_string();
        let sender = repair_utf8(msg.sender().unwrap_or(UNKNOWN_SENDER));

        let channel_name = msg.channel_name.as_deref().filter(|c| !c.trim().is_empty());
        let is_direct = msg.payload_type_name.as_deref() == Some(PayloadKind::TxtMsg.name())
            || direct_event
            || channel_name.is_none();
        let channel_id = match (is_direct, channel_name) {
            (false, Some(channel)) => channel.to_lowercase(),
            _ => sender.to_lowercase(),
        };

        let message_id = msg
            .message_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let window_start = self.messages.len().saturating_sub(self.limits.dedup_window);
        if self.messages[window_start..].iter().any(|m| m.message_id == message_id) {
            debug!("Duplicate message {} ignored", message_id);
            return None;
        }

        let message = Message {
            message_id: message_id.clone(),
            sender_id: sender.clone(),
            body,
            channel_id: channel_id.clone(),
            created_at: Utc::now(),
            is_outgoing: false,
            path_len: msg.path_len,
            path_hops: msg.path_hops.clone(),
            snr: msg.snr,
            rssi: msg.rssi,
        };
        debug!(
            "Message {} from '{}' in {}: {}",
            message_id,
            escape_log(&sender),
            channel_id,
            truncate_for_log(&message.body, 80)
        );
        self.push_message(message);

        let channel = match self.channels.get_mut(&channel_id) {
            Some(existing) => {
                existing.unread_count = existing.unread_count.saturating_add(1);
                existing.clone()
            }
            None => {
                let mut channel = if is_direct {
                    Channel::direct(&sender)
                } else {
                    Channel::group(channel_id.clone(), format!("#{}", channel_id))
                };
                channel.unread_count = 1;
                self.channels.insert(channel_id.clone(), channel.clone());
                channel
            }
        };
        persist("channel", self.channel_store.add_or_update(&channel));
        Some(message_id)
    }

    /// Get or create a channel. Ids count as group ids when they are
    /// `public`, start with `#`, or come with a `#` display name; all other ids
    /// are direct channels and are lowercased.
    pub fn ensure_channel(&mut self, channel_id: &str, display_name: Option<&str>) -> Channel {
        let is_group = is_group_id(channel_id) || display_name.map_or(false, |d| d.starts_with('#'));
        let normalized = if is_group {
            channel_id.to_string()
        } else {
            channel_id.to_lowercase()
        };
        if let Some(existing) = self.channels.get(&normalized) {
            return existing.clone();
        }

        let channel = if is_group {
            let display = display_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", channel_id));
            Channel::group(normalized.clone(), display)
        } else {
            let mut channel = Channel::direct(channel_id);
            if let Some(display) = display_name {
                channel.display_name = display.to_string();
            }
            channel
        };
        self.channels.insert(normalized, channel.clone());
        persist("channel", self.channel_store.add_or_update(&channel));
        channel
    }

    /// Delete a channel and its messages. The public channel cannot be
    /// removed. Returns whether a channel was removed.
    pub fn remove_channel(&mut self, channel_id: &str) -> bool {
        if channel_id == PUBLIC_CHANNEL_ID {
            return false;
        }
        let existed = self.channels.remove(channel_id).is_some();
        self.messages.retain(|m| m.channel_id != channel_id);
        persist("channel", self.channel_store.remove(channel_id));
        persist("messages", self.message_store.remove_for_channel(channel_id));
        existed
    }

    pub fn mark_channel_read(&mut self, channel_id: &str) -> bool {
        let Some(channel) = self.channels.get_mut(channel_id) else {
            return false;
        };
        channel.unread_count = 0;
        persist("channel", self.channel_store.reset_unread(channel_id));
        true
    }

    /// Resolve a channel or peer id for sending, creating the channel when
    /// missing. Existing channels decide group versus direct by their kind;
    /// unseen ids fall back to the `public` / `#` naming rule.
    pub fn resolve_outbound(&mut self, peer_or_channel_id: &str) -> OutboundRoute {
        let lower = peer_or_channel_id.to_lowercase();
        let existing_kind = self
            .channels
            .get(&lower)
            .or_else(|| self.channels.get(peer_or_channel_id))
            .map(|c| c.kind);
        let is_group = match existing_kind {
            Some(kind) => kind == ChannelKind::Group,
            None => is_group_id(peer_or_channel_id),
        };
        let channel_id = if is_group {
            peer_or_channel_id.to_string()
        } else {
            lower
        };

        if !self.channels.contains_key(&channel_id) {
            let channel = if is_group {
                Channel::group(channel_id.clone(), format!("#{}", channel_id))
            } else {
                Channel::direct(peer_or_channel_id)
            };
            self.channels.insert(channel_id.clone(), channel.clone());
            persist("channel", self.channel_store.add_or_update(&channel));
        }

        let target = match self.channels.get(&channel_id) {
            Some(channel) if is_group => {
                OutboundTarget::Group(channel.display_name.trim_start_matches('#').to_string())
            }
            Some(channel) => OutboundTarget::Direct(
                channel
                    .peer_name
                    .clone()
                    .unwrap_or_else(|| channel.display_name.clone()),
            ),
            None if is_group => OutboundTarget::Group(peer_or_channel_id.trim_start_matches('#').to_string()),
            None => OutboundTarget::Direct(peer_or_channel_id.to_string()),
        };
        OutboundRoute { channel_id, target }
    }

    /// Append a locally authored message to `channel_id`.
    pub fn record_outgoing(&mut self, channel_id: &str, body: &str) -> Message {
        let message = Message::outgoing(&self.ctx.node_name, channel_id, body);
        self.push_message(message.clone());
        message
    }

    fn push_message(&mut self, message: Message) {
        persist("message", self.message_store.append(&message));
        self.messages.push(message);
        if self.messages.len() > self.limits.max_messages {
            let excess = self.messages.len() - self.limits.max_messages;
            self.messages.drain(..excess);
        }
    }

    /// Make sure every stored group secret has a channel entry.
    pub fn sync_channel_secrets(&mut self, secrets: &[ChannelSecret]) -> usize {
        let mut added = 0;
        for secret in secrets {
            let channel_id = secret.name.to_lowercase();
            if self.channels.contains_key(&channel_id) {
                continue;
            }
            let channel = Channel::group(channel_id.clone(), format!("#{}", secret.name));
            persist("channel", self.channel_store.add_or_update(&channel));
            self.channels.insert(channel_id, channel);
            added += 1;
        }
        added
    }

    pub fn set_favorite(&mut self, peer_id: &str, favorite: bool) -> bool {
        let Some(peer) = self.peers.values_mut().find(|p| p.peer_id == peer_id) else {
            return false;
        };
        peer.is_favorite = favorite;
        persist("peer", self.peer_store.set_favorite(peer_id, favorite));
        true
    }

    /// Peers sorted by display name.
    pub fn list_peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        peers
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer(&self, display_name: &str) -> Option<&Peer> {
        self.peers.get(display_name)
    }

    /// Peers with a known public key, for seeding the contact book.
    pub fn peer_keys(&self) -> Vec<PeerKey> {
        self.peers
            .values()
            .filter_map(|p| {
                p.public_key.as_ref().map(|k| PeerKey {
                    name: p.display_name.clone(),
                    public_key: k.clone(),
                })
            })
            .collect()
    }

    /// Channels sorted case-insensitively by display name. An empty list gets
    /// the public channel.
    pub fn list_channels(&mut self) -> Vec<Channel> {
        if self.channels.is_empty() {
            let public = Channel::group(PUBLIC_CHANNEL_ID, "#public");
            persist("channel", self.channel_store.add_or_update(&public));
            self.channels.insert(PUBLIC_CHANNEL_ID.to_string(), public);
        }
        let mut channels: Vec<Channel> = self.channels.values().cloned().collect();
        channels.sort_by_key(|c| c.display_name.to_lowercase());
        channels
    }

    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.get(channel_id)
    }

    /// Most recent `limit` messages of a channel, oldest first.
    pub fn list_messages_for_channel(&self, channel_id: &str, limit: usize) -> Vec<Message> {
        let matching: Vec<&Message> = self.messages.iter().filter(|m| m.channel_id == channel_id).collect();
        let start = matching.len().saturating_sub(limit);
        matching[start..].iter().map(|m| (*m).clone()).collect()
    }

    pub fn list_messages(&self, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

fn is_group_id(id: &str) -> bool {
    id == PUBLIC_CHANNEL_ID || id.starts_with('#')
}

fn persist<T>(what: &str, result: Result<T, StorageError>) {
    if let Err(e) = result {
        warn!("Failed to persist {}: {}", what, e);
    }
}
