//! Cross-stream enrichment of packet events.
//!
//! The radio stack reports every received packet twice: first as an
//! undecrypted `packet` event, later (possibly in a later poll) as a decrypted
//! handler event. Group and direct text packets arrive without sender, channel
//! or text, so they are parked in two bounded FIFO queues until a matching
//! handler event shows up.
//!
//! Queue entries hold the packet hash plus the event's slot in the batch that
//! queued it. A handler event in the same batch patches the event through its
//! slot; either way a single patch is sent to the packet log by hash. Slots are
//! cleared when the batch ends.
//!
//! Enrichment is cosmetic. Message routing never depends on it.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::{debug, trace, warn};

use super::codec::{repair_utf8, PacketRecord};
use super::events::{HandlerMessage, MeshEvent};
use super::registry::PayloadKind;
use crate::models::Peer;

pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

const PUBKEY_PREFIX_LEN: usize = 16;

/// Reverse lookup from node identifiers to display names.
#[derive(Debug, Clone, Default)]
pub struct PeerLookup {
    names: HashMap<String, String>,
}

impl PeerLookup {
    /// Index peers by peer id, full public key and the first 16 key chars.
    pub fn from_peers<'a, I>(peers: I) -> Self
    where
        I: IntoIterator<Item = &'a Peer>,
    {
        let mut names = HashMap::new();
        for peer in peers {
            if !peer.peer_id.is_empty() {
                names.insert(peer.peer_id.to_ascii_lowercase(), peer.display_name.clone());
            }
            if let Some(key) = peer.public_key.as_deref().filter(|k| !k.is_empty()) {
                let key = key.to_ascii_lowercase();
                if key.len() > PUBKEY_PREFIX_LEN {
                    names.insert(key[..PUBKEY_PREFIX_LEN].to_string(), peer.display_name.clone());
                }
                names.insert(key, peer.display_name.clone());
            }
        }
        Self { names }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.names.get(&id.to_ascii_lowercase()).map(String::as_str)
    }

    /// First hit among the record's sender id, sender key and anonymous sender key.
    pub fn resolve(&self, record: &PacketRecord) -> Option<&str> {
        [&record.sender_id, &record.sender_pubkey, &record.anon_sender_pubkey]
            .into_iter()
            .filter_map(|id| id.as_deref())
            .find_map(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Fields a handler event can fill in on a previously logged packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketPatch {
    pub sender_name: Option<String>,
    pub channel_name: Option<String>,
    pub payload_text: Option<String>,
}

impl PacketPatch {
    pub fn is_empty(&self) -> bool {
        self.sender_name.is_none() && self.channel_name.is_none() && self.payload_text.is_none()
    }

    /// Overwrite the record fields this patch carries.
    pub fn apply(&self, record: &mut PacketRecord) {
        if let Some(v) = &self.sender_name {
            record.sender_name = Some(v.clone());
        }
        if let Some(v) = &self.channel_name {
            record.channel_name = Some(v.clone());
        }
        if let Some(v) = &self.payload_text {
            record.payload_text = Some(v.clone());
        }
    }
}

/// Destination for patches addressed by packet hash.
pub trait PacketPatchSink {
    type Error: fmt::Display;

    /// Patch every stored packet with `packet_hash`; returns how many changed.
    fn update_by_hash(&mut self, packet_hash: &str, patch: &PacketPatch) -> Result<usize, Self::Error>;
}

#[derive(Debug, Clone)]
struct PendingPacket {
    packet_hash: Option<String>,
    slot: Option<usize>,
    sender_name: Option<String>,
    channel_name: Option<String>,
    payload_text: Option<String>,
}

impl PendingPacket {
    fn new(record: &PacketRecord, slot: usize) -> Self {
        Self {
            packet_hash: record.packet_hash.clone(),
            slot: Some(slot),
            sender_name: record.sender_name.clone(),
            channel_name: record.channel_name.clone(),
            payload_text: record.payload_text.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Enricher {
    group_queue: VecDeque<PendingPacket>,
    direct_queue: VecDeque<PendingPacket>,
    capacity: usize,
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Enricher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            group_queue: VecDeque::with_capacity(capacity),
            direct_queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn pending_group(&self) -> usize {
        self.group_queue.len()
    }

    pub fn pending_direct(&self) -> usize {
        self.direct_queue.len()
    }

    /// Enrich one poll batch in place. Runs over the whole batch before any
    /// event is ingested, so a packet and its handler event in the same batch
    /// always correlate.
    pub fn enrich_batch<S>(&mut self, events: &mut [MeshEvent], lookup: &PeerLookup, sink: &mut S)
    where
        S: PacketPatchSink + ?Sized,
    {
        for slot in 0..events.len() {
            if let Some(record) = events[slot].packet_record_mut() {
                fill_sender_from_lookup(record, lookup);
            }

            match &events[slot] {
                MeshEvent::Packet(record) => self.maybe_queue(record, slot),
                MeshEvent::ChannelMessageNew(msg) => {
                    let msg = msg.clone();
                    self.correlate_group(&msg, events, sink);
                }
                MeshEvent::MessageNew(msg) => {
                    let msg = msg.clone();
                    self.correlate_direct(&msg, events, sink);
                }
                _ => {}
            }
        }

        for entry in self.group_queue.iter_mut().chain(self.direct_queue.iter_mut()) {
            entry.slot = None;
        }
    }

    fn maybe_queue(&mut self, record: &PacketRecord, slot: usize) {
        let queue = match record.kind() {
            PayloadKind::GrpTxt if is_blank(&record.channel_name) => &mut self.group_queue,
            PayloadKind::TxtMsg if is_blank(&record.sender_name) => &mut self.direct_queue,
            _ => return,
        };
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                trace!(
                    "Correlation queue full, dropping {}",
                    dropped.packet_hash.as_deref().unwrap_or("unhashed packet")
                );
            }
        }
        queue.push_back(PendingPacket::new(record, slot));
    }

    fn correlate_group<S>(&mut self, msg: &HandlerMessage, events: &mut [MeshEvent], sink: &mut S)
    where
        S: PacketPatchSink + ?Sized,
    {
        let Some(pending) = self.group_queue.pop_front() else {
            return;
        };
        let mut patch = PacketPatch::default();
        if is_blank(&pending.sender_name) {
            patch.sender_name = msg.sender().map(repair_utf8);
        }
        if is_blank(&pending.channel_name) {
            patch.channel_name = non_blank(&msg.channel_name);
        }
        if is_blank(&pending.payload_text) {
            patch.payload_text = non_blank(&msg.message_text);
        }
        apply_patch(&pending, patch, events, sink);
    }

    fn correlate_direct<S>(&mut self, msg: &HandlerMessage, events: &mut [MeshEvent], sink: &mut S)
    where
        S: PacketPatchSink + ?Sized,
    {
        let Some(sender) = msg.sender() else {
            return;
        };
        let Some(pending) = self.direct_queue.pop_front() else {
            return;
        };
        let patch = PacketPatch {
            sender_name: Some(repair_utf8(sender)),
            ..Default::default()
        };
        apply_patch(&pending, patch, events, sink);
    }
}

fn apply_patch<S>(pending: &PendingPacket, patch: PacketPatch, events: &mut [MeshEvent], sink: &mut S)
where
    S: PacketPatchSink + ?Sized,
{
    if patch.is_empty() {
        return;
    }
    if let Some(record) = pending
        .slot
        .and_then(|slot| events.get_mut(slot))
        .and_then(MeshEvent::packet_record_mut)
    {
        patch.apply(record);
    }
    let Some(hash) = pending.packet_hash.as_deref() else {
        return;
    };
    match sink.update_by_hash(hash, &patch) {
        Ok(n) => debug!("Enriched packet {} ({} stored record(s))", hash, n),
        Err(e) => warn!("Failed to patch stored packet {}: {}", hash, e),
    }
}

/// Fill a missing sender name from the peer lookup. Returns true when it did.
pub fn fill_sender_from_lookup(record: &mut PacketRecord, lookup: &PeerLookup) -> bool {
    if !is_blank(&record.sender_name) {
        return false;
    }
    match lookup.resolve(record) {
        Some(name) => {
            record.sender_name = Some(name.to_string());
            true
        }
        None => false,
    }
}

/// Re-apply the peer lookup to stored events on read.
pub fn enrich_stored<'a, I>(events: I, lookup: &PeerLookup)
where
    I: IntoIterator<Item = &'a mut MeshEvent>,
{
    for event in events {
        if let Some(record) = event.packet_record_mut() {
            fill_sender_from_lookup(record, lookup);
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.trim().is_empty()).map(str::to_string)
}
