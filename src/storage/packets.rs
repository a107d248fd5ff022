//! Append-only packet log.
//!
//! Every `packet` and `raw_packet` event is kept as a JSON envelope so the
//! analyzer can show history across restarts. Entries are addressed by
//! sequence number; enrichment patches them later by packet hash.

use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Serialize};

use super::{prune_oldest, seq_key, StorageError};
use crate::meshcore::enrich::{PacketPatch, PacketPatchSink};
use crate::meshcore::events::MeshEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPacket {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    pub event: MeshEvent,
}

#[derive(Clone)]
pub struct PacketStore {
    db: sled::Db,
    tree: sled::Tree,
    max_packets: usize,
}

impl PacketStore {
    pub(crate) fn new(db: sled::Db, tree: sled::Tree, max_packets: usize) -> Self {
        Self { db, tree, max_packets }
    }

    /// Append an event, pruning the oldest beyond the retention limit.
    pub fn append(&self, event: &MeshEvent) -> Result<u64, StorageError> {
        let id = self.db.generate_id()?;
        let record = StoredPacket {
            id,
            received_at: Utc::now(),
            event: event.clone(),
        };
        self.tree.insert(seq_key(id), serde_json::to_vec(&record)?)?;
        let pruned = prune_oldest(&self.tree, self.max_packets)?;
        if !pruned.is_empty() {
            trace!("Pruned {} stored packet(s)", pruned.len());
        }
        self.tree.flush()?;
        Ok(id)
    }

    /// Newest `limit` packets, oldest first.
    pub fn get_recent(&self, limit: usize) -> Result<Vec<StoredPacket>, StorageError> {
        let mut out = Vec::with_capacity(limit.min(self.tree.len()));
        for value in self.tree.iter().values().rev().take(limit) {
            out.push(serde_json::from_slice(&value?)?);
        }
        out.reverse();
        Ok(out)
    }

    /// Patch every stored packet carrying `packet_hash`; returns the count.
    pub fn update_by_hash(&self, packet_hash: &str, patch: &PacketPatch) -> Result<usize, StorageError> {
        let mut updated = 0;
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let mut stored: StoredPacket = serde_json::from_slice(&value)?;
            let Some(record) = stored.event.packet_record_mut() else {
                continue;
            };
            if record.packet_hash.as_deref() != Some(packet_hash) {
                continue;
            }
            patch.apply(record);
            self.tree.insert(key, serde_json::to_vec(&stored)?)?;
            updated += 1;
        }
        if updated > 0 {
            self.tree.flush()?;
        }
        Ok(updated)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl PacketPatchSink for PacketStore {
    type Error = StorageError;

    fn update_by_hash(&mut self, packet_hash: &str, patch: &PacketPatch) -> Result<usize, StorageError> {
        PacketStore::update_by_hash(self, packet_hash, patch)
    }
}
