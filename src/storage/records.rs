//! Typed stores for peers, channels and messages.

use log::trace;

use super::{deserialize, prune_oldest, seq_key, serialize, StorageError};
use crate::models::{Channel, Message, Peer};

/// Peers keyed by display name.
#[derive(Clone)]
pub struct PeerStore {
    tree: sled::Tree,
}

impl PeerStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub fn add_or_update(&self, peer: &Peer) -> Result<(), StorageError> {
        self.tree.insert(peer.display_name.as_bytes(), serialize(peer)?)?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn get(&self, display_name: &str) -> Result<Option<Peer>, StorageError> {
        match self.tree.get(display_name.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_all(&self) -> Result<Vec<Peer>, StorageError> {
        self.tree
            .iter()
            .values()
            .map(|value| -> Result<Peer, StorageError> { deserialize(&value?) })
            .collect()
    }

    /// Set the favorite flag on the peer with this id.
    pub fn set_favorite(&self, peer_id: &str, favorite: bool) -> Result<Peer, StorageError> {
        let mut peer = self
            .get_all()?
            .into_iter()
            .find(|p| p.peer_id == peer_id)
            .ok_or_else(|| StorageError::NotFound(format!("peer: {}", peer_id)))?;
        peer.is_favorite = favorite;
        self.add_or_update(&peer)?;
        Ok(peer)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Channels keyed by normalized channel id.
#[derive(Clone)]
pub struct ChannelStore {
    tree: sled::Tree,
}

impl ChannelStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub fn add_or_update(&self, channel: &Channel) -> Result<(), StorageError> {
        self.tree.insert(channel.channel_id.as_bytes(), serialize(channel)?)?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn get(&self, channel_id: &str) -> Result<Option<Channel>, StorageError> {
        match self.tree.get(channel_id.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_all(&self) -> Result<Vec<Channel>, StorageError> {
        self.tree
            .iter()
            .values()
            .map(|value| -> Result<Channel, StorageError> { deserialize(&value?) })
            .collect()
    }

    pub fn remove(&self, channel_id: &str) -> Result<bool, StorageError> {
        let removed = self.tree.remove(channel_id.as_bytes())?.is_some();
        self.tree.flush()?;
        Ok(removed)
    }

    pub fn reset_unread(&self, channel_id: &str) -> Result<bool, StorageError> {
        let Some(mut channel) = self.get(channel_id)? else {
            return Ok(false);
        };
        channel.unread_count = 0;
        self.add_or_update(&channel)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Append-only message log with a message-id index for insert-or-ignore.
#[derive(Clone)]
pub struct MessageStore {
    db: sled::Db,
    tree: sled::Tree,
    ids: sled::Tree,
    max_messages: usize,
}

impl MessageStore {
    pub(crate) fn new(db: sled::Db, tree: sled::Tree, ids: sled::Tree, max_messages: usize) -> Self {
        Self {
            db,
            tree,
            ids,
            max_messages,
        }
    }

    /// Append unless a message with the same id is already stored. Returns
    /// whether the message was inserted.
    pub fn append(&self, message: &Message) -> Result<bool, StorageError> {
        if self.ids.contains_key(message.message_id.as_bytes())? {
            trace!("Message {} already stored", message.message_id);
            return Ok(false);
        }
        let seq = self.db.generate_id()?;
        self.tree.insert(seq_key(seq), serialize(message)?)?;
        self.ids.insert(message.message_id.as_bytes(), seq_key(seq).to_vec())?;
        for value in prune_oldest(&self.tree, self.max_messages)? {
            let old: Message = deserialize(&value)?;
            self.ids.remove(old.message_id.as_bytes())?;
        }
        self.tree.flush()?;
        Ok(true)
    }

    /// All stored messages, oldest first.
    pub fn get_all(&self) -> Result<Vec<Message>, StorageError> {
        self.tree
            .iter()
            .values()
            .map(|value| -> Result<Message, StorageError> { deserialize(&value?) })
            .collect()
    }

    /// Delete every message in a channel; returns how many were removed.
    pub fn remove_for_channel(&self, channel_id: &str) -> Result<usize, StorageError> {
        let mut removed = 0;
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let message: Message = deserialize(&value)?;
            if message.channel_id == channel_id {
                self.tree.remove(key)?;
                self.ids.remove(message.message_id.as_bytes())?;
                removed += 1;
            }
        }
        self.tree.flush()?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Channel, Message, Peer};
    use crate::storage::{MeshStore, StoreLimits};
    use tempfile::TempDir;

    fn message(id: &str, channel: &str) -> Message {
        let mut msg = Message::outgoing("me", channel, "body");
        msg.message_id = id.to_string();
        msg
    }

    #[test]
    fn message_append_ignores_duplicate_ids() {
        let dir = TempDir::new().expect("tempdir");
        let store = MeshStore::open(dir.path()).unwrap().messages().unwrap();
        assert!(store.append(&message("m1", "public")).unwrap());
        assert!(!store.append(&message("m1", "public")).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn message_log_prunes_oldest_and_frees_ids() {
        let dir = TempDir::new().expect("tempdir");
        let limits = StoreLimits {
            max_messages: 3,
            max_packets: 10,
        };
        let store = MeshStore::open_with_limits(dir.path(), limits)
            .unwrap()
            .messages()
            .unwrap();
        for n in 0..5 {
            store.append(&message(&format!("m{}", n), "public")).unwrap();
        }
        let ids: Vec<String> = store.get_all().unwrap().into_iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
        // a pruned id may be stored again
        assert!(store.append(&message("m0", "public")).unwrap());
    }

    #[test]
    fn remove_for_channel_only_touches_that_channel() {
        let dir = TempDir::new().expect("tempdir");
        let store = MeshStore::open(dir.path()).unwrap().messages().unwrap();
        store.append(&message("a", "alice")).unwrap();
        store.append(&message("b", "public")).unwrap();
        store.append(&message("c", "alice")).unwrap();
        assert_eq!(store.remove_for_channel("alice").unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.append(&message("a", "alice")).unwrap());
    }

    #[test]
    fn channel_unread_reset() {
        let dir = TempDir::new().expect("tempdir");
        let channels = MeshStore::open(dir.path()).unwrap().channels().unwrap();
        let mut ch = Channel::direct("Bob");
        ch.unread_count = 4;
        channels.add_or_update(&ch).unwrap();
        assert!(channels.reset_unread("bob").unwrap());
        assert_eq!(channels.get("bob").unwrap().unwrap().unread_count, 0);
        assert!(!channels.reset_unread("nobody").unwrap());
        assert!(channels.remove("bob").unwrap());
        assert!(!channels.remove("bob").unwrap());
    }

    #[test]
    fn favorite_flag_persists() {
        let dir = TempDir::new().expect("tempdir");
        let peers = MeshStore::open(dir.path()).unwrap().peers().unwrap();
        peers.add_or_update(&Peer::new("id-1", "Relay")).unwrap();
        peers.set_favorite("id-1", true).unwrap();
        assert!(peers.get("Relay").unwrap().unwrap().is_favorite);
        assert!(peers.set_favorite("ghost", true).is_err());
        // display names are not ids
        assert!(peers.set_favorite("Relay", false).is_err());
    }
}
