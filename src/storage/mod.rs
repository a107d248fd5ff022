//! # Storage - sled-backed persistence
//!
//! Everything the console keeps across restarts lives in one sled database
//! under `data_dir`, split into trees:
//!
//! ```text
//! meta             schema_version (u32, big-endian)
//! settings         MeshcoreSettings field name -> JSON value
//! channels         channel_id -> Channel (bincode)
//! channel_secrets  lowercased name -> {name, secret} (JSON)
//! peers            display_name -> Peer (bincode)
//! messages         sequence (u64 BE) -> Message (bincode)
//! message_ids      message_id -> sequence
//! packets          sequence (u64 BE) -> StoredPacket (JSON)
//! ```
//!
//! Opening a [`MeshStore`] runs any pending schema migrations before handing
//! out the typed per-tree stores.
//!
//! ```rust,no_run
//! use meshcore_console::storage::MeshStore;
//!
//! # fn main() -> Result<(), meshcore_console::storage::StorageError> {
//! let store = MeshStore::open("./data")?;
//! for peer in store.peers()?.get_all()? {
//!     println!("{}", peer.display_name);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use log::{debug, info};
use sled::IVec;
use thiserror::Error;

pub mod migration;
pub mod packets;
pub mod records;
pub mod settings;

pub use packets::{PacketStore, StoredPacket};
pub use records::{ChannelStore, MessageStore, PeerStore};
pub use settings::{ChannelSecret, ChannelSecretStore, SettingsStore};

pub(crate) const TREE_META: &str = "meta";
pub(crate) const TREE_SETTINGS: &str = "settings";
pub(crate) const TREE_CHANNELS: &str = "channels";
pub(crate) const TREE_CHANNEL_SECRETS: &str = "channel_secrets";
pub(crate) const TREE_PEERS: &str = "peers";
pub(crate) const TREE_MESSAGES: &str = "messages";
pub(crate) const TREE_MESSAGE_IDS: &str = "message_ids";
pub(crate) const TREE_PACKETS: &str = "packets";

pub const DEFAULT_MAX_MESSAGES: usize = 500;
pub const DEFAULT_MAX_PACKETS: usize = 1000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    /// The database was written by a newer build.
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },
}

/// Retention limits applied on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_messages: usize,
    pub max_packets: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_packets: DEFAULT_MAX_PACKETS,
        }
    }
}

/// Handle to the opened database. Cheap to clone; trees are shared.
#[derive(Clone)]
pub struct MeshStore {
    db: sled::Db,
    path: PathBuf,
    limits: StoreLimits,
}

impl MeshStore {
    /// Open (or create) the store at `path` with default limits and migrate it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_limits(path, StoreLimits::default())
    }

    pub fn open_with_limits<P: AsRef<Path>>(path: P, limits: StoreLimits) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let store = Self {
            db,
            path: path_ref.to_path_buf(),
            limits,
        };
        let applied = migration::run_migrations(&store)?;
        if applied > 0 {
            info!("Applied {} storage migration(s) in {}", applied, path_ref.display());
        } else {
            debug!("Storage schema current in {}", path_ref.display());
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn schema_version(&self) -> Result<u32, StorageError> {
        migration::stored_version(&self.tree(TREE_META)?)
    }

    pub fn peers(&self) -> Result<PeerStore, StorageError> {
        Ok(PeerStore::new(self.tree(TREE_PEERS)?))
    }

    pub fn channels(&self) -> Result<ChannelStore, StorageError> {
        Ok(ChannelStore::new(self.tree(TREE_CHANNELS)?))
    }

    pub fn messages(&self) -> Result<MessageStore, StorageError> {
        Ok(MessageStore::new(
            self.db.clone(),
            self.tree(TREE_MESSAGES)?,
            self.tree(TREE_MESSAGE_IDS)?,
            self.limits.max_messages,
        ))
    }

    pub fn packets(&self) -> Result<PacketStore, StorageError> {
        Ok(PacketStore::new(
            self.db.clone(),
            self.tree(TREE_PACKETS)?,
            self.limits.max_packets,
        ))
    }

    pub fn settings(&self) -> Result<SettingsStore, StorageError> {
        Ok(SettingsStore::new(self.tree(TREE_SETTINGS)?))
    }

    pub fn channel_secrets(&self) -> Result<ChannelSecretStore, StorageError> {
        Ok(ChannelSecretStore::new(self.tree(TREE_CHANNEL_SECRETS)?))
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn tree(&self, name: &str) -> Result<sled::Tree, StorageError> {
        Ok(self.db.open_tree(name)?)
    }
}

pub(crate) fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(bytes: &IVec) -> Result<T, StorageError> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

pub(crate) fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Drop the oldest entries of a sequence-keyed tree until at most `max` remain.
pub(crate) fn prune_oldest(tree: &sled::Tree, max: usize) -> Result<Vec<IVec>, StorageError> {
    let mut removed = Vec::new();
    while tree.len() > max {
        match tree.pop_min()? {
            Some((_, value)) => removed.push(value),
            None => break,
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_directory_and_migrates() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("db");
        let store = MeshStore::open(&path).expect("open");
        assert!(path.exists());
        assert_eq!(store.schema_version().unwrap(), migration::CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn prune_keeps_newest() {
        let dir = TempDir::new().expect("tempdir");
        let store = MeshStore::open(dir.path()).expect("open");
        let tree = store.tree("scratch").unwrap();
        for n in 0u64..5 {
            tree.insert(seq_key(n), vec![n as u8]).unwrap();
        }
        let removed = prune_oldest(&tree, 2).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(tree.len(), 2);
        let (first, _) = tree.first().unwrap().unwrap();
        assert_eq!(first.as_ref(), &seq_key(3));
    }
}
