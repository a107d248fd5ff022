//! Schema migrations for the mesh store.
//!
//! The schema version lives in the `meta` tree. Each step takes the store from
//! version N-1 to N and is recorded immediately after it succeeds, so an
//! interrupted run resumes at the first unapplied step. Steps must be safe to
//! re-run against data they already migrated.
//!
//! Adding a migration:
//! 1. Bump [`CURRENT_SCHEMA_VERSION`]
//! 2. Append a `(version, description, fn)` entry to `MIGRATIONS`
//! 3. Add a test that starts from data in the previous shape

use std::collections::HashMap;

use log::{info, warn};

use super::settings::{ChannelSecret, DEFAULT_PUBLIC_SECRET, DEFAULT_PUBLIC_SECRET_NAME};
use super::{
    deserialize, serialize, MeshStore, StorageError, TREE_CHANNELS, TREE_CHANNEL_SECRETS, TREE_MESSAGES, TREE_META,
};
use crate::models::{Channel, ChannelKind, Message};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

const VERSION_KEY: &[u8] = b"schema_version";

type MigrationFn = fn(&MeshStore) -> Result<(), StorageError>;

const MIGRATIONS: [(u32, &str, MigrationFn); 2] = [
    (1, "seed default public channel secret", seed_default_secret),
    (2, "fold mixed-case direct channel ids", fold_direct_channel_case),
];

pub(crate) fn stored_version(meta: &sled::Tree) -> Result<u32, StorageError> {
    let Some(bytes) = meta.get(VERSION_KEY)? else {
        return Ok(0);
    };
    let raw: [u8; 4] = bytes[..].try_into().map_err(|_| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "schema_version is not a 4-byte integer",
        ))
    })?;
    Ok(u32::from_be_bytes(raw))
}

fn record_version(meta: &sled::Tree, version: u32) -> Result<(), StorageError> {
    meta.insert(VERSION_KEY, version.to_be_bytes().to_vec())?;
    meta.flush()?;
    Ok(())
}

/// Apply every pending migration; returns how many ran.
pub fn run_migrations(store: &MeshStore) -> Result<usize, StorageError> {
    let meta = store.tree(TREE_META)?;
    let current = stored_version(&meta)?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::SchemaTooNew {
            found: current,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    let mut applied = 0;
    for (version, description, step) in MIGRATIONS.iter() {
        if *version <= current {
            continue;
        }
        info!("Migrating store to v{}: {}", version, description);
        step(store)?;
        record_version(&meta, *version)?;
        applied += 1;
    }
    Ok(applied)
}

fn seed_default_secret(store: &MeshStore) -> Result<(), StorageError> {
    let secrets = store.tree(TREE_CHANNEL_SECRETS)?;
    let key = DEFAULT_PUBLIC_SECRET_NAME.to_lowercase();
    if secrets.contains_key(key.as_bytes())? {
        return Ok(());
    }
    let secret = ChannelSecret {
        name: DEFAULT_PUBLIC_SECRET_NAME.to_string(),
        secret: DEFAULT_PUBLIC_SECRET.to_string(),
    };
    secrets.insert(key.as_bytes(), serde_json::to_vec(&secret)?)?;
    secrets.flush()?;
    Ok(())
}

/// Older builds keyed direct channels by the peer's original-case name. Merge
/// each into its lowercase id, summing unread counts, and move its messages.
fn fold_direct_channel_case(store: &MeshStore) -> Result<(), StorageError> {
    let channels = store.tree(TREE_CHANNELS)?;
    let messages = store.tree(TREE_MESSAGES)?;

    let entries: Vec<(sled::IVec, sled::IVec)> = channels.iter().collect::<Result<_, _>>()?;
    let mut renames: HashMap<String, String> = HashMap::new();
    for (key, value) in entries {
        let channel: Channel = match deserialize(&value) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping unreadable channel {:?}: {}", String::from_utf8_lossy(&key), e);
                continue;
            }
        };
        if channel.kind != ChannelKind::Dm {
            continue;
        }
        let lower = channel.channel_id.to_lowercase();
        if lower == channel.channel_id {
            continue;
        }

        let merged = match channels.get(lower.as_bytes())? {
            Some(existing) => {
                let mut target: Channel = deserialize(&existing)?;
                target.unread_count = target.unread_count.saturating_add(channel.unread_count);
                if target.peer_name.is_none() {
                    target.peer_name = channel.peer_name.clone();
                }
                target
            }
            None => Channel {
                channel_id: lower.clone(),
                peer_name: channel.peer_name.clone().or_else(|| Some(channel.channel_id.clone())),
                ..channel.clone()
            },
        };
        channels.insert(lower.as_bytes(), serialize(&merged)?)?;
        channels.remove(key)?;
        renames.insert(channel.channel_id, lower);
    }

    if renames.is_empty() {
        return Ok(());
    }
    for entry in messages.iter() {
        let (key, value) = entry?;
        let mut message: Message = deserialize(&value)?;
        if let Some(lower) = renames.get(&message.channel_id) {
            message.channel_id = lower.clone();
            messages.insert(key, serialize(&message)?)?;
        }
    }
    info!("Folded {} direct channel id(s) to lowercase", renames.len());
    channels.flush()?;
    messages.flush()?;
    Ok(())
}
