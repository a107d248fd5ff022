//! Radio settings and group channel secrets.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::StorageError;
use crate::config::radio::MeshcoreSettings;

/// Group key shared by every MeshCore device for the public channel.
pub const DEFAULT_PUBLIC_SECRET: &str = "8b3387e9c5cdea6ac9e5edbaa115cd72";
pub const DEFAULT_PUBLIC_SECRET_NAME: &str = "Public";

/// Settings stored one field per key, JSON-encoded, so fields added in later
/// releases fall back to their defaults.
#[derive(Clone)]
pub struct SettingsStore {
    tree: sled::Tree,
}

impl SettingsStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Stored values overlaid on defaults. Unknown keys and unreadable values
    /// are ignored; a record that no longer fits the settings shape yields defaults.
    pub fn load(&self) -> Result<MeshcoreSettings, StorageError> {
        let defaults = MeshcoreSettings::default();
        let Value::Object(mut fields) = serde_json::to_value(&defaults)? else {
            return Ok(defaults);
        };
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let key = String::from_utf8_lossy(&key).into_owned();
            if !fields.contains_key(&key) {
                continue;
            }
            match serde_json::from_slice::<Value>(&value) {
                Ok(v) => {
                    fields.insert(key, v);
                }
                Err(e) => warn!("Ignoring unreadable setting '{}': {}", key, e),
            }
        }
        match serde_json::from_value(Value::Object(fields)) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Stored settings invalid, using defaults: {}", e);
                Ok(defaults)
            }
        }
    }

    pub fn save(&self, settings: &MeshcoreSettings) -> Result<(), StorageError> {
        let fields: Map<String, Value> = match serde_json::to_value(settings)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in fields {
            self.tree.insert(key.as_bytes(), serde_json::to_vec(&value)?)?;
        }
        self.tree.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSecret {
    pub name: String,
    pub secret: String,
}

/// Group decryption keys, keyed by lowercased channel name.
#[derive(Clone)]
pub struct ChannelSecretStore {
    tree: sled::Tree,
}

impl ChannelSecretStore {
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub fn list(&self) -> Result<Vec<ChannelSecret>, StorageError> {
        self.tree
            .iter()
            .values()
            .map(|value| -> Result<ChannelSecret, StorageError> { Ok(serde_json::from_slice(&value?)?) })
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<Option<ChannelSecret>, StorageError> {
        match self.tree.get(name.to_lowercase().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace; the stored name keeps the caller's casing.
    pub fn upsert(&self, name: &str, secret: &str) -> Result<(), StorageError> {
        let record = ChannelSecret {
            name: name.to_string(),
            secret: secret.to_string(),
        };
        self.tree
            .insert(name.to_lowercase().as_bytes(), serde_json::to_vec(&record)?)?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let removed = self.tree.remove(name.to_lowercase().as_bytes())?.is_some();
        self.tree.flush()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::radio::apply_preset;
    use crate::storage::MeshStore;
    use tempfile::TempDir;

    #[test]
    fn missing_settings_load_as_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let store = MeshStore::open(dir.path()).unwrap().settings().unwrap();
        assert_eq!(store.load().unwrap(), MeshcoreSettings::default());
    }

    #[test]
    fn saved_settings_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = MeshStore::open(dir.path()).unwrap().settings().unwrap();
        let mut settings = apply_preset(&MeshcoreSettings::default(), "meshcore-eu");
        settings.node_name = "ridge".into();
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn corrupt_field_falls_back_per_key() {
        let dir = TempDir::new().expect("tempdir");
        let db = MeshStore::open(dir.path()).unwrap();
        let tree = db.tree(crate::storage::TREE_SETTINGS).unwrap();
        tree.insert("node_name", &b"\"valley\""[..]).unwrap();
        tree.insert("frequency", &b"{not json"[..]).unwrap();
        tree.insert("retired_field", &b"1"[..]).unwrap();
        let loaded = db.settings().unwrap().load().unwrap();
        assert_eq!(loaded.node_name, "valley");
        assert_eq!(loaded.frequency, MeshcoreSettings::default().frequency);

        // wrong type for a known field: whole record falls back
        tree.insert("tx_power", &b"\"loud\""[..]).unwrap();
        assert_eq!(db.settings().unwrap().load().unwrap(), MeshcoreSettings::default());
    }

    #[test]
    fn secrets_are_case_insensitive_by_name() {
        let dir = TempDir::new().expect("tempdir");
        let secrets = MeshStore::open(dir.path()).unwrap().channel_secrets().unwrap();
        secrets.upsert("Ops", "00112233445566778899aabbccddeeff").unwrap();
        assert_eq!(secrets.get("OPS").unwrap().unwrap().name, "Ops");
        assert_eq!(secrets.list().unwrap().len(), 2);
        assert!(secrets.remove("ops").unwrap());
        assert!(!secrets.remove("ops").unwrap());
    }
}
