//! Contact book shared between the console and the radio session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Name to public key map the session consults when addressing direct messages.
///
/// Lookups are case-sensitive: the radio stack resolves contacts by their exact
/// advertised name.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    keys: HashMap<String, String>,
}

pub type SharedContactBook = Arc<Mutex<ContactBook>>;

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedContactBook {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Insert or replace. Returns true when the stored key changed; blank
    /// names and keys are rejected.
    pub fn add(&mut self, name: &str, public_key: &str) -> bool {
        if name.trim().is_empty() || public_key.trim().is_empty() {
            return false;
        }
        let key = public_key.to_ascii_lowercase();
        match self.keys.get(name) {
            Some(existing) if *existing == key => false,
            _ => {
                self.keys.insert(name.to_string(), key);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.keys.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
