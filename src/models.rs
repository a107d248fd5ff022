//! Peers, channels and messages as the mesh state store keeps them.
//!
//! These records are persisted with bincode, so fields are never skipped during
//! serialization; add new fields only together with a store migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel id of the always-present public group channel.
pub const PUBLIC_CHANNEL_ID: &str = "public";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub peer_id: String,
    /// Unique per registry; the key peers are stored under.
    pub display_name: String,
    pub signal_quality: Option<u8>,
    /// Full 64-char hex public key.
    pub public_key: Option<String>,
    pub last_advert_time: Option<DateTime<Utc>>,
    /// Path hops of the most recent advert.
    pub last_path: Vec<String>,
    pub is_repeater: bool,
    pub is_favorite: bool,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_updated: Option<DateTime<Utc>>,
}

impl Peer {
    pub fn new(peer_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
            signal_quality: None,
            public_key: None,
            last_advert_time: None,
            last_path: Vec::new(),
            is_repeater: false,
            is_favorite: false,
            rssi: None,
            snr: None,
            latitude: None,
            longitude: None,
            location_updated: None,
        }
    }

    pub fn location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dm,
    Group,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Dm => "dm",
            ChannelKind::Group => "group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub display_name: String,
    pub unread_count: u32,
    /// Original-case peer name for direct channels; contact lookups are case-sensitive.
    pub peer_name: Option<String>,
    pub kind: ChannelKind,
}

impl Channel {
    pub fn group(channel_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            display_name: display_name.into(),
            unread_count: 0,
            peer_name: None,
            kind: ChannelKind::Group,
        }
    }

    /// Direct channel for `peer_name`; the id is the lowercased name.
    pub fn direct(peer_name: &str) -> Self {
        Self {
            channel_id: peer_name.to_lowercase(),
            display_name: peer_name.to_string(),
            unread_count: 0,
            peer_name: Some(peer_name.to_string()),
            kind: ChannelKind::Dm,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChannelKind::Group
    }

    pub fn is_public(&self) -> bool {
        self.channel_id == PUBLIC_CHANNEL_ID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub body: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    pub is_outgoing: bool,
    pub path_len: usize,
    pub path_hops: Vec<String>,
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
}

impl Message {
    /// Locally authored message with a fresh id.
    pub fn outgoing(sender_id: &str, channel_id: &str, body: &str) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            channel_id: channel_id.to_string(),
            created_at: Utc::now(),
            is_outgoing: true,
            path_len: 0,
            path_hops: Vec::new(),
            snr: None,
            rssi: None,
        }
    }
}

/// Connection summary for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub node_id: String,
    pub connected: bool,
    pub rssi: Option<i32>,
    pub battery_percent: Option<u8>,
    pub last_seen: DateTime<Utc>,
}
