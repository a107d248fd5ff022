//! Events flowing from the radio session into the pipeline.
//!
//! Every event serializes as `{"type": "<kind>", "data": {...}}`, which is also
//! the envelope stored in the packet log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::PacketRecord;
use super::lpp::TelemetryReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionConnected,
    SessionDisconnected,
    Packet,
    RawPacket,
    MessageSent,
    AdvertSent,
    ContactReceived,
    AdvertReceived,
    PeerSeen,
    SettingsUpdated,
    ContactNew,
    ChannelMessageNew,
    MessageNew,
    TelemetryReceived,
    RadioError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionConnected => "session_connected",
            EventKind::SessionDisconnected => "session_disconnected",
            EventKind::Packet => "packet",
            EventKind::RawPacket => "raw_packet",
            EventKind::MessageSent => "message_sent",
            EventKind::AdvertSent => "advert_sent",
            EventKind::ContactReceived => "contact_received",
            EventKind::AdvertReceived => "advert_received",
            EventKind::PeerSeen => "peer_seen",
            EventKind::SettingsUpdated => "settings_updated",
            EventKind::ContactNew => "mesh.contact.new",
            EventKind::ChannelMessageNew => "mesh.channel.message.new",
            EventKind::MessageNew => "mesh.message.new",
            EventKind::TelemetryReceived => "telemetry_received",
            EventKind::RadioError => "radio_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_name: String,
}

/// `raw_packet` payload: the decoded record plus the undecoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPacketRecord {
    #[serde(flatten)]
    pub record: PacketRecord,
    #[serde(default)]
    pub raw_hex: String,
    #[serde(default)]
    pub raw_hex_preview: String,
}

impl RawPacketRecord {
    pub fn new(record: PacketRecord, raw: &[u8]) -> Self {
        let raw_hex = hex::encode(raw);
        let raw_hex_preview = raw_hex.chars().take(64).collect();
        Self {
            record,
            raw_hex,
            raw_hex_preview,
        }
    }
}

/// Decrypted message delivered by the radio stack's handler layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    pub path_len: usize,
    pub path_hops: Vec<String>,
}

impl HandlerMessage {
    /// Sender as reported, `sender_name` before `peer_name`.
    pub fn sender(&self) -> Option<&str> {
        first_present(&[&self.sender_name, &self.peer_name])
    }

    /// Message body, preferring `payload_text`, then `message_text`, then `text`.
    pub fn body(&self) -> Option<&str> {
        first_present(&[&self.payload_text, &self.message_text, &self.text])
    }
}

/// Contact or advert observation: peer identity plus link metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactAdvert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_type: Option<u8>,
    pub path_hops: Vec<String>,
}

impl ContactAdvert {
    /// Candidate peer name: `sender_name`, `advert_name`, `peer_name`, then `name`.
    pub fn peer_name(&self) -> Option<&str> {
        first_present(&[&self.sender_name, &self.advert_name, &self.peer_name, &self.name])
    }

    pub fn peer_id(&self) -> Option<&str> {
        first_present(&[&self.sender_id, &self.peer_id])
    }
}

impl From<&PacketRecord> for ContactAdvert {
    fn from(record: &PacketRecord) -> Self {
        Self {
            sender_name: record.sender_name.clone(),
            advert_name: record.advert_name.clone(),
            sender_id: record.sender_id.clone(),
            sender_pubkey: record.sender_pubkey.clone(),
            rssi: record.rssi,
            snr: record.snr,
            advert_lat: record.advert_lat,
            advert_lon: record.advert_lon,
            advert_type: record.advert_type,
            path_hops: record.path_hops.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSentInfo {
    pub peer_id: String,
    pub channel_id: String,
    pub body: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertSentInfo {
    pub name: String,
    pub route_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSeenInfo {
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryInfo {
    pub peer_name: String,
    pub telemetry: TelemetryReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioErrorInfo {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MeshEvent {
    #[serde(rename = "session_connected")]
    SessionConnected(NodeInfo),
    #[serde(rename = "session_disconnected")]
    SessionDisconnected(NodeInfo),
    #[serde(rename = "packet")]
    Packet(PacketRecord),
    #[serde(rename = "raw_packet")]
    RawPacket(RawPacketRecord),
    #[serde(rename = "message_sent")]
    MessageSent(MessageSentInfo),
    #[serde(rename = "advert_sent")]
    AdvertSent(AdvertSentInfo),
    #[serde(rename = "contact_received")]
    ContactReceived(ContactAdvert),
    #[serde(rename = "advert_received")]
    AdvertReceived(ContactAdvert),
    #[serde(rename = "peer_seen")]
    PeerSeen(PeerSeenInfo),
    #[serde(rename = "settings_updated")]
    SettingsUpdated(NodeInfo),
    #[serde(rename = "mesh.contact.new")]
    ContactNew(ContactAdvert),
    #[serde(rename = "mesh.channel.message.new")]
    ChannelMessageNew(HandlerMessage),
    #[serde(rename = "mesh.message.new")]
    MessageNew(HandlerMessage),
    #[serde(rename = "telemetry_received")]
    TelemetryReceived(TelemetryInfo),
    #[serde(rename = "radio_error")]
    RadioError(RadioErrorInfo),
}

impl MeshEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MeshEvent::SessionConnected(_) => EventKind::SessionConnected,
            MeshEvent::SessionDisconnected(_) => EventKind::SessionDisconnected,
            MeshEvent::Packet(_) => EventKind::Packet,
            MeshEvent::RawPacket(_) => EventKind::RawPacket,
            MeshEvent::MessageSent(_) => EventKind::MessageSent,
            MeshEvent::AdvertSent(_) => EventKind::AdvertSent,
            MeshEvent::ContactReceived(_) => EventKind::ContactReceived,
            MeshEvent::AdvertReceived(_) => EventKind::AdvertReceived,
            MeshEvent::PeerSeen(_) => EventKind::PeerSeen,
            MeshEvent::SettingsUpdated(_) => EventKind::SettingsUpdated,
            MeshEvent::ContactNew(_) => EventKind::ContactNew,
            MeshEvent::ChannelMessageNew(_) => EventKind::ChannelMessageNew,
            MeshEvent::MessageNew(_) => EventKind::MessageNew,
            MeshEvent::TelemetryReceived(_) => EventKind::TelemetryReceived,
            MeshEvent::RadioError(_) => EventKind::RadioError,
        }
    }

    /// Decoded packet carried by `packet` and `raw_packet` events.
    pub fn packet_record(&self) -> Option<&PacketRecord> {
        match self {
            MeshEvent::Packet(record) => Some(record),
            MeshEvent::RawPacket(raw) => Some(&raw.record),
            _ => None,
        }
    }

    pub fn packet_record_mut(&mut self) -> Option<&mut PacketRecord> {
        match self {
            MeshEvent::Packet(record) => Some(record),
            MeshEvent::RawPacket(raw) => Some(&mut raw.record),
            _ => None,
        }
    }

    pub fn is_packet(&self) -> bool {
        self.packet_record().is_some()
    }
}

fn first_present<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_wire_kind_names() {
        let event = MeshEvent::ChannelMessageNew(HandlerMessage {
            channel_name: Some("ops".into()),
            message_text: Some("hi".into()),
            ..Default::default()
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mesh.channel.message.new");
        assert_eq!(json["data"]["channel_name"], "ops");
        assert_eq!(event.kind().as_str(), "mesh.channel.message.new");

        let back: MeshEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn raw_packet_flattens_record() {
        let record = PacketRecord {
            payload_type: 4,
            payload_type_name: "ADVERT".into(),
            packet_hash: Some("ABCD".into()),
            ..Default::default()
        };
        let event = MeshEvent::RawPacket(RawPacketRecord::new(record, &[0x11, 0x22]));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["payload_type_name"], "ADVERT");
        assert_eq!(json["data"]["raw_hex"], "1122");
        assert_eq!(event.packet_record().and_then(|r| r.packet_hash.as_deref()), Some("ABCD"));
    }

    #[test]
    fn handler_fields_fall_back() {
        let msg = HandlerMessage {
            sender_name: Some(" ".into()),
            peer_name: Some("Carol".into()),
            text: Some("yo".into()),
            ..Default::default()
        };
        assert_eq!(msg.sender(), Some("Carol"));
        assert_eq!(msg.body(), Some("yo"));
    }

    #[test]
    fn contact_name_order() {
        let advert = ContactAdvert {
            advert_name: Some("FromAdvert".into()),
            name: Some("Plain".into()),
            ..Default::default()
        };
        assert_eq!(advert.peer_name(), Some("FromAdvert"));
    }
}
