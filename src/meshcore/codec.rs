//! Packet decoding.
//!
//! [`decode`] turns a [`PacketHandle`] into a flat [`PacketRecord`]. Decoding never
//! fails as a whole: every type-specific parse is isolated and a failure only
//! leaves its optional fields unset.
//!
//! The radio stack hands packets over in three shapes, modelled by
//! [`PacketHandle`]:
//! - a bare wire packet,
//! - a wire packet the stack already decrypted (group or direct text),
//! - an annotated packet that also carries sender attributes, a header object
//!   and/or a contact object.
//!
//! Sender identity is resolved in priority order: decrypted sub-object, direct
//! attributes, header, contact, then the advert payload itself.

use log::trace;
use serde::{Deserialize, Serialize};

use super::registry::{self, PayloadKind};
use super::wire::{WireError, WirePacket};
use crate::logutil::hex_snippet;

const PUB_KEY_SIZE: usize = 32;
const TIMESTAMP_SIZE: usize = 4;
const SIGNATURE_SIZE: usize = 64;
const ADVERT_HEADER_SIZE: usize = PUB_KEY_SIZE + TIMESTAMP_SIZE + SIGNATURE_SIZE;

const ADVERT_FLAG_HAS_LOCATION: u8 = 0x10;
const ADVERT_FLAG_HAS_FEATURE1: u8 = 0x20;
const ADVERT_FLAG_HAS_FEATURE2: u8 = 0x40;
const ADVERT_FLAG_HAS_NAME: u8 = 0x80;

/// Advert type (flags low nibble) used by repeaters.
pub const ADVERT_TYPE_REPEATER: u8 = 2;

const CONTROL_DISCOVER_REQ: u8 = 0x80;
const CONTROL_DISCOVER_RESP: u8 = 0x90;

/// Length of the id fields (hex chars) carried on records.
const SENDER_ID_LEN: usize = 16;

/// Structured view of one received packet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketRecord {
    pub payload_type: u8,
    pub payload_type_name: String,
    pub route_type: u8,
    pub route_type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advert_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_sender_pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_remaining: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_inner_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_inner_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_snr_values: Option<Vec<f32>>,
    pub path_len: usize,
    pub path_hops: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_hash: Option<String>,
}

impl PacketRecord {
    pub fn kind(&self) -> PayloadKind {
        registry::lookup_by_numeric(self.payload_type).kind
    }

    /// Display text: decrypted content when present, else the type summary.
    pub fn display_content(&self) -> String {
        let descriptor = registry::lookup_by_numeric(self.payload_type);
        match self.payload_text.as_deref() {
            Some(text) if !text.is_empty() => descriptor.format_content(text, self),
            _ => descriptor.content_summary(self),
        }
    }
}

/// CONTROL sub-message, distinguished by the high nibble of the first byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "control_type")]
pub enum ControlInfo {
    #[serde(rename = "DISCOVER_REQ")]
    DiscoverReq { filter: u8, tag: u32, prefix_only: bool },
    #[serde(rename = "DISCOVER_RESP")]
    DiscoverResp { node_type: u8, tag: u32, pub_key: String },
}

/// Decrypted group-text content attached by the radio stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTextData {
    pub text: Option<String>,
    pub full_content: Option<String>,
    pub channel_name: Option<String>,
    pub sender_name: Option<String>,
}

/// Decrypted direct-text content attached by the radio stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextData {
    pub text: Option<String>,
    pub message: Option<String>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptedPayload {
    pub group_text: Option<GroupTextData>,
    pub text: Option<TextData>,
    /// Request sub-type recovered from a decrypted REQ.
    pub request_type: Option<u8>,
}

/// Node identifier as the stack reports it: either text or raw key bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeRef {
    Text(String),
    Bytes(Vec<u8>),
}

impl NodeRef {
    fn to_sender_id(&self) -> String {
        match self {
            NodeRef::Text(s) => s.chars().take(SENDER_ID_LEN).collect(),
            NodeRef::Bytes(b) => {
                let mut hex = hex::encode(b);
                hex.truncate(SENDER_ID_LEN);
                hex
            }
        }
    }
}

/// Sender attributes set directly on an annotated packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderAttributes {
    pub sender_name: Option<String>,
    pub peer_name: Option<String>,
    pub from_name: Option<String>,
    pub source_name: Option<String>,
    pub name: Option<String>,
    pub contact_name: Option<String>,
    pub sender_id: Option<NodeRef>,
    pub peer_id: Option<NodeRef>,
    pub from_id: Option<NodeRef>,
    pub source_id: Option<NodeRef>,
    pub sender: Option<NodeRef>,
}

/// Header object some stacks attach to a packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderHeader {
    pub sender_name: Option<String>,
    pub from_name: Option<String>,
    pub source_name: Option<String>,
    pub name: Option<String>,
    pub sender_id: Option<NodeRef>,
    pub from_id: Option<NodeRef>,
    pub source_id: Option<NodeRef>,
    pub sender: Option<NodeRef>,
}

/// Contact (or sender) object attached to a packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotatedPacket {
    pub packet: WirePacket,
    pub decrypted: Option<DecryptedPayload>,
    pub attributes: SenderAttributes,
    pub header: Option<SenderHeader>,
    pub contact: Option<ContactInfo>,
}

/// Packet as handed over by the radio stack.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketHandle {
    Wire(WirePacket),
    Decrypted {
        packet: WirePacket,
        decrypted: DecryptedPayload,
    },
    Annotated(Box<AnnotatedPacket>),
}

impl PacketHandle {
    pub fn wire(&self) -> &WirePacket {
        match self {
            PacketHandle::Wire(packet) => packet,
            PacketHandle::Decrypted { packet, .. } => packet,
            PacketHandle::Annotated(annotated) => &annotated.packet,
        }
    }

    fn decrypted(&self) -> Option<&DecryptedPayload> {
        match self {
            PacketHandle::Wire(_) => None,
            PacketHandle::Decrypted { decrypted, .. } => Some(decrypted),
            PacketHandle::Annotated(annotated) => annotated.decrypted.as_ref(),
        }
    }

    fn annotations(&self) -> Option<&AnnotatedPacket> {
        match self {
            PacketHandle::Annotated(annotated) => Some(annotated),
            _ => None,
        }
    }
}

impl From<WirePacket> for PacketHandle {
    fn from(packet: WirePacket) -> Self {
        PacketHandle::Wire(packet)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// First non-empty sender name across the handle's sources.
fn resolve_sender_name(handle: &PacketHandle) -> Option<String> {
    if let Some(decrypted) = handle.decrypted() {
        let group = decrypted.group_text.as_ref().and_then(|g| non_empty(&g.sender_name));
        let direct = decrypted.text.as_ref().and_then(|t| non_empty(&t.sender_name));
        if let Some(name) = group.or(direct) {
            return Some(name);
        }
    }
    let annotated = handle.annotations()?;
    let attrs = &annotated.attributes;
    [
        &attrs.sender_name,
        &attrs.peer_name,
        &attrs.from_name,
        &attrs.source_name,
        &attrs.name,
        &attrs.contact_name,
    ]
    .into_iter()
    .find_map(non_empty)
    .or_else(|| {
        annotated.header.as_ref().and_then(|h| {
            [&h.sender_name, &h.from_name, &h.source_name, &h.name]
                .into_iter()
                .find_map(non_empty)
        })
    })
    .or_else(|| {
        annotated.contact.as_ref().and_then(|c| {
            [&c.name, &c.display_name, &c.node_name]
                .into_iter()
                .find_map(non_empty)
        })
    })
}

fn resolve_sender_id(handle: &PacketHandle) -> Option<String> {
    let annotated = handle.annotations()?;
    let attrs = &annotated.attributes;
    [
        &attrs.sender_id,
        &attrs.peer_id,
        &attrs.from_id,
        &attrs.source_id,
        &attrs.sender,
    ]
    .into_iter()
    .flatten()
    .next()
    .or_else(|| {
        annotated.header.as_ref().and_then(|h| {
            [&h.sender_id, &h.from_id, &h.source_id, &h.sender]
                .into_iter()
                .flatten()
                .next()
        })
    })
    .map(NodeRef::to_sender_id)
}

/// Decrypted text and channel, if the stack supplied them.
fn decrypted_text(decrypted: &DecryptedPayload) -> (Option<String>, Option<String>) {
    let mut text = None;
    let mut channel = None;
    if let Some(group) = &decrypted.group_text {
        text = non_empty(&group.text).or_else(|| non_empty(&group.full_content));
        channel = non_empty(&group.channel_name);
    }
    if text.is_none() {
        if let Some(direct) = &decrypted.text {
            text = non_empty(&direct.text).or_else(|| non_empty(&direct.message));
        }
    }
    (text, channel)
}

/// Decode a packet handle into a [`PacketRecord`].
pub fn decode(handle: &PacketHandle) -> PacketRecord {
    let wire = handle.wire();
    let descriptor = registry::lookup_by_numeric(wire.payload_type());
    let route = wire.route_type();
    let payload = wire.payload_bytes();

    let mut record = PacketRecord {
        payload_type: wire.payload_type(),
        payload_type_name: descriptor.name.to_string(),
        route_type: route.code(),
        route_type_name: route.name().to_string(),
        payload_len: wire.payload_len,
        snr: wire.snr,
        rssi: wire.rssi,
        payload_hex: Some(hex::encode(payload)),
        // Tentative only; replaced by decrypted text or cleared below.
        payload_text: std::str::from_utf8(payload).ok().map(str::to_string),
        path_len: wire.path_len(),
        ..Default::default()
    };

    let mut have_decrypted_text = false;
    if let Some(decrypted) = handle.decrypted() {
        let (text, channel) = decrypted_text(decrypted);
        if let Some(text) = text {
            record.payload_text = Some(text);
            have_decrypted_text = true;
        }
        record.channel_name = channel;
        record.request_type = decrypted.request_type;
    }

    record.sender_name = resolve_sender_name(handle);
    record.sender_id = resolve_sender_id(handle);

    if !have_decrypted_text && descriptor.encrypted {
        record.payload_text = None;
    }

    let kind = descriptor.kind;
    if kind == PayloadKind::Advert {
        match parse_advert(payload) {
            Ok(advert) => advert.apply(&mut record),
            Err(e) => trace!("advert parse skipped: {} ({})", e, hex_snippet(payload, 16)),
        }
    }
    if kind == PayloadKind::AnonReq {
        match parse_anon_req(payload) {
            Ok(key) => record.anon_sender_pubkey = Some(key),
            Err(e) => trace!("anon_req parse skipped: {}", e),
        }
    }
    if kind == PayloadKind::Multipart {
        match parse_multipart(payload) {
            Ok((remaining, inner)) => {
                record.multipart_remaining = Some(remaining);
                record.multipart_inner_type = Some(inner);
                record.multipart_inner_type_name = Some(registry::lookup_by_numeric(inner).name.to_string());
            }
            Err(e) => trace!("multipart parse skipped: {}", e),
        }
    }
    if kind == PayloadKind::Control {
        match parse_control(payload) {
            Ok(control) => record.control = Some(control),
            Err(e) => trace!("control parse skipped: {}", e),
        }
    }

    if kind == PayloadKind::Trace {
        // Trace paths hold per-hop SNR samples, not hop ids.
        record.trace_snr_values = Some(trace_snr_values(&wire.path));
    } else {
        record.path_hops = wire.path.iter().map(|b| format!("{:02X}", b)).collect();
    }

    record.packet_hash = Some(wire.packet_hash_hex(SENDER_ID_LEN));
    record
}

/// Decode a raw on-air frame with optional link metadata.
pub fn decode_bytes(bytes: &[u8], snr: Option<f32>, rssi: Option<i32>) -> Result<PacketRecord, WireError> {
    let packet = WirePacket::from_bytes(bytes)?.with_signal(snr, rssi);
    Ok(decode(&PacketHandle::Wire(packet)))
}

#[derive(Debug, Default, PartialEq)]
struct AdvertInfo {
    pubkey: String,
    advert_type: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    name: Option<String>,
}

impl AdvertInfo {
    fn apply(self, record: &mut PacketRecord) {
        if record.sender_name.is_none() {
            record.sender_name = self.name.clone();
        }
        if record.sender_id.is_none() {
            record.sender_id = Some(self.pubkey.chars().take(SENDER_ID_LEN).collect());
        }
        record.sender_pubkey = Some(self.pubkey);
        record.advert_name = self.name;
        record.advert_type = Some(self.advert_type);
        record.advert_lat = self.lat;
        record.advert_lon = self.lon;
    }
}

fn le_i32(bytes: &[u8]) -> Option<i32> {
    Some(i32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
}

fn le_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
}

fn parse_advert(payload: &[u8]) -> Result<AdvertInfo, WireError> {
    if payload.len() < ADVERT_HEADER_SIZE + 1 {
        return Err(WireError::Truncated {
            needed: ADVERT_HEADER_SIZE + 1,
            available: payload.len(),
        });
    }
    let mut info = AdvertInfo {
        pubkey: hex::encode(&payload[..PUB_KEY_SIZE]),
        ..Default::default()
    };

    let appdata = &payload[ADVERT_HEADER_SIZE..];
    let flags = appdata[0];
    info.advert_type = flags & 0x0F;
    let mut offset = 1;

    if flags & ADVERT_FLAG_HAS_LOCATION != 0 {
        if let (Some(lat), Some(lon)) = (
            appdata.get(offset..).and_then(le_i32),
            appdata.get(offset + 4..).and_then(le_i32),
        ) {
            // (0, 0) means the node shares no position.
            if lat != 0 || lon != 0 {
                info.lat = Some(lat as f64 / 1_000_000.0);
                info.lon = Some(lon as f64 / 1_000_000.0);
            }
            offset += 8;
        }
    }
    if flags & ADVERT_FLAG_HAS_FEATURE1 != 0 {
        offset += 2;
    }
    if flags & ADVERT_FLAG_HAS_FEATURE2 != 0 {
        offset += 2;
    }
    if flags & ADVERT_FLAG_HAS_NAME != 0 {
        if let Some(bytes) = appdata.get(offset..) {
            if let Ok(raw) = std::str::from_utf8(bytes) {
                let name = raw.trim_end_matches('\0');
                if !name.is_empty() && !name.chars().any(char::is_control) {
                    info.name = Some(name.to_string());
                }
            }
        }
    }
    Ok(info)
}

fn parse_anon_req(payload: &[u8]) -> Result<String, WireError> {
    // [dest_hash:1][sender_pubkey:32][ciphertext...]
    payload
        .get(1..1 + PUB_KEY_SIZE)
        .map(hex::encode)
        .ok_or(WireError::Truncated {
            needed: 1 + PUB_KEY_SIZE,
            available: payload.len(),
        })
}

fn parse_multipart(payload: &[u8]) -> Result<(u8, u8), WireError> {
    let byte = *payload.first().ok_or(WireError::Empty)?;
    Ok((byte >> 4, byte & 0x0F))
}

fn parse_control(payload: &[u8]) -> Result<ControlInfo, WireError> {
    let first = *payload.first().ok_or(WireError::Empty)?;
    let truncated = |needed: usize| WireError::Truncated {
        needed,
        available: payload.len(),
    };
    match first & 0xF0 {
        CONTROL_DISCOVER_REQ => {
            let filter = *payload.get(1).ok_or_else(|| truncated(2))?;
            let tag = payload.get(2..).and_then(le_u32).ok_or_else(|| truncated(6))?;
            Ok(ControlInfo::DiscoverReq {
                filter,
                tag,
                prefix_only: first & 0x01 != 0,
            })
        }
        CONTROL_DISCOVER_RESP => {
            let tag = payload.get(1..).and_then(le_u32).ok_or_else(|| truncated(5))?;
            Ok(ControlInfo::DiscoverResp {
                node_type: first & 0x0F,
                tag,
                pub_key: hex::encode(&payload[5..]),
            })
        }
        _ => Err(WireError::UnexpectedByte {
            what: "control",
            value: first,
        }),
    }
}

/// Path bytes of a TRACE packet as signed quarter-dB SNR samples.
pub fn trace_snr_values(path: &[u8]) -> Vec<f32> {
    path.iter().map(|b| (*b as i8) as f32 / 4.0).collect()
}

/// Undo UTF-8 text that was mis-decoded as Latin-1 somewhere upstream.
pub fn repair_utf8(s: &str) -> String {
    if !s.chars().any(|c| c as u32 >= 0x80) || s.chars().any(|c| c as u32 > 0xFF) {
        return s.to_string();
    }
    let bytes: Vec<u8> = s.chars().map(|c| c as u32 as u8).collect();
    match String::from_utf8(bytes) {
        Ok(repaired) => repaired,
        Err(_) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshcore::wire::RouteType;

    fn advert_payload(flags: u8, lat: i32, lon: i32, name: &[u8]) -> Vec<u8> {
        let mut p = vec![0xAB; PUB_KEY_SIZE];
        p.extend_from_slice(&[0u8; TIMESTAMP_SIZE + SIGNATURE_SIZE]);
        p.push(flags);
        if flags & ADVERT_FLAG_HAS_LOCATION != 0 {
            p.extend_from_slice(&lat.to_le_bytes());
            p.extend_from_slice(&lon.to_le_bytes());
        }
        p.extend_from_slice(name);
        p
    }

    fn summary(rec: &PacketRecord) -> String {
        registry::lookup_by_numeric(rec.payload_type).content_summary(rec)
    }

    fn wire(payload_type: u8, path: Vec<u8>, payload: Vec<u8>) -> PacketHandle {
        PacketHandle::Wire(WirePacket::new(RouteType::Flood, payload_type, path, payload))
    }

    #[test]
    fn advert_with_location_and_name() {
        let payload = advert_payload(0x80 | 0x10 | 0x01, 37_774_900, -122_419_400, b"Alpha\0\0");
        let rec = decode(&wire(4, vec![0x3A], payload));
        assert_eq!(rec.payload_type_name, "ADVERT");
        assert_eq!(rec.advert_name.as_deref(), Some("Alpha"));
        assert_eq!(rec.sender_name.as_deref(), Some("Alpha"));
        assert_eq!(rec.advert_type, Some(1));
        assert!((rec.advert_lat.unwrap() - 37.7749).abs() < 1e-9);
        assert!((rec.advert_lon.unwrap() + 122.4194).abs() < 1e-9);
        let key = "ab".repeat(32);
        assert_eq!(rec.sender_pubkey.as_deref(), Some(key.as_str()));
        assert_eq!(rec.sender_id.as_deref(), Some(&key[..16]));
        assert_eq!(rec.path_hops, vec!["3A".to_string()]);
    }

    #[test]
    fn advert_zero_location_is_no_location() {
        let payload = advert_payload(0x80 | 0x10, 0, 0, b"Nowhere");
        let rec = decode(&wire(4, vec![], payload));
        assert_eq!(rec.advert_lat, None);
        assert_eq!(rec.advert_lon, None);
        assert_eq!(rec.advert_name.as_deref(), Some("Nowhere"));
    }

    #[test]
    fn advert_skips_feature_blocks_and_rejects_control_names() {
        let mut name = vec![0x11, 0x22, 0x33, 0x44];
        name.extend_from_slice(b"Relay");
        let rec = decode(&wire(4, vec![], advert_payload(0x80 | 0x20 | 0x40 | 0x02, 0, 0, &name)));
        assert_eq!(rec.advert_name.as_deref(), Some("Relay"));
        assert_eq!(rec.advert_type, Some(ADVERT_TYPE_REPEATER));

        let rec = decode(&wire(4, vec![], advert_payload(0x80, 0, 0, b"bad\x07name")));
        assert_eq!(rec.advert_name, None);
    }

    #[test]
    fn short_advert_degrades() {
        let rec = decode(&wire(4, vec![], vec![1, 2, 3]));
        assert_eq!(rec.payload_type_name, "ADVERT");
        assert!(rec.sender_pubkey.is_none());
        assert_eq!(rec.payload_hex.as_deref(), Some("010203"));
    }

    #[test]
    fn encrypted_types_clear_tentative_text() {
        for code in [2u8, 5, 6] {
            let rec = decode(&wire(code, vec![], b"looks like text".to_vec()));
            assert_eq!(rec.payload_text, None, "type {}", code);
            assert!(rec.payload_hex.is_some());
        }
        let rec = decode(&wire(1, vec![], b"plain".to_vec()));
        assert_eq!(rec.payload_text.as_deref(), Some("plain"));
    }

    #[test]
    fn decrypted_group_text_wins() {
        let handle = PacketHandle::Decrypted {
            packet: WirePacket::new(RouteType::Flood, 5, vec![], vec![0xFF, 0xFE]),
            decrypted: DecryptedPayload {
                group_text: Some(GroupTextData {
                    text: None,
                    full_content: Some("hello mesh".into()),
                    channel_name: Some("ops".into()),
                    sender_name: Some("Bob".into()),
                }),
                ..Default::default()
            },
        };
        let rec = decode(&handle);
        assert_eq!(rec.payload_text.as_deref(), Some("hello mesh"));
        assert_eq!(rec.channel_name.as_deref(), Some("ops"));
        assert_eq!(rec.sender_name.as_deref(), Some("Bob"));
        assert_eq!(rec.display_content(), "#ops: hello mesh");
    }

    #[test]
    fn sender_fallback_order() {
        let annotated = AnnotatedPacket {
            packet: WirePacket::new(RouteType::Direct, 1, vec![], vec![]),
            attributes: SenderAttributes {
                from_name: Some("  ".into()),
                sender_id: Some(NodeRef::Bytes(vec![0xAA; 12])),
                ..Default::default()
            },
            header: Some(SenderHeader {
                name: Some("HeaderName".into()),
                ..Default::default()
            }),
            contact: Some(ContactInfo {
                name: Some("ContactName".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let rec = decode(&PacketHandle::Annotated(Box::new(annotated)));
        assert_eq!(rec.sender_name.as_deref(), Some("HeaderName"));
        assert_eq!(rec.sender_id.as_deref(), Some("aaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn trace_path_becomes_snr() {
        let rec = decode(&wire(9, vec![0x04, 0xFC], vec![0x01, 0x02]));
        assert_eq!(rec.trace_snr_values, Some(vec![1.0, -1.0]));
        assert!(rec.path_hops.is_empty());
        assert_eq!(rec.path_len, 2);
    }

    #[test]
    fn anon_req_sender_key() {
        let mut payload = vec![0x42];
        payload.extend_from_slice(&[0x11; 32]);
        payload.extend_from_slice(&[0xEE; 8]);
        let rec = decode(&wire(7, vec![], payload));
        assert_eq!(rec.anon_sender_pubkey, Some("11".repeat(32)));
        assert_eq!(summary(&rec), "Anon REQ from 11111111");
    }

    #[test]
    fn multipart_split() {
        let rec = decode(&wire(10, vec![], vec![0x32, 0x00]));
        assert_eq!(rec.multipart_remaining, Some(3));
        assert_eq!(rec.multipart_inner_type, Some(2));
        assert_eq!(summary(&rec), "Multi-TXT_MSG (3 remaining)");
    }

    #[test]
    fn control_discovery() {
        let rec = decode(&wire(11, vec![], vec![0x81, 0x04, 0x78, 0x56, 0x34, 0x12]));
        assert_eq!(
            rec.control,
            Some(ControlInfo::DiscoverReq {
                filter: 0x04,
                tag: 0x1234_5678,
                prefix_only: true
            })
        );
        assert_eq!(summary(&rec), "Discovery REQ (filter=0x04)");

        let rec = decode(&wire(11, vec![], vec![0x92, 1, 0, 0, 0, 0xCA, 0xFE, 0xBA, 0xBE, 0x00]));
        match rec.control {
            Some(ControlInfo::DiscoverResp { node_type, tag, ref pub_key }) => {
                assert_eq!(node_type, 2);
                assert_eq!(tag, 1);
                assert_eq!(pub_key, "cafebabe00");
            }
            other => panic!("unexpected control {:?}", other),
        }
        assert_eq!(summary(&rec), "Discovery RESP from cafebabe");

        let rec = decode(&wire(11, vec![], vec![0x80, 0x01]));
        assert!(rec.control.is_none());
        assert_eq!(summary(&rec), "Discovery REQ");
    }

    #[test]
    fn decode_bytes_sets_hash_and_signal() {
        let frame = WirePacket::new(RouteType::Flood, 3, vec![0x01, 0x02], vec![0xAA, 0xBB, 0xCC, 0xDD])
            .to_bytes()
            .unwrap();
        let rec = decode_bytes(&frame, Some(6.5), Some(-90)).unwrap();
        assert_eq!(rec.payload_type_name, "ACK");
        assert_eq!(rec.route_type_name, "FLOOD");
        assert_eq!(rec.snr, Some(6.5));
        assert_eq!(rec.rssi, Some(-90));
        assert_eq!(rec.packet_hash.as_ref().map(|h| h.len()), Some(16));
        assert_eq!(rec.path_hops, vec!["01".to_string(), "02".to_string()]);
    }

    #[test]
    fn repairs_mojibake() {
        assert_eq!(repair_utf8("CafÃ©"), "Café");
        assert_eq!(repair_utf8("plain"), "plain");
        assert_eq!(repair_utf8("Café"), "Café");
        assert_eq!(repair_utf8("日本"), "日本");
    }
}
