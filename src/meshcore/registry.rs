//! Payload type registry.
//!
//! Static lookup from numeric wire codes and type names to a [`TypeDescriptor`]
//! carrying the display label, the analyzer style class, the encrypted flag and
//! per-type summary text. Immutable, so it can be shared freely across threads.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::codec::{ControlInfo, PacketRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadKind {
    Req,
    Response,
    TxtMsg,
    Ack,
    Advert,
    GrpTxt,
    GrpData,
    AnonReq,
    Path,
    Trace,
    Multipart,
    Control,
    Raw,
    Unknown,
}

impl PayloadKind {
    pub fn name(self) -> &'static str {
        match self {
            PayloadKind::Req => "REQ",
            PayloadKind::Response => "RESPONSE",
            PayloadKind::TxtMsg => "TXT_MSG",
            PayloadKind::Ack => "ACK",
            PayloadKind::Advert => "ADVERT",
            PayloadKind::GrpTxt => "GRP_TXT",
            PayloadKind::GrpData => "GRP_DATA",
            PayloadKind::AnonReq => "ANON_REQ",
            PayloadKind::Path => "PATH",
            PayloadKind::Trace => "TRACE",
            PayloadKind::Multipart => "MULTIPART",
            PayloadKind::Control => "CONTROL",
            PayloadKind::Raw => "RAW",
            PayloadKind::Unknown => "UNKNOWN",
        }
    }

    /// Wire code for this kind, `None` for [`PayloadKind::Unknown`].
    pub fn code(self) -> Option<u8> {
        NUMERIC.iter().find(|(_, k)| *k == self).map(|(c, _)| *c)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub kind: PayloadKind,
    pub name: &'static str,
    pub css_class: &'static str,
    pub encrypted: bool,
}

const fn descriptor(kind: PayloadKind, name: &'static str, css_class: &'static str, encrypted: bool) -> TypeDescriptor {
    TypeDescriptor {
        kind,
        name,
        css_class,
        encrypted,
    }
}

/// Ordered list; prefix lookups return the first match in this order.
static DESCRIPTORS: [TypeDescriptor; 14] = [
    descriptor(PayloadKind::Advert, "ADVERT", "type-advert", false),
    descriptor(PayloadKind::Ack, "ACK", "type-ack", false),
    descriptor(PayloadKind::Path, "PATH", "type-path", false),
    descriptor(PayloadKind::Trace, "TRACE", "type-path", false),
    descriptor(PayloadKind::GrpTxt, "GRP_TXT", "type-grp", true),
    descriptor(PayloadKind::GrpData, "GRP_DATA", "type-grp", true),
    descriptor(PayloadKind::TxtMsg, "TXT_MSG", "type-txt", true),
    descriptor(PayloadKind::Multipart, "MULTIPART", "type-multi", false),
    descriptor(PayloadKind::Response, "RESPONSE", "type-response", false),
    descriptor(PayloadKind::Req, "REQ", "type-req", false),
    descriptor(PayloadKind::AnonReq, "ANON_REQ", "type-req", false),
    descriptor(PayloadKind::Control, "CONTROL", "type-req", false),
    descriptor(PayloadKind::Raw, "RAW", "type-raw", false),
    descriptor(PayloadKind::Unknown, "UNKNOWN", "type-other", false),
];

const NUMERIC: [(u8, PayloadKind); 13] = [
    (0, PayloadKind::Req),
    (1, PayloadKind::Response),
    (2, PayloadKind::TxtMsg),
    (3, PayloadKind::Ack),
    (4, PayloadKind::Advert),
    (5, PayloadKind::GrpTxt),
    (6, PayloadKind::GrpData),
    (7, PayloadKind::AnonReq),
    (8, PayloadKind::Path),
    (9, PayloadKind::Trace),
    (10, PayloadKind::Multipart),
    (11, PayloadKind::Control),
    (15, PayloadKind::Raw),
];

fn by_kind(kind: PayloadKind) -> &'static TypeDescriptor {
    DESCRIPTORS
        .iter()
        .find(|d| d.kind == kind)
        .unwrap_or(&DESCRIPTORS[DESCRIPTORS.len() - 1])
}

/// Look up by type name, or by prefix (`"GRP"` finds `GRP_TXT`, `"RESP"` finds `RESPONSE`).
pub fn lookup_by_name(name: &str) -> &'static TypeDescriptor {
    let key = name.trim().to_ascii_uppercase();
    if let Some(exact) = DESCRIPTORS.iter().find(|d| d.name == key) {
        return exact;
    }
    if key.is_empty() {
        return by_kind(PayloadKind::Unknown);
    }
    DESCRIPTORS
        .iter()
        .find(|d| d.name.starts_with(&key))
        .unwrap_or_else(|| by_kind(PayloadKind::Unknown))
}

pub fn lookup_by_numeric(code: u8) -> &'static TypeDescriptor {
    let kind = NUMERIC
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, k)| *k)
        .unwrap_or(PayloadKind::Unknown);
    by_kind(kind)
}

pub fn is_encrypted(code: u8) -> bool {
    lookup_by_numeric(code).encrypted
}

/// Analyzer filter choices. Filters match type names by substring so one
/// entry can cover a family (`GRP` covers `GRP_TXT` and `GRP_DATA`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerFilter {
    All,
    TxtMsg,
    Grp,
    Advert,
    Ack,
    Req,
    Response,
    Control,
    Path,
}

impl AnalyzerFilter {
    pub fn pattern(self) -> &'static str {
        match self {
            AnalyzerFilter::All => "ALL",
            AnalyzerFilter::TxtMsg => "TXT",
            AnalyzerFilter::Grp => "GRP",
            AnalyzerFilter::Advert => "ADVERT",
            AnalyzerFilter::Ack => "ACK",
            AnalyzerFilter::Req => "REQ",
            AnalyzerFilter::Response => "RESP",
            AnalyzerFilter::Control => "CONTROL",
            AnalyzerFilter::Path => "PATH",
        }
    }

    pub fn matches(self, type_name: &str) -> bool {
        match self {
            AnalyzerFilter::All => true,
            // Path view also shows traces.
            AnalyzerFilter::Path => type_name == "PATH" || type_name == "TRACE",
            other => matches_filter(type_name, other.pattern()),
        }
    }
}

/// Coarse substring match used by free-text filters.
pub fn matches_filter(type_name: &str, filter: &str) -> bool {
    let filter = filter.trim().to_ascii_uppercase();
    if filter.is_empty() || filter == "ALL" {
        return true;
    }
    type_name.to_ascii_uppercase().contains(&filter)
}

fn advert_type_label(advert_type: Option<u8>) -> &'static str {
    match advert_type {
        Some(1) => "chat",
        Some(2) => "repeater",
        Some(3) => "room",
        Some(4) => "sensor",
        _ => "",
    }
}

fn request_type_label(code: u8) -> String {
    match code {
        0x01 => "STATUS".to_string(),
        0x02 => "KEEP_ALIVE".to_string(),
        0x03 => "TELEMETRY".to_string(),
        0x05 => "ACCESS_LIST".to_string(),
        0x06 => "NEIGHBOURS".to_string(),
        other => format!("0x{:02X}", other),
    }
}

fn prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl TypeDescriptor {
    /// Fallback text for the analyzer when no decrypted content is available.
    pub fn content_summary(&self, record: &PacketRecord) -> String {
        match self.kind {
            PayloadKind::Advert => {
                let Some(name) = record.advert_name.as_deref() else {
                    return "Advert".to_string();
                };
                let label = advert_type_label(record.advert_type);
                let suffix = if label.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", label)
                };
                match (record.advert_lat, record.advert_lon) {
                    (Some(lat), Some(lon)) => format!("{}{} @ {:.4}, {:.4}", name, suffix, lat, lon),
                    _ => format!("Advert: {}{}", name, suffix),
                }
            }
            PayloadKind::Ack => match record.packet_hash.as_deref() {
                Some(hash) => format!("ACK {}", prefix(hash, 12)),
                None => "ACK".to_string(),
            },
            PayloadKind::Path => {
                if record.path_hops.is_empty() {
                    return "Path discovery".to_string();
                }
                let hops: Vec<&str> = record.path_hops.iter().take(5).map(|h| prefix(h, 8)).collect();
                format!("Path: {}", hops.join(" → "))
            }
            PayloadKind::Trace => match record.trace_snr_values.as_deref() {
                Some(values) if !values.is_empty() => {
                    let chain: Vec<String> = values.iter().take(6).map(|s| format!("{:.1}dB", s)).collect();
                    format!("Trace SNR: {}", chain.join(" → "))
                }
                _ => "Trace".to_string(),
            },
            PayloadKind::GrpTxt => match record.channel_name.as_deref() {
                Some(channel) => format!("#{} (encrypted)", channel),
                None => "(encrypted)".to_string(),
            },
            PayloadKind::GrpData => match record.channel_name.as_deref() {
                Some(channel) => format!("#{} (data)", channel),
                None => "(data)".to_string(),
            },
            PayloadKind::TxtMsg => "(encrypted)".to_string(),
            PayloadKind::Multipart => match (&record.multipart_inner_type_name, record.multipart_remaining) {
                (Some(inner), Some(remaining)) => format!("Multi-{} ({} remaining)", inner, remaining),
                _ => "Part ?/?".to_string(),
            },
            PayloadKind::Response => match record.payload_text.as_deref() {
                Some(text) if !text.is_empty() => format!("Response: {}", prefix(text, 60)),
                _ => "Response".to_string(),
            },
            PayloadKind::Req => match record.request_type {
                Some(code) => format!("Request: {}", request_type_label(code)),
                None => "Request".to_string(),
            },
            PayloadKind::AnonReq => match record.anon_sender_pubkey.as_deref() {
                Some(key) if !key.is_empty() => format!("Anon REQ from {}", prefix(key, 8)),
                _ => "Anon REQ".to_string(),
            },
            PayloadKind::Control => match &record.control {
                Some(ControlInfo::DiscoverReq { filter, .. }) => {
                    format!("Discovery REQ (filter=0x{:02X})", filter)
                }
                Some(ControlInfo::DiscoverResp { pub_key, .. }) => {
                    let shown = if pub_key.is_empty() { "?" } else { prefix(pub_key, 8) };
                    format!("Discovery RESP from {}", shown)
                }
                None => {
                    let first = record
                        .payload_hex
                        .as_deref()
                        .and_then(|h| h.get(..2))
                        .and_then(|b| u8::from_str_radix(b, 16).ok());
                    match first.map(|b| b & 0xF0) {
                        Some(0x80) => "Discovery REQ".to_string(),
                        Some(0x90) => "Discovery RESP".to_string(),
                        _ => "Control".to_string(),
                    }
                }
            },
            PayloadKind::Raw | PayloadKind::Unknown => String::new(),
        }
    }

    /// Decorate decrypted text for display.
    pub fn format_content(&self, text: &str, record: &PacketRecord) -> String {
        match (self.kind, record.channel_name.as_deref()) {
            (PayloadKind::GrpTxt | PayloadKind::GrpData, Some(channel)) => format!("#{}: {}", channel, text),
            _ => text.to_string(),
        }
    }
}
