//! MeshCore on-air framing.
//!
//! ```text
//! [header:1][transport_codes:4 (transport routes only)][path_len:1][path:path_len][payload...]
//! ```
//!
//! Header bits 0-1 carry the route type, bits 2-5 the payload type and bits 6-7
//! the payload version.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Numeric payload type of TRACE packets; its hash also covers `path_len`.
pub const PAYLOAD_TYPE_TRACE: u8 = 9;

/// Longest routing path a packet may carry.
pub const MAX_PATH_SIZE: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("empty packet")]
    Empty,
    #[error("truncated packet: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("path length {0} exceeds maximum of {MAX_PATH_SIZE}")]
    PathTooLong(usize),
    #[error("unrecognised {what} byte 0x{value:02X}")]
    UnexpectedByte { what: &'static str, value: u8 },
}

/// Routing mode from header bits 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteType {
    /// Flood routing mode with transport codes.
    TransportFlood = 0x00,
    /// Flood routing mode (builds up path).
    Flood = 0x01,
    /// Direct route (path is supplied).
    Direct = 0x02,
    /// Direct route with transport codes.
    TransportDirect = 0x03,
}

impl RouteType {
    pub fn from_header(header: u8) -> Self {
        match header & 0x03 {
            0x00 => RouteType::TransportFlood,
            0x01 => RouteType::Flood,
            0x02 => RouteType::Direct,
            _ => RouteType::TransportDirect,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn has_transport_codes(self) -> bool {
        matches!(self, RouteType::TransportFlood | RouteType::TransportDirect)
    }

    pub fn is_flood(self) -> bool {
        matches!(self, RouteType::Flood | RouteType::TransportFlood)
    }

    pub fn name(self) -> &'static str {
        match self {
            RouteType::TransportFlood => "TRANSPORT_FLOOD",
            RouteType::Flood => "FLOOD",
            RouteType::Direct => "DIRECT",
            RouteType::TransportDirect => "TRANSPORT_DIRECT",
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One received (or locally built) packet plus the link metadata the radio reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WirePacket {
    pub header: u8,
    pub transport_codes: Option<[u8; 4]>,
    pub path: Vec<u8>,
    pub payload: Vec<u8>,
    /// Declared payload length. The raw buffer may carry padding past it.
    pub payload_len: Option<usize>,
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
}

impl WirePacket {
    /// Build a packet from its parts; route and payload type are packed into the header.
    pub fn new(route: RouteType, payload_type: u8, path: Vec<u8>, payload: Vec<u8>) -> Self {
        let header = route.code() | ((payload_type & 0x0F) << 2);
        let transport_codes = route.has_transport_codes().then_some([0u8; 4]);
        Self {
            header,
            transport_codes,
            path,
            payload,
            ..Default::default()
        }
    }

    /// Parse a raw on-air frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let (&header, rest) = bytes.split_first().ok_or(WireError::Empty)?;
        let route = RouteType::from_header(header);
        let mut offset = 0usize;

        let transport_codes = if route.has_transport_codes() {
            let codes = rest.get(..4).ok_or(WireError::Truncated {
                needed: 4,
                available: rest.len(),
            })?;
            offset += 4;
            Some([codes[0], codes[1], codes[2], codes[3]])
        } else {
            None
        };

        let path_len = *rest.get(offset).ok_or(WireError::Truncated {
            needed: offset + 1,
            available: rest.len(),
        })? as usize;
        offset += 1;
        if path_len > MAX_PATH_SIZE {
            return Err(WireError::PathTooLong(path_len));
        }
        let path = rest
            .get(offset..offset + path_len)
            .ok_or(WireError::Truncated {
                needed: offset + path_len,
                available: rest.len(),
            })?
            .to_vec();
        offset += path_len;

        let payload = rest[offset..].to_vec();
        Ok(Self {
            header,
            transport_codes,
            path,
            payload_len: Some(payload.len()),
            payload,
            snr: None,
            rssi: None,
        })
    }

    /// Attach radio link metadata.
    pub fn with_signal(mut self, snr: Option<f32>, rssi: Option<i32>) -> Self {
        self.snr = snr;
        self.rssi = rssi;
        self
    }

    /// Serialize back to on-air bytes. Paths longer than [`MAX_PATH_SIZE`] are rejected.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        if self.path.len() > MAX_PATH_SIZE {
            return Err(WireError::PathTooLong(self.path.len()));
        }
        let payload = self.payload_bytes();
        let mut out = Vec::with_capacity(6 + self.path.len() + payload.len());
        out.push(self.header);
        if self.route_type().has_transport_codes() {
            out.extend_from_slice(&self.transport_codes.unwrap_or_default());
        }
        out.push(self.path.len() as u8);
        out.extend_from_slice(&self.path);
        out.extend_from_slice(payload);
        Ok(out)
    }

    pub fn route_type(&self) -> RouteType {
        RouteType::from_header(self.header)
    }

    pub fn payload_type(&self) -> u8 {
        (self.header >> 2) & 0x0F
    }

    pub fn payload_version(&self) -> u8 {
        (self.header >> 6) & 0x03
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// Payload bytes honouring the declared length over the raw buffer size.
    pub fn payload_bytes(&self) -> &[u8] {
        match self.payload_len {
            Some(len) if len <= self.payload.len() => &self.payload[..len],
            _ => &self.payload,
        }
    }

    /// SHA-256 over the payload type, the path length (TRACE only) and the payload.
    pub fn packet_hash(&self) -> [u8; 32] {
        let payload_type = self.payload_type();
        let mut hasher = Sha256::new();
        hasher.update([payload_type]);
        if payload_type == PAYLOAD_TYPE_TRACE {
            hasher.update([self.path.len() as u8]);
        }
        hasher.update(self.payload_bytes());
        hasher.finalize().into()
    }

    /// Uppercase hex of the packet hash, cut to `chars` characters.
    pub fn packet_hash_hex(&self, chars: usize) -> String {
        let mut hex = hex::encode_upper(self.packet_hash());
        hex.truncate(chars);
        hex
    }
}
