//! CayenneLPP telemetry payloads.
//!
//! A payload is a run of `[channel:1][type:1][value...]` records. Values are
//! big-endian fixed-width integers scaled per sensor type; the location type
//! packs latitude, longitude and altitude as signed 24-bit fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LppError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("unknown sensor type {type_id} on channel {channel}")]
    UnknownType { channel: u8, type_id: u8 },

    #[error("sensor type {type_id} needs {needed} bytes, {available} left")]
    Truncated {
        type_id: u8,
        needed: usize,
        available: usize,
    },

    #[error("no sensors in payload")]
    Empty,
}

pub const TYPE_LOCATION: u8 = 136;

struct SensorSpec {
    type_id: u8,
    name: &'static str,
    /// Bytes per field.
    width: usize,
    fields: usize,
    signed: bool,
    scale: f64,
}

const fn spec(type_id: u8, name: &'static str, width: usize, fields: usize, signed: bool, scale: f64) -> SensorSpec {
    SensorSpec {
        type_id,
        name,
        width,
        fields,
        signed,
        scale,
    }
}

const SENSORS: &[SensorSpec] = &[
    spec(0, "Digital Input", 1, 1, false, 1.0),
    spec(1, "Digital Output", 1, 1, false, 1.0),
    spec(2, "Analog Input", 2, 1, true, 100.0),
    spec(3, "Analog Output", 2, 1, true, 100.0),
    spec(100, "Generic Sensor", 4, 1, false, 1.0),
    spec(101, "Illuminance Sensor", 2, 1, false, 1.0),
    spec(102, "Presence Sensor", 1, 1, false, 1.0),
    spec(103, "Temperature Sensor", 2, 1, true, 10.0),
    spec(104, "Humidity Sensor", 1, 1, false, 2.0),
    spec(113, "Accelerometer", 2, 3, true, 1000.0),
    spec(115, "Barometer", 2, 1, false, 10.0),
    spec(116, "Voltage", 2, 1, false, 100.0),
    spec(117, "Current", 2, 1, false, 1000.0),
    spec(118, "Frequency", 4, 1, false, 1.0),
    spec(120, "Percentage", 1, 1, false, 1.0),
    spec(121, "Altitude", 2, 1, true, 1.0),
    spec(125, "Concentration", 2, 1, false, 1.0),
    spec(128, "Power", 2, 1, false, 1.0),
    spec(130, "Distance", 4, 1, false, 1000.0),
    spec(131, "Energy", 4, 1, false, 1000.0),
    spec(132, "Direction", 2, 1, false, 1.0),
    spec(133, "Unix Time", 4, 1, false, 1.0),
    spec(134, "Gyrometer", 2, 3, true, 100.0),
    spec(135, "Colour", 1, 3, false, 1.0),
    spec(TYPE_LOCATION, "Location", 3, 3, true, 1.0),
    spec(142, "Switch", 1, 1, false, 1.0),
];

fn lookup(type_id: u8) -> Option<&'static SensorSpec> {
    SENSORS.iter().find(|s| s.type_id == type_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LppValue {
    Location {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LppSensor {
    pub channel: u8,
    pub type_id: u8,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: LppValue,
}

/// Decoded reply to a telemetry request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub sensor_count: usize,
    pub sensors: Vec<LppSensor>,
    pub raw_hex: String,
}

impl TelemetryReport {
    pub fn from_bytes(payload: &[u8]) -> Result<Self, LppError> {
        let sensors = decode(payload)?;
        if sensors.is_empty() {
            return Err(LppError::Empty);
        }
        Ok(Self {
            sensor_count: sensors.len(),
            sensors,
            raw_hex: hex::encode(payload),
        })
    }

    pub fn from_hex(payload: &str) -> Result<Self, LppError> {
        let bytes = hex::decode(payload.trim()).map_err(|e| LppError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// First reported location, if any.
    pub fn location(&self) -> Option<(f64, f64)> {
        self.sensors.iter().find_map(|s| match s.value {
            LppValue::Location {
                latitude, longitude, ..
            } => Some((latitude, longitude)),
            _ => None,
        })
    }
}

/// Decode every record in `payload`. An empty payload yields no sensors.
pub fn decode(payload: &[u8]) -> Result<Vec<LppSensor>, LppError> {
    let mut sensors = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        if payload.len() - pos < 2 {
            return Err(LppError::Truncated {
                type_id: 0,
                needed: 2,
                available: payload.len() - pos,
            });
        }
        let channel = payload[pos];
        let type_id = payload[pos + 1];
        pos += 2;

        let spec = lookup(type_id).ok_or(LppError::UnknownType { channel, type_id })?;
        let needed = spec.width * spec.fields;
        let available = payload.len() - pos;
        if available < needed {
            return Err(LppError::Truncated {
                type_id,
                needed,
                available,
            });
        }
        let raw: Vec<i64> = payload[pos..pos + needed]
            .chunks(spec.width)
            .map(|field| read_int(field, spec.signed))
            .collect();
        pos += needed;

        let value = if type_id == TYPE_LOCATION {
            LppValue::Location {
                latitude: raw[0] as f64 / 10_000.0,
                longitude: raw[1] as f64 / 10_000.0,
                altitude: raw[2] as f64 / 100.0,
            }
        } else if spec.fields == 1 {
            LppValue::Scalar(raw[0] as f64 / spec.scale)
        } else {
            LppValue::Vector(raw.iter().map(|v| *v as f64 / spec.scale).collect())
        };
        sensors.push(LppSensor {
            channel,
            type_id,
            type_name: spec.name.to_string(),
            value,
        });
    }
    Ok(sensors)
}

/// A single location record.
pub fn encode_gps(channel: u8, lat: f64, lon: f64, alt: f64) -> Vec<u8> {
    let mut out = vec![channel, TYPE_LOCATION];
    for v in [
        (lat * 10_000.0).round() as i32,
        (lon * 10_000.0).round() as i32,
        (alt * 100.0).round() as i32,
    ] {
        out.extend_from_slice(&v.to_be_bytes()[1..]);
    }
    out
}

fn read_int(bytes: &[u8], signed: bool) -> i64 {
    let unsigned = bytes.iter().fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
    let bits = bytes.len() as u32 * 8;
    if signed && unsigned & (1 << (bits - 1)) != 0 {
        unsigned - (1 << bits)
    } else {
        unsigned
    }
}
