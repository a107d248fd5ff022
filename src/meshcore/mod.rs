//! MeshCore protocol layer: wire framing, payload registry, packet decoding,
//! event types, enrichment, telemetry payloads and the radio session boundary.

pub mod codec;
pub mod contact_book;
pub mod enrich;
pub mod events;
pub mod lpp;
pub mod mock;
pub mod registry;
pub mod session;
pub mod signal;
pub mod wire;

pub use codec::{decode, decode_bytes, repair_utf8, PacketHandle, PacketRecord};
pub use contact_book::{ContactBook, SharedContactBook};
pub use enrich::{Enricher, PacketPatch, PacketPatchSink, PeerLookup};
pub use events::{EventKind, MeshEvent};
pub use lpp::{LppError, TelemetryReport};
pub use registry::{lookup_by_name, lookup_by_numeric, PayloadKind, TypeDescriptor};
pub use session::{RadioSession, SessionAdapter, TransportError};
pub use wire::{RouteType, WireError, WirePacket};
