//! Test utilities & fixtures.
//! Builds throwaway consoles on the mock radio and raw MeshCore frames.

use meshcore_console::config::Config;
use meshcore_console::console::MeshConsole;
use meshcore_console::meshcore::mock::{MockHandle, MockSession};
use meshcore_console::meshcore::PacketRecord;

/// Config with the store placed in `dir`.
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_string_lossy().into_owned();
    config
}

/// Console on a fresh mock session, plus the handle that controls it.
#[allow(dead_code)] // not every test binary builds a console
pub fn mock_console(dir: &tempfile::TempDir) -> (MeshConsole, MockHandle) {
    let handle = MockHandle::new();
    let console = MeshConsole::open(&test_config(dir), MockSession::factory(handle.clone())).expect("console");
    (console, handle)
}

/// Flood-routed ADVERT frame: header, empty path, then
/// `[pubkey:32][timestamp:4][signature:64][flags][lat][lon][name]`.
#[allow(dead_code)]
pub fn advert_frame(key_byte: u8, flags: u8, lat: i32, lon: i32, name: &str) -> Vec<u8> {
    let mut frame = vec![0x01 | (4 << 2), 0x00];
    frame.extend_from_slice(&[key_byte; 32]);
    frame.extend_from_slice(&[0u8; 4 + 64]);
    frame.push(flags);
    if flags & 0x10 != 0 {
        frame.extend_from_slice(&lat.to_le_bytes());
        frame.extend_from_slice(&lon.to_le_bytes());
    }
    frame.extend_from_slice(name.as_bytes());
    frame
}

/// Undecrypted GRP_TXT packet as the radio reports it before the handler layer runs.
#[allow(dead_code)]
pub fn group_packet(hash: &str) -> PacketRecord {
    PacketRecord {
        payload_type: 5,
        payload_type_name: "GRP_TXT".into(),
        route_type: 1,
        route_type_name: "FLOOD".into(),
        payload_hex: Some("00112233".into()),
        packet_hash: Some(hash.into()),
        ..Default::default()
    }
}
