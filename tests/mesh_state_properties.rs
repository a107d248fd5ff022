//! Mesh state invariants: dedup, channel normalization, public channel
//! protection, advert handling and outbound routing.

mod common;

use meshcore_console::meshcore::decode_bytes;
use meshcore_console::meshcore::events::{ContactAdvert, HandlerMessage, MeshEvent};
use meshcore_console::models::ChannelKind;
use meshcore_console::state::{MeshState, NodeContext, OutboundTarget, StateLimits};
use meshcore_console::storage::MeshStore;

fn fresh_state(dir: &tempfile::TempDir, self_key: Option<String>) -> MeshState {
    let store = MeshStore::open(dir.path()).expect("store");
    let ctx = NodeContext {
        node_name: "base".into(),
        self_public_key: self_key,
    };
    MeshState::load(&store, ctx, StateLimits::default()).expect("state")
}

fn channel_message(id: &str, channel: &str, body: &str) -> HandlerMessage {
    HandlerMessage {
        message_id: Some(id.into()),
        sender_name: Some("Bob".into()),
        channel_name: Some(channel.into()),
        message_text: Some(body.into()),
        payload_type_name: Some("GRP_TXT".into()),
        ..Default::default()
    }
}

#[test]
fn same_message_id_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    let msg = channel_message("dup-1", "ops", "hello");

    assert_eq!(state.process_message(&msg, false).as_deref(), Some("dup-1"));
    assert_eq!(state.process_message(&msg, false), None);
    assert_eq!(state.list_messages_for_channel("ops", 50).len(), 1);
    assert_eq!(state.channel("ops").unwrap().unread_count, 1);

    // also holds across a reload from disk
    drop(state);
    let mut state = fresh_state(&dir, None);
    assert_eq!(state.process_message(&msg, false), None);
    assert_eq!(state.message_count(), 1);
}

#[test]
fn direct_channel_ids_fold_case() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    let first = state.ensure_channel("Alice", None);
    state.ensure_channel("alice", None);
    state.ensure_channel("ALICE", None);

    assert_eq!(first.channel_id, "alice");
    assert_eq!(first.display_name, "Alice");
    let dms: Vec<_> = state
        .list_channels()
        .into_iter()
        .filter(|c| c.kind == ChannelKind::Dm)
        .collect();
    assert_eq!(dms.len(), 1);

    assert_eq!(state.ensure_channel("public", None).channel_id, "public");
    let ops = state.ensure_channel("#Ops", None);
    assert_eq!(ops.channel_id, "#Ops");
    assert_eq!(ops.kind, ChannelKind::Group);
    let hashed_display = state.ensure_channel("Hike", Some("#Hike"));
    assert_eq!(hashed_display.channel_id, "Hike");
    assert_eq!(hashed_display.kind, ChannelKind::Group);
}

#[test]
fn public_channel_cannot_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    state.process_message(&channel_message("p1", "public", "hi all"), false);
    state.process_message(&channel_message("o1", "ops", "ops only"), false);

    assert!(!state.remove_channel("public"));
    assert!(state.channel("public").is_some());
    assert_eq!(state.list_messages_for_channel("public", 10).len(), 1);

    assert!(state.remove_channel("ops"));
    assert!(state.channel("ops").is_none());
    assert!(state.list_messages_for_channel("ops", 10).is_empty());
    assert!(!state.remove_channel("ops"));

    drop(state);
    let state = fresh_state(&dir, None);
    assert!(state.channel("ops").is_none());
    assert_eq!(state.message_count(), 1);
}

#[test]
fn zero_location_advert_leaves_peer_without_location() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    let record = decode_bytes(&common::advert_frame(0x11, 0x80 | 0x10 | 0x01, 0, 0, "Origin"), None, None).unwrap();
    assert_eq!(record.advert_lat, None);

    let out = state.ingest(&MeshEvent::Packet(record));
    assert_eq!(out.peer.as_deref(), Some("Origin"));
    let peer = state.peer("Origin").unwrap();
    assert_eq!(peer.location(), None);
    assert!(peer.location_updated.is_none());
}

#[test]
fn advert_flags_decide_repeater() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    let repeater = decode_bytes(&common::advert_frame(0x22, 0x80 | 0x02, 0, 0, "Hilltop"), None, None).unwrap();
    let chat = decode_bytes(&common::advert_frame(0x33, 0x80, 0, 0, "Walker"), None, None).unwrap();
    state.ingest(&MeshEvent::Packet(repeater));
    state.ingest(&MeshEvent::Packet(chat));

    assert!(state.peer("Hilltop").unwrap().is_repeater);
    assert!(!state.peer("Walker").unwrap().is_repeater);
}

#[test]
fn raw_packets_do_not_create_peers() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    let frame = common::advert_frame(0x44, 0x81, 0, 0, "Twice");
    let record = decode_bytes(&frame, Some(5.0), Some(-90)).unwrap();
    let raw = meshcore_console::meshcore::events::RawPacketRecord::new(record, &frame);
    assert!(state.ingest(&MeshEvent::RawPacket(raw)).peer.is_none());
    assert!(state.list_peers().is_empty());
}

#[test]
fn own_advert_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let own_key = "5a".repeat(32);
    let mut state = fresh_state(&dir, Some(own_key.clone()));
    let advert = ContactAdvert {
        advert_name: Some("base".into()),
        sender_pubkey: Some(own_key.to_uppercase()),
        rssi: Some(-40),
        ..Default::default()
    };
    assert!(state.ingest(&MeshEvent::AdvertReceived(advert)).peer.is_none());
    assert!(state.peer("base").is_none());
}

#[test]
fn outbound_to_new_peer_creates_direct_channel() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    let route = state.resolve_outbound("Alice");
    assert_eq!(route.channel_id, "alice");
    assert_eq!(route.target, OutboundTarget::Direct("Alice".into()));

    let channel = state.channel("alice").unwrap();
    assert_eq!(channel.display_name, "Alice");
    assert_eq!(channel.kind, ChannelKind::Dm);
    assert_eq!(channel.peer_name.as_deref(), Some("Alice"));

    // later sends by the lowercase id still address the original-case contact
    assert_eq!(state.resolve_outbound("alice").target, OutboundTarget::Direct("Alice".into()));
}

#[test]
fn mixed_case_sender_lands_in_one_dm_channel() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh_state(&dir, None);
    for (id, sender) in [("a", "Carol"), ("b", "carol")] {
        let msg = HandlerMessage {
            message_id: Some(id.into()),
            sender_name: Some(sender.into()),
            text: Some("hey".into()),
            ..Default::default()
        };
        state.ingest(&MeshEvent::MessageNew(msg));
    }
    let channel = state.channel("carol").unwrap();
    assert_eq!(channel.unread_count, 2);
    assert_eq!(channel.display_name, "Carol");
}
