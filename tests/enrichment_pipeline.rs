//! Packet enrichment through the console poll loop: handler events patch the
//! packets they belong to, in memory and in the packet log.

mod common;

use std::convert::Infallible;

use meshcore_console::meshcore::enrich::{Enricher, PacketPatch, PacketPatchSink, PeerLookup};
use meshcore_console::meshcore::events::{ContactAdvert, HandlerMessage, MeshEvent, RawPacketRecord};
use meshcore_console::meshcore::PacketRecord;

#[derive(Default)]
struct CountingSink {
    calls: Vec<(String, PacketPatch)>,
}

impl PacketPatchSink for CountingSink {
    type Error = Infallible;

    fn update_by_hash(&mut self, packet_hash: &str, patch: &PacketPatch) -> Result<usize, Infallible> {
        self.calls.push((packet_hash.to_string(), patch.clone()));
        Ok(1)
    }
}

fn ops_message(hash: &str) -> HandlerMessage {
    HandlerMessage {
        message_id: Some(format!("msg-{}", hash)),
        sender_name: Some("Bob".into()),
        channel_name: Some("ops".into()),
        message_text: Some("hi".into()),
        packet_hash: Some(hash.into()),
        ..Default::default()
    }
}

#[test]
fn group_packet_is_patched_once_across_batches() {
    let mut enricher = Enricher::default();
    let mut sink = CountingSink::default();
    let lookup = PeerLookup::default();

    let mut first = vec![MeshEvent::Packet(common::group_packet("C0FFEE0000000001"))];
    enricher.enrich_batch(&mut first, &lookup, &mut sink);
    assert_eq!(enricher.pending_group(), 1);
    assert!(sink.calls.is_empty());

    let mut second = vec![MeshEvent::ChannelMessageNew(ops_message("C0FFEE0000000001"))];
    enricher.enrich_batch(&mut second, &lookup, &mut sink);

    assert_eq!(sink.calls.len(), 1);
    let (hash, patch) = &sink.calls[0];
    assert_eq!(hash, "C0FFEE0000000001");
    assert_eq!(patch.sender_name.as_deref(), Some("Bob"));
    assert_eq!(patch.channel_name.as_deref(), Some("ops"));
    assert_eq!(patch.payload_text.as_deref(), Some("hi"));
    assert_eq!(enricher.pending_group(), 0);
}

#[test]
fn queue_keeps_only_newest_entries() {
    let mut enricher = Enricher::new(2);
    let mut sink = CountingSink::default();
    let mut batch: Vec<MeshEvent> = ["01", "02", "03"]
        .iter()
        .map(|h| MeshEvent::Packet(common::group_packet(h)))
        .collect();
    enricher.enrich_batch(&mut batch, &PeerLookup::default(), &mut sink);
    assert_eq!(enricher.pending_group(), 2);

    let mut next = vec![MeshEvent::ChannelMessageNew(ops_message("02"))];
    enricher.enrich_batch(&mut next, &PeerLookup::default(), &mut sink);
    assert_eq!(sink.calls[0].0, "02");
}

#[test]
fn console_patches_history_and_packet_log() {
    let dir = tempfile::tempdir().unwrap();
    let (mut console, handle) = common::mock_console(&dir);

    let packet = common::group_packet("ABCDEF0123456789");
    handle.push_event(MeshEvent::Packet(packet.clone()));
    handle.push_event(MeshEvent::RawPacket(RawPacketRecord::new(packet, &[0x15, 0x00])));
    console.poll_events(50);
    assert_eq!(console.stored_packet_count(), 2);

    handle.push_event(MeshEvent::ChannelMessageNew(ops_message("ABCDEF0123456789")));
    console.poll_events(50);

    for stored in console.list_stored_packets(10).unwrap() {
        let record = stored.event.packet_record().unwrap();
        assert_eq!(record.channel_name.as_deref(), Some("ops"));
        assert_eq!(record.sender_name.as_deref(), Some("Bob"));
        assert_eq!(record.payload_text.as_deref(), Some("hi"));
    }
    let recent = console.list_recent_events(10);
    let patched = recent[0].packet_record().unwrap();
    assert_eq!(patched.channel_name.as_deref(), Some("ops"));

    // the handler event itself was applied to state once
    let messages = console.list_messages_for_channel("ops", 10);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "hi");
}

#[test]
fn same_batch_correlation_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let (mut console, handle) = common::mock_console(&dir);
    handle.push_event(MeshEvent::Packet(common::group_packet("1111222233334444")));
    handle.push_event(MeshEvent::ChannelMessageNew(ops_message("1111222233334444")));

    let events = console.poll_events(50);
    let record = events[0].packet_record().unwrap();
    assert_eq!(record.channel_name.as_deref(), Some("ops"));
    assert_eq!(record.payload_text.as_deref(), Some("hi"));
    let stored = console.list_stored_packets(1).unwrap();
    assert_eq!(
        stored[0].event.packet_record().unwrap().sender_name.as_deref(),
        Some("Bob")
    );
}

#[test]
fn known_peer_names_fill_packets_as_they_arrive() {
    let dir = tempfile::tempdir().unwrap();
    let (mut console, handle) = common::mock_console(&dir);
    handle.push_event(MeshEvent::ContactNew(ContactAdvert {
        advert_name: Some("Relay".into()),
        sender_pubkey: Some("9f".repeat(32)),
        ..Default::default()
    }));
    console.poll_events(50);

    handle.push_event(MeshEvent::Packet(PacketRecord {
        payload_type: 3,
        payload_type_name: "ACK".into(),
        sender_id: Some("9f".repeat(8)),
        packet_hash: Some("AAAABBBBCCCCDDDD".into()),
        ..Default::default()
    }));
    let events = console.poll_events(50);
    assert_eq!(events[0].packet_record().unwrap().sender_name.as_deref(), Some("Relay"));
}
