//! Integration tests for the lanparty-core discovery protocol.
//!
//! These tests drive the public API the way the discovery transport does:
//! build a message, put it in a datagram, decode it on the other side, and
//! apply the receiver's acceptance rules.

use lanparty_core::{
    protocol::messages::{Announcement, DISCOVERY_PORT, GAME_TAG},
    serialize, try_deserialize, DiscoveryMessage, DiscoveryStatus, ValidationRules,
};

/// Encodes a message and then decodes it, asserting that decoding succeeds.
fn roundtrip(msg: &DiscoveryMessage) -> DiscoveryMessage {
    let bytes = serialize(msg).expect("serialize must succeed");
    try_deserialize(&bytes).expect("decode must succeed")
}

#[test]
fn test_roundtrip_every_constructor() {
    let full = DiscoveryMessage::ok(Announcement {
        host_id: Some("5f0c1a9e".to_string()),
        build_id: Some("2024.11.3".to_string()),
        meta: Some("map=harbor".to_string()),
        ..Announcement::lan("192.168.4.2", 7777, 4)
    });

    for msg in [
        full,
        DiscoveryMessage::ok(Announcement::lan("10.1.1.1", 1, 2)),
        DiscoveryMessage::not_found(None),
        DiscoveryMessage::not_found(Some("searched 1500ms".to_string())),
        DiscoveryMessage::canceled(),
        DiscoveryMessage::fail("Socket error: AddressAlreadyInUse"),
    ] {
        assert_eq!(roundtrip(&msg), msg);
    }
}

#[test]
fn test_absent_and_empty_optional_fields_are_distinct() {
    let empty_meta = DiscoveryMessage::not_found(Some(String::new()));
    let no_meta = DiscoveryMessage::not_found(None);

    let decoded_empty = roundtrip(&empty_meta);
    let decoded_none = roundtrip(&no_meta);

    assert_eq!(decoded_empty.meta(), Some(""));
    assert_eq!(decoded_none.meta(), None);
    assert_ne!(decoded_empty, decoded_none);
}

#[test]
fn test_decoded_announcement_passes_receiver_rules() {
    let sent = DiscoveryMessage::ok(Announcement::lan("192.168.4.2", 7777, 2));

    let received = roundtrip(&sent);

    assert!(received.validate(&ValidationRules::default()));
    assert_eq!(received.endpoint(), Some("192.168.4.2:7777".parse().unwrap()));
}

#[test]
fn test_foreign_json_decodes_but_fails_validation() {
    // Well-formed but from another game on the same subnet.
    let datagram = br#"{"tag":"OtherGame","proto_version":3,"status":0,"ip":"10.0.0.9","port":5000,"capacity":2}"#;

    let msg = try_deserialize(datagram).expect("structurally valid");

    assert_eq!(msg.status(), DiscoveryStatus::Success);
    assert_ne!(msg.tag(), Some(GAME_TAG));
    assert!(!msg.validate(&ValidationRules::default()));
}

#[test]
fn test_datagram_fits_comfortably_in_one_packet() {
    let msg = DiscoveryMessage::ok(Announcement {
        host_id: Some("0e4f1b5c-4d7a-4a51-9d1e-6e0f3c2a9b11".to_string()),
        ..Announcement::lan("192.168.100.200", 65535, 8)
    });

    let bytes = serialize(&msg).unwrap();

    assert!(bytes.len() < 512, "datagram is {} bytes", bytes.len());
}

#[test]
fn test_discovery_port_is_well_known_constant() {
    assert_eq!(DISCOVERY_PORT, 47777);
}
