//! Wire-format scenarios drawn from spec §8's seed tests (S2, S3, S4), tested
//! at the codec boundary — the layer that contract binds independent of the
//! raw-socket startup these scenarios otherwise require (`Engine::new`
//! demands `CAP_NET_RAW`, which this suite doesn't assume).

use std::net::Ipv4Addr;

use igmp_agent::codec::{build_datagram, checksum, parse_igmp, serialize_report_v2, ROUTER_ALERT};
use igmp_agent::{GroupRecord, IgmpMessage, RecordKind};

/// S2: a proxied datagram carries the IGMP payload byte-for-byte, with a
/// freshly built IPv4 header (TTL=1, Router Alert, correct destination).
#[test]
fn proxied_v3_report_payload_is_forwarded_identically() {
    let records = vec![GroupRecord {
        kind: RecordKind::IsEx,
        multicast: Ipv4Addr::new(224, 0, 0, 22),
        sources: vec![],
    }];
    let payload = igmp_agent::codec::serialize_report_v3(&records);
    assert_eq!(payload.len(), 16); // 8-byte header + one zero-source record

    let dst = Ipv4Addr::new(224, 0, 0, 22);
    let src = Ipv4Addr::new(10, 0, 0, 2);
    let datagram = build_datagram(&payload, dst, src);

    // header (24 bytes, IHL=6 for the Router Alert option) + original payload.
    assert_eq!(datagram.len(), 24 + payload.len());
    assert_eq!(&datagram[24..], &payload[..]);
    assert_eq!(datagram[8], 1); // TTL
    assert_eq!(&datagram[20..24], &ROUTER_ALERT);
    assert_eq!(&datagram[16..20], &dst.octets());
}

/// S3: pushing a membership intent produces a v2 report with the right
/// type, group, max-response-time and a valid checksum.
#[test]
fn membership_intent_serializes_to_valid_v2_report() {
    let group = Ipv4Addr::new(232, 0, 0, 1);
    let pkt = serialize_report_v2(group);

    assert_eq!(pkt[0], 0x16);
    assert_eq!(pkt[1], 100); // fixed MRT = 10.0s
    assert_eq!(&pkt[4..8], &group.octets());
    assert_eq!(checksum(&pkt), 0xffff);

    match parse_igmp(&pkt).unwrap() {
        IgmpMessage::ReportV2 { group: parsed } => assert_eq!(parsed, group),
        other => panic!("unexpected {other:?}"),
    }
}

/// S1: a general query observed on the outside is parsed with its source
/// preserved by the caller (the codec itself is destination-agnostic; the
/// receive loop is what records `last_querier_ipv4`).
#[test]
fn general_query_parses_with_all_hosts_group() {
    let pkt = igmp_agent::codec::serialize_query_v2(Ipv4Addr::UNSPECIFIED, 100);
    match parse_igmp(&pkt).unwrap() {
        IgmpMessage::Query { group, .. } => assert_eq!(group, Ipv4Addr::UNSPECIFIED),
        other => panic!("unexpected {other:?}"),
    }
}
