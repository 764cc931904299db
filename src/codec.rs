//! IGMPv1/2/3 wire codec: parsing, serialization, checksums and the IPv4
//! header (with Router Alert option) every emitted datagram carries.
//!
//! Follows RFC 3376 §4 for the v3 report layout. The historical
//! implementation this engine replaces placed `NumberOfGroupRecords` at the
//! wrong offset (see spec §9); this codec does not reproduce that bug.

use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::model::{GroupRecord, IgmpMessage, QueryVersion, RecordKind};

/// Router Alert IP option (RFC 2113), required on every emitted IGMP datagram.
pub const ROUTER_ALERT: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

/// Fixed max response time (tenths of a second) used for emitted v2
/// reports/leaves: 10 seconds, per spec §4.F.
pub const DEFAULT_MAX_RESP_TIME_TENTHS: u8 = 100;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short ({len} bytes)")]
    TooShort { len: usize },
    #[error("unsupported IGMP type byte 0x{0:02x}")]
    UnsupportedType(u8),
    #[error("malformed group record")]
    MalformedRecord,
}

/// Parse a raw IGMP payload (no IP header) into a typed message.
///
/// Never panics on adversarial input; always returns a `ParseError` instead.
pub fn parse_igmp(bytes: &[u8]) -> Result<IgmpMessage, ParseError> {
    if bytes.len() < 8 {
        return Err(ParseError::TooShort { len: bytes.len() });
    }

    match bytes[0] {
        0x11 => parse_query(bytes),
        0x12 => Ok(IgmpMessage::ReportV1 {
            group: ipv4_at(bytes, 4)?,
        }),
        0x16 => Ok(IgmpMessage::ReportV2 {
            group: ipv4_at(bytes, 4)?,
        }),
        0x17 => Ok(IgmpMessage::Leave {
            group: ipv4_at(bytes, 4)?,
        }),
        0x22 => parse_report_v3(bytes),
        other => Err(ParseError::UnsupportedType(other)),
    }
}

fn ipv4_at(bytes: &[u8], offset: usize) -> Result<Ipv4Addr, ParseError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        .ok_or(ParseError::TooShort { len: bytes.len() })
}

fn parse_query(bytes: &[u8]) -> Result<IgmpMessage, ParseError> {
    let group = ipv4_at(bytes, 4)?;
    if bytes.len() == 8 {
        return Ok(IgmpMessage::Query {
            version: QueryVersion::V2,
            group,
            max_resp_time: bytes[1],
            sources: Vec::new(),
        });
    }
    if bytes.len() < 12 {
        return Err(ParseError::TooShort { len: bytes.len() });
    }
    // RFC 3376 §4.1: byte 1 is Max Resp Code, byte 8 is Resv|S|QRV, byte 9
    // is QQIC, bytes 10..12 are Number of Sources.
    let max_resp_time = bytes[1];
    let nsrc = BigEndian::read_u16(&bytes[10..12]) as usize;
    let need = 12 + nsrc * 4;
    if bytes.len() < need {
        return Err(ParseError::TooShort { len: bytes.len() });
    }
    let mut sources = Vec::with_capacity(nsrc);
    for i in 0..nsrc {
        sources.push(ipv4_at(bytes, 12 + i * 4)?);
    }
    Ok(IgmpMessage::Query {
        version: QueryVersion::V3,
        group,
        max_resp_time,
        sources,
    })
}

fn parse_report_v3(bytes: &[u8]) -> Result<IgmpMessage, ParseError> {
    if bytes.len() < 8 {
        return Err(ParseError::TooShort { len: bytes.len() });
    }
    let nrecords = BigEndian::read_u16(&bytes[6..8]) as usize;
    let mut records = Vec::with_capacity(nrecords);
    let mut off = 8;
    for _ in 0..nrecords {
        if bytes.len() < off + 8 {
            return Err(ParseError::MalformedRecord);
        }
        let kind = RecordKind::from_u8(bytes[off]).ok_or(ParseError::MalformedRecord)?;
        let aux_len_words = bytes[off + 1] as usize;
        let nsrc = BigEndian::read_u16(&bytes[off + 2..off + 4]) as usize;
        let multicast = ipv4_at(bytes, off + 4)?;
        let src_start = off + 8;
        let src_end = src_start + nsrc * 4;
        let aux_end = src_end + aux_len_words * 4;
        if bytes.len() < aux_end {
            return Err(ParseError::MalformedRecord);
        }
        let mut sources = Vec::with_capacity(nsrc);
        for i in 0..nsrc {
            sources.push(ipv4_at(bytes, src_start + i * 4)?);
        }
        records.push(GroupRecord {
            kind,
            multicast,
            sources,
        });
        off = aux_end;
    }
    Ok(IgmpMessage::ReportV3 { records })
}

/// RFC 1071 16-bit one's-complement checksum. The checksum field of `bytes`
/// is assumed to already be zero; callers compute over the full payload.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += BigEndian::read_u16(chunk) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn with_checksum(mut buf: Vec<u8>, csum_offset: usize) -> Vec<u8> {
    buf[csum_offset] = 0;
    buf[csum_offset + 1] = 0;
    let csum = checksum(&buf);
    BigEndian::write_u16(&mut buf[csum_offset..csum_offset + 2], csum);
    buf
}

/// Serialize an IGMPv2 General/Group-Specific Query.
pub fn serialize_query_v2(group: Ipv4Addr, max_resp_time_tenths: u8) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = 0x11;
    buf[1] = max_resp_time_tenths;
    buf[4..8].copy_from_slice(&group.octets());
    with_checksum(buf, 2)
}

/// Serialize an IGMPv2 Membership Report (type 0x16, fixed MRT=10s).
pub fn serialize_report_v2(group: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = 0x16;
    buf[1] = DEFAULT_MAX_RESP_TIME_TENTHS;
    buf[4..8].copy_from_slice(&group.octets());
    with_checksum(buf, 2)
}

/// Serialize an IGMPv2 Leave Group message.
pub fn serialize_leave_v2(group: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = 0x17;
    buf[1] = 0;
    buf[4..8].copy_from_slice(&group.octets());
    with_checksum(buf, 2)
}

/// Serialize an IGMPv3 Membership Report carrying `records`.
///
/// Layout (RFC 3376 §4.2): `[type, reserved, csum_hi, csum_lo, reserved(2),
/// n_records(2), records...]` — there is no per-packet group address in the
/// v3 report header; each record carries its own multicast address.
pub fn serialize_report_v3(records: &[GroupRecord]) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = 0x22;
    buf[1] = 0x00;
    // buf[2..4] checksum, filled below.
    buf[4] = 0x00;
    buf[5] = 0x00;
    BigEndian::write_u16(&mut buf[6..8], records.len() as u16);

    for record in records {
        let rec_start = buf.len();
        buf.resize(rec_start + 8 + record.sources.len() * 4, 0);
        buf[rec_start] = record.kind.to_u8();
        buf[rec_start + 1] = 0; // aux data len (words)
        BigEndian::write_u16(&mut buf[rec_start + 2..rec_start + 4], record.sources.len() as u16);
        buf[rec_start + 4..rec_start + 8].copy_from_slice(&record.multicast.octets());
        for (i, src) in record.sources.iter().enumerate() {
            let s = rec_start + 8 + i * 4;
            buf[s..s + 4].copy_from_slice(&src.octets());
        }
    }

    with_checksum(buf, 2)
}

/// Build the 24-byte IPv4 header (20-byte base + 4-byte Router Alert
/// option) that precedes every emitted IGMP payload: TTL=1, TOS=0xC0
/// (DSCP CS6), protocol=2 (IGMP), IHL=6.
pub fn ipv4_header(payload_len: usize, dst: Ipv4Addr, src: Ipv4Addr) -> [u8; 24] {
    let mut hdr = [0u8; 24];
    hdr[0] = 0x46; // version 4, IHL 6 (24 bytes)
    hdr[1] = 0xC0; // TOS / DSCP CS6
    BigEndian::write_u16(&mut hdr[2..4], (24 + payload_len) as u16);
    // identification, flags/fragment left at 0
    hdr[8] = 1; // TTL
    hdr[9] = 2; // protocol = IGMP
    hdr[12..16].copy_from_slice(&src.octets());
    hdr[16..20].copy_from_slice(&dst.octets());
    hdr[20..24].copy_from_slice(&ROUTER_ALERT);

    let csum = checksum(&hdr);
    BigEndian::write_u16(&mut hdr[10..12], csum);
    hdr
}

/// Concatenate an IPv4 header and IGMP payload into a single datagram.
pub fn build_datagram(payload: &[u8], dst: Ipv4Addr, src: Ipv4Addr) -> Vec<u8> {
    let hdr = ipv4_header(payload.len(), dst, src);
    let mut out = Vec::with_capacity(hdr.len() + payload.len());
    out.extend_from_slice(&hdr);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_serialized_report_is_valid() {
        let pkt = serialize_report_v2(Ipv4Addr::new(232, 0, 0, 1));
        assert_eq!(checksum(&pkt), 0xffff);
    }

    #[test]
    fn checksum_of_serialized_leave_is_valid() {
        let pkt = serialize_leave_v2(Ipv4Addr::new(232, 0, 0, 1));
        assert_eq!(checksum(&pkt), 0xffff);
    }

    #[test]
    fn checksum_of_serialized_query_is_valid() {
        let pkt = serialize_query_v2(Ipv4Addr::UNSPECIFIED, DEFAULT_MAX_RESP_TIME_TENTHS);
        assert_eq!(checksum(&pkt), 0xffff);
    }

    #[test]
    fn checksum_of_serialized_v3_report_is_valid() {
        let records = vec![GroupRecord {
            kind: RecordKind::IsEx,
            multicast: Ipv4Addr::new(232, 0, 0, 1),
            sources: vec![Ipv4Addr::new(172, 17, 200, 10)],
        }];
        let pkt = serialize_report_v3(&records);
        assert_eq!(checksum(&pkt), 0xffff);
    }

    #[test]
    fn roundtrip_v2_report() {
        let group = Ipv4Addr::new(239, 1, 2, 3);
        let pkt = serialize_report_v2(group);
        match parse_igmp(&pkt).unwrap() {
            IgmpMessage::ReportV2 { group: g } => assert_eq!(g, group),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn roundtrip_v2_leave() {
        let group = Ipv4Addr::new(239, 1, 2, 3);
        let pkt = serialize_leave_v2(group);
        match parse_igmp(&pkt).unwrap() {
            IgmpMessage::Leave { group: g } => assert_eq!(g, group),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn roundtrip_v2_query() {
        let pkt = serialize_query_v2(Ipv4Addr::UNSPECIFIED, 100);
        match parse_igmp(&pkt).unwrap() {
            IgmpMessage::Query {
                version: QueryVersion::V2,
                group,
                max_resp_time,
                sources,
            } => {
                assert_eq!(group, Ipv4Addr::UNSPECIFIED);
                assert_eq!(max_resp_time, 100);
                assert!(sources.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn roundtrip_v3_report_single_record() {
        let records = vec![GroupRecord {
            kind: RecordKind::IsIn,
            multicast: Ipv4Addr::new(232, 0, 0, 1),
            sources: vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)],
        }];
        let pkt = serialize_report_v3(&records);
        match parse_igmp(&pkt).unwrap() {
            IgmpMessage::ReportV3 { records: got } => assert_eq!(got, records),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v3_report_header_has_no_group_address_field() {
        // NumberOfGroupRecords lives at offset 6..8; offset 4..6 is reserved
        // zero, never a group address (spec §9 / §4.A).
        let records = vec![GroupRecord {
            kind: RecordKind::ToEx,
            multicast: Ipv4Addr::new(232, 0, 0, 5),
            sources: vec![],
        }];
        let pkt = serialize_report_v3(&records);
        assert_eq!(&pkt[4..6], &[0, 0]);
        assert_eq!(BigEndian::read_u16(&pkt[6..8]), 1);
    }

    #[test]
    fn parse_rejects_unsupported_type() {
        let bytes = [0x99, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(parse_igmp(&bytes), Err(ParseError::UnsupportedType(0x99)));
    }

    #[test]
    fn parse_rejects_too_short() {
        assert_eq!(
            parse_igmp(&[0x16, 0, 0]),
            Err(ParseError::TooShort { len: 3 })
        );
    }

    #[test]
    fn parse_never_panics_on_truncated_v3_report() {
        let bytes = [0x22, 0, 0, 0, 0, 0, 0, 1]; // claims 1 record, has none
        assert!(parse_igmp(&bytes).is_err());
    }

    #[test]
    fn ipv4_header_has_router_alert_and_fixed_fields() {
        let hdr = ipv4_header(8, IGMP_HOSTS_ADDR, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(hdr[0], 0x46); // version 4, IHL 6
        assert_eq!(hdr[1], 0xC0); // TOS
        assert_eq!(hdr[8], 1); // TTL
        assert_eq!(hdr[9], 2); // protocol
        assert_eq!(&hdr[20..24], &ROUTER_ALERT);
        assert_eq!(checksum(&hdr), 0xffff);
    }

    const IGMP_HOSTS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 22);
}
