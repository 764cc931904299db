//! Core data types shared across the engine: [`Side`], [`DestTag`], [`TtlKind`],
//! [`MembershipItem`] and the parsed [`IgmpMessage`] variants.

use std::fmt;
use std::net::Ipv4Addr;

/// One of the three logical interfaces the engine can bind to.
///
/// The string form is stable and is used verbatim as a metric label
/// (see spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    In,
    Out,
    AltOut,
}

impl Side {
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::In => "inside",
            Side::Out => "outside",
            Side::AltOut => "altOutside",
        }
    }

    /// Whether this side is one of the two candidate "outside" sides.
    pub const fn is_outside(self) -> bool {
        matches!(self, Side::Out | Side::AltOut)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by `Side::try_from(&str)` for an unrecognized side name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSide(pub String);

impl fmt::Display for UnknownSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown side `{}`", self.0)
    }
}

impl std::error::Error for UnknownSide {}

impl TryFrom<&str> for Side {
    type Error = UnknownSide;

    /// Parses the same stable strings `as_str` produces, for the
    /// `out_interface_selector_ch` producer side when it's driven from
    /// configuration rather than an in-process `Side` value directly.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "inside" => Ok(Side::In),
            "outside" => Ok(Side::Out),
            "altOutside" => Ok(Side::AltOut),
            other => Err(UnknownSide(other.to_string())),
        }
    }
}

/// A symbolic multicast (or "resolve at send time") destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestTag {
    AllZeros,
    AllHosts,
    IgmpHosts,
    AllRouters,
    /// Unicast to the last-seen querier, falling back to `Config::unicast_dst`.
    QueryHost,
}

pub const ALL_ZEROS: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);
pub const ALL_HOSTS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const IGMP_HOSTS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 22);
pub const ALL_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

impl DestTag {
    /// Resolve this tag to a concrete IPv4 address.
    ///
    /// `query_host` MUST be resolved by the caller (it depends on
    /// `last_querier_ipv4`, which this type has no access to); passing it
    /// in keeps the mapping a pure function, matching the "immutable after
    /// construction" invariant from spec §3 for the non-query_host tags.
    pub fn resolve(self, query_host_addr: Ipv4Addr) -> Ipv4Addr {
        match self {
            DestTag::AllZeros => ALL_ZEROS,
            DestTag::AllHosts => ALL_HOSTS,
            DestTag::IgmpHosts => IGMP_HOSTS,
            DestTag::AllRouters => ALL_ROUTERS,
            DestTag::QueryHost => query_host_addr,
        }
    }
}

/// Tag identifying which configured timer period a duration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlKind {
    Gratuitous,
    Query,
}

/// A caller-submitted membership intent: join/report or leave a multicast
/// group, optionally restricted to a source list (IGMPv3 style).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipItem {
    pub group: Ipv4Addr,
    pub sources: Vec<Ipv4Addr>,
}

impl MembershipItem {
    pub fn new(group: Ipv4Addr, sources: Vec<Ipv4Addr>) -> Self {
        MembershipItem { group, sources }
    }

    pub fn is_multicast(&self) -> bool {
        self.group.octets()[0] & 0xf0 == 0xe0
    }
}

/// IGMPv3 group record filter-mode / change-mode kind (RFC 3376 §4.2.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    IsIn,
    IsEx,
    ToIn,
    ToEx,
    Allow,
    Block,
}

impl RecordKind {
    pub const fn to_u8(self) -> u8 {
        match self {
            RecordKind::IsIn => 1,
            RecordKind::IsEx => 2,
            RecordKind::ToIn => 3,
            RecordKind::ToEx => 4,
            RecordKind::Allow => 5,
            RecordKind::Block => 6,
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => RecordKind::IsIn,
            2 => RecordKind::IsEx,
            3 => RecordKind::ToIn,
            4 => RecordKind::ToEx,
            5 => RecordKind::Allow,
            6 => RecordKind::Block,
            _ => return None,
        })
    }
}

/// One group record inside an IGMPv3 membership report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub kind: RecordKind,
    pub multicast: Ipv4Addr,
    pub sources: Vec<Ipv4Addr>,
}

/// IGMPv3 query version marker carried alongside a parsed `Query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVersion {
    V2,
    V3,
}

/// A fully parsed IGMP message, independent of version-specific wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgmpMessage {
    Query {
        version: QueryVersion,
        group: Ipv4Addr,
        max_resp_time: u8,
        /// IGMPv3 query source list; empty for v2 and for v3 general queries.
        sources: Vec<Ipv4Addr>,
    },
    ReportV1 {
        group: Ipv4Addr,
    },
    ReportV2 {
        group: Ipv4Addr,
    },
    ReportV3 {
        records: Vec<GroupRecord>,
    },
    Leave {
        group: Ipv4Addr,
    },
}

impl IgmpMessage {
    /// The first-octet IGMP type for this message, per spec §4.A / §6.
    pub const fn type_byte(&self) -> u8 {
        match self {
            IgmpMessage::Query { .. } => 0x11,
            IgmpMessage::ReportV1 { .. } => 0x12,
            IgmpMessage::ReportV2 { .. } => 0x16,
            IgmpMessage::Leave { .. } => 0x17,
            IgmpMessage::ReportV3 { .. } => 0x22,
        }
    }
}
