//! Sender: builds and transmits reports, leaves, self-queries and proxied
//! datagrams on a chosen side's raw socket (spec §4.F).

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec;
use crate::config::Config;
use crate::dispatch::Shared;
use crate::error::OsError;
use crate::metrics;
use crate::model::{DestTag, MembershipItem, Side, ALL_HOSTS};
use crate::socket::{InterfaceInfo, RawIgmpSocket};

/// Every send operation has a fixed 5s write deadline (spec §4.F, §5).
pub const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub struct SideSocket {
    pub info: InterfaceInfo,
    pub socket: RawIgmpSocket,
}

pub struct Sender {
    config: Arc<Config>,
    state: Shared,
    sides: std::collections::HashMap<Side, SideSocket>,
}

impl Sender {
    pub fn new(config: Arc<Config>, state: Shared, sides: std::collections::HashMap<Side, SideSocket>) -> Self {
        Sender { config, state, sides }
    }

    fn report_dest(&self) -> DestTag {
        if self.config.unicast_membership_reports {
            DestTag::QueryHost
        } else {
            DestTag::IgmpHosts
        }
    }

    fn leave_dest(&self) -> DestTag {
        if self.config.unicast_membership_reports {
            DestTag::QueryHost
        } else {
            DestTag::AllRouters
        }
    }

    fn resolve(&self, tag: DestTag) -> Ipv4Addr {
        tag.resolve(self.state.query_host_addr(self.config.unicast_dst))
    }

    async fn write(&self, side: Side, bytes: &[u8], dst: Ipv4Addr) -> Result<(), OsError> {
        let label = side.as_str();
        let side_socket = self
            .sides
            .get(&side)
            .ok_or(OsError::OpenSocket {
                side: label,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no socket for side"),
            })?;

        let started = Instant::now();
        let result = tokio::time::timeout(WRITE_DEADLINE, side_socket.socket.send(bytes, dst)).await;
        metrics::observe_latency("sender", "write", label, started);

        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => {
                metrics::count("sender", "write", "error");
                Err(OsError::Write { side: label, source })
            }
            Err(_elapsed) => {
                metrics::count("sender", "write", "timeout");
                Err(OsError::WriteTimeout { side: label })
            }
        }
    }

    /// One IGMPv2 report per item (spec §4.F).
    pub async fn send_report(&self, side: Side, items: &[MembershipItem]) -> Result<(), OsError> {
        let dest_tag = self.report_dest();
        let Some(src) = self.sides.get(&side).map(|s| s.info.ipv4) else {
            return Err(OsError::OpenSocket {
                side: side.as_str(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no socket for side"),
            });
        };
        for item in items {
            let payload = codec::serialize_report_v2(item.group);
            let dst = self.resolve(dest_tag);
            let datagram = codec::build_datagram(&payload, dst, src);
            self.write(side, &datagram, dst).await?;
            metrics::count("sender", "send_report", "ok");
        }
        Ok(())
    }

    /// One IGMPv2 Leave per item (spec §4.F).
    pub async fn send_leave(&self, side: Side, items: &[MembershipItem]) -> Result<(), OsError> {
        let dest_tag = self.leave_dest();
        let Some(src) = self.sides.get(&side).map(|s| s.info.ipv4) else {
            return Err(OsError::OpenSocket {
                side: side.as_str(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no socket for side"),
            });
        };
        for item in items {
            let payload = codec::serialize_leave_v2(item.group);
            let dst = self.resolve(dest_tag);
            let datagram = codec::build_datagram(&payload, dst, src);
            self.write(side, &datagram, dst).await?;
            metrics::count("sender", "send_leave", "ok");
        }
        Ok(())
    }

    /// Periodic IGMPv2 General Query (spec §4.F); callers gate the
    /// `query_time < 1s` suppression before invoking this.
    pub async fn self_query(&self, side: Side) -> Result<(), OsError> {
        let Some(src) = self.sides.get(&side).map(|s| s.info.ipv4) else {
            return Err(OsError::OpenSocket {
                side: side.as_str(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no socket for side"),
            });
        };
        let payload = codec::serialize_query_v2(Ipv4Addr::UNSPECIFIED, codec::DEFAULT_MAX_RESP_TIME_TENTHS);
        let datagram = codec::build_datagram(&payload, ALL_HOSTS, src);
        self.write(side, &datagram, ALL_HOSTS).await?;
        metrics::count("sender", "self_query", "ok");
        Ok(())
    }

    /// Wrap `payload` (an IGMP message, no IP header) with an IPv4 header
    /// addressed to the concrete `dst` and transmit on `side`'s raw-send
    /// socket. Proxied groups are arbitrary (spec §4.E forwards whatever
    /// group a v1/v2 report names), so this takes a resolved address
    /// rather than a [`DestTag`] — the tag only covers the fixed set of
    /// well-known destinations `send_report`/`send_leave`/`self_query` use.
    pub async fn proxy(&self, side: Side, dst: Ipv4Addr, payload: &[u8]) -> Result<(), OsError> {
        let Some(src) = self.sides.get(&side).map(|s| s.info.ipv4) else {
            return Err(OsError::OpenSocket {
                side: side.as_str(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no socket for side"),
            });
        };
        let datagram = codec::build_datagram(payload, dst, src);
        self.write(side, &datagram, dst).await?;
        metrics::count("sender", "proxy", "ok");
        Ok(())
    }

    /// Resolve a [`DestTag`] to a concrete address using this sender's
    /// querier state, for callers that need to proxy to a tagged
    /// destination (e.g. the unicast v3-report case in spec §4.E).
    pub fn resolve_dest(&self, tag: DestTag) -> Ipv4Addr {
        self.resolve(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SharedState;
    use crate::model::IGMP_HOSTS;

    fn sender_with(config: Config) -> Sender {
        Sender::new(Arc::new(config), Arc::new(SharedState::new()), std::collections::HashMap::new())
    }

    /// S3: reports default to `igmp_hosts` when unicast reporting is off.
    #[test]
    fn report_dest_defaults_to_igmp_hosts() {
        let sender = sender_with(Config::default());
        assert_eq!(sender.resolve(sender.report_dest()), IGMP_HOSTS);
    }

    /// S4: with `unicast_membership_reports`, reports go to the last-seen
    /// querier once one has been observed.
    #[test]
    fn report_dest_follows_query_host_when_unicast_enabled() {
        let config = Config {
            unicast_membership_reports: true,
            ..Config::default()
        };
        let sender = sender_with(config);
        let querier = Ipv4Addr::new(10, 0, 0, 5);
        sender.state.note_querier(querier);
        assert_eq!(sender.resolve(sender.report_dest()), querier);
    }

    /// Property 8: absent any observed query, `unicast_dst` is the fallback.
    #[test]
    fn report_dest_falls_back_to_configured_unicast_dst_before_any_query() {
        let fallback = Ipv4Addr::new(192, 0, 2, 9);
        let config = Config {
            unicast_membership_reports: true,
            unicast_dst: fallback,
            ..Config::default()
        };
        let sender = sender_with(config);
        assert_eq!(sender.resolve(sender.report_dest()), fallback);
    }

    #[test]
    fn leave_dest_defaults_to_all_routers() {
        let sender = sender_with(Config::default());
        assert_eq!(sender.resolve(sender.leave_dest()), crate::model::ALL_ROUTERS);
    }
}
