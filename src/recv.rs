//! Receive loops (spec §4.D, §4.E): bounded read, filter pipeline,
//! classify, dispatch, and (conditionally) proxy.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::codec::{self, ParseError};
use crate::config::Config;
use crate::dispatch::{try_offer, Shared};
use crate::metrics;
use crate::model::{DestTag, IgmpMessage, MembershipItem, Side, ALL_HOSTS, IGMP_HOSTS};
use crate::pool::PacketPool;
use crate::sender::Sender;
use crate::socket::{InterfaceInfo, RawIgmpSocket};

use tokio::sync::mpsc;

/// Strip the IPv4 header (IHL in the low nibble of byte 0) from `buf` in
/// place, leaving only the IGMP payload. Returns `false` (buffer left
/// untouched) if the declared header doesn't fit, so the caller can still
/// release it back to the pool.
fn strip_ip_header(buf: &mut Vec<u8>) -> bool {
    let Some(&first) = buf.first() else { return false };
    let ihl_words = (first & 0x0f) as usize;
    let ihl_bytes = ihl_words * 4;
    if ihl_bytes > buf.len() {
        return false;
    }
    buf.drain(0..ihl_bytes);
    true
}

fn allowed_types_for(group: Ipv4Addr) -> &'static [u8] {
    if group == ALL_HOSTS {
        &[0x11]
    } else if group == IGMP_HOSTS {
        &[0x12, 0x16, 0x22]
    } else {
        &[]
    }
}

pub struct MulticastRecvLoop {
    pub side: Side,
    pub group: Ipv4Addr,
    pub iface: InterfaceInfo,
    pub socket: Arc<RawIgmpSocket>,
    pub state: Shared,
    pub config: Arc<Config>,
    pub sender: Arc<Sender>,
    pub pool: Arc<PacketPool>,
    pub query_notify_tx: mpsc::Sender<()>,
    pub membership_report_from_network_tx: mpsc::Sender<Vec<MembershipItem>>,
}

impl MulticastRecvLoop {
    pub async fn run(self, cancel: CancellationToken) {
        tracing::debug!(side = %self.side, group = %self.group, "receive loop starting");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let buf = self.pool.acquire();
            let read = tokio::time::timeout(self.config.socket_read_deadline, self.socket.recv(buf));

            let meta = tokio::select! {
                _ = cancel.cancelled() => break,
                result = read => result,
            };

            let mut meta = match meta {
                Err(_elapsed) => {
                    metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "timeout");
                    continue;
                }
                Ok(Err(_io_err)) => {
                    metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "io_error");
                    continue;
                }
                Ok(Ok(meta)) => meta,
            };

            // 3. alt-out gating.
            if self.config.has_alt_out() && self.side.is_outside() && self.side != self.state.active_out() {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "not_active_out");
                self.pool.release(meta.payload);
                continue;
            }

            // 4. IfIndex validation.
            if meta.ifindex != self.iface.index {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "bad_ifindex");
                self.pool.release(meta.payload);
                continue;
            }

            // 5. multicast-destination assertion (debug only).
            debug_assert!(meta.dst.octets()[0] & 0xf0 == 0xe0);

            // 6. source != own IP.
            if meta.src == self.iface.ipv4 {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "from_self");
                self.pool.release(meta.payload);
                continue;
            }

            // 7. destination-address assertion.
            if meta.dst != self.group {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "wrong_dst");
                self.pool.release(meta.payload);
                continue;
            }

            if !strip_ip_header(&mut meta.payload) {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "truncated");
                self.pool.release(meta.payload);
                continue;
            }

            // 8. type classification.
            let Some(&type_byte) = meta.payload.first() else {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "empty");
                self.pool.release(meta.payload);
                continue;
            };
            if !allowed_types_for(self.group).contains(&type_byte) {
                metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "disallowed_type");
                self.pool.release(meta.payload);
                continue;
            }

            // 9. parse.
            let msg = match codec::parse_igmp(&meta.payload) {
                Ok(msg) => msg,
                Err(ParseError::TooShort { .. } | ParseError::MalformedRecord | ParseError::UnsupportedType(_)) => {
                    metrics::count_recv("recv", self.side.as_str(), group_label(self.group), "parse_error");
                    self.pool.release(meta.payload);
                    continue;
                }
            };

            // 10. dispatch.
            self.dispatch(&msg, meta.src).await;

            // 11. proxy decision.
            self.maybe_proxy(&meta.payload).await;

            self.pool.release(meta.payload);
        }
        tracing::debug!(side = %self.side, group = %self.group, "receive loop exited");
    }

    async fn dispatch(&self, msg: &IgmpMessage, src: Ipv4Addr) {
        match msg {
            IgmpMessage::Query { .. } => {
                if self.side.is_outside() {
                    self.state.note_querier(src);
                }
                if self.config.query_notify && self.side == Side::Out {
                    try_offer(&self.query_notify_tx, (), "query_notify");
                }
            }
            // v1 reports are proxied (§4.D step 11) but not pushed onto
            // `membership_report_from_network_ch`, which spec §4.G scopes to
            // v2/v3 reports.
            IgmpMessage::ReportV1 { .. } => {}
            IgmpMessage::ReportV2 { group } => {
                self.offer_report(vec![MembershipItem::new(*group, vec![])]);
            }
            IgmpMessage::ReportV3 { records } => {
                let items = records
                    .iter()
                    .map(|r| MembershipItem::new(r.multicast, r.sources.clone()))
                    .collect();
                self.offer_report(items);
            }
            IgmpMessage::Leave { .. } => {}
        }
    }

    fn offer_report(&self, items: Vec<MembershipItem>) {
        if self.config.membership_reports_from_network {
            try_offer(&self.membership_report_from_network_tx, items, "membership_report_from_network");
        }
    }

    async fn maybe_proxy(&self, igmp_payload: &[u8]) {
        let (target, should) = match self.side {
            Side::Out | Side::AltOut => (Side::In, self.config.proxy_out_to_in),
            Side::In => {
                let target = if self.config.has_alt_out() {
                    self.state.active_out()
                } else {
                    Side::Out
                };
                (target, self.config.proxy_in_to_out)
            }
        };
        if !should {
            return;
        }
        // The datagram arrived on `self.group`; forward to the same group
        // tag on the opposite side (spec §4.D step 11).
        if let Err(error) = self.sender.proxy(target, self.group, igmp_payload).await {
            tracing::warn!(%error, from = %self.side, to = %target, "proxy send failed");
            metrics::count("recv", "proxy", "error");
        }
    }
}

fn group_label(group: Ipv4Addr) -> &'static str {
    if group == ALL_HOSTS {
        "all_hosts"
    } else if group == IGMP_HOSTS {
        "igmp_hosts"
    } else {
        "other"
    }
}

/// Unicast receive loop (spec §4.E): reads IGMP arriving unicast on `in`'s
/// own IP and re-addresses it as multicast on the active outside.
pub struct UnicastRecvLoop {
    pub iface: InterfaceInfo,
    pub socket: Arc<RawIgmpSocket>,
    pub state: Shared,
    pub config: Arc<Config>,
    pub sender: Arc<Sender>,
    pub pool: Arc<PacketPool>,
}

impl UnicastRecvLoop {
    pub async fn run(self, cancel: CancellationToken) {
        tracing::debug!("unicast receive loop starting");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let buf = self.pool.acquire();
            let read = tokio::time::timeout(self.config.socket_read_deadline, self.socket.recv(buf));
            let meta = tokio::select! {
                _ = cancel.cancelled() => break,
                result = read => result,
            };
            let mut meta = match meta {
                Err(_elapsed) => {
                    metrics::count_recv("recv_unicast", "inside", "unicast", "timeout");
                    continue;
                }
                Ok(Err(_io_err)) => {
                    metrics::count_recv("recv_unicast", "inside", "unicast", "io_error");
                    continue;
                }
                Ok(Ok(meta)) => meta,
            };

            if meta.ifindex != self.iface.index {
                self.pool.release(meta.payload);
                continue;
            }
            if meta.src == self.iface.ipv4 {
                self.pool.release(meta.payload);
                continue;
            }

            if !strip_ip_header(&mut meta.payload) {
                self.pool.release(meta.payload);
                continue;
            }
            let Some(&type_byte) = meta.payload.first() else {
                self.pool.release(meta.payload);
                continue;
            };

            let target = if self.config.has_alt_out() {
                self.state.active_out()
            } else {
                Side::Out
            };

            let outcome = match type_byte {
                // Report v1 / v2: re-address as multicast to the group
                // extracted from the 8-byte payload.
                0x12 | 0x16 if meta.payload.len() >= 8 => {
                    let group = Ipv4Addr::new(
                        meta.payload[4],
                        meta.payload[5],
                        meta.payload[6],
                        meta.payload[7],
                    );
                    self.sender.proxy(target, group, &meta.payload).await
                }
                // Report v3: igmp_hosts, or query_host if reports are unicast.
                0x22 => {
                    let dest_tag = if self.config.unicast_membership_reports {
                        DestTag::QueryHost
                    } else {
                        DestTag::IgmpHosts
                    };
                    let dst = self.sender.resolve_dest(dest_tag);
                    self.sender.proxy(target, dst, &meta.payload).await
                }
                // Leave: always addressed to all-routers.
                0x17 => {
                    let dst = self.sender.resolve_dest(DestTag::AllRouters);
                    self.sender.proxy(target, dst, &meta.payload).await
                }
                _ => {
                    metrics::count_recv("recv_unicast", "inside", "unicast", "disallowed_type");
                    self.pool.release(meta.payload);
                    continue;
                }
            };

            self.pool.release(meta.payload);

            if let Err(error) = outcome {
                tracing::warn!(%error, "unicast proxy send failed");
                metrics::count("recv_unicast", "proxy", "error");
            }
        }
        tracing::debug!("unicast receive loop exited");
    }
}
