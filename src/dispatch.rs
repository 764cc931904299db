//! Shared mutable state and the four (or five) bounded in-process queues
//! between receiver, caller and sender (spec §4.G, §5).
//!
//! `active_out` and `last_querier_ipv4` are typed atomics rather than a
//! concurrent map with cast accessors, per spec §9's re-architecting note.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::metrics;
use crate::model::{MembershipItem, Side};

impl Side {
    const fn to_code(self) -> u8 {
        match self {
            Side::In => 0,
            Side::Out => 1,
            Side::AltOut => 2,
        }
    }

    const fn from_code(code: u8) -> Side {
        match code {
            0 => Side::In,
            2 => Side::AltOut,
            _ => Side::Out,
        }
    }
}

/// State read by every receive filter and send path (spec §5).
pub struct SharedState {
    active_out: AtomicU8,
    /// 0 means "no querier observed yet"; otherwise the big-endian u32 form
    /// of the last-seen querier's IPv4 address plus one, so that
    /// `0.0.0.0` (a legal, if unusual, querier address) is distinguishable
    /// from "unset".
    last_querier: AtomicU32,
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            active_out: AtomicU8::new(Side::Out.to_code()),
            last_querier: AtomicU32::new(0),
        }
    }

    pub fn active_out(&self) -> Side {
        Side::from_code(self.active_out.load(Ordering::Acquire))
    }

    /// Only the side selector writes this (spec §5).
    pub fn set_active_out(&self, side: Side) {
        self.active_out.store(side.to_code(), Ordering::Release);
        metrics::set_active_out_gauge(side);
    }

    /// Last-writer-wins is acceptable (spec §5).
    pub fn note_querier(&self, addr: Ipv4Addr) {
        let encoded = u32::from(addr).wrapping_add(1);
        self.last_querier.store(encoded, Ordering::Relaxed);
    }

    /// Resolve `query_host`: the last-seen querier, or `fallback` if none
    /// has been observed yet (spec §4.F, §8 property 8).
    pub fn query_host_addr(&self, fallback: Ipv4Addr) -> Ipv4Addr {
        let encoded = self.last_querier.load(Ordering::Relaxed);
        if encoded == 0 {
            fallback
        } else {
            Ipv4Addr::from(encoded.wrapping_sub(1))
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer-side handles the embedding caller uses to drive the engine and
/// receive events (spec §6 "process-internal contract").
pub struct EngineHandles {
    pub query_notify: mpsc::Receiver<()>,
    pub membership_report_from_network: mpsc::Receiver<Vec<MembershipItem>>,
    pub membership_report_to_network: mpsc::Sender<Vec<MembershipItem>>,
    pub leave_to_network: mpsc::Sender<Vec<MembershipItem>>,
    pub out_interface_selector: Option<mpsc::Sender<Side>>,
}

/// Consumer-side handles the engine's own workers drain or feed.
pub(crate) struct EngineQueues {
    pub query_notify_tx: mpsc::Sender<()>,
    pub membership_report_from_network_tx: mpsc::Sender<Vec<MembershipItem>>,
    pub membership_report_to_network_rx: mpsc::Receiver<Vec<MembershipItem>>,
    pub leave_to_network_rx: mpsc::Receiver<Vec<MembershipItem>>,
    pub out_interface_selector_rx: Option<mpsc::Receiver<Side>>,
}

pub(crate) fn build_queues(config: &Config) -> (EngineHandles, EngineQueues) {
    let (qn_tx, qn_rx) = mpsc::channel(config.channel_size);
    let (mrfn_tx, mrfn_rx) = mpsc::channel(config.channel_size);
    let (mrtn_tx, mrtn_rx) = mpsc::channel(config.channel_size);
    let (ltn_tx, ltn_rx) = mpsc::channel(config.channel_size);

    let (selector_tx, selector_rx) = if config.has_alt_out() {
        let (tx, rx) = mpsc::channel(config.channel_size);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let handles = EngineHandles {
        query_notify: qn_rx,
        membership_report_from_network: mrfn_rx,
        membership_report_to_network: mrtn_tx,
        leave_to_network: ltn_tx,
        out_interface_selector: selector_tx,
    };
    let queues = EngineQueues {
        query_notify_tx: qn_tx,
        membership_report_from_network_tx: mrfn_tx,
        membership_report_to_network_rx: mrtn_rx,
        leave_to_network_rx: ltn_rx,
        out_interface_selector_rx: selector_rx,
    };
    (handles, queues)
}

/// Offer a value to a bounded queue without blocking; counts a drop on
/// `QueueFullError` (spec §7, §8 property 6).
pub(crate) fn try_offer<T>(sender: &mpsc::Sender<T>, value: T, queue_name: &'static str) {
    if let Err(_e) = sender.try_send(value) {
        metrics::count("dispatch", queue_name, "queue_full");
        tracing::debug!(queue = queue_name, "dropping event: queue full");
    }
}

pub(crate) type Shared = Arc<SharedState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_host_falls_back_before_any_query_observed() {
        let state = SharedState::new();
        let fallback = Ipv4Addr::new(192, 0, 2, 1);
        assert_eq!(state.query_host_addr(fallback), fallback);
    }

    #[test]
    fn query_host_returns_last_querier_after_observed() {
        let state = SharedState::new();
        state.note_querier(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            state.query_host_addr(Ipv4Addr::new(192, 0, 2, 1)),
            Ipv4Addr::new(10, 0, 0, 5)
        );
    }

    #[test]
    fn active_out_starts_at_out() {
        let state = SharedState::new();
        assert_eq!(state.active_out(), Side::Out);
    }

    #[test]
    fn active_out_respects_writes() {
        let state = SharedState::new();
        state.set_active_out(Side::AltOut);
        assert_eq!(state.active_out(), Side::AltOut);
    }

    /// Property 6: a full queue never blocks; the offer is dropped instead.
    #[test]
    fn try_offer_drops_silently_when_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        try_offer(&tx, (), "query_notify");
        // Second offer finds the queue full; must not panic or block.
        try_offer(&tx, (), "query_notify");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
