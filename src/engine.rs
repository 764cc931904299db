//! Engine construction and lifecycle (spec §4.I): `Engine::new` eagerly opens
//! every socket the configuration requires, as a pure function from
//! [`Config`] to a set of worker descriptors; `run` spawns all workers and
//! awaits cooperative cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::{build_queues, EngineHandles, SharedState};
use crate::error::StartupError;
use crate::model::{MembershipItem, Side, ALL_HOSTS, IGMP_HOSTS};
use crate::pool::PacketPool;
use crate::recv::{MulticastRecvLoop, UnicastRecvLoop};
use crate::selector::SelectorLoop;
use crate::sender::{SideSocket, Sender};
use crate::socket::{resolve_interface, InterfaceInfo, RawIgmpSocket};

/// Receive-pool sizing: one buffer per pending datagram, per spec §4.C this
/// never needs to be more than a handful per socket.
const POOL_CAPACITY: usize = 16;

/// A fully constructed, not-yet-running engine: every socket this
/// configuration requires is already open (spec §4.I, "partial startup is
/// not allowed" — `new` either returns a complete engine or an error, never
/// a half-open one).
pub struct Engine {
    config: Arc<Config>,
    state: Arc<SharedState>,
    sender: Arc<Sender>,
    pool: Arc<PacketPool>,
    multicast_recv: Vec<MulticastRecvLoop>,
    unicast_recv: Option<UnicastRecvLoop>,
    selector: Option<SelectorLoop>,
    queues_rx: crate::dispatch::EngineQueues,
    /// Every side with a raw-send socket; each gets its own self-query
    /// ticker (spec §5: "one self-query ticker per interface where
    /// enabled").
    send_sides: Vec<Side>,
}

impl Engine {
    /// Resolve interfaces, open every required socket, and wire the
    /// in-process queues. Returns `Err` without partially starting if any
    /// step fails.
    pub fn new(config: Config) -> Result<(Engine, EngineHandles), StartupError> {
        config.validate()?;
        let config = Arc::new(config);
        let state = Arc::new(SharedState::new());
        let pool = Arc::new(PacketPool::new(POOL_CAPACITY));

        let mut resolved: HashMap<Side, InterfaceInfo> = HashMap::new();
        if let Some(name) = &config.in_name {
            resolved.insert(Side::In, resolve_interface(name)?);
        }
        if let Some(name) = &config.out_name {
            resolved.insert(Side::Out, resolve_interface(name)?);
        }
        if let Some(name) = &config.alt_out_name {
            resolved.insert(Side::AltOut, resolve_interface(name)?);
        }

        // Every configured side gets a raw send socket; report/leave/query/
        // proxy traffic all funnel through it (spec §4.B, §4.F).
        let mut send_sockets = HashMap::new();
        for (side, iface) in &resolved {
            let socket = RawIgmpSocket::open_raw_send(*side, *iface, config.testing.multicast_loopback)?;
            send_sockets.insert(*side, SideSocket { info: *iface, socket });
        }
        let send_sides: Vec<Side> = send_sockets.keys().copied().collect();

        let sender = Arc::new(Sender::new(config.clone(), state.clone(), send_sockets));

        let (handles, queues) = build_queues(&config);

        let mut multicast_recv = Vec::new();
        for (side, iface) in &resolved {
            if side.is_outside() {
                for group in [ALL_HOSTS, IGMP_HOSTS] {
                    let socket = Arc::new(RawIgmpSocket::open_multicast(*side, *iface, group)?);
                    multicast_recv.push(MulticastRecvLoop {
                        side: *side,
                        group,
                        iface: *iface,
                        socket,
                        state: state.clone(),
                        config: config.clone(),
                        sender: sender.clone(),
                        pool: pool.clone(),
                        query_notify_tx: queues.query_notify_tx.clone(),
                        membership_report_from_network_tx: queues.membership_report_from_network_tx.clone(),
                    });
                }
            } else {
                let socket = Arc::new(RawIgmpSocket::open_multicast(*side, *iface, IGMP_HOSTS)?);
                multicast_recv.push(MulticastRecvLoop {
                    side: *side,
                    group: IGMP_HOSTS,
                    iface: *iface,
                    socket,
                    state: state.clone(),
                    config: config.clone(),
                    sender: sender.clone(),
                    pool: pool.clone(),
                    query_notify_tx: queues.query_notify_tx.clone(),
                    membership_report_from_network_tx: queues.membership_report_from_network_tx.clone(),
                });
            }
        }

        let unicast_recv = if config.unicast_proxy_in_to_out {
            let iface = *resolved.get(&Side::In).ok_or_else(|| {
                StartupError::Config(crate::error::ConfigError::UnicastProxyWithoutInside)
            })?;
            let socket = Arc::new(RawIgmpSocket::open_unicast(Side::In, iface)?);
            Some(UnicastRecvLoop {
                iface,
                socket,
                state: state.clone(),
                config: config.clone(),
                sender: sender.clone(),
                pool: pool.clone(),
            })
        } else {
            None
        };

        let mut queues = queues;
        let selector = queues.out_interface_selector_rx.take().map(|rx| SelectorLoop {
            state: state.clone(),
            rx,
        });

        let engine = Engine {
            config,
            state,
            sender,
            pool,
            multicast_recv,
            unicast_recv,
            selector,
            queues_rx: queues,
            send_sides,
        };

        Ok((engine, handles))
    }

    /// Spawn every worker this configuration requires and run until
    /// `cancel` fires, then wait for clean drain (spec §4.I).
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();

        for loop_ in self.multicast_recv {
            let cancel = cancel.clone();
            tasks.spawn(async move { loop_.run(cancel).await });
        }

        if let Some(loop_) = self.unicast_recv {
            let cancel = cancel.clone();
            tasks.spawn(async move { loop_.run(cancel).await });
        }

        if let Some(loop_) = self.selector {
            let cancel = cancel.clone();
            tasks.spawn(async move { loop_.run(cancel).await });
        }

        {
            let sender = self.sender.clone();
            let state = self.state.clone();
            let cancel = cancel.clone();
            let rx = self.queues_rx.membership_report_to_network_rx;
            let enabled = self.config.membership_reports_to_network;
            tasks.spawn(report_to_network_worker(sender, state, rx, cancel, enabled));
        }

        {
            let sender = self.sender.clone();
            let state = self.state.clone();
            let cancel = cancel.clone();
            let rx = self.queues_rx.leave_to_network_rx;
            let enabled = self.config.leave_to_network;
            tasks.spawn(leave_to_network_worker(sender, state, rx, cancel, enabled));
        }

        // Self-query is suppressed entirely below a 1s period (spec §4.F);
        // one ticker per configured send side (spec §5).
        if self.config.query_time >= std::time::Duration::from_secs(1) {
            for side in &self.send_sides {
                let sender = self.sender.clone();
                let cancel = cancel.clone();
                let period = self.config.query_time;
                tasks.spawn(self_query_ticker(sender, cancel, period, *side));
            }
        }

        drop(self.pool);
        drop(self.state);

        while tasks.join_next().await.is_some() {}
    }
}

async fn report_to_network_worker(
    sender: Arc<Sender>,
    state: Arc<SharedState>,
    mut rx: mpsc::Receiver<Vec<MembershipItem>>,
    cancel: CancellationToken,
    enabled: bool,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => {
                let Some(items) = item else { break };
                if !enabled {
                    continue;
                }
                if let Err(error) = sender.send_report(state.active_out(), &items).await {
                    tracing::warn!(%error, "report-to-network send failed");
                }
            }
        }
    }
}

async fn leave_to_network_worker(
    sender: Arc<Sender>,
    state: Arc<SharedState>,
    mut rx: mpsc::Receiver<Vec<MembershipItem>>,
    cancel: CancellationToken,
    enabled: bool,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => {
                let Some(items) = item else { break };
                if !enabled {
                    continue;
                }
                if let Err(error) = sender.send_leave(state.active_out(), &items).await {
                    tracing::warn!(%error, "leave-to-network send failed");
                }
            }
        }
    }
}

async fn self_query_ticker(sender: Arc<Sender>, cancel: CancellationToken, period: std::time::Duration, side: Side) {
    let mut interval = tokio::time::interval(period);
    // `interval` fires its first tick immediately; consume it unemitted so
    // the first self-query lands at `period`, not at t=0 (spec §8 property 10).
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = interval.tick() => {}
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(error) = sender.self_query(side).await {
                    tracing::warn!(%error, "self-query send failed");
                }
            }
        }
    }
}
