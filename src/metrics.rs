//! Metric surface (spec §6): a counter vector and latency summary keyed by
//! `(function, variable, type)`, a receive-path counter keyed by
//! `(function, interface, group, type)`, and a gauge for the active
//! outside side. Emitted through the global `metrics` recorder — this
//! crate never stands up an HTTP exporter; that is the embedding
//! application's job (out of scope, per spec §1).

use std::time::Instant;

use metrics::{counter, gauge, histogram};

use crate::model::Side;

/// Increments the `(function, variable, type)` counter vector.
pub fn count(function: &'static str, variable: &'static str, kind: &'static str) {
    counter!("igmp_agent_events_total", "function" => function, "variable" => variable, "type" => kind)
        .increment(1);
}

/// Records a latency sample against the same `(function, variable, type)` labels.
pub fn observe_latency(function: &'static str, variable: &'static str, kind: &'static str, started: Instant) {
    histogram!("igmp_agent_latency_seconds", "function" => function, "variable" => variable, "type" => kind)
        .record(started.elapsed().as_secs_f64());
}

/// Increments the receive-path counter, keyed by `(function, interface, group, type)`.
pub fn count_recv(function: &'static str, interface: &'static str, group: &'static str, kind: &'static str) {
    counter!(
        "igmp_agent_recv_total",
        "function" => function,
        "interface" => interface,
        "group" => group,
        "type" => kind
    )
    .increment(1);
}

/// Updates the active-outside gauge: `out` = 1, `alt_out` = 3 (spec §6).
pub fn set_active_out_gauge(side: Side) {
    let value = match side {
        Side::Out => 1.0,
        Side::AltOut => 3.0,
        Side::In => 0.0,
    };
    gauge!("igmp_agent_active_outside").set(value);
}
