//! Hub metrics: plain atomics aggregated into a hand-rolled Prometheus text
//! exporter, the same shape as the route-quality monitor's exposition
//! format elsewhere in this codebase (`# HELP` / `# TYPE` plus one line per
//! series). No metrics-client crate is pulled in for this; the counter set
//! is small and fixed.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, v: u64) {
        self.0.store(v, Ordering::Relaxed);
    }
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct HubMetrics {
    // Store (C2)
    pub store_sequence: Gauge,
    pub store_noop_deltas: Counter,
    pub store_illegal_transitions: Counter,

    // Adapters (C1)
    pub adapter_decode_errors: Counter,
    pub adapter_poll_failures: Counter,
    pub adapter_reconnects: Counter,

    // Broadcaster (C3)
    pub broadcasts_attempted: Counter,
    pub broadcasts_sent: Counter,
    pub broadcasts_skipped_no_change: Counter,
    pub broadcasts_dropped_queue_full: Counter,
    pub broadcast_tick_overruns: Counter,

    // Gateway (C4)
    pub clients_connected: Gauge,
    pub clients_terminated: Counter,
    pub clients_terminated_for_violations: Counter,
    pub control_messages_rejected: Counter,
    pub control_messages_rate_limited: Counter,
    pub heartbeat_timeouts: Counter,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render in the Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        write_counter(&mut out, "hub_store_noop_deltas_total", "No-op deltas dropped before a sequence bump.", self.store_noop_deltas.get());
        write_counter(&mut out, "hub_store_illegal_transitions_total", "Order deltas rejected for an illegal status transition.", self.store_illegal_transitions.get());
        write_gauge(&mut out, "hub_store_sequence", "Current Store sequence number.", self.store_sequence.get());

        write_counter(&mut out, "hub_adapter_decode_errors_total", "Malformed upstream payloads dropped.", self.adapter_decode_errors.get());
        write_counter(&mut out, "hub_adapter_poll_failures_total", "Backend poll calls that failed.", self.adapter_poll_failures.get());
        write_counter(&mut out, "hub_adapter_reconnects_total", "Pub/sub reconnect attempts.", self.adapter_reconnects.get());

        write_counter(&mut out, "hub_broadcasts_attempted_total", "Per-client broadcast attempts across both tick loops.", self.broadcasts_attempted.get());
        write_counter(&mut out, "hub_broadcasts_sent_total", "Messages successfully enqueued to a client.", self.broadcasts_sent.get());
        write_counter(&mut out, "hub_broadcasts_skipped_no_change_total", "Ticks skipped because the diff was empty.", self.broadcasts_skipped_no_change.get());
        write_counter(&mut out, "hub_broadcasts_dropped_queue_full_total", "Messages dropped because the client's outbound queue was full.", self.broadcasts_dropped_queue_full.get());
        write_counter(&mut out, "hub_broadcast_tick_overruns_total", "Ticks whose computation exceeded the cadence.", self.broadcast_tick_overruns.get());

        write_gauge(&mut out, "hub_clients_connected", "Currently registered clients.", self.clients_connected.get());
        write_counter(&mut out, "hub_clients_terminated_total", "Clients that reached the Terminated state.", self.clients_terminated.get());
        write_counter(&mut out, "hub_clients_terminated_for_violations_total", "Clients closed for repeated control-message violations.", self.clients_terminated_for_violations.get());
        write_counter(&mut out, "hub_control_messages_rejected_total", "Control messages dropped for a parse error.", self.control_messages_rejected.get());
        write_counter(&mut out, "hub_control_messages_rate_limited_total", "Control messages dropped by the per-client token bucket.", self.control_messages_rate_limited.get());
        write_counter(&mut out, "hub_heartbeat_timeouts_total", "Clients terminated for missing a heartbeat deadline.", self.heartbeat_timeouts.get());

        out
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_output_contains_help_and_type_lines() {
        let metrics = HubMetrics::new();
        metrics.broadcasts_sent.add(3);
        let text = metrics.to_prometheus();
        assert!(text.contains("# HELP hub_broadcasts_sent_total"));
        assert!(text.contains("# TYPE hub_broadcasts_sent_total counter"));
        assert!(text.contains("hub_broadcasts_sent_total 3"));
    }
}
