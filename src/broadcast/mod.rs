//! The Broadcaster (C3): two independent tick loops, one per client class.
//!
//! Each tick takes one snapshot, then for every client of that class:
//! projects by subscription, diffs against (or substitutes for, on first
//! send) the client's last-sent state, encodes, and enqueues
//! non-blockingly. The tick loop never awaits per-client (§5): enqueue is
//! `try_send`, encoding is pure CPU work.

pub mod diff;
pub mod message;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use quanta::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::HubMetrics;
use crate::models::ClientClass;
use crate::store::StoreHandle;

use diff::{diff as compute_diff, Projection};
use message::Outbound;
use registry::ClientRegistry;

pub struct Broadcaster {
    store: StoreHandle,
    registry: Arc<ClientRegistry>,
    metrics: Arc<HubMetrics>,
}

impl Broadcaster {
    pub fn new(store: StoreHandle, registry: Arc<ClientRegistry>, metrics: Arc<HubMetrics>) -> Self {
        Self { store, registry, metrics }
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Runs one class's tick loop until cancelled. Spawn once per class.
    pub async fn run(self: Arc<Self>, class: ClientClass, cadence: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let clock = Clock::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(?class, "broadcaster tick loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let tick_start = clock.now();
                    self.run_tick(class);
                    if clock.now().duration_since(tick_start) > cadence {
                        self.metrics.broadcast_tick_overruns.inc();
                        warn!(?class, "broadcast tick overran its cadence");
                    }
                }
            }
        }
    }

    fn run_tick(&self, class: ClientClass) {
        let snapshot = self.store.snapshot();
        let clients = self.registry.clients_of_class(class);

        for client in clients {
            self.metrics.broadcasts_attempted.inc();
            let subscriptions = client.subscriptions();
            let projection = Projection::from_snapshot(&snapshot, &subscriptions);

            let outbound = match client.last_sent() {
                None => Outbound::Snapshot {
                    seq: projection.sequence,
                    timestamp: chrono::Utc::now(),
                    data: projection.to_data_value(),
                },
                Some(prev) => {
                    let mut changes = Vec::new();
                    compute_diff(&prev, &projection, &mut changes);
                    if changes.is_empty() {
                        self.metrics.broadcasts_skipped_no_change.inc();
                        continue;
                    }
                    Outbound::Diff {
                        seq: projection.sequence,
                        timestamp: chrono::Utc::now(),
                        changes,
                    }
                }
            };

            let frame = outbound.encode(client.encoding);
            match client.try_enqueue(frame) {
                Ok(()) => {
                    // Only update on a successful enqueue (I-4): a dropped
                    // broadcast must leave last-sent untouched so the next
                    // tick's diff naturally includes what was missed.
                    client.set_last_sent(projection);
                    self.metrics.broadcasts_sent.inc();
                }
                Err(()) => {
                    self.metrics.broadcasts_dropped_queue_full.inc();
                }
            }
        }
    }
}
