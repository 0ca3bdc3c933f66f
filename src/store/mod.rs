//! The State Store (C2): single writer, many lock-free readers.
//!
//! Mirrors the `ArcSwap`-backed snapshot idiom used for book state
//! elsewhere in this codebase: the authoritative [`GlobalSnapshot`] lives
//! behind an `arc_swap::ArcSwap`, so [`StoreHandle::snapshot`] never blocks
//! the writer and never hands back a torn read (I-2). The writer is the only
//! task that ever calls `.store()`.

pub mod delta;
pub mod order_transition;

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::metrics::HubMetrics;
use crate::models::GlobalSnapshot;

pub use delta::Delta;

struct Inner {
    snapshot: ArcSwap<GlobalSnapshot>,
    change_tx: watch::Sender<u64>,
}

/// Cheap, cloneable handle held by readers (Broadcaster, debug endpoint).
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Inner>,
}

impl StoreHandle {
    /// Returns the current snapshot. The `Arc` is the whole consistency
    /// guarantee: every field in it was written by one `apply` call.
    pub fn snapshot(&self) -> Arc<GlobalSnapshot> {
        self.inner.snapshot.load_full()
    }

    /// A single-slot, coalescing "something changed" signal (§4.2).
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.inner.change_tx.subscribe()
    }
}

/// Owns the mutation path. Only `run` ever calls `ArcSwap::store`.
pub struct StoreWriter {
    inner: Arc<Inner>,
    deltas: mpsc::Receiver<Delta>,
    metrics: Arc<HubMetrics>,
}

/// Builds the store, returning the reader handle, the sender adapters submit
/// deltas through, and the writer task to be spawned by the caller.
pub fn new(capacity: usize, metrics: Arc<HubMetrics>) -> (StoreHandle, mpsc::Sender<Delta>, StoreWriter) {
    let (tx, rx) = mpsc::channel(capacity);
    let (change_tx, _) = watch::channel(0u64);
    let inner = Arc::new(Inner {
        snapshot: ArcSwap::from_pointee(GlobalSnapshot::default()),
        change_tx,
    });
    let handle = StoreHandle { inner: inner.clone() };
    let writer = StoreWriter { inner, deltas: rx, metrics };
    (handle, tx, writer)
}

impl StoreWriter {
    /// Drains the delta channel until the sender side is dropped (process
    /// shutdown), applying each delta under the single-writer discipline.
    pub async fn run(mut self) {
        while let Some(delta) = self.deltas.recv().await {
            self.apply(delta);
        }
        debug!("store writer exiting: delta channel closed");
    }

    /// Merges one delta. Returns `true` if the sequence advanced.
    pub fn apply(&mut self, delta: Delta) -> bool {
        let current = self.inner.snapshot.load_full();
        let mut next = (*current).clone();
        let kind = delta.kind();

        let changed = apply_to(&mut next, delta, &self.metrics);
        if !changed {
            self.metrics.store_noop_deltas.inc();
            return false;
        }

        next.sequence = current.sequence + 1;
        next.updated_at = Some(Utc::now());
        self.inner.snapshot.store(Arc::new(next));
        self.metrics.store_sequence.set(current.sequence + 1);
        // A coalescing slot: a missed send means only that a waiting reader
        // observes the latest sequence a tick late, never a stale one.
        let _ = self.inner.change_tx.send(current.sequence + 1);
        debug!(kind, new_sequence = current.sequence + 1, "applied delta");
        true
    }
}

fn apply_to(next: &mut GlobalSnapshot, delta: Delta, metrics: &HubMetrics) -> bool {
    use delta::Delta as D;
    match delta {
        D::MarketData { symbol, snapshot } => {
            let changed = next
                .market_data
                .get(&symbol)
                .map(|existing| !semantically_equal_symbol(existing, &snapshot))
                .unwrap_or(true);
            next.market_data.insert(symbol, snapshot);
            changed
        }
        D::Order(order) => {
            let prior_status = next.orders.get(&order.order_id).map(|o| o.status);
            if !order_transition::is_legal(prior_status, order.status) {
                metrics.store_illegal_transitions.inc();
                warn!(
                    order_id = %order.order_id,
                    from = ?prior_status,
                    to = ?order.status,
                    "rejected illegal order transition"
                );
                return false;
            }
            let changed = next
                .orders
                .get(&order.order_id)
                .map(|existing| !semantically_equal_order(existing, &order))
                .unwrap_or(true);
            next.orders.insert(order.order_id.clone(), order);
            changed
        }
        D::Position { symbol, position } => {
            let changed = next
                .positions
                .get(&symbol)
                .map(|existing| existing != &position)
                .unwrap_or(true);
            next.positions.insert(symbol, position);
            changed
        }
        D::Account(account) => {
            let changed = next.account.as_ref() != Some(&account);
            next.account = Some(account);
            changed
        }
        D::Strategy(status) => {
            let changed = next
                .strategies
                .get(&status.strategy_id)
                .map(|existing| existing != &status)
                .unwrap_or(true);
            next.strategies.insert(status.strategy_id.clone(), status);
            changed
        }
        D::RemoveOrder { order_id } => next.orders.remove(&order_id).is_some(),
        D::RemovePosition { symbol } => next.positions.remove(&symbol).is_some(),
        D::RemoveStrategy { strategy_id } => next.strategies.remove(&strategy_id).is_some(),
        // A bare reload request carries no state by itself; the adapter that
        // saw it is responsible for fetching and resubmitting a real delta.
        D::ReloadRequested { .. } => false,
    }
}

/// `updated_at` is explicitly non-diffable (§9 Open Question, resolved in
/// DESIGN.md): two snapshots that differ only by timestamp are treated as
/// unchanged so a no-op re-publish does not burn a sequence number.
fn semantically_equal_symbol(a: &crate::models::SymbolSnapshot, b: &crate::models::SymbolSnapshot) -> bool {
    a.last_price == b.last_price
        && a.best_bid == b.best_bid
        && a.best_ask == b.best_ask
        && a.volume_24h == b.volume_24h
        && a.high_24h == b.high_24h
        && a.low_24h == b.low_24h
}

fn semantically_equal_order(a: &crate::models::OrderRecord, b: &crate::models::OrderRecord) -> bool {
    a.symbol == b.symbol
        && a.side == b.side
        && a.order_type == b.order_type
        && a.quantity == b.quantity
        && a.price == b.price
        && a.filled_quantity == b.filled_quantity
        && a.status == b.status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, OrderRecord, OrderStatus, OrderType, Side};

    fn test_metrics() -> Arc<HubMetrics> {
        Arc::new(HubMetrics::new())
    }

    fn sample_order(status: OrderStatus) -> OrderRecord {
        OrderRecord {
            order_id: "o1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: 1.0,
            price: 50_000.0,
            filled_quantity: 0.0,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sequence_increments_exactly_once_per_applied_delta() {
        let (handle, _tx, mut writer) = new(16, test_metrics());
        assert_eq!(handle.snapshot().sequence, 0);

        writer.apply(Delta::Order(sample_order(OrderStatus::New)));
        assert_eq!(handle.snapshot().sequence, 1);

        writer.apply(Delta::Order(sample_order(OrderStatus::PartiallyFilled)));
        assert_eq!(handle.snapshot().sequence, 2);
    }

    #[tokio::test]
    async fn noop_delta_does_not_advance_sequence() {
        let (handle, _tx, mut writer) = new(16, test_metrics());
        writer.apply(Delta::Order(sample_order(OrderStatus::New)));
        let seq_after_first = handle.snapshot().sequence;

        // identical content, same status: idempotent re-apply
        writer.apply(Delta::Order(sample_order(OrderStatus::New)));
        assert_eq!(handle.snapshot().sequence, seq_after_first);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_mutating_store() {
        let (handle, _tx, mut writer) = new(16, test_metrics());
        writer.apply(Delta::Order(sample_order(OrderStatus::Filled)));
        let seq = handle.snapshot().sequence;

        let applied = writer.apply(Delta::Order(sample_order(OrderStatus::New)));
        assert!(!applied);
        assert_eq!(handle.snapshot().sequence, seq);
        assert_eq!(handle.snapshot().orders["o1"].status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn account_replace_and_removal_paths() {
        let (handle, _tx, mut writer) = new(16, test_metrics());
        let account = Account {
            total_balance: 1000.0,
            available_balance: 900.0,
            margin_used: 100.0,
            margin_available: 900.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        };
        writer.apply(Delta::Account(account.clone()));
        assert_eq!(handle.snapshot().account, Some(account));
    }
}
