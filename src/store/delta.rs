//! Typed deltas, the only thing the adapters are allowed to hand the Store.
//!
//! Upstream payloads are loosely typed JSON; adapters decode into this closed
//! sum type at the boundary (§9 "Dynamic-typed payloads -> tagged variants").
//! The Store never sees raw bytes or `serde_json::Value`.

use crate::models::{Account, OrderRecord, Position, StrategyStatus, SymbolSnapshot};

#[derive(Debug, Clone)]
pub enum Delta {
    MarketData { symbol: String, snapshot: SymbolSnapshot },
    Order(OrderRecord),
    Position { symbol: String, position: Position },
    Account(Account),
    Strategy(StrategyStatus),
    RemoveOrder { order_id: String },
    RemovePosition { symbol: String },
    RemoveStrategy { strategy_id: String },
    /// A channel announced a reload without payload (`orderbook:*`, `trades:*`,
    /// `strategies:*` in §6) — the adapter that emits this must itself fetch
    /// and resubmit the affected entity; the Store treats the re-submission
    /// as an ordinary upsert. Kept as a delta variant so callers that only
    /// see "something changed, go refetch" still round-trip through one
    /// channel type.
    ReloadRequested { channel: &'static str, key: String },
}

impl Delta {
    pub fn kind(&self) -> &'static str {
        match self {
            Delta::MarketData { .. } => "market_data",
            Delta::Order(_) => "order",
            Delta::Position { .. } => "position",
            Delta::Account(_) => "account",
            Delta::Strategy(_) => "strategy",
            Delta::RemoveOrder { .. } => "remove_order",
            Delta::RemovePosition { .. } => "remove_position",
            Delta::RemoveStrategy { .. } => "remove_strategy",
            Delta::ReloadRequested { .. } => "reload_requested",
        }
    }
}
