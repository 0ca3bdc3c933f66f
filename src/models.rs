//! The trading-state domain model (§3).
//!
//! These types are the closed schema the diff walker in
//! [`crate::broadcast::diff`] depends on: every field here is either a
//! leaf scalar (diffable) or a keyed map (tombstone/upsert at the whole-key
//! level). Adding a field is additive; renaming one is a wire-breaking change.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SymbolKey = String;
pub type OrderKey = String;
pub type StrategyKey = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub last_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub volume_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// `filled`, `canceled`, `rejected` and `expired` are terminal; a store
    /// must never observe a transition away from one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderKey,
    pub symbol: SymbolKey,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: f64,
    pub filled_quantity: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: SymbolKey,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub total_balance: f64,
    pub available_balance: f64,
    pub margin_used: f64,
    pub margin_available: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub strategy_id: StrategyKey,
    pub name: String,
    pub running: bool,
    pub pnl: f64,
    pub open_position_count: u32,
    pub order_count: u32,
}

/// The aggregate the whole hub exists to serve: all entity containers plus
/// the monotonic sequence that makes reads and diffs consistent (I-1, I-2).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub sequence: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub market_data: HashMap<SymbolKey, SymbolSnapshot>,
    pub orders: HashMap<OrderKey, OrderRecord>,
    pub positions: HashMap<SymbolKey, Position>,
    pub account: Option<Account>,
    pub strategies: HashMap<StrategyKey, StrategyStatus>,
}

/// The fixed vocabulary of subscribable top-level channels (§4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    MarketData,
    Orders,
    Positions,
    Account,
    Strategies,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::MarketData,
        Channel::Orders,
        Channel::Positions,
        Channel::Account,
        Channel::Strategies,
    ];

    pub fn parse(s: &str) -> Option<Channel> {
        match s {
            "market_data" => Some(Channel::MarketData),
            "orders" => Some(Channel::Orders),
            "positions" => Some(Channel::Positions),
            "account" => Some(Channel::Account),
            "strategies" => Some(Channel::Strategies),
            _ => None,
        }
    }
}

/// Cadence category a client connects as (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientClass {
    Fast,
    Slow,
}

impl ClientClass {
    pub fn parse(s: &str) -> ClientClass {
        match s {
            "fast" => ClientClass::Fast,
            _ => ClientClass::Slow,
        }
    }
}

/// Wire encoding a client declared at connect time (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    CompactBinary,
    TextJson,
}

impl Encoding {
    pub fn parse(s: &str) -> Encoding {
        match s {
            "binary" | "compact-binary" | "compact_binary" => Encoding::CompactBinary,
            _ => Encoding::TextJson,
        }
    }
}
