//! Shared HTTP-polling helpers used by both the periodic poller and the
//! pub/sub adapter's reload path (an `orderbook:`/`trades:`/`strategies:`
//! message means "go re-fetch", not "here is the new state").

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::models::{Account, OrderRecord, OrderStatus, OrderType, Side, StrategyStatus};
use crate::store::Delta;

#[derive(Debug, Deserialize)]
struct OrderWire {
    order_id: String,
    symbol: String,
    side: Side,
    #[serde(rename = "type")]
    order_type: OrderType,
    quantity: f64,
    price: f64,
    filled_quantity: f64,
    status: OrderStatus,
}

#[derive(Debug, Deserialize)]
struct StrategyWire {
    strategy_id: String,
    name: String,
    running: bool,
    pnl: f64,
    open_position_count: u32,
    order_count: u32,
}

#[derive(Debug, Deserialize)]
struct AccountWire {
    total_balance: f64,
    available_balance: f64,
    margin_used: f64,
    margin_available: f64,
    unrealized_pnl: f64,
    realized_pnl: f64,
}

pub async fn fetch_orders(client: &reqwest::Client, url: &str, timeout: Duration) -> reqwest::Result<Vec<Delta>> {
    let wires: Vec<OrderWire> = client.get(url).timeout(timeout).send().await?.json().await?;
    let now = Utc::now();
    Ok(wires
        .into_iter()
        .map(|w| {
            Delta::Order(OrderRecord {
                order_id: w.order_id,
                symbol: w.symbol,
                side: w.side,
                order_type: w.order_type,
                quantity: w.quantity,
                price: w.price,
                filled_quantity: w.filled_quantity,
                status: w.status,
                created_at: now,
                updated_at: now,
            })
        })
        .collect())
}

pub async fn fetch_strategies(client: &reqwest::Client, url: &str, timeout: Duration) -> reqwest::Result<Vec<Delta>> {
    let wires: Vec<StrategyWire> = client.get(url).timeout(timeout).send().await?.json().await?;
    Ok(wires
        .into_iter()
        .map(|w| {
            Delta::Strategy(StrategyStatus {
                strategy_id: w.strategy_id,
                name: w.name,
                running: w.running,
                pnl: w.pnl,
                open_position_count: w.open_position_count,
                order_count: w.order_count,
            })
        })
        .collect())
}

pub async fn fetch_account(client: &reqwest::Client, url: &str, timeout: Duration) -> reqwest::Result<Delta> {
    let wire: AccountWire = client.get(url).timeout(timeout).send().await?.json().await?;
    Ok(Delta::Account(Account {
        total_balance: wire.total_balance,
        available_balance: wire.available_balance,
        margin_used: wire.margin_used,
        margin_available: wire.margin_available,
        unrealized_pnl: wire.unrealized_pnl,
        realized_pnl: wire.realized_pnl,
    }))
}
