//! Per-client projection and dotted-path structural diff (§4.3, §9).
//!
//! The snapshot schema is closed, so the diff walker is hand-written rather
//! than reflective: each entity family is diffed field-by-field, map-typed
//! families additionally diff at the whole-key level (new key -> full
//! record, removed key -> tombstone `null`). `updated_at`/`created_at` are
//! excluded from leaf comparison — an upstream re-publish that only bumps a
//! timestamp must not show up as a diff.
//!
//! Floating point fields use exact equality, per the documented epsilon
//! policy: upstream is expected to re-emit stable values for fields that
//! did not change (see DESIGN.md).

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::models::{Channel, GlobalSnapshot};

const NON_DIFFABLE_FIELDS: &[&str] = &["updated_at", "created_at"];

/// The snapshot restricted to a client's subscription set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub sequence: u64,
    pub market_data: HashMap<String, Value>,
    pub orders: HashMap<String, Value>,
    pub positions: HashMap<String, Value>,
    pub account: Option<Value>,
    pub strategies: HashMap<String, Value>,
}

impl Projection {
    pub fn from_snapshot(snapshot: &GlobalSnapshot, subscriptions: &HashSet<Channel>) -> Self {
        let mut projection = Projection {
            sequence: snapshot.sequence,
            ..Default::default()
        };
        if subscriptions.contains(&Channel::MarketData) {
            projection.market_data = to_value_map(&snapshot.market_data);
        }
        if subscriptions.contains(&Channel::Orders) {
            projection.orders = to_value_map(&snapshot.orders);
        }
        if subscriptions.contains(&Channel::Positions) {
            projection.positions = to_value_map(&snapshot.positions);
        }
        if subscriptions.contains(&Channel::Account) {
            projection.account = snapshot.account.as_ref().map(|a| serde_json::to_value(a).unwrap());
        }
        if subscriptions.contains(&Channel::Strategies) {
            projection.strategies = to_value_map(&snapshot.strategies);
        }
        projection
    }

    /// Renders the full `data` payload of a snapshot message (§6.1).
    pub fn to_data_value(&self) -> Value {
        serde_json::json!({
            "market_data": self.market_data,
            "orders": self.orders.values().cloned().collect::<Vec<_>>(),
            "positions": self.positions,
            "account": self.account,
            "strategies": self.strategies,
        })
    }
}

fn to_value_map<K: std::hash::Hash + Eq + ToString + Clone, V: Serialize>(
    map: &HashMap<K, V>,
) -> HashMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.to_string(), serde_json::to_value(v).unwrap()))
        .collect()
}

/// One `dotted.path -> value` change, in the order it was discovered.
pub type Changes = Vec<(String, Value)>;

/// Computes the diff between `last_sent` and `current`. A diff against
/// nothing (`last_sent.is_none()`) is never asked for here — the caller
/// decides first-send vs diff (see [`crate::broadcast`]).
pub fn diff(last_sent: &Projection, current: &Projection, changes: &mut Changes) {
    diff_map("market_data", &last_sent.market_data, &current.market_data, changes);
    diff_map("orders", &last_sent.orders, &current.orders, changes);
    diff_map("positions", &last_sent.positions, &current.positions, changes);
    diff_map("strategies", &last_sent.strategies, &current.strategies, changes);
    diff_singleton("account", last_sent.account.as_ref(), current.account.as_ref(), changes);
}

fn diff_map(prefix: &str, old: &HashMap<String, Value>, new: &HashMap<String, Value>, changes: &mut Changes) {
    for (key, new_val) in new {
        let path = format!("{prefix}.{key}");
        match old.get(key) {
            Some(old_val) => diff_leaves(&path, old_val, new_val, changes),
            None => changes.push((path, new_val.clone())),
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.push((format!("{prefix}.{key}"), Value::Null));
        }
    }
}

fn diff_singleton(prefix: &str, old: Option<&Value>, new: Option<&Value>, changes: &mut Changes) {
    match (old, new) {
        (None, Some(new_val)) => changes.push((prefix.to_string(), new_val.clone())),
        (Some(_), None) => changes.push((prefix.to_string(), Value::Null)),
        (Some(old_val), Some(new_val)) => diff_leaves(prefix, old_val, new_val, changes),
        (None, None) => {}
    }
}

fn diff_leaves(prefix: &str, old: &Value, new: &Value, changes: &mut Changes) {
    let (Value::Object(old_obj), Value::Object(new_obj)) = (old, new) else {
        if old != new {
            changes.push((prefix.to_string(), new.clone()));
        }
        return;
    };
    for (field, new_val) in new_obj {
        if NON_DIFFABLE_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let path = format!("{prefix}.{field}");
        match old_obj.get(field) {
            Some(old_val) if old_val == new_val => {}
            _ => changes.push((path, new_val.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolSnapshot;
    use chrono::Utc;

    fn symbol(price: f64) -> SymbolSnapshot {
        SymbolSnapshot {
            last_price: price,
            best_bid: price - 1.0,
            best_ask: price + 1.0,
            volume_24h: 100.0,
            high_24h: price + 5.0,
            low_24h: price - 5.0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn field_level_diff_on_scalar_change() {
        let mut old = Projection::default();
        old.market_data.insert("BTCUSDT".into(), serde_json::to_value(symbol(50_000.0)).unwrap());
        let mut new = old.clone();
        new.market_data.insert("BTCUSDT".into(), serde_json::to_value(symbol(50_100.0)).unwrap());

        let mut changes = Vec::new();
        diff(&old, &new, &mut changes);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "market_data.BTCUSDT.last_price");
        assert_eq!(changes[0].1, serde_json::json!(50_100.0));
    }

    #[test]
    fn updated_at_only_change_is_not_diffable() {
        let mut old = Projection::default();
        old.market_data.insert("BTCUSDT".into(), serde_json::to_value(symbol(50_000.0)).unwrap());
        let mut new_symbol = symbol(50_000.0);
        new_symbol.updated_at = new_symbol.updated_at + chrono::Duration::seconds(1);
        let mut new = old.clone();
        new.market_data.insert("BTCUSDT".into(), serde_json::to_value(new_symbol).unwrap());

        let mut changes = Vec::new();
        diff(&old, &new, &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn removed_key_yields_tombstone() {
        let mut old = Projection::default();
        old.positions.insert("BTCUSDT".into(), serde_json::json!({"size": 1.0}));
        let new = Projection::default();

        let mut changes = Vec::new();
        diff(&old, &new, &mut changes);
        assert_eq!(changes, vec![("positions.BTCUSDT".to_string(), Value::Null)]);
    }

    #[test]
    fn new_key_yields_full_record() {
        let old = Projection::default();
        let mut new = Projection::default();
        new.orders.insert("o1".into(), serde_json::json!({"status": "new"}));

        let mut changes = Vec::new();
        diff(&old, &new, &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "orders.o1");
    }
}
