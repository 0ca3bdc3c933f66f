//! Pub/sub subscriber (§4.1, §6): subscribes to the seven channel families
//! over a WebSocket, decodes each message into a typed delta, and never
//! treats a malformed message as fatal. The initial connection is the one
//! upstream failure the whole process treats as fatal (§4.1, §7); every
//! disconnect after that reconnects with exponential backoff, the same
//! supervised-loop idiom used for the book-data subscription elsewhere in
//! this codebase.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{common, UpstreamSource};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::metrics::HubMetrics;
use crate::models::{Position, Side, SymbolSnapshot};
use crate::store::Delta;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CHANNEL_PATTERNS: &[&str] = &[
    "market_data:*",
    "orderbook:*",
    "trades:*",
    "orders:*",
    "positions:*",
    "account:*",
    "strategies:*",
];

pub struct PubSubAdapter {
    url: String,
    bulk_load_url: Option<String>,
    http: reqwest::Client,
    metrics: Arc<HubMetrics>,
}

impl PubSubAdapter {
    pub fn new(config: &HubConfig, metrics: Arc<HubMetrics>) -> Self {
        Self {
            url: config.pubsub_url.clone(),
            bulk_load_url: config.bulk_load_url.clone(),
            http: reqwest::Client::new(),
            metrics,
        }
    }

    /// Verifies the broker is reachable. Called once from `main` before any
    /// other component starts; its failure is the one fatal startup error.
    pub async fn connect_initial(&self) -> Result<(), HubError> {
        Self::dial(&self.url).await?;
        Ok(())
    }

    async fn dial(url: &str) -> Result<WsStream, HubError> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|source| HubError::PubSubConnect { url: url.to_string(), source })?;
        Ok(stream)
    }

    async fn run_connected(&self, mut stream: WsStream, submit: &mpsc::Sender<Delta>, shutdown: &CancellationToken) {
        let subscribe = serde_json::json!({ "op": "subscribe", "channels": CHANNEL_PATTERNS });
        if stream.send(WsMessage::Text(subscribe.to_string())).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    return;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => self.handle_message(&text, submit).await,
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("pub/sub broker closed the connection");
                            return;
                        }
                        Some(Ok(_)) => {} // ping/pong/binary: ignored
                        Some(Err(err)) => {
                            warn!(error = %err, "pub/sub transport error");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, text: &str, submit: &mpsc::Sender<Delta>) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.metrics.adapter_decode_errors.inc();
                debug!(error = %err, "dropped malformed pub/sub message");
                return;
            }
        };

        let Some((family, key)) = split_channel(&envelope.channel) else {
            self.metrics.adapter_decode_errors.inc();
            return;
        };

        let delta = match family {
            "market_data" => decode_market_data(key, &envelope.data),
            "orders" => decode_order(&envelope.data),
            "positions" => decode_position(key, &envelope.data),
            "account" => decode_account(&envelope.data),
            "orderbook" | "trades" => {
                self.reload_symbol(key).await;
                None
            }
            "strategies" => {
                self.reload_strategies(submit).await;
                None
            }
            _ => None,
        };

        match delta {
            Some(Ok(delta)) => {
                let _ = submit.send(delta).await;
            }
            Some(Err(())) => self.metrics.adapter_decode_errors.inc(),
            None => {}
        }
    }

    /// `orderbook:{symbol}` / `trades:{symbol}` carry no payload of their
    /// own (§6): they mean "go re-fetch this symbol". Without a configured
    /// seed endpoint there is nowhere to re-fetch from, so this degrades to
    /// a counted no-op rather than a fatal error.
    async fn reload_symbol(&self, symbol: &str) {
        let Some(base) = &self.bulk_load_url else {
            self.metrics.adapter_decode_errors.inc();
            return;
        };
        let url = format!("{base}/symbols/{symbol}");
        match self.http.get(&url).send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => {}
            Err(err) => warn!(symbol, error = %err, "symbol reload fetch failed"),
        }
    }

    async fn reload_strategies(&self, submit: &mpsc::Sender<Delta>) {
        let Some(base) = &self.bulk_load_url else {
            self.metrics.adapter_decode_errors.inc();
            return;
        };
        let url = format!("{base}/strategies");
        match common::fetch_strategies(&self.http, &url, Duration::from_secs(5)).await {
            Ok(deltas) => {
                for delta in deltas {
                    let _ = submit.send(delta).await;
                }
            }
            Err(err) => warn!(error = %err, "strategy reload fetch failed"),
        }
    }
}

#[async_trait]
impl UpstreamSource for PubSubAdapter {
    async fn run(self: Arc<Self>, submit: mpsc::Sender<Delta>, shutdown: CancellationToken) {
        let mut backoff = Duration::from_millis(500);
        let max_backoff = Duration::from_secs(30);

        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match Self::dial(&self.url).await {
                Ok(stream) => {
                    info!("pub/sub connected");
                    backoff = Duration::from_millis(500);
                    self.run_connected(stream, &submit, &shutdown).await;
                }
                Err(err) => {
                    warn!(error = %err, "pub/sub dial failed, will retry");
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
            self.metrics.adapter_reconnects.inc();
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    channel: String,
    data: Value,
}

fn split_channel(channel: &str) -> Option<(&str, &str)> {
    let idx = channel.find(':')?;
    Some((&channel[..idx], &channel[idx + 1..]))
}

fn parse_timestamp(value: &Value) -> DateTime<Utc> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()).unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

fn decode_market_data(symbol: &str, data: &Value) -> Option<Result<Delta, ()>> {
    let snapshot = SymbolSnapshot {
        last_price: data.get("last_price")?.as_f64()?,
        best_bid: data.get("best_bid")?.as_f64()?,
        best_ask: data.get("best_ask")?.as_f64()?,
        volume_24h: data.get("volume_24h").and_then(Value::as_f64).unwrap_or(0.0),
        high_24h: data.get("high_24h").and_then(Value::as_f64).unwrap_or(0.0),
        low_24h: data.get("low_24h").and_then(Value::as_f64).unwrap_or(0.0),
        updated_at: data.get("updated_at").map(parse_timestamp).unwrap_or_else(Utc::now),
    };
    Some(Ok(Delta::MarketData { symbol: symbol.to_string(), snapshot }))
}

fn decode_order(data: &Value) -> Option<Result<Delta, ()>> {
    let order: Result<crate::models::OrderRecord, _> = serde_json::from_value(data.clone());
    Some(order.map(Delta::Order).map_err(|_| ()))
}

fn decode_position(symbol: &str, data: &Value) -> Option<Result<Delta, ()>> {
    let side_str = data.get("side")?.as_str()?;
    let side = if side_str.eq_ignore_ascii_case("buy") { Side::Buy } else { Side::Sell };
    let position = Position {
        symbol: symbol.to_string(),
        side,
        size: data.get("size")?.as_f64()?,
        entry_price: data.get("entry_price")?.as_f64()?,
        mark_price: data.get("mark_price")?.as_f64()?,
        unrealized_pnl: data.get("unrealized_pnl").and_then(Value::as_f64).unwrap_or(0.0),
        realized_pnl: data.get("realized_pnl").and_then(Value::as_f64).unwrap_or(0.0),
    };
    Some(Ok(Delta::Position { symbol: symbol.to_string(), position }))
}

fn decode_account(data: &Value) -> Option<Result<Delta, ()>> {
    let account: Result<crate::models::Account, _> = serde_json::from_value(data.clone());
    Some(account.map(Delta::Account).map_err(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_channel_into_family_and_key() {
        assert_eq!(split_channel("market_data:BTCUSDT"), Some(("market_data", "BTCUSDT")));
        assert_eq!(split_channel("account:*"), Some(("account", "*")));
        assert_eq!(split_channel("malformed"), None);
    }

    #[test]
    fn decodes_market_data_payload() {
        let data = serde_json::json!({
            "last_price": 50000.0,
            "best_bid": 49999.0,
            "best_ask": 50001.0,
        });
        let delta = decode_market_data("BTCUSDT", &data).unwrap().unwrap();
        match delta {
            Delta::MarketData { symbol, snapshot } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(snapshot.last_price, 50000.0);
            }
            _ => panic!("wrong delta variant"),
        }
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        let data = serde_json::json!({ "last_price": 50000.0 });
        assert!(decode_market_data("BTCUSDT", &data).unwrap().is_err());
    }
}
