//! End-to-end coverage of the gateway/broadcaster pair (§8): a real Axum
//! server on an ephemeral port, a real WebSocket client, and deltas fed
//! through the same `StoreWriter` path adapters use.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use state_hub::broadcast::registry::ClientRegistry;
use state_hub::broadcast::Broadcaster;
use state_hub::config::HubConfig;
use state_hub::gateway::{self, GatewayState};
use state_hub::metrics::HubMetrics;
use state_hub::models::{ClientClass, SymbolSnapshot};
use state_hub::store::{self, Delta};

struct TestServer {
    addr: SocketAddr,
    delta_tx: mpsc::Sender<Delta>,
    metrics: Arc<HubMetrics>,
    _shutdown: CancellationToken,
}

async fn spawn_server(tick_ms: u64) -> TestServer {
    spawn_server_with_violation_threshold(tick_ms, 1000).await
}

async fn spawn_server_with_violation_threshold(tick_ms: u64, control_violation_threshold: u32) -> TestServer {
    let config = Arc::new(HubConfig {
        fast_tick_ms: tick_ms,
        slow_tick_ms: tick_ms,
        heartbeat_interval_secs: 3600,
        read_deadline_secs: 3600,
        control_rate_limit: 1000,
        control_rate_window_secs: 60,
        control_violation_threshold,
        ..HubConfig::default()
    });

    let metrics = Arc::new(HubMetrics::new());
    let shutdown = CancellationToken::new();

    let (store_handle, delta_tx, writer) = store::new(256, metrics.clone());
    tokio::spawn(writer.run());

    let registry = Arc::new(ClientRegistry::default());
    let broadcaster = Arc::new(Broadcaster::new(store_handle.clone(), registry.clone(), metrics.clone()));
    tokio::spawn(broadcaster.clone().run(ClientClass::Fast, config.fast_tick(), shutdown.clone()));
    tokio::spawn(broadcaster.run(ClientClass::Slow, config.slow_tick(), shutdown.clone()));

    let gateway_state = Arc::new(GatewayState {
        store: store_handle,
        registry,
        metrics: metrics.clone(),
        config,
    });

    let app = Router::new().route("/ws", get(gateway::ws_handler)).with_state(gateway_state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
    });

    TestServer { addr, delta_tx, metrics, _shutdown: shutdown }
}

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr, query: &str) -> Ws {
    let url = format!("ws://{addr}/ws?{query}");
    let (ws, _response) = tokio_tungstenite::connect_async(url).await.expect("client connects");
    ws
}

async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("message arrives before timeout")
            .expect("stream not closed")
            .expect("transport ok")
        {
            WsMessage::Text(text) => return serde_json::from_str(&text).expect("valid json frame"),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn no_message_within(ws: &mut Ws, window: Duration) {
    match tokio::time::timeout(window, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(WsMessage::Ping(_)))) => {}
        other => panic!("expected no message, got {other:?}"),
    }
}

fn sample_symbol(price: f64) -> SymbolSnapshot {
    SymbolSnapshot {
        last_price: price,
        best_bid: price - 1.0,
        best_ask: price + 1.0,
        volume_24h: 10.0,
        high_24h: price + 10.0,
        low_24h: price - 10.0,
        updated_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn initial_subscribe_yields_a_full_snapshot() {
    let server = spawn_server(15).await;
    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(50_000.0) })
        .await
        .unwrap();

    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;
    ws.send(WsMessage::Text(r#"{"type":"subscribe","channels":["market_data"]}"#.to_string()))
        .await
        .unwrap();

    let first = recv_json(&mut ws).await;
    assert_eq!(first["type"], "snapshot");
    assert_eq!(first["data"]["market_data"]["BTCUSDT"]["last_price"], 50_000.0);
}

#[tokio::test]
async fn field_change_after_initial_snapshot_is_a_targeted_diff() {
    let server = spawn_server(15).await;
    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(50_000.0) })
        .await
        .unwrap();

    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;
    ws.send(WsMessage::Text(r#"{"type":"subscribe","channels":["market_data"]}"#.to_string()))
        .await
        .unwrap();
    let snapshot = recv_json(&mut ws).await;
    assert_eq!(snapshot["type"], "snapshot");

    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(50_100.0) })
        .await
        .unwrap();

    let update = recv_json(&mut ws).await;
    assert_eq!(update["type"], "update");
    assert_eq!(update["changes"]["market_data.BTCUSDT.last_price"], 50_100.0);
    assert!(update["changes"].get("market_data.BTCUSDT.best_bid").is_some());
    assert!(update["changes"].get("market_data.BTCUSDT.volume_24h").is_none());
}

#[tokio::test]
async fn unsubscribed_channel_never_appears_in_any_message() {
    let server = spawn_server(15).await;
    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(50_000.0) })
        .await
        .unwrap();
    server
        .delta_tx
        .send(Delta::Position {
            symbol: "BTCUSDT".into(),
            position: state_hub::models::Position {
                symbol: "BTCUSDT".into(),
                side: state_hub::models::Side::Buy,
                size: 1.0,
                entry_price: 49_000.0,
                mark_price: 50_000.0,
                unrealized_pnl: 1_000.0,
                realized_pnl: 0.0,
            },
        })
        .await
        .unwrap();

    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;
    ws.send(WsMessage::Text(r#"{"type":"subscribe","channels":["positions"]}"#.to_string()))
        .await
        .unwrap();

    let first = recv_json(&mut ws).await;
    assert_eq!(first["type"], "snapshot");
    assert!(first["data"]["positions"]["BTCUSDT"].is_object());
    assert_eq!(first["data"]["market_data"], serde_json::json!({}));

    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(99_000.0) })
        .await
        .unwrap();
    no_message_within(&mut ws, Duration::from_millis(150)).await;
}

#[tokio::test]
async fn refresh_forces_a_fresh_full_snapshot() {
    let server = spawn_server(15).await;
    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(50_000.0) })
        .await
        .unwrap();

    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;
    ws.send(WsMessage::Text(r#"{"type":"subscribe","channels":["market_data"]}"#.to_string()))
        .await
        .unwrap();
    let first = recv_json(&mut ws).await;
    assert_eq!(first["type"], "snapshot");

    ws.send(WsMessage::Text(r#"{"type":"refresh"}"#.to_string())).await.unwrap();

    let after_refresh = recv_json(&mut ws).await;
    assert_eq!(after_refresh["type"], "snapshot");
    assert_eq!(after_refresh["data"]["market_data"]["BTCUSDT"]["last_price"], 50_000.0);
}

#[tokio::test]
async fn malformed_control_frame_does_not_close_the_connection() {
    let server = spawn_server(15).await;
    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;

    ws.send(WsMessage::Text("not json at all".to_string())).await.unwrap();

    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(1_000.0) })
        .await
        .unwrap();
    ws.send(WsMessage::Text(r#"{"type":"subscribe","channels":["market_data"]}"#.to_string()))
        .await
        .unwrap();

    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "snapshot");
}

#[tokio::test]
async fn repeated_malformed_control_frames_close_the_connection_after_the_threshold() {
    let server = spawn_server_with_violation_threshold(15, 3).await;
    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;

    for _ in 0..3 {
        ws.send(WsMessage::Text("still not json".to_string())).await.unwrap();
    }

    let closed = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.expect("connection closes promptly");
    assert!(matches!(closed, None | Some(Ok(WsMessage::Close(_)))));
    assert_eq!(server.metrics.clients_terminated_for_violations.get(), 1);
    assert_eq!(server.metrics.control_messages_rejected.get(), 3);
}

#[tokio::test]
async fn a_valid_control_message_resets_the_violation_strike_count() {
    let server = spawn_server_with_violation_threshold(15, 2).await;
    let mut ws = connect(server.addr, "class=fast&encoding=text-json").await;

    ws.send(WsMessage::Text("bad frame one".to_string())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"type":"ping"}"#.to_string())).await.unwrap();
    ws.send(WsMessage::Text("bad frame two".to_string())).await.unwrap();

    server
        .delta_tx
        .send(Delta::MarketData { symbol: "BTCUSDT".into(), snapshot: sample_symbol(2_000.0) })
        .await
        .unwrap();
    ws.send(WsMessage::Text(r#"{"type":"subscribe","channels":["market_data"]}"#.to_string()))
        .await
        .unwrap();

    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "snapshot");
    assert_eq!(server.metrics.clients_terminated_for_violations.get(), 0);
}
