//! The Client Gateway (C4): accepts WebSocket connections, owns each
//! client's transport, and runs its read/write workers (§4.4).
//!
//! `Accepted -> Registered -> Terminated` is implemented as: parse the
//! class/encoding hints and register the [`ClientHandle`] (Accepted ->
//! Registered happens together, there is no handshake step beyond the
//! WebSocket upgrade itself), then run the read loop until it ends for any
//! reason, cancel the write worker, and deregister exactly once on the way
//! out.

pub mod control;
pub mod token_bucket;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::registry::{ClientHandle, ClientRegistry};
use crate::config::HubConfig;
use crate::metrics::HubMetrics;
use crate::models::{ClientClass, Encoding};
use crate::store::StoreHandle;

use control::ControlMessage;
use token_bucket::TokenBucket;

pub struct GatewayState {
    pub store: StoreHandle,
    pub registry: Arc<ClientRegistry>,
    pub metrics: Arc<HubMetrics>,
    pub config: Arc<HubConfig>,
}

#[derive(Debug, serde::Deserialize)]
pub struct ConnectParams {
    class: Option<String>,
    encoding: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let class = ClientClass::parse(params.class.as_deref().unwrap_or("slow"));
    let encoding = Encoding::parse(params.encoding.as_deref().unwrap_or("text-json"));
    ws.on_upgrade(move |socket| handle_socket(socket, state, class, encoding))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, class: ClientClass, encoding: Encoding) {
    let id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.client_queue_capacity);
    let handle = Arc::new(ClientHandle::new(id, class, encoding, outbound_tx));

    state.registry.register(handle.clone());
    state.metrics.clients_connected.set(state.registry.len() as u64);
    info!(%id, ?class, ?encoding, "client registered");

    let (sink, stream) = socket.split();
    let shutdown = CancellationToken::new();

    let write_handle = tokio::spawn(write_worker(
        sink,
        outbound_rx,
        Duration::from_secs(state.config.heartbeat_interval_secs),
        Duration::from_secs(state.config.write_deadline_secs),
        shutdown.clone(),
    ));

    let bucket = TokenBucket::new(
        state.config.control_rate_limit,
        Duration::from_secs(state.config.control_rate_window_secs),
    );

    read_loop(
        stream,
        handle.clone(),
        Duration::from_secs(state.config.read_deadline_secs),
        state.metrics.clone(),
        bucket,
        state.config.control_violation_threshold,
    )
    .await;

    shutdown.cancel();
    let _ = write_handle.await;

    state.registry.deregister(id);
    state.metrics.clients_connected.set(state.registry.len() as u64);
    state.metrics.clients_terminated.inc();
    info!(%id, "client terminated");
}

async fn write_worker(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Message>,
    heartbeat_interval: Duration,
    write_deadline: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            _ = ticker.tick() => {
                if timeout(write_deadline, sink.send(Message::Ping(Vec::new()))).await.is_err() {
                    debug!("write worker: heartbeat ping deadline exceeded");
                    return;
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if timeout(write_deadline, sink.send(frame)).await.is_err() {
                            debug!("write worker: write deadline exceeded");
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    handle: Arc<ClientHandle>,
    read_deadline: Duration,
    metrics: Arc<HubMetrics>,
    mut bucket: TokenBucket,
    violation_threshold: u32,
) {
    let mut violations: u32 = 0;

    loop {
        let next = match timeout(read_deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                metrics.heartbeat_timeouts.inc();
                debug!(id = %handle.id, "read deadline exceeded, terminating client");
                return;
            }
        };

        let message = match next {
            None => return,
            Some(Err(err)) => {
                debug!(id = %handle.id, error = %err, "transport error, terminating client");
                return;
            }
            Some(Ok(message)) => message,
        };

        match message {
            Message::Close(_) => return,
            Message::Text(text) => {
                if !bucket.try_consume() {
                    metrics.control_messages_rate_limited.inc();
                    violations += 1;
                    if violations >= violation_threshold {
                        metrics.clients_terminated_for_violations.inc();
                        warn!(id = %handle.id, violations, "closing connection: repeated control-message rate-limit violations");
                        return;
                    }
                    continue;
                }

                if apply_control(&handle, &text, &metrics) {
                    violations = 0;
                } else {
                    violations += 1;
                    if violations >= violation_threshold {
                        metrics.clients_terminated_for_violations.inc();
                        warn!(id = %handle.id, violations, "closing connection: repeated malformed control messages");
                        return;
                    }
                }
            }
            // Binary control frames are not part of the protocol (§6); any
            // other frame kind (Ping/Pong/Binary) only serves to keep the
            // read deadline from tripping.
            _ => {}
        }
    }
}

/// Applies one parsed control message. Returns `false` on a malformed frame
/// so the caller can count it as a strike toward `violation_threshold`.
fn apply_control(handle: &Arc<ClientHandle>, text: &str, metrics: &HubMetrics) -> bool {
    match control::parse(text) {
        Ok(ControlMessage::Subscribe(channels)) => {
            handle.add_subscriptions(&channels);
            true
        }
        Ok(ControlMessage::Unsubscribe(channels)) => {
            handle.remove_subscriptions(&channels);
            true
        }
        Ok(ControlMessage::Refresh) => {
            handle.clear_last_sent();
            true
        }
        Ok(ControlMessage::Ping) => true,
        Err(err) => {
            metrics.control_messages_rejected.inc();
            warn!(id = %handle.id, error = %err, "rejected malformed control message");
            false
        }
    }
}
