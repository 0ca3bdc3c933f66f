//! Operator HTTP surface (§6): liveness, a debug snapshot dump, and a
//! Prometheus scrape endpoint. Everything here is read-only and side-effect
//! free with respect to the trading-state snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::metrics::HubMetrics;
use crate::store::StoreHandle;

#[derive(Clone)]
pub struct ApiState {
    pub store: StoreHandle,
    pub metrics: Arc<HubMetrics>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/debug/snapshot", get(debug_snapshot))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn debug_snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    Json((*state.store.snapshot()).clone())
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}
