use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::middleware as axum_middleware;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use state_hub::adapters::{self, bulk::BulkLoader, polling::PollingAdapter, pubsub::PubSubAdapter};
use state_hub::api::{self, ApiState};
use state_hub::broadcast::registry::ClientRegistry;
use state_hub::broadcast::Broadcaster;
use state_hub::config::HubConfig;
use state_hub::gateway::{self, GatewayState};
use state_hub::metrics::HubMetrics;
use state_hub::middleware::logging::request_logging_simple;
use state_hub::middleware::rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use state_hub::models::ClientClass;
use state_hub::store;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Arc::new(HubConfig::load().context("loading hub configuration")?);
    let metrics = Arc::new(HubMetrics::new());
    let shutdown = CancellationToken::new();

    let (store_handle, delta_tx, store_writer) = store::new(config.delta_channel_capacity, metrics.clone());
    tokio::spawn(store_writer.run());

    let pubsub = Arc::new(PubSubAdapter::new(&config, metrics.clone()));
    pubsub
        .connect_initial()
        .await
        .context("connecting to the pub/sub broker at startup")?;
    info!("pub/sub broker reachable, continuing startup");

    let bulk_loader = BulkLoader::new(config.bulk_load_url.clone(), metrics.clone());
    bulk_loader.load(&delta_tx).await;

    adapters::spawn(pubsub, delta_tx.clone(), shutdown.clone());

    let polling = Arc::new(PollingAdapter::new(
        config.order_service_url.clone(),
        config.strategy_service_url.clone(),
        config.account_service_url.clone(),
        config.poll_interval(),
        config.poll_timeout(),
        metrics.clone(),
    ));
    adapters::spawn(polling, delta_tx, shutdown.clone());

    let registry = Arc::new(ClientRegistry::default());
    let broadcaster = Arc::new(Broadcaster::new(store_handle.clone(), registry.clone(), metrics.clone()));
    tokio::spawn(broadcaster.clone().run(ClientClass::Fast, config.fast_tick(), shutdown.clone()));
    tokio::spawn(broadcaster.run(ClientClass::Slow, config.slow_tick(), shutdown.clone()));

    let gateway_state = Arc::new(GatewayState {
        store: store_handle.clone(),
        registry,
        metrics: metrics.clone(),
        config: config.clone(),
    });

    let rate_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: 300,
        window: Duration::from_secs(60),
        burst: 50,
    });
    tokio::spawn(cleanup_rate_limiter(rate_limiter.clone()));

    let operator_routes = api::router(ApiState { store: store_handle.clone(), metrics: metrics.clone() })
        .layer(axum_middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let app = Router::new()
        .route("/ws", get(gateway::ws_handler))
        .with_state(gateway_state)
        .merge(operator_routes)
        .layer(axum_middleware::from_fn(request_logging_simple))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "state hub listening");

    tokio::spawn(wait_for_ctrl_c(shutdown.clone()));

    let serve_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
    .await
    .context("server error")?;

    Ok(())
}

/// Cancels the root shutdown token on Ctrl-C, propagating to every worker
/// (broadcast tick loops, adapters, each client's read/write pair) per §5.
async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.cancel();
}

async fn cleanup_rate_limiter(limiter: RateLimitLayer) {
    let mut ticker = tokio::time::interval(Duration::from_secs(120));
    loop {
        ticker.tick().await;
        limiter.cleanup();
    }
}
