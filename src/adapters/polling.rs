//! Periodic poller (§4.1): calls the order/strategy/account backend
//! services on a fixed interval. Any one service being unconfigured or
//! failing only degrades that slice of the snapshot to "stale"; it never
//! fails the hub and never retries within the same tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::adapters::common;
use crate::adapters::UpstreamSource;
use crate::metrics::HubMetrics;
use crate::store::Delta;

pub struct PollingAdapter {
    client: reqwest::Client,
    order_service_url: Option<String>,
    strategy_service_url: Option<String>,
    account_service_url: Option<String>,
    interval: Duration,
    timeout: Duration,
    metrics: Arc<HubMetrics>,
}

impl PollingAdapter {
    pub fn new(
        order_service_url: Option<String>,
        strategy_service_url: Option<String>,
        account_service_url: Option<String>,
        interval: Duration,
        timeout: Duration,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            order_service_url,
            strategy_service_url,
            account_service_url,
            interval,
            timeout,
            metrics,
        }
    }

    async fn poll_once(&self, submit: &mpsc::Sender<Delta>) {
        if let Some(url) = &self.order_service_url {
            match common::fetch_orders(&self.client, url, self.timeout).await {
                Ok(deltas) => {
                    for delta in deltas {
                        let _ = submit.send(delta).await;
                    }
                }
                Err(err) => {
                    self.metrics.adapter_poll_failures.inc();
                    warn!(service = "orders", error = %err, "poll failed, snapshot stays stale until next tick");
                }
            }
        }

        if let Some(url) = &self.strategy_service_url {
            match common::fetch_strategies(&self.client, url, self.timeout).await {
                Ok(deltas) => {
                    for delta in deltas {
                        let _ = submit.send(delta).await;
                    }
                }
                Err(err) => {
                    self.metrics.adapter_poll_failures.inc();
                    warn!(service = "strategies", error = %err, "poll failed, snapshot stays stale until next tick");
                }
            }
        }

        if let Some(url) = &self.account_service_url {
            match common::fetch_account(&self.client, url, self.timeout).await {
                Ok(delta) => {
                    let _ = submit.send(delta).await;
                }
                Err(err) => {
                    self.metrics.adapter_poll_failures.inc();
                    warn!(service = "account", error = %err, "poll failed, snapshot stays stale until next tick");
                }
            }
        }
    }
}

#[async_trait]
impl UpstreamSource for PollingAdapter {
    async fn run(self: Arc<Self>, submit: mpsc::Sender<Delta>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => self.poll_once(&submit).await,
            }
        }
    }
}
