//! Bulk loader (§4.1): runs once at startup to seed the Store from the
//! cache backing the pub/sub provider, if one is configured, so deltas
//! that arrive the moment the pub/sub subscriber comes up are never
//! dropped as "no such key". A no-op when unconfigured.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapters::common;
use crate::metrics::HubMetrics;
use crate::models::SymbolSnapshot;
use crate::store::Delta;

pub struct BulkLoader {
    base_url: Option<String>,
    http: reqwest::Client,
    metrics: Arc<HubMetrics>,
}

impl BulkLoader {
    pub fn new(base_url: Option<String>, metrics: Arc<HubMetrics>) -> Self {
        Self { base_url, http: reqwest::Client::new(), metrics }
    }

    /// Loads symbols and strategies once. Called directly from `main`
    /// before the pub/sub subscriber starts, not spawned as a supervised
    /// task — there is nothing to reconnect after a one-shot load.
    pub async fn load(&self, submit: &mpsc::Sender<Delta>) {
        let Some(base) = &self.base_url else {
            info!("no bulk-load endpoint configured, starting with an empty snapshot");
            return;
        };

        match self.load_symbols(base, submit).await {
            Ok(n) => info!(count = n, "bulk-loaded symbol snapshots"),
            Err(err) => {
                self.metrics.adapter_poll_failures.inc();
                warn!(error = %err, "bulk symbol load failed, starting with an empty snapshot");
            }
        }

        match common::fetch_strategies(&self.http, &format!("{base}/strategies"), Duration::from_secs(10)).await {
            Ok(deltas) => {
                for delta in deltas {
                    let _ = submit.send(delta).await;
                }
            }
            Err(err) => {
                self.metrics.adapter_poll_failures.inc();
                warn!(error = %err, "bulk strategy load failed");
            }
        }
    }

    async fn load_symbols(&self, base: &str, submit: &mpsc::Sender<Delta>) -> reqwest::Result<usize> {
        #[derive(serde::Deserialize)]
        struct Wire {
            symbol: String,
            #[serde(flatten)]
            snapshot: SymbolSnapshot,
        }

        let wires: Vec<Wire> = self
            .http
            .get(format!("{base}/symbols"))
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .json()
            .await?;

        let count = wires.len();
        for wire in wires {
            let _ = submit.send(Delta::MarketData { symbol: wire.symbol, snapshot: wire.snapshot }).await;
        }
        Ok(count)
    }
}
