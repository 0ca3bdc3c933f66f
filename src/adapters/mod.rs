//! Upstream Adapters (C1): subscribe to the pub/sub bus, poll backend
//! services on a fixed interval, and seed the Store once at startup.
//!
//! Every adapter implements [`UpstreamSource`] and is spawned as its own
//! task; a panic or a returned error in one must never stop the others
//! (§4.1). `main` only awaits the one startup-fatal step, the initial
//! pub/sub dial — everything after that runs supervised and unattended.

mod common;
pub mod bulk;
pub mod polling;
pub mod pubsub;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::store::Delta;

#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn run(self: std::sync::Arc<Self>, submit: mpsc::Sender<Delta>, shutdown: CancellationToken);
}

/// Spawns `source.run(...)` and logs (never panics) if the task itself
/// unwinds — a dead adapter task must not take the process down with it.
pub fn spawn<S: UpstreamSource + 'static>(
    source: std::sync::Arc<S>,
    submit: mpsc::Sender<Delta>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        source.run(submit, shutdown).await;
    })
}
