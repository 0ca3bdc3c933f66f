//! Error taxonomy.
//!
//! Only the initial pub/sub connect failure and a bad config are allowed to
//! propagate out of `main`. Everything else (decode errors, poll failures,
//! illegal transitions, transport errors) is recorded through `metrics` and
//! `tracing` and handled where it happens.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to connect to pub/sub broker at {url}: {source}")]
    PubSubConnect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type HubResult<T> = Result<T, HubError>;
