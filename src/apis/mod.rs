pub mod everynet;
pub mod factory;
pub mod loriot;
pub mod normalize;
pub mod pull;
pub mod push;
pub mod wanesy;

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use factory::{create_adapter, create_adapters, create_dialect, AdapterContext};
pub use normalize::Normalizer;
pub use pull::{OperatorApi, PullAdapter, PullSettings, TickReport, Window};
pub use push::{AuthScheme, PushAdapter, WebhookDialect, WebhookEvent};

/// How an adapter obtains uplinks from its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Periodically polls the operator's REST API.
    Pull,
    /// Receives operator webhooks.
    Push,
}

/// What a webhook delivery amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    Ping,
    Ignored(String),
    Accepted { id: String, queued: bool },
}

/// Webhook failures, each mapped to one HTTP status by the server.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no webhook is configured at this path")]
    NotFound,
    #[error("missing or invalid shared secret")]
    Unauthorized,
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Internal(String),
}

/// One configured operator network.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    fn network(&self) -> &str;

    fn strategy(&self) -> Strategy;

    /// Spawns the adapter's background loop, if it has one.
    fn start(self: Arc<Self>) -> Option<JoinHandle<()>>;

    /// Path segment the adapter receives webhooks on.
    fn webhook_path(&self) -> Option<&str> {
        None
    }

    async fn receive(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<Receipt, WebhookError> {
        Err(WebhookError::NotFound)
    }
}
