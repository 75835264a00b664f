use super::{NetworkAdapter, Normalizer, Receipt, Strategy, WebhookError};
use crate::config::WebhookConfig;
use crate::error::{BridgeError, Result};
use crate::pipeline::QueueManager;
use crate::types::RawUplink;
use async_trait::async_trait;
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

/// How the shared secret is presented in the auth header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Header value equals the secret.
    Exact,
    /// Header value is `Bearer <secret>`.
    Bearer,
}

/// A webhook body after dialect parsing.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Ping,
    /// A known event type carrying no uplink.
    Ignored(String),
    Uplink(RawUplink),
}

/// Operator-specific webhook parsing behind a [`PushAdapter`].
pub trait WebhookDialect: Send + Sync {
    fn kind(&self) -> &'static str;

    fn auth_scheme(&self) -> AuthScheme;

    /// Parses a JSON body. Unrecognized shapes are `BridgeError::Validation`.
    fn parse(&self, body: Value) -> Result<WebhookEvent>;
}

/// Receives one network's webhooks.
pub struct PushAdapter {
    dialect: Box<dyn WebhookDialect>,
    path: String,
    header: HeaderName,
    secret: String,
    normalizer: Normalizer,
    queue: Arc<QueueManager>,
    span: Span,
}

impl PushAdapter {
    pub fn new(
        dialect: Box<dyn WebhookDialect>,
        config: &WebhookConfig,
        normalizer: Normalizer,
        queue: Arc<QueueManager>,
    ) -> Result<Self> {
        let header = match config.header.as_deref() {
            Some(name) => HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                BridgeError::Config(format!("{}: auth header '{}': {}", config.name, name, e))
            })?,
            None => AUTHORIZATION,
        };
        let span = tracing::info_span!("push", network = %config.name, kind = dialect.kind());
        Ok(Self {
            dialect,
            path: config.path().to_string(),
            header,
            secret: config.secret.clone(),
            normalizer,
            queue,
            span,
        })
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(&self.header).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        match self.dialect.auth_scheme() {
            AuthScheme::Exact => value == self.secret,
            AuthScheme::Bearer => value
                .strip_prefix("Bearer ")
                .map_or(false, |token| token == self.secret),
        }
    }

    async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> std::result::Result<Receipt, WebhookError> {
        if !self.authorized(headers) {
            warn!("Rejected webhook with missing or wrong secret");
            ::metrics::counter!("bridge_webhook_rejected_total").increment(1);
            return Err(WebhookError::Unauthorized);
        }

        let body: Value = serde_json::from_slice(body)
            .map_err(|e| WebhookError::Invalid(format!("body is not JSON: {}", e)))?;
        let event = self.dialect.parse(body).map_err(invalid)?;

        match event {
            WebhookEvent::Ping => {
                debug!("Liveness ping");
                Ok(Receipt::Ping)
            }
            WebhookEvent::Ignored(kind) => {
                debug!("Ignoring '{}' event", kind);
                Ok(Receipt::Ignored(kind))
            }
            WebhookEvent::Uplink(raw) => {
                let msg = self.normalizer.normalize(raw).map_err(invalid)?;
                let id = msg.id.clone();
                let queued = self
                    .queue
                    .push(msg)
                    .await
                    .map_err(|e| WebhookError::Internal(e.to_string()))?;
                if queued {
                    info!("Accepted uplink {}", id);
                }
                Ok(Receipt::Accepted { id, queued })
            }
        }
    }
}

fn invalid(e: BridgeError) -> WebhookError {
    match e {
        BridgeError::Validation(reason) => WebhookError::Invalid(reason),
        other => WebhookError::Invalid(other.to_string()),
    }
}

#[async_trait]
impl NetworkAdapter for PushAdapter {
    fn network(&self) -> &str {
        self.normalizer.network()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Push
    }

    fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        None
    }

    fn webhook_path(&self) -> Option<&str> {
        Some(&self.path)
    }

    async fn receive(&self, headers: &HeaderMap, body: &[u8]) -> std::result::Result<Receipt, WebhookError> {
        self.handle(headers, body).instrument(self.span.clone()).await
    }
}
