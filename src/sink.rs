use crate::config::SinkConfig;
use crate::error::Result;
use crate::types::Message;
use async_trait::async_trait;
use std::sync::Arc;

pub mod http;
pub mod ndjson;

pub use http::HttpSink;
pub use ndjson::NdjsonSink;

/// Downstream publish target. Delivery is at-least-once, so implementations
/// must tolerate seeing the same message id more than once.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn publish(&self, msg: &Message) -> Result<()>;
}

/// Builds the sink a `[sink]` table describes.
pub fn create_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    match config {
        SinkConfig::Http { url, bearer } => Ok(Arc::new(HttpSink::new(url.clone(), bearer.clone())?)),
        SinkConfig::Ndjson { dir } => Ok(Arc::new(NdjsonSink::new(dir))),
    }
}
