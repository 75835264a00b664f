use super::Sink;
use crate::error::{BridgeError, Result};
use crate::types::Message;
use async_trait::async_trait;
use std::time::Duration;

/// Publishes each message as a JSON POST.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            bearer,
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn publish(&self, msg: &Message) -> Result<()> {
        let mut req = self.client.post(&self.url).json(msg);
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| BridgeError::Sink(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BridgeError::Sink(format!(
                "{} answered {} for {}",
                self.url, status, msg.id
            )));
        }
        Ok(())
    }
}
