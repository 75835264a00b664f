use super::pull::{OperatorApi, Window};
use crate::constants::WANESY_KIND;
use crate::error::{BridgeError, Result};
use crate::types::{from_epoch_millis, parse_dev_addr, Payload, RawUplink};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

/// Kerlink Wanesy management center REST API.
pub struct WanesyApi {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct DataUpPage {
    #[serde(default)]
    list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataUpRecord {
    end_device: EndDevice,
    dev_addr: Option<String>,
    recv_time: i64,
    f_cnt_up: u32,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    encrypted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndDevice {
    dev_eui: String,
}

impl WanesyApi {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BridgeError::RemoteApi {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl OperatorApi for WanesyApi {
    fn kind(&self) -> &'static str {
        WANESY_KIND
    }

    #[instrument(skip(self))]
    async fn login(&self) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/application/login", self.base_url))
            .json(&json!({"login": self.username, "password": self.password}))
            .send()
            .await?;
        let body: LoginResponse = check_status(response).await?.json().await?;
        Ok(body.token)
    }

    #[instrument(skip(self, token))]
    async fn fetch_page(
        &self,
        token: &str,
        window: Window,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(format!("{}/application/dataUp", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("fromDate", window.from.timestamp_millis().to_string()),
                ("toDate", window.to.timestamp_millis().to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let page: DataUpPage = check_status(response).await?.json().await?;
        debug!("Fetched {} record(s)", page.list.len());
        Ok(page.list)
    }

    fn to_uplink(&self, record: Value) -> Result<RawUplink> {
        record_to_uplink(record)
    }
}

/// Maps one `dataUp` record. The record itself is kept as the message origin.
pub fn record_to_uplink(record: Value) -> Result<RawUplink> {
    let parsed: DataUpRecord = serde_json::from_value(record.clone())
        .map_err(|e| BridgeError::Validation(format!("dataUp record: {}", e)))?;

    let bytes = match parsed.payload.as_deref() {
        Some(hex_payload) => hex::decode(hex_payload)
            .map_err(|e| BridgeError::Validation(format!("dataUp payload is not hex: {}", e)))?,
        None => Vec::new(),
    };
    let payload = if parsed.encrypted {
        Payload::Cipher(bytes)
    } else {
        Payload::Plain(bytes)
    };
    let dev_addr = match parsed.dev_addr.as_deref() {
        Some(addr) if !addr.is_empty() => Some(parse_dev_addr(addr)?),
        _ => None,
    };

    Ok(RawUplink {
        server_timestamp: parsed.recv_time.to_string(),
        timestamp: from_epoch_millis(parsed.recv_time)?,
        sequence: parsed.f_cnt_up,
        eui: parsed.end_device.dev_eui,
        dev_addr,
        payload,
        origin: record,
    })
}
