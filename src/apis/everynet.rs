use super::push::{AuthScheme, WebhookDialect, WebhookEvent};
use crate::constants::EVERYNET_KIND;
use crate::error::{BridgeError, Result};
use crate::types::{from_epoch_millis, parse_dev_addr, Payload, RawUplink};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{Number, Value};

/// Everynet core messages: `{type, meta, params}` envelopes.
pub struct EverynetDialect;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    meta: Value,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct UplinkMeta {
    device: String,
    #[serde(default)]
    device_addr: Option<String>,
    /// Seconds since the epoch, fractional.
    time: Number,
}

#[derive(Debug, Deserialize)]
struct UplinkParams {
    counter_up: u32,
    #[serde(flatten)]
    payload: UplinkPayload,
}

/// Tried in order; `payload` wins when both are present.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UplinkPayload {
    Plain { payload: String },
    Encrypted { encrypted_payload: String },
}

impl WebhookDialect for EverynetDialect {
    fn kind(&self) -> &'static str {
        EVERYNET_KIND
    }

    fn auth_scheme(&self) -> AuthScheme {
        AuthScheme::Bearer
    }

    fn parse(&self, body: Value) -> Result<WebhookEvent> {
        let envelope: Envelope = serde_json::from_value(body.clone())
            .map_err(|e| BridgeError::Validation(format!("not an Everynet envelope: {}", e)))?;

        match envelope.kind.as_str() {
            "ping" => Ok(WebhookEvent::Ping),
            "uplink" => {
                let meta: UplinkMeta = serde_json::from_value(envelope.meta)
                    .map_err(|e| BridgeError::Validation(format!("uplink meta: {}", e)))?;
                let params: UplinkParams = serde_json::from_value(envelope.params)
                    .map_err(|e| BridgeError::Validation(format!("uplink params: {}", e)))?;
                to_uplink(meta, params, body).map(WebhookEvent::Uplink)
            }
            other => Ok(WebhookEvent::Ignored(other.to_string())),
        }
    }
}

fn to_uplink(meta: UplinkMeta, params: UplinkParams, origin: Value) -> Result<RawUplink> {
    let seconds = meta
        .time
        .as_f64()
        .ok_or_else(|| BridgeError::Validation(format!("uplink time '{}' is not a number", meta.time)))?;
    let timestamp = from_epoch_millis((seconds * 1000.0).round() as i64)?;

    let payload = match params.payload {
        UplinkPayload::Plain { payload } => Payload::Plain(decode_base64("payload", &payload)?),
        UplinkPayload::Encrypted { encrypted_payload } => {
            Payload::Cipher(decode_base64("encrypted_payload", &encrypted_payload)?)
        }
    };
    let dev_addr = match meta.device_addr.as_deref() {
        Some(addr) if !addr.is_empty() => Some(parse_dev_addr(addr)?),
        _ => None,
    };

    Ok(RawUplink {
        server_timestamp: meta.time.to_string(),
        timestamp,
        sequence: params.counter_up,
        eui: meta.device,
        dev_addr,
        payload,
        origin,
    })
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| BridgeError::Validation(format!("{} is not base64: {}", field, e)))
}
