use super::push::{AuthScheme, WebhookDialect, WebhookEvent};
use crate::constants::LORIOT_KIND;
use crate::error::{BridgeError, Result};
use crate::types::{from_epoch_millis, parse_dev_addr, Payload, RawUplink};
use serde::Deserialize;
use serde_json::Value;

/// Loriot application-output frames: flat objects keyed by `cmd`.
pub struct LoriotDialect;

const IGNORED_COMMANDS: &[&str] = &["gw", "tx", "txd"];

#[derive(Debug, Deserialize)]
struct Frame {
    cmd: String,
}

#[derive(Debug, Deserialize)]
struct RxFrame {
    #[serde(rename = "EUI")]
    eui: String,
    ts: i64,
    fcnt: u32,
    #[serde(default)]
    devaddr: Option<String>,
    #[serde(flatten)]
    payload: RxPayload,
}

/// Tried in order; a frame carrying both fields is read as plaintext.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RxPayload {
    Plain { data: String },
    Cipher { encdata: String },
}

impl WebhookDialect for LoriotDialect {
    fn kind(&self) -> &'static str {
        LORIOT_KIND
    }

    fn auth_scheme(&self) -> AuthScheme {
        AuthScheme::Exact
    }

    fn parse(&self, body: Value) -> Result<WebhookEvent> {
        let frame: Frame = serde_json::from_value(body.clone())
            .map_err(|e| BridgeError::Validation(format!("not a Loriot frame: {}", e)))?;

        match frame.cmd.as_str() {
            "ping" => Ok(WebhookEvent::Ping),
            "rx" => {
                let rx: RxFrame = serde_json::from_value(body.clone())
                    .map_err(|e| BridgeError::Validation(format!("rx frame: {}", e)))?;
                rx_to_uplink(rx, body).map(WebhookEvent::Uplink)
            }
            cmd if IGNORED_COMMANDS.contains(&cmd) => Ok(WebhookEvent::Ignored(cmd.to_string())),
            other => Err(BridgeError::Validation(format!("unknown Loriot command '{}'", other))),
        }
    }
}

fn rx_to_uplink(rx: RxFrame, origin: Value) -> Result<RawUplink> {
    let payload = match rx.payload {
        RxPayload::Plain { data } => Payload::Plain(decode_hex("data", &data)?),
        RxPayload::Cipher { encdata } => Payload::Cipher(decode_hex("encdata", &encdata)?),
    };
    let dev_addr = rx.devaddr.as_deref().map(parse_dev_addr).transpose()?;
    Ok(RawUplink {
        server_timestamp: rx.ts.to_string(),
        timestamp: from_epoch_millis(rx.ts)?,
        sequence: rx.fcnt,
        eui: rx.eui,
        dev_addr,
        payload,
        origin,
    })
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| BridgeError::Validation(format!("{} is not hex: {}", field, e)))
}
