use crate::error::{BridgeError, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static EUI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{16}$").expect("valid EUI regex"));

/// Canonical uplink shape published to the sink, whatever operator it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// `{network}:{serverTimestamp}:{sequenceNumber}`
    pub id: String,
    pub eui: String,
    /// Network-assigned event time, RFC 3339.
    pub timestamp: String,
    /// Ingestion time, RFC 3339.
    pub received: String,
    /// Payload bytes, base64 (standard alphabet, padded).
    pub data: String,
    /// True only when the payload is ciphertext we had no key for.
    pub encrypted: bool,
    /// Verbatim operator record.
    pub origin: serde_json::Value,
}

impl Message {
    pub fn make_id(network: &str, server_timestamp: &str, sequence: u32) -> String {
        format!("{}:{}:{}", network, server_timestamp, sequence)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(BridgeError::Validation("message id is empty".into()));
        }
        if !is_valid_eui(&self.eui) {
            return Err(BridgeError::Validation(format!(
                "device EUI '{}' is not 16 hex digits",
                self.eui
            )));
        }
        Ok(())
    }
}

/// Lower-cases and checks a device EUI. Separators (`-`, `:`) some operators emit are dropped.
pub fn normalize_eui(raw: &str) -> Result<String> {
    let eui: String = raw
        .chars()
        .filter(|c| *c != '-' && *c != ':')
        .collect::<String>()
        .to_ascii_lowercase();
    if is_valid_eui(&eui) {
        Ok(eui)
    } else {
        Err(BridgeError::Validation(format!(
            "device EUI '{}' is not 16 hex digits",
            raw
        )))
    }
}

pub fn is_valid_eui(eui: &str) -> bool {
    EUI_PATTERN.is_match(eui)
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Application payload as an operator delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Plain(Vec<u8>),
    Cipher(Vec<u8>),
}

/// Operator record reduced to the fields normalization needs.
/// Built by each dialect; turned into a [`Message`] by the shared normalizer.
#[derive(Debug, Clone)]
pub struct RawUplink {
    /// The record's own timestamp token, used verbatim in the message id.
    pub server_timestamp: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u32,
    pub eui: String,
    pub dev_addr: Option<[u8; 4]>,
    pub payload: Payload,
    pub origin: serde_json::Value,
}

/// Parses an operator device address printed as 8 hex digits (big-endian).
pub fn parse_dev_addr(raw: &str) -> Result<[u8; 4]> {
    let bytes = hex::decode(raw.trim())
        .map_err(|e| BridgeError::Validation(format!("device address '{}': {}", raw, e)))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::Validation(format!("device address '{}' is not 4 bytes", raw)))
}

/// Converts an operator millisecond epoch into UTC.
pub fn from_epoch_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BridgeError::Validation(format!("timestamp {} out of range", ms)))
}
