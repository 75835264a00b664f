use crate::crypto::{decrypt_payload, KeyStore};
use crate::error::Result;
use crate::types::{normalize_eui, to_iso, Message, Payload, RawUplink};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Turns dialect-specific uplinks of one network into canonical [`Message`]s.
pub struct Normalizer {
    network: String,
    keys: Arc<KeyStore>,
}

impl Normalizer {
    pub fn new(network: impl Into<String>, keys: Arc<KeyStore>) -> Self {
        Self {
            network: network.into(),
            keys,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn normalize(&self, raw: RawUplink) -> Result<Message> {
        self.normalize_at(raw, Utc::now())
    }

    /// Same as [`normalize`](Self::normalize) with an explicit ingestion time.
    pub fn normalize_at(&self, raw: RawUplink, received: DateTime<Utc>) -> Result<Message> {
        let eui = normalize_eui(&raw.eui)?;
        let id = Message::make_id(&self.network, &raw.server_timestamp, raw.sequence);

        let (bytes, encrypted) = match raw.payload {
            Payload::Plain(bytes) => (bytes, false),
            Payload::Cipher(bytes) => match self.keys.get(&eui) {
                Some(keys) => match raw.dev_addr.or(keys.dev_addr) {
                    Some(addr) => (decrypt_payload(&bytes, &addr, &keys.app_skey, raw.sequence), false),
                    None => {
                        debug!("{}: no device address for {}; payload left encrypted", id, eui);
                        (bytes, true)
                    }
                },
                None => (bytes, true),
            },
        };

        let msg = Message {
            id,
            eui,
            timestamp: to_iso(raw.timestamp),
            received: to_iso(received),
            data: STANDARD.encode(bytes),
            encrypted,
            origin: raw.origin,
        };
        msg.validate()?;
        Ok(msg)
    }
}
