use crate::constants;
use crate::crypto::{DeviceKeys, KeyStore};
use crate::error::{BridgeError, Result};
use crate::storage::StorageDescriptor;
use crate::types::normalize_eui;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "bridge.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    pub sink: SinkConfig,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_storage() -> String {
    "sqlite://data/bridge.db".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_retry_delay_secs() -> u64 {
    constants::DEFAULT_RETRY_DELAY_SECS
}

fn default_log_dir() -> String {
    "logs".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Http { url: String, bearer: Option<String> },
    Ndjson { dir: String },
}

/// One configured operator network. The `kind` picks the dialect, and with it the strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkConfig {
    Wanesy(PollConfig),
    Everynet(WebhookConfig),
    Loriot(WebhookConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    pub name: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub interval_secs: Option<u64>,
    pub max_span_days: Option<i64>,
    pub page_size: Option<usize>,
    /// RFC 3339 cursor to start from when no checkpoint exists yet.
    pub start: Option<String>,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            self.interval_secs
                .unwrap_or(constants::DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    /// URL path segment; defaults to the network name.
    pub path: Option<String>,
    pub secret: String,
    /// Header carrying the secret; defaults to `Authorization`.
    pub header: Option<String>,
}

impl WebhookConfig {
    pub fn path(&self) -> &str {
        self.path
            .as_deref()
            .unwrap_or(&self.name)
            .trim_matches('/')
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub eui: String,
    pub dev_addr: Option<String>,
    pub app_skey: String,
}

impl NetworkConfig {
    pub fn name(&self) -> &str {
        match self {
            NetworkConfig::Wanesy(c) => &c.name,
            NetworkConfig::Everynet(c) | NetworkConfig::Loriot(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NetworkConfig::Wanesy(_) => constants::WANESY_KIND,
            NetworkConfig::Everynet(_) => constants::EVERYNET_KIND,
            NetworkConfig::Loriot(_) => constants::LORIOT_KIND,
        }
    }

    pub fn webhook(&self) -> Option<&WebhookConfig> {
        match self {
            NetworkConfig::Wanesy(_) => None,
            NetworkConfig::Everynet(c) | NetworkConfig::Loriot(c) => Some(c),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        StorageDescriptor::parse(&self.storage)?;
        if self.retry_delay_secs == 0 {
            return Err(BridgeError::Config("retry_delay_secs must be at least 1".into()));
        }
        self.listen.parse::<std::net::SocketAddr>().map_err(|e| {
            BridgeError::Config(format!("listen address '{}': {}", self.listen, e))
        })?;

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for network in &self.networks {
            let name = network.name();
            if name.trim().is_empty() {
                return Err(BridgeError::Config("network with empty name".into()));
            }
            if name.contains(':') {
                return Err(BridgeError::Config(format!(
                    "network name '{}' must not contain ':' (it prefixes message ids)",
                    name
                )));
            }
            if !names.insert(name.to_string()) {
                return Err(BridgeError::Config(format!("duplicate network name '{}'", name)));
            }
            match network {
                NetworkConfig::Wanesy(poll) => {
                    if let Some(start) = &poll.start {
                        chrono::DateTime::parse_from_rfc3339(start).map_err(|e| {
                            BridgeError::Config(format!("{}: start '{}': {}", name, start, e))
                        })?;
                    }
                    if let Some(days) = poll.max_span_days {
                        if !(1..=constants::MAX_SPAN_DAYS_LIMIT).contains(&days) {
                            return Err(BridgeError::Config(format!(
                                "{}: max_span_days must be between 1 and {}, got {}",
                                name,
                                constants::MAX_SPAN_DAYS_LIMIT,
                                days
                            )));
                        }
                    }
                    if poll.page_size == Some(0) {
                        return Err(BridgeError::Config(format!("{}: page_size must be positive", name)));
                    }
                }
                NetworkConfig::Everynet(hook) | NetworkConfig::Loriot(hook) => {
                    let path = hook.path();
                    if path.is_empty() || path.contains('/') || path == "health" {
                        return Err(BridgeError::Config(format!(
                            "{}: webhook path '{}' must be a single segment other than 'health'",
                            name, path
                        )));
                    }
                    if !paths.insert(path.to_string()) {
                        return Err(BridgeError::Config(format!("duplicate webhook path '{}'", path)));
                    }
                    if hook.secret.is_empty() {
                        return Err(BridgeError::Config(format!("{}: webhook secret is empty", name)));
                    }
                }
            }
        }
        self.key_store()?;
        Ok(())
    }

    pub fn key_store(&self) -> Result<KeyStore> {
        let mut keys = KeyStore::new();
        for device in &self.devices {
            let eui = normalize_eui(&device.eui)
                .map_err(|e| BridgeError::Config(format!("device '{}': {}", device.eui, e)))?;
            let material = DeviceKeys::from_hex(device.dev_addr.as_deref(), &device.app_skey)
                .map_err(|e| BridgeError::Config(format!("device '{}': {}", device.eui, e)))?;
            keys.insert(&eui, material);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        storage = "sqlite://data/test.db"
        listen = "127.0.0.1:9000"

        [sink]
        kind = "http"
        url = "https://bus.example/ingest"

        [[networks]]
        kind = "wanesy"
        name = "kerlink-fr"
        base_url = "https://wmc.example/gms"
        username = "bridge"
        password = "pw"
        max_span_days = 30

        [[networks]]
        kind = "loriot"
        name = "loriot-eu"
        secret = "s3cret"

        [[networks]]
        kind = "everynet"
        name = "everynet-br"
        path = "/evn/"
        secret = "tok"

        [[devices]]
        eui = "70-B3-D5-7E-D0-00-12-34"
        dev_addr = "26011BDA"
        app_skey = "2B7E151628AED2A6ABF7158809CF4F3C"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.networks.len(), 3);
        assert_eq!(config.retry_delay_secs, 5);
        assert_eq!(config.networks[0].kind(), "wanesy");
        assert_eq!(config.networks[2].webhook().unwrap().path(), "evn");
        assert_eq!(config.networks[1].webhook().unwrap().path(), "loriot-eu");
        let keys = config.key_store().unwrap();
        assert!(keys.get("70b3d57ed0001234").is_some());
        match &config.sink {
            SinkConfig::Http { url, bearer } => {
                assert_eq!(url, "https://bus.example/ingest");
                assert!(bearer.is_none());
            }
            other => panic!("unexpected sink {:?}", other),
        }
    }

    #[test]
    fn test_example_config_loads() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/bridge.example.toml")).unwrap();
        assert_eq!(config.networks.len(), 3);
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let dup = r#"
            [sink]
            kind = "ndjson"
            dir = "out"

            [[networks]]
            kind = "loriot"
            name = "a"
            secret = "x"

            [[networks]]
            kind = "everynet"
            name = "a"
            path = "b"
            secret = "y"
        "#;
        assert!(Config::from_toml_str(dup).is_err());
    }

    #[test]
    fn test_rejects_bad_device_key() {
        let bad = r#"
            [sink]
            kind = "ndjson"
            dir = "out"

            [[devices]]
            eui = "70b3d57ed0001234"
            app_skey = "abcd"
        "#;
        assert!(Config::from_toml_str(bad).is_err());
    }

    #[test]
    fn test_rejects_unknown_storage_scheme() {
        let bad = r#"
            storage = "mysql://db"
            [sink]
            kind = "ndjson"
            dir = "out"
        "#;
        assert!(matches!(Config::from_toml_str(bad), Err(BridgeError::Config(_))));
    }

    fn poller_with(top: &str, poll: &str) -> String {
        format!(
            r#"
            {top}
            [sink]
            kind = "ndjson"
            dir = "out"

            [[networks]]
            kind = "wanesy"
            name = "kerlink-fr"
            base_url = "https://wmc.example/gms"
            username = "bridge"
            password = "pw"
            {poll}
            "#
        )
    }

    #[test]
    fn test_rejects_out_of_range_max_span() {
        for span in ["max_span_days = 0", "max_span_days = -1", "max_span_days = 1000000000"] {
            let result = Config::from_toml_str(&poller_with("", span));
            assert!(matches!(result, Err(BridgeError::Config(_))), "{} accepted", span);
        }
        let config = Config::from_toml_str(&poller_with("", "max_span_days = 3650")).unwrap();
        assert_eq!(config.networks.len(), 1);
    }

    #[test]
    fn test_rejects_zero_retry_delay() {
        let result = Config::from_toml_str(&poller_with("retry_delay_secs = 0", ""));
        assert!(matches!(result, Err(BridgeError::Config(_))));
        let config = Config::from_toml_str(&poller_with("retry_delay_secs = 2", "")).unwrap();
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
    }
}
