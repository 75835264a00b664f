use super::everynet::EverynetDialect;
use super::loriot::LoriotDialect;
use super::pull::{PullAdapter, PullSettings};
use super::push::{PushAdapter, WebhookDialect};
use super::wanesy::WanesyApi;
use super::{NetworkAdapter, Normalizer};
use crate::config::NetworkConfig;
use crate::constants::*;
use crate::crypto::KeyStore;
use crate::error::{BridgeError, Result};
use crate::pipeline::QueueManager;
use crate::storage::Storage;
use std::sync::Arc;

/// Shared handles every adapter is built with.
#[derive(Clone)]
pub struct AdapterContext {
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<QueueManager>,
    pub keys: Arc<KeyStore>,
}

/// Factory function to create the adapter for one configured network
pub fn create_adapter(
    network: &NetworkConfig,
    ctx: &AdapterContext,
) -> Result<Arc<dyn NetworkAdapter>> {
    let normalizer = Normalizer::new(network.name(), ctx.keys.clone());
    match network {
        NetworkConfig::Wanesy(config) => {
            let api = WanesyApi::new(&config.base_url, &config.username, &config.password)?;
            Ok(Arc::new(PullAdapter::new(
                api,
                PullSettings::from_config(config)?,
                normalizer,
                ctx.storage.clone(),
                ctx.queue.clone(),
            )))
        }
        NetworkConfig::Everynet(config) | NetworkConfig::Loriot(config) => {
            let dialect = create_dialect(network.kind()).ok_or_else(|| {
                BridgeError::Config(format!("no webhook dialect for '{}'", network.kind()))
            })?;
            Ok(Arc::new(PushAdapter::new(
                dialect,
                config,
                normalizer,
                ctx.queue.clone(),
            )?))
        }
    }
}

/// Factory function to create webhook dialects directly
pub fn create_dialect(kind: &str) -> Option<Box<dyn WebhookDialect>> {
    match kind {
        EVERYNET_KIND => Some(Box::new(EverynetDialect)),
        LORIOT_KIND => Some(Box::new(LoriotDialect)),
        _ => None,
    }
}

pub fn create_adapters(
    networks: &[NetworkConfig],
    ctx: &AdapterContext,
) -> Result<Vec<Arc<dyn NetworkAdapter>>> {
    networks.iter().map(|n| create_adapter(n, ctx)).collect()
}
