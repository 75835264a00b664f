use crate::apis::{create_adapters, AdapterContext, NetworkAdapter, Strategy};
use crate::config::Config;
use crate::pipeline::QueueManager;
use crate::server::{create_server, start_server};
use crate::sink::create_sink;
use crate::storage::{open_storage, Storage};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A wired bridge: storage, queue, sink and one adapter per configured network.
pub struct Bridge {
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<QueueManager>,
    pub adapters: Vec<Arc<dyn NetworkAdapter>>,
    listen: SocketAddr,
}

impl Bridge {
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let storage = open_storage(&config.storage)
            .await
            .with_context(|| format!("opening storage '{}'", config.storage))?;
        let queue = QueueManager::new(storage.clone(), config.retry_delay());
        queue.set_sink(create_sink(&config.sink).context("building sink")?);

        let ctx = AdapterContext {
            storage: storage.clone(),
            queue: queue.clone(),
            keys: Arc::new(config.key_store()?),
        };
        let adapters = create_adapters(&config.networks, &ctx)?;
        let listen = config
            .listen
            .parse()
            .with_context(|| format!("listen address '{}'", config.listen))?;

        Ok(Self {
            storage,
            queue,
            adapters,
            listen,
        })
    }

    /// Starts the flush worker and every pull loop, then serves webhooks until the server stops.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks: Vec<JoinHandle<()>> = vec![self.queue.spawn_worker()];
        for adapter in &self.adapters {
            match adapter.strategy() {
                Strategy::Pull => info!("Starting poller for {}", adapter.network()),
                Strategy::Push => info!(
                    "Accepting webhooks for {} on /{}",
                    adapter.network(),
                    adapter.webhook_path().unwrap_or_default()
                ),
            }
            if let Some(handle) = adapter.clone().start() {
                tasks.push(handle);
            }
        }

        let app = create_server(&self.adapters);
        let result = start_server(app, self.listen).await;
        for task in tasks {
            task.abort();
        }
        result
    }
}
