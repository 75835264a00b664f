use crate::error::Result;
use crate::sink::Sink;
use crate::storage::Storage;
use crate::types::Message;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Dedups incoming messages against storage, persists them to the outbox and
/// delivers them to the sink with at-least-once semantics.
///
/// Flush requests set a single-slot flag (a `Notify` permit) that one worker
/// task drains, so any number of requests made while a pass runs collapse into
/// one follow-up pass. Passes themselves run under `pass_lock` and never overlap.
pub struct QueueManager {
    storage: Arc<dyn Storage>,
    sink: RwLock<Option<Arc<dyn Sink>>>,
    wake: Notify,
    pass_lock: Mutex<()>,
    retry_delay: Duration,
    span: Span,
}

impl QueueManager {
    pub fn new(storage: Arc<dyn Storage>, retry_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            storage,
            sink: RwLock::new(None),
            wake: Notify::new(),
            pass_lock: Mutex::new(()),
            retry_delay,
            span: tracing::info_span!("queue"),
        })
    }

    /// Accepts a normalized message. Returns `false` if its id was already seen.
    pub async fn push(&self, msg: Message) -> Result<bool> {
        self.admit(msg).instrument(self.span.clone()).await
    }

    async fn admit(&self, msg: Message) -> Result<bool> {
        if self.storage.is_seen(&msg.id).await? {
            debug!("Duplicate message {} suppressed", msg.id);
            ::metrics::counter!("bridge_messages_duplicate_total").increment(1);
            return Ok(false);
        }
        // admit re-checks inside its transaction; two concurrent pushes of the same id cannot both win
        if !self.storage.admit(&msg).await? {
            debug!("Duplicate message {} suppressed", msg.id);
            ::metrics::counter!("bridge_messages_duplicate_total").increment(1);
            return Ok(false);
        }
        debug!("Queued message {}", msg.id);
        ::metrics::counter!("bridge_messages_admitted_total").increment(1);
        self.flush();
        Ok(true)
    }

    /// Installs or replaces the delivery sink and requests a flush.
    pub fn set_sink(&self, sink: Arc<dyn Sink>) {
        match self.sink.write() {
            Ok(mut slot) => *slot = Some(sink),
            Err(poisoned) => *poisoned.into_inner() = Some(sink),
        }
        self.span.in_scope(|| info!("Sink installed"));
        self.flush();
    }

    /// Requests a flush pass.
    pub fn flush(&self) {
        self.wake.notify_one();
    }

    fn current_sink(&self) -> Option<Arc<dyn Sink>> {
        match self.sink.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Runs one pass now, serialized with the worker's passes.
    pub async fn flush_now(&self) -> Result<FlushReport> {
        self.pass().instrument(self.span.clone()).await
    }

    async fn pass(&self) -> Result<FlushReport> {
        let _pass = self.pass_lock.lock().await;
        let Some(sink) = self.current_sink() else {
            debug!("No sink installed; flush skipped");
            return Ok(FlushReport::default());
        };

        let queued = self.storage.list_queued().await?;
        let mut report = FlushReport::default();
        for msg in queued {
            match sink.publish(&msg).await {
                Ok(()) => {
                    self.storage.dequeue(&msg.id).await?;
                    report.delivered += 1;
                    ::metrics::counter!("bridge_sink_delivered_total").increment(1);
                }
                Err(e) => {
                    warn!("Delivery of {} failed: {}", msg.id, e);
                    report.failed += 1;
                    ::metrics::counter!("bridge_sink_failed_total").increment(1);
                }
            }
        }
        if report.delivered + report.failed > 0 {
            info!(
                "Flush pass delivered {} message(s), {} left for retry",
                report.delivered, report.failed
            );
        }
        Ok(report)
    }

    /// Spawns the flush worker. It runs one pass at startup so messages left in
    /// the outbox by a previous process are retried.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        manager.flush();
        tokio::spawn(async move { manager.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut retry_at: Option<Instant> = None;
        loop {
            match retry_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.wake.notified().await,
            }

            retry_at = match self.flush_now().await {
                Ok(report) if report.failed == 0 => None,
                Ok(report) => {
                    self.span.in_scope(|| {
                        debug!(
                            "{} message(s) undelivered; retrying in {:?}",
                            report.failed, self.retry_delay
                        )
                    });
                    Some(Instant::now() + self.retry_delay)
                }
                Err(e) => {
                    self.span.in_scope(|| error!("Flush pass aborted: {}", e));
                    Some(Instant::now() + self.retry_delay)
                }
            };
        }
    }
}
