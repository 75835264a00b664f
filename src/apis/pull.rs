use super::{NetworkAdapter, Normalizer, Strategy};
use crate::config::PollConfig;
use crate::constants;
use crate::error::{BridgeError, Result};
use crate::pipeline::QueueManager;
use crate::storage::Storage;
use crate::types::{to_iso, RawUplink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Half-open `[from, to)` span of operator time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    /// Splits the window into consecutive sub-windows no longer than `max_span`.
    /// A non-positive span, or one that overflows the calendar, yields the whole window.
    pub fn split(&self, max_span: chrono::Duration) -> Vec<Window> {
        let mut windows = Vec::new();
        let mut start = self.from;
        while start < self.to {
            let end = match start.checked_add_signed(max_span) {
                Some(end) if end > start => end.min(self.to),
                _ => self.to,
            };
            windows.push(Window { from: start, to: end });
            start = end;
        }
        windows
    }
}

/// Operator-specific REST calls and record mapping behind a [`PullAdapter`].
#[async_trait]
pub trait OperatorApi: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Opens a session and returns its token.
    async fn login(&self) -> Result<String>;

    /// Fetches one page of records. An expired session must surface as
    /// `BridgeError::RemoteApi { status: 401, .. }`.
    async fn fetch_page(
        &self,
        token: &str,
        window: Window,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>>;

    fn to_uplink(&self, record: Value) -> Result<RawUplink>;
}

#[derive(Debug, Clone)]
pub struct PullSettings {
    pub interval: Duration,
    pub max_span: chrono::Duration,
    pub page_size: usize,
    /// Cursor used until a checkpoint has been persisted.
    pub start: DateTime<Utc>,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(constants::DEFAULT_POLL_INTERVAL_SECS),
            max_span: chrono::Duration::days(constants::DEFAULT_MAX_SPAN_DAYS),
            page_size: constants::DEFAULT_PAGE_SIZE,
            start: default_epoch(),
        }
    }
}

impl PullSettings {
    pub fn from_config(config: &PollConfig) -> Result<Self> {
        let start = match &config.start {
            Some(raw) => parse_cursor(raw)?,
            None => default_epoch(),
        };
        Ok(Self {
            interval: config.interval(),
            max_span: chrono::Duration::days(
                config
                    .max_span_days
                    .unwrap_or(constants::DEFAULT_MAX_SPAN_DAYS)
                    .clamp(1, constants::MAX_SPAN_DAYS_LIMIT),
            ),
            page_size: config.page_size.unwrap_or(constants::DEFAULT_PAGE_SIZE),
            start,
        })
    }
}

fn default_epoch() -> DateTime<Utc> {
    parse_cursor(constants::DEFAULT_EPOCH).unwrap_or_default()
}

fn parse_cursor(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BridgeError::Validation(format!("cursor '{}': {}", raw, e)))
}

/// Counts for one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub windows: usize,
    pub requests: usize,
    pub records: usize,
    pub admitted: usize,
}

/// Polls an operator API on a timer, walking from the persisted checkpoint to now.
pub struct PullAdapter<A> {
    api: A,
    settings: PullSettings,
    normalizer: Normalizer,
    storage: Arc<dyn Storage>,
    queue: Arc<QueueManager>,
    token: Mutex<Option<String>>,
    checkpoint_key: String,
    span: Span,
}

impl<A: OperatorApi> PullAdapter<A> {
    pub fn new(
        api: A,
        settings: PullSettings,
        normalizer: Normalizer,
        storage: Arc<dyn Storage>,
        queue: Arc<QueueManager>,
    ) -> Self {
        let network = normalizer.network().to_string();
        let span = tracing::info_span!("pull", network = %network, kind = api.kind());
        Self {
            api,
            settings,
            normalizer,
            storage,
            queue,
            token: Mutex::new(None),
            checkpoint_key: constants::checkpoint_key(&network),
            span,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn checkpoint_key(&self) -> &str {
        &self.checkpoint_key
    }

    /// Runs one poll over `[checkpoint, now)`. The checkpoint moves to `now`
    /// only once every fetched record has been handed to the queue.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.poll(now).instrument(self.span.clone()).await
    }

    async fn poll(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let from = self.cursor().await?;
        let mut report = TickReport::default();
        if from >= now {
            debug!("Checkpoint {} is not behind {}; nothing to poll", to_iso(from), to_iso(now));
            return Ok(report);
        }

        for window in (Window { from, to: now }).split(self.settings.max_span) {
            report.windows += 1;
            let mut offset = 0;
            loop {
                let page = self.fetch_page(window, offset).await?;
                report.requests += 1;
                if page.is_empty() {
                    break;
                }
                offset += page.len();
                for record in page {
                    let raw = self.api.to_uplink(record)?;
                    let msg = self.normalizer.normalize(raw)?;
                    report.records += 1;
                    if self.queue.push(msg).await? {
                        report.admitted += 1;
                    }
                }
            }
        }

        self.storage
            .set_checkpoint(&self.checkpoint_key, &to_iso(now))
            .await?;
        info!(
            "Polled {} record(s) ({} new) over {} window(s) in {} request(s)",
            report.records, report.admitted, report.windows, report.requests
        );
        Ok(report)
    }

    async fn cursor(&self) -> Result<DateTime<Utc>> {
        match self.storage.get_checkpoint(&self.checkpoint_key).await? {
            Some(raw) => match parse_cursor(&raw) {
                Ok(cursor) => Ok(cursor),
                Err(e) => {
                    warn!("Ignoring unreadable checkpoint: {}", e);
                    Ok(self.settings.start)
                }
            },
            None => Ok(self.settings.start),
        }
    }

    async fn session(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }
        let fresh = self.api.login().await?;
        debug!("Logged in");
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    async fn relogin(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        *token = None;
        let fresh = self.api.login().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Fetches a page, logging in again once if the session was rejected.
    async fn fetch_page(&self, window: Window, offset: usize) -> Result<Vec<Value>> {
        ::metrics::counter!("bridge_poll_requests_total").increment(1);
        let token = self.session().await?;
        match self
            .api
            .fetch_page(&token, window, offset, self.settings.page_size)
            .await
        {
            Err(e) if e.is_unauthenticated() => {
                warn!("Session rejected; logging in again");
                let token = self.relogin().await?;
                ::metrics::counter!("bridge_poll_requests_total").increment(1);
                self.api
                    .fetch_page(&token, window, offset, self.settings.page_size)
                    .await
            }
            other => other,
        }
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                ::metrics::counter!("bridge_poll_errors_total").increment(1);
                self.span
                    .in_scope(|| error!("Poll failed, checkpoint kept: {}", e));
            }
        }
    }
}

#[async_trait]
impl<A: OperatorApi + 'static> NetworkAdapter for PullAdapter<A> {
    fn network(&self) -> &str {
        self.normalizer.network()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Pull
    }

    fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        Some(tokio::spawn(self.run()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::wanesy;
    use crate::crypto::KeyStore;
    use crate::storage::InMemoryStorage;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_split_respects_max_span() {
        let w = Window {
            from: ts(1, 0),
            to: ts(1, 0) + chrono::Duration::days(95),
        };
        let parts = w.split(chrono::Duration::days(30));
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].from, w.from);
        assert_eq!(parts[3].to, w.to);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        assert_eq!(parts[3].to - parts[3].from, chrono::Duration::days(5));
    }

    #[test]
    fn test_split_degenerate_span_yields_whole_window() {
        let w = Window {
            from: ts(1, 0),
            to: ts(4, 0),
        };
        for span in [
            chrono::Duration::days(-1),
            chrono::Duration::zero(),
            chrono::Duration::days(100_000_000),
        ] {
            assert_eq!(w.split(span), vec![w]);
        }
    }

    #[test]
    fn test_split_empty_window() {
        let w = Window { from: ts(2, 0), to: ts(2, 0) };
        assert!(w.split(chrono::Duration::days(30)).is_empty());
    }

    /// Serves one record per window and rejects the first `expired` page requests with 401.
    struct ExpiringApi {
        logins: AtomicUsize,
        expired: AtomicUsize,
    }

    #[async_trait]
    impl OperatorApi for ExpiringApi {
        fn kind(&self) -> &'static str {
            "fake"
        }

        async fn login(&self) -> Result<String> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{}", n))
        }

        async fn fetch_page(
            &self,
            _token: &str,
            window: Window,
            offset: usize,
            _limit: usize,
        ) -> Result<Vec<Value>> {
            if self
                .expired
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BridgeError::RemoteApi {
                    status: 401,
                    message: "token expired".into(),
                });
            }
            if offset > 0 {
                return Ok(vec![]);
            }
            Ok(vec![json!({
                "endDevice": {"devEui": "70b3d57ed0001234"},
                "recvTime": window.from.timestamp_millis(),
                "fCntUp": 1,
                "payload": "0102",
                "encrypted": false
            })])
        }

        fn to_uplink(&self, record: Value) -> Result<RawUplink> {
            wanesy::record_to_uplink(record)
        }
    }

    fn adapter(expired: usize) -> (PullAdapter<ExpiringApi>, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = QueueManager::new(storage.clone(), Duration::from_secs(1));
        let api = ExpiringApi {
            logins: AtomicUsize::new(0),
            expired: AtomicUsize::new(expired),
        };
        let settings = PullSettings {
            start: ts(1, 0),
            ..PullSettings::default()
        };
        let normalizer = Normalizer::new("wmc", Arc::new(KeyStore::new()));
        (
            PullAdapter::new(api, settings, normalizer, storage.clone(), queue),
            storage,
        )
    }

    #[tokio::test]
    async fn test_relogin_once_on_unauthenticated() {
        let (pull, storage) = adapter(1);
        let report = pull.tick(ts(1, 12)).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(pull.api.logins.load(Ordering::SeqCst), 2);
        assert_eq!(
            storage.get_checkpoint("pull:wmc:cursor").await.unwrap(),
            Some(to_iso(ts(1, 12)))
        );
    }

    #[tokio::test]
    async fn test_repeated_rejection_aborts_tick() {
        let (pull, storage) = adapter(2);
        let err = pull.tick(ts(1, 12)).await.unwrap_err();
        assert!(err.is_unauthenticated());
        assert_eq!(storage.get_checkpoint("pull:wmc:cursor").await.unwrap(), None);

        // next tick recovers with the cached session
        let report = pull.tick(ts(1, 12)).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(pull.api.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_not_behind_now_is_noop() {
        let (pull, storage) = adapter(0);
        storage
            .set_checkpoint("pull:wmc:cursor", &to_iso(ts(2, 0)))
            .await
            .unwrap();
        let report = pull.tick(ts(1, 0)).await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(pull.api.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreadable_checkpoint_falls_back_to_start() {
        let (pull, storage) = adapter(0);
        storage.set_checkpoint("pull:wmc:cursor", "garbage").await.unwrap();
        let report = pull.tick(ts(1, 12)).await.unwrap();
        assert_eq!(report.windows, 1);
        assert_eq!(
            storage.get_checkpoint("pull:wmc:cursor").await.unwrap(),
            Some(to_iso(ts(1, 12)))
        );
    }
}
