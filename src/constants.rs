//! Operator dialect names as they appear in the `kind` field of a `[[networks]]` entry.
//! Each dialect fixes the adapter strategy (pull or push) used for that network.

// Pull (cursor-poll) dialects
pub const WANESY_KIND: &str = "wanesy";

// Push (webhook) dialects
pub const EVERYNET_KIND: &str = "everynet";
pub const LORIOT_KIND: &str = "loriot";

/// Get all supported operator dialects
pub fn get_supported_kinds() -> Vec<&'static str> {
    vec![WANESY_KIND, EVERYNET_KIND, LORIOT_KIND]
}

// Polling defaults
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_SPAN_DAYS: i64 = 30;
pub const MAX_SPAN_DAYS_LIMIT: i64 = 3650;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
/// Cursor used when a pull adapter has never persisted a checkpoint.
pub const DEFAULT_EPOCH: &str = "2020-01-01T00:00:00Z";

// Delivery defaults
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Checkpoint key for a pull adapter instance; scoped per network so two
/// pollers never share a cursor.
pub fn checkpoint_key(network: &str) -> String {
    format!("pull:{}:cursor", network)
}
