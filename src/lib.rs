pub mod apis;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod sink;
pub mod storage;
pub mod types;
