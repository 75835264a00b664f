// Delivery pipeline: dedup, durable outbox and the serialized flush loop

pub mod queue_manager;

pub use queue_manager::{FlushReport, QueueManager};
