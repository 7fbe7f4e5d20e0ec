// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod protocol;
pub mod timestamp;
pub mod tracking;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::engine::{Clock, FeedEngine, StatusReport, SystemClock};
pub use crate::protocol::{InstanceConfig, Notification, OutboundUpdate};
