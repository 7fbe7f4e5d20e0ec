// src/engine.rs
//! # Feed Engine
//! Owns the tracking store and one fetch queue per module instance, and turns
//! inbound notifications into paced fetch cycles.
//!
//! A cycle queues one task per configured feed. Each task fetches, filters the
//! batch against the feed's current boundaries, then commits the new
//! `max_delivered` and emits the delta. Commit and emit read the feed state
//! fresh, so a RESET or CONFIG that lands while a fetch is in flight is
//! respected. A failed fetch commits nothing and sends nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::ingest::scheduler::FetchQueue;
use crate::ingest::types::{CanonicalItem, ContentFetcher};
use crate::ingest::{ensure_metrics_described, normalize};
use crate::notify::UpdateSink;
use crate::protocol::{InstanceConfig, Notification, OutboundUpdate, SourceMetadata};
use crate::tracking::{FeedTrackingState, TrackingStore};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read-only dump returned for STATUS.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub instance_id: String,
    pub config: InstanceConfig,
    pub feeds: Vec<FeedTrackingState>,
    pub queue_running: bool,
    pub queue_pending: usize,
}

#[derive(Clone)]
pub struct FeedEngine {
    store: Arc<Mutex<TrackingStore>>,
    queues: Arc<Mutex<HashMap<String, Arc<FetchQueue>>>>,
    fetcher: Arc<dyn ContentFetcher>,
    sink: Arc<dyn UpdateSink>,
    clock: Arc<dyn Clock>,
    default_pacing: Duration,
}

impl FeedEngine {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, sink: Arc<dyn UpdateSink>) -> Self {
        ensure_metrics_described();
        Self {
            store: Arc::new(Mutex::new(TrackingStore::new())),
            queues: Arc::new(Mutex::new(HashMap::new())),
            fetcher,
            sink,
            clock: Arc::new(SystemClock),
            default_pacing: Duration::from_secs(1),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_pacing(mut self, pacing: Duration) -> Self {
        self.default_pacing = pacing;
        self
    }

    // The guard is never held across an `.await`.
    fn store(&self) -> MutexGuard<'_, TrackingStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue_for(&self, instance_id: &str) -> Arc<FetchQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            queues
                .entry(instance_id.to_string())
                .or_insert_with(|| FetchQueue::new(instance_id)),
        )
    }

    /// Dispatch one inbound notification. Only STATUS produces a value.
    /// UPDATE spawns its drain in the background; use `update` directly to
    /// get hold of it.
    pub fn handle(&self, notification: Notification) -> Option<StatusReport> {
        tracing::debug!(
            target: "engine",
            instance = %notification.instance_id(),
            kind = notification.kind(),
            "notification received"
        );
        match notification {
            Notification::Config {
                instance_id,
                config,
            } => {
                self.set_config(&instance_id, config);
                None
            }
            Notification::Reset { instance_id } => {
                self.reset(&instance_id);
                None
            }
            Notification::Update {
                instance_id,
                request_id,
            } => {
                self.update(&instance_id, &request_id);
                None
            }
            Notification::Status { instance_id } => self.status(&instance_id),
        }
    }

    pub fn set_config(&self, instance_id: &str, config: InstanceConfig) {
        let now = self.clock.now().with_timezone(&Local);
        let feeds = config.feeds.len();
        self.store().set_config(instance_id, config, &now);
        tracing::info!(target: "engine", instance = %instance_id, feeds, "configured");
    }

    pub fn reset(&self, instance_id: &str) {
        if self.store().reset(instance_id) {
            tracing::info!(target: "engine", instance = %instance_id, "delivery tracking reset");
        } else {
            tracing::debug!(target: "engine", instance = %instance_id, "reset before config; ignored");
        }
    }

    /// Queue one fetch per configured feed and start draining.
    ///
    /// Returns the drain handle when this call started it. `None` means the
    /// instance is not configured yet, has no feeds, or a drain was already
    /// running (the new tasks are appended to it).
    pub fn update(&self, instance_id: &str, request_id: &str) -> Option<JoinHandle<()>> {
        let (terms, pacing) = {
            let store = self.store();
            let Some(state) = store.get(instance_id) else {
                tracing::debug!(target: "engine", instance = %instance_id, "update before config; ignored");
                return None;
            };
            let terms: Vec<String> = state.feeds.iter().map(|f| f.search_term.clone()).collect();
            (terms, state.pacing().unwrap_or(self.default_pacing))
        };

        let queue = self.queue_for(instance_id);
        for (feed_index, search_term) in terms.into_iter().enumerate() {
            let engine = self.clone();
            let instance_id = instance_id.to_string();
            let request_id = request_id.to_string();
            queue.enqueue(async move {
                engine
                    .fetch_feed(&instance_id, &request_id, feed_index, &search_term)
                    .await;
            });
        }

        gauge!("feed_cycle_last_run_ts").set(self.clock.now().timestamp() as f64);
        queue.start(pacing)
    }

    /// Run one full cycle and wait for it to finish.
    pub async fn run_cycle(&self, instance_id: &str, request_id: &str) {
        if let Some(handle) = self.update(instance_id, request_id) {
            if let Err(e) = handle.await {
                tracing::warn!(target: "engine", instance = %instance_id, error = %e, "drain task failed");
            }
        }
    }

    /// One queued task: fetch, filter, commit, emit.
    async fn fetch_feed(&self, instance_id: &str, request_id: &str, feed_index: usize, search_term: &str) {
        counter!("feed_fetch_total").increment(1);

        let raw = match self.fetcher.fetch_raw(search_term).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    target: "engine",
                    instance = %instance_id,
                    feed = feed_index,
                    fetcher = self.fetcher.name(),
                    error = %e,
                    "fetch failed; feed skipped this cycle"
                );
                counter!("feed_fetch_errors_total").increment(1);
                return;
            }
        };

        let now = self.clock.now();
        let batch = {
            let store = self.store();
            match store.feed(instance_id, feed_index) {
                Some(feed) if feed.search_term == search_term => normalize(raw, feed, now),
                _ => {
                    tracing::debug!(
                        target: "engine",
                        instance = %instance_id,
                        feed = feed_index,
                        "feed reconfigured during fetch; result dropped"
                    );
                    return;
                }
            }
        };

        tracing::debug!(
            target: "engine",
            instance = %instance_id,
            feed = feed_index,
            kept = batch.items.len(),
            skipped = batch.skipped,
            synthesized = batch.synthesized,
            "batch normalized"
        );

        self.deliver(instance_id, request_id, feed_index, batch.items, batch.observed_max)
            .await;
    }

    /// Commit `observed_max` for the feed, then emit `items` if there are any.
    pub async fn deliver(
        &self,
        instance_id: &str,
        request_id: &str,
        feed_index: usize,
        items: Vec<CanonicalItem>,
        observed_max: DateTime<Utc>,
    ) {
        let source = {
            let mut store = self.store();
            let Some(feed) = store.feed_mut(instance_id, feed_index) else {
                return;
            };
            feed.commit(observed_max);
            SourceMetadata::for_feed(&feed.source_title)
        };

        if items.is_empty() {
            return;
        }

        let update = OutboundUpdate {
            instance_id: instance_id.to_string(),
            request_id: request_id.to_string(),
            source,
            items,
        };
        if let Err(e) = self.sink.send(&update).await {
            tracing::warn!(
                target: "notify",
                instance = %instance_id,
                sink = self.sink.name(),
                error = %e,
                "failed to send update"
            );
        }
    }

    pub fn status(&self, instance_id: &str) -> Option<StatusReport> {
        let (config, feeds) = {
            let store = self.store();
            let state = store.get(instance_id)?;
            (state.config.clone(), state.feeds.clone())
        };
        let queue = self.queue_for(instance_id);
        let report = StatusReport {
            instance_id: instance_id.to_string(),
            config,
            feeds,
            queue_running: queue.is_running(),
            queue_pending: queue.pending(),
        };
        tracing::info!(
            target: "engine",
            instance = %instance_id,
            status = %serde_json::to_string(&report).unwrap_or_default(),
            "status"
        );
        Some(report)
    }

    /// Snapshot of one feed's tracking state.
    pub fn feed_state(&self, instance_id: &str, feed_index: usize) -> Option<FeedTrackingState> {
        self.store().feed(instance_id, feed_index).cloned()
    }
}
