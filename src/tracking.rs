// src/tracking.rs
//! Per-instance, per-feed delivery state.
//!
//! Each feed carries two boundaries: the configured `watermark` (never deliver
//! anything older) and `max_delivered` (newest publish time already sent).
//! A record is new only if it clears both.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::protocol::{FeedConfig, InstanceConfig};
use crate::timestamp;

/// Zero time for `max_delivered`: nothing delivered yet.
pub const EPOCH: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTrackingState {
    pub source_title: String,
    pub search_term: String,
    pub watermark: DateTime<Utc>,
    pub max_delivered: DateTime<Utc>,
}

impl FeedTrackingState {
    pub fn from_config<Tz: TimeZone>(cfg: &FeedConfig, now: &DateTime<Tz>) -> Self {
        Self {
            source_title: cfg.feed_title.clone(),
            search_term: cfg.search_hashtag.clone(),
            watermark: timestamp::resolve(&cfg.oldest_age, now),
            max_delivered: EPOCH,
        }
    }

    /// Inside the backlog window and newer than anything already sent.
    pub fn is_eligible(&self, publish_time: DateTime<Utc>) -> bool {
        publish_time >= self.watermark && publish_time > self.max_delivered
    }

    /// Raise `max_delivered` to `observed_max`. Never moves it backwards.
    /// Returns true when the boundary advanced.
    pub fn commit(&mut self, observed_max: DateTime<Utc>) -> bool {
        if observed_max > EPOCH && observed_max > self.max_delivered {
            self.max_delivered = observed_max;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInstanceState {
    pub config: InstanceConfig,
    /// Same order as `config.feeds`; the index correlates fetch results.
    pub feeds: Vec<FeedTrackingState>,
}

impl ModuleInstanceState {
    pub fn pacing(&self) -> Option<Duration> {
        self.config.queue_pacing_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Default)]
pub struct TrackingStore {
    instances: HashMap<String, ModuleInstanceState>,
}

impl TrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `instance_id`. Prior delivery progress
    /// is discarded even when the feed list is unchanged.
    pub fn set_config<Tz: TimeZone>(
        &mut self,
        instance_id: &str,
        config: InstanceConfig,
        now: &DateTime<Tz>,
    ) {
        let feeds = config
            .feeds
            .iter()
            .map(|f| FeedTrackingState::from_config(f, now))
            .collect();
        self.instances
            .insert(instance_id.to_string(), ModuleInstanceState { config, feeds });
    }

    /// Forget what was delivered so the whole backlog window is sent again.
    /// Returns false if the instance was never configured.
    pub fn reset(&mut self, instance_id: &str) -> bool {
        match self.instances.get_mut(instance_id) {
            Some(state) => {
                for feed in &mut state.feeds {
                    feed.max_delivered = EPOCH;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<&ModuleInstanceState> {
        self.instances.get(instance_id)
    }

    pub fn feed(&self, instance_id: &str, index: usize) -> Option<&FeedTrackingState> {
        self.instances.get(instance_id)?.feeds.get(index)
    }

    pub fn feed_mut(&mut self, instance_id: &str, index: usize) -> Option<&mut FeedTrackingState> {
        self.instances.get_mut(instance_id)?.feeds.get_mut(index)
    }
}
