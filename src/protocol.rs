// src/protocol.rs
//! Wire shapes exchanged with the caller: inbound notifications, the per-instance
//! feed configuration, and the outbound delta message.
//!
//! Field names follow the camelCase the browser-side module sends. The older
//! all-lowercase spellings (`moduleinstance`, `feedtitle`, `oldestage`, ...) are
//! accepted as aliases so existing configs keep working.

use serde::{Deserialize, Serialize};

use crate::ingest::types::CanonicalItem;

/// Icon class the front-end uses to badge items from this provider.
pub const SOURCE_ICON_CLASS: &str = "fa fa-instagram instagramrainbow";

/// How far back a feed may reach on its first fetch.
///
/// A number is a count of minutes before now; a string is either `"today"`
/// (local midnight) or an exact `YYYY-MM-DD HH:mm:ss` local timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgeSpec {
    Minutes(f64),
    Text(String),
}

impl From<&str> for AgeSpec {
    fn from(s: &str) -> Self {
        AgeSpec::Text(s.to_string())
    }
}

impl From<f64> for AgeSpec {
    fn from(m: f64) -> Self {
        AgeSpec::Minutes(m)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(rename = "feedTitle", alias = "feedtitle")]
    pub feed_title: String,
    #[serde(rename = "searchHashtag", alias = "searchhashtag")]
    pub search_hashtag: String,
    #[serde(rename = "oldestAge", alias = "oldestage")]
    pub oldest_age: AgeSpec,
}

/// Caller-supplied configuration for one module instance.
///
/// Anything beyond the fields the provider reads is kept in `extra` so STATUS
/// can echo the configuration back verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(
        rename = "queuePacingIntervalMs",
        alias = "waitforqueuetime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub queue_pacing_interval_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Inbound notification, tagged the way the caller frames them:
/// `{"notification": "UPDATE", "payload": {"instanceId": "...", "requestId": "..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    Config {
        #[serde(rename = "instanceId", alias = "moduleinstance")]
        instance_id: String,
        config: InstanceConfig,
    },
    Reset {
        #[serde(rename = "instanceId", alias = "moduleinstance")]
        instance_id: String,
    },
    Update {
        #[serde(rename = "instanceId", alias = "moduleinstance")]
        instance_id: String,
        #[serde(rename = "requestId", alias = "providerid")]
        request_id: String,
    },
    Status {
        #[serde(rename = "instanceId", alias = "moduleinstance")]
        instance_id: String,
    },
}

impl Notification {
    pub fn instance_id(&self) -> &str {
        match self {
            Notification::Config { instance_id, .. }
            | Notification::Reset { instance_id }
            | Notification::Update { instance_id, .. }
            | Notification::Status { instance_id } => instance_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Config { .. } => "CONFIG",
            Notification::Reset { .. } => "RESET",
            Notification::Update { .. } => "UPDATE",
            Notification::Status { .. } => "STATUS",
        }
    }
}

/// Display metadata for the feed an outbound batch came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    pub title: String,
    pub source_title: String,
    pub icon_class: String,
}

impl SourceMetadata {
    pub fn for_feed(source_title: &str) -> Self {
        Self {
            title: source_title.to_string(),
            source_title: source_title.to_string(),
            icon_class: SOURCE_ICON_CLASS.to_string(),
        }
    }
}

/// One feed's delta for one cycle. Only sent when `items` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundUpdate {
    pub instance_id: String,
    pub request_id: String,
    pub source: SourceMetadata,
    pub items: Vec<CanonicalItem>,
}
