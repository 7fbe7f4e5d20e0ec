// src/ingest/types.rs
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// One post as read from the source, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPost {
    pub image_url: Option<String>,
    pub caption: String,               // may be empty
    pub accessibility_caption: Option<String>,
    pub taken_at: Option<i64>,         // unix seconds
    pub owner_id: String,
}

pub type RawBatch = Vec<RawPost>;

/// Source-agnostic item handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalItem {
    pub id: String, // content hash of the title
    pub title: String,
    pub description: Option<String>,
    pub categories: BTreeSet<String>,
    pub source: String,
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
    pub publish_time: DateTime<Utc>,
    /// Milliseconds between `publish_time` and the fetch that produced the item.
    pub age_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("source returned status {status}")]
    Status { status: u16 },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Single-attempt retrieval of the raw posts for one search term.
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_raw(&self, search_term: &str) -> Result<RawBatch, FetchError>;
    fn name(&self) -> &'static str;
}
