// src/ingest/providers/instagram.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;

use crate::ingest::types::{ContentFetcher, FetchError, RawBatch, RawPost};

pub const DEFAULT_BASE_URL: &str = "https://www.instagram.com";

#[derive(Debug, Deserialize)]
struct TagPage {
    graphql: Graphql,
}

#[derive(Debug, Deserialize)]
struct Graphql {
    hashtag: Hashtag,
}

#[derive(Debug, Deserialize)]
struct Hashtag {
    #[serde(default)]
    edge_hashtag_to_media: EdgeList,
    #[serde(default)]
    edge_hashtag_to_top_posts: EdgeList,
}

// Edges stay untyped until each one is decoded, so one bad post does not sink
// the whole page.
#[derive(Debug, Default, Deserialize)]
struct EdgeList {
    #[serde(default)]
    edges: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct Node {
    display_url: Option<String>,
    #[serde(default)]
    edge_media_to_caption: CaptionEdges,
    accessibility_caption: Option<String>,
    taken_at_timestamp: Option<i64>,
    owner: Owner,
}

#[derive(Debug, Default, Deserialize)]
struct CaptionEdges {
    #[serde(default)]
    edges: Vec<CaptionEdge>,
}

#[derive(Debug, Deserialize)]
struct CaptionEdge {
    node: CaptionNode,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    id: String,
}

impl From<Node> for RawPost {
    fn from(n: Node) -> Self {
        RawPost {
            image_url: n.display_url,
            caption: n
                .edge_media_to_caption
                .edges
                .into_iter()
                .next()
                .map(|e| e.node.text)
                .unwrap_or_default(),
            accessibility_caption: n.accessibility_caption,
            taken_at: n.taken_at_timestamp,
            owner_id: n.owner.id,
        }
    }
}

/// Parse a hashtag explore page: recent media first, then the top posts.
pub fn parse_tag_page(body: &str) -> Result<RawBatch, FetchError> {
    let t0 = std::time::Instant::now();
    let page: TagPage = serde_json::from_str(body)?;
    let Hashtag {
        edge_hashtag_to_media: media,
        edge_hashtag_to_top_posts: top,
    } = page.graphql.hashtag;

    let mut out = Vec::with_capacity(media.edges.len() + top.edges.len());
    for edge in media.edges.into_iter().chain(top.edges) {
        match serde_json::from_value::<Edge>(edge) {
            Ok(e) => out.push(RawPost::from(e.node)),
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "skipping malformed post");
                counter!("feed_records_malformed_total").increment(1);
            }
        }
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feed_parse_ms").record(ms);
    Ok(out)
}

/// Fetches `{base}/explore/tags/{tag}/?__a=1` over HTTP. One attempt, no retry.
pub struct InstagramFetcher {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl InstagramFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn tag_url(&self, search_term: &str) -> String {
        let tag = search_term.trim().trim_start_matches('#');
        format!("{}/explore/tags/{}/?__a=1", self.base_url, tag)
    }
}

impl Default for InstagramFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl ContentFetcher for InstagramFetcher {
    async fn fetch_raw(&self, search_term: &str) -> Result<RawBatch, FetchError> {
        let url = self.tag_url(search_term);
        let resp = self.client.get(&url).timeout(self.timeout).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let body = resp.text().await?;
        parse_tag_page(&body)
    }

    fn name(&self) -> &'static str {
        "instagram"
    }
}

/// Serves one fixed page body for every search term.
pub struct FixtureFetcher {
    body: String,
}

impl FixtureFetcher {
    pub fn from_fixture(body: &str) -> Self {
        Self {
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl ContentFetcher for FixtureFetcher {
    async fn fetch_raw(&self, _search_term: &str) -> Result<RawBatch, FetchError> {
        parse_tag_page(&self.body)
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
