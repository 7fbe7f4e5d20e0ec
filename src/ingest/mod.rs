// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod types;

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::ingest::types::{CanonicalItem, RawPost};
use crate::tracking::{FeedTrackingState, EPOCH};

/// Phrase separating the human description from the detected objects in an
/// accessibility caption ("photo by x in y. image may contain: tree, sky").
const CATEGORY_DELIMITER: &str = " image may contain:";

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Fetch tasks started.");
        describe_counter!(
            "feed_fetch_errors_total",
            "Fetches abandoned due to network/status/parse errors."
        );
        describe_counter!(
            "feed_items_delivered_total",
            "Items that passed the watermark filter."
        );
        describe_counter!(
            "feed_items_skipped_total",
            "Items older than the watermark or already delivered."
        );
        describe_counter!(
            "feed_undated_items_total",
            "Items given a synthesized publish time."
        );
        describe_counter!(
            "feed_records_malformed_total",
            "Raw records dropped because required fields were missing."
        );
        describe_histogram!("feed_parse_ms", "Source page parse time in milliseconds.");
        describe_gauge!(
            "feed_cycle_last_run_ts",
            "Unix ts when an update cycle was last queued."
        );
    });
}

/// Normalize caption text: decode entities, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    let out = html_escape::decode_html_entities(s).to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    let mut out = re_ws.replace_all(&out, " ").trim().to_string();

    // Length cap: 2200 chars (longest caption the source allows)
    if out.chars().count() > 2200 {
        out = out.chars().take(2200).collect();
    }
    out
}

/// Split an accessibility caption into a description and a category set.
pub fn split_accessibility_caption(caption: &str) -> (Option<String>, BTreeSet<String>) {
    let lower = caption.to_lowercase();
    let mut parts = lower.splitn(2, CATEGORY_DELIMITER);
    let description = parts
        .next()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let categories = parts
        .next()
        .map(|rest| {
            rest.replace(" and ", ",")
                .split(',')
                .map(|c| c.trim().trim_end_matches('.').trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();

    (description, categories)
}

/// Stable identifier derived from the title.
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Heuristic for 1x1 beacons and spacer images that are not worth showing.
pub fn is_tracking_pixel(url: &str) -> bool {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"(?i)(\b1x1\b|[/_.-](pixel|tracking|beacon)[/_.?-]|spacer\.gif)")
            .unwrap()
    });
    re.is_match(url)
}

/// Result of filtering one fetched batch against a feed's boundaries.
/// Nothing here has been committed yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub items: Vec<CanonicalItem>,
    /// Newest publish time among `items`; `EPOCH` when empty.
    pub observed_max: DateTime<Utc>,
    pub skipped: usize,
    pub synthesized: usize,
}

/// Map raw posts to canonical items and keep only the ones that are new for
/// `feed`. Records are taken in source order, which is not chronological, so
/// `observed_max` is tracked locally and left for the caller to commit.
pub fn normalize(raw: Vec<RawPost>, feed: &FeedTrackingState, now: DateTime<Utc>) -> NormalizedBatch {
    ensure_metrics_described();

    let mut out = NormalizedBatch {
        items: Vec::with_capacity(raw.len()),
        observed_max: EPOCH,
        skipped: 0,
        synthesized: 0,
    };

    for post in raw {
        let publish_time = match post.taken_at.and_then(|s| DateTime::from_timestamp(s, 0)) {
            Some(ts) => ts,
            None => {
                // Undated posts slot in right after the last committed one.
                let ts = feed.max_delivered + Duration::milliseconds(1);
                tracing::debug!(
                    target: "ingest",
                    feed = %feed.source_title,
                    assigned = %ts,
                    "post missing a publish time"
                );
                out.synthesized += 1;
                ts
            }
        };

        if !feed.is_eligible(publish_time) {
            tracing::debug!(
                target: "ingest",
                feed = %feed.source_title,
                %publish_time,
                watermark = %feed.watermark,
                max_delivered = %feed.max_delivered,
                "already sent or too old"
            );
            out.skipped += 1;
            continue;
        }

        let (description, categories) = post
            .accessibility_caption
            .as_deref()
            .map(split_accessibility_caption)
            .unwrap_or_default();
        let title = normalize_text(&post.caption);
        let image_url = post.image_url.filter(|u| !is_tracking_pixel(u));

        out.observed_max = out.observed_max.max(publish_time);
        out.items.push(CanonicalItem {
            id: content_hash(&title),
            title,
            description,
            categories,
            source: post.owner_id,
            image_url,
            publish_time,
            age_ms: (now - publish_time).num_milliseconds(),
        });
    }

    counter!("feed_items_delivered_total").increment(out.items.len() as u64);
    counter!("feed_items_skipped_total").increment(out.skipped as u64);
    counter!("feed_undated_items_total").increment(out.synthesized as u64);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn feed(watermark: &str, max_delivered: DateTime<Utc>) -> FeedTrackingState {
        FeedTrackingState {
            source_title: "Cats".into(),
            search_term: "cats".into(),
            watermark: ts(watermark),
            max_delivered,
        }
    }

    fn post(title: &str, taken_at: Option<i64>) -> RawPost {
        RawPost {
            image_url: Some(format!("https://cdn.example/{title}.jpg")),
            caption: title.to_string(),
            accessibility_caption: None,
            taken_at,
            owner_id: "42".into(),
        }
    }

    #[test]
    fn normalize_text_decodes_and_collapses_ws() {
        assert_eq!(normalize_text("  Sunny&amp;warm\n\n #beach  "), "Sunny&warm #beach");
    }

    #[test]
    fn caption_splits_into_description_and_categories() {
        let (d, c) = split_accessibility_caption(
            "Photo by M R S in Suffolk. Image may contain: living room, table and indoor",
        );
        assert_eq!(d.as_deref(), Some("photo by m r s in suffolk."));
        let want: BTreeSet<String> = ["indoor", "living room", "table"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(c, want);

        let (d, c) = split_accessibility_caption("No photo description available.");
        assert_eq!(d.as_deref(), Some("no photo description available."));
        assert!(c.is_empty());
    }

    #[test]
    fn tracking_pixels_are_detected() {
        assert!(is_tracking_pixel("https://ads.example/1x1.gif"));
        assert!(is_tracking_pixel("https://ads.example/pixel.png?u=1"));
        assert!(is_tracking_pixel("https://x.example/img/spacer.gif"));
        assert!(!is_tracking_pixel(
            "https://scontent.cdninstagram.com/v/t51.2885-15/e35/123_n.jpg"
        ));
    }

    #[test]
    fn out_of_order_batch_filters_and_tracks_max() {
        let wm = "2025-06-01T00:00:00Z";
        let f = feed(wm, EPOCH);
        let t_old = ts("2025-05-31T23:00:00Z").timestamp();
        let t1 = ts("2025-06-01T08:00:00Z").timestamp();
        let t2 = ts("2025-06-01T09:00:00Z").timestamp();

        let out = normalize(
            vec![post("b", Some(t2)), post("old", Some(t_old)), post("a", Some(t1))],
            &f,
            ts("2025-06-01T10:00:00Z"),
        );

        let titles: Vec<_> = out.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a"]);
        assert_eq!(out.observed_max.timestamp(), t2);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.items[0].age_ms, 3_600_000);
        assert_eq!(out.items[0].id, content_hash("b"));
        // feed itself untouched until commit
        assert_eq!(f.max_delivered, EPOCH);
    }

    #[test]
    fn observed_max_is_not_seeded_from_feed() {
        let last = ts("2025-06-01T09:00:00Z");
        let f = feed("2025-06-01T00:00:00Z", last);
        let out = normalize(
            vec![post("same", Some(last.timestamp()))],
            &f,
            ts("2025-06-01T10:00:00Z"),
        );
        assert!(out.items.is_empty());
        assert_eq!(out.observed_max, EPOCH);
    }

    #[test]
    fn undated_post_lands_just_after_last_commit() {
        let last = ts("2025-06-01T09:00:00Z");
        let f = feed("2025-06-01T00:00:00Z", last);
        let out = normalize(vec![post("nodate", None)], &f, ts("2025-06-01T10:00:00Z"));
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.synthesized, 1);
        assert_eq!(out.items[0].publish_time, last + Duration::milliseconds(1));
        assert_eq!(out.observed_max, last + Duration::milliseconds(1));
    }

    #[test]
    fn pixel_images_are_dropped_but_item_kept() {
        let f = feed("2025-06-01T00:00:00Z", EPOCH);
        let mut p = post("x", Some(ts("2025-06-01T08:00:00Z").timestamp()));
        p.image_url = Some("https://t.example/track/1x1.gif".into());
        let out = normalize(vec![p], &f, ts("2025-06-01T10:00:00Z"));
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].image_url, None);
    }
}
