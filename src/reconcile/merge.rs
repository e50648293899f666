// src/reconcile/merge.rs
//! Feed item normalization and the read-merge-write step.
//!
//! Feed-owned: title, description, venue, address, url, image, category,
//! start, end. Locally owned: featured, paid_placement, active, summary.
//! Only an explicit local action changes a locally owned field.

use chrono::{DateTime, FixedOffset, Utc};

use crate::feed::{parse_feed_time, FeedEvent};
use crate::ingest::normalize_text;
use crate::model::ExternalEvent;

/// Feed item after markup stripping and time parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub venue: Option<String>,
    pub address: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

fn clean_opt(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(normalize_text)
        .filter(|s| !s.is_empty())
}

fn clean_url(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
        .map(str::to_string)
}

/// Stable local key for a raw feed id.
pub fn external_key(prefix: &str, raw_id: &str) -> String {
    format!("{prefix}{}", raw_id.trim())
}

/// Normalize one raw item. Items without id, title or a parseable start are
/// rejected with a reason.
pub fn normalize_item(
    raw: &FeedEvent,
    prefix: &str,
    offset: FixedOffset,
) -> Result<NormalizedItem, String> {
    if raw.id.trim().is_empty() {
        return Err("missing id".to_string());
    }
    let title = normalize_text(&raw.title);
    if title.is_empty() {
        return Err(format!("item {}: empty title", raw.id));
    }
    let start = raw
        .start_time
        .as_deref()
        .and_then(|s| parse_feed_time(s, offset))
        .ok_or_else(|| format!("item {}: missing or bad start time", raw.id))?;
    let end = raw
        .end_time
        .as_deref()
        .and_then(|s| parse_feed_time(s, offset))
        .filter(|e| *e >= start);

    Ok(NormalizedItem {
        external_id: external_key(prefix, &raw.id),
        title,
        description: normalize_text(&raw.description),
        venue: clean_opt(&raw.venue_name),
        address: clean_opt(&raw.address),
        url: clean_url(&raw.url),
        image_url: clean_url(&raw.image_url),
        category: clean_opt(&raw.category),
        start,
        end,
    })
}

/// Merge a feed item over the stored row.
pub fn merge_event(
    existing: Option<&ExternalEvent>,
    item: &NormalizedItem,
    now: DateTime<Utc>,
) -> ExternalEvent {
    let (featured, paid_placement, active, summary, first_seen_at) = match existing {
        Some(e) => (
            e.featured,
            e.paid_placement,
            e.active,
            e.summary.clone(),
            e.first_seen_at,
        ),
        None => (false, false, true, None, now),
    };
    ExternalEvent {
        external_id: item.external_id.clone(),
        title: item.title.clone(),
        description: item.description.clone(),
        venue: item.venue.clone(),
        address: item.address.clone(),
        url: item.url.clone(),
        image_url: item.image_url.clone(),
        category: item.category.clone(),
        start: item.start,
        end: item.end,
        featured,
        paid_placement,
        active,
        summary,
        first_seen_at,
        last_synced_at: now,
    }
}

/// Whether any feed-owned field differs.
pub fn feed_fields_changed(existing: &ExternalEvent, item: &NormalizedItem) -> bool {
    existing.title != item.title
        || existing.description != item.description
        || existing.venue != item.venue
        || existing.address != item.address
        || existing.url != item.url
        || existing.image_url != item.image_url
        || existing.category != item.category
        || existing.start != item.start
        || existing.end != item.end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn raw(id: &str) -> FeedEvent {
        FeedEvent {
            id: id.into(),
            title: "Jazz &amp; Blues <b>Night</b>".into(),
            description: "<p>Live music&nbsp;downtown.</p>".into(),
            start_time: Some("2025-06-01T23:00:00Z".into()),
            end_time: None,
            venue_name: Some("  The Hall ".into()),
            address: None,
            url: Some("javascript:alert(1)".into()),
            image_url: Some("https://img.test/a.jpg".into()),
            category: None,
        }
    }

    fn offset() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn normalization_strips_markup_and_bad_urls() {
        let item = normalize_item(&raw("42"), "feed:", offset()).unwrap();
        assert_eq!(item.external_id, "feed:42");
        assert_eq!(item.title, "Jazz & Blues Night");
        assert_eq!(item.description, "Live music downtown.");
        assert_eq!(item.venue.as_deref(), Some("The Hall"));
        assert_eq!(item.url, None);
        assert!(item.image_url.is_some());
    }

    #[test]
    fn items_without_start_are_rejected() {
        let mut r = raw("7");
        r.start_time = None;
        assert!(normalize_item(&r, "feed:", offset()).is_err());
        r.start_time = Some("2025-06-01".into());
        r.title = "   ".into();
        assert!(normalize_item(&r, "feed:", offset()).is_err());
    }

    #[test]
    fn local_fields_survive_merge() {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let item = normalize_item(&raw("1"), "feed:", offset()).unwrap();
        let mut stored = merge_event(None, &item, t0);
        assert!(stored.active && !stored.featured);

        stored.featured = true;
        stored.paid_placement = true;
        stored.summary = Some("Great night.".into());

        let mut changed = item.clone();
        changed.title = "Renamed".into();
        let later = t0 + Duration::days(1);
        let merged = merge_event(Some(&stored), &changed, later);
        assert!(merged.featured);
        assert!(merged.paid_placement);
        assert_eq!(merged.summary.as_deref(), Some("Great night."));
        assert_eq!(merged.title, "Renamed");
        assert_eq!(merged.first_seen_at, t0);
        assert_eq!(merged.last_synced_at, later);
        assert!(feed_fields_changed(&stored, &changed));
    }

    #[test]
    fn deactivated_event_is_not_reactivated_by_feed() {
        let item = normalize_item(&raw("1"), "feed:", offset()).unwrap();
        let mut stored = merge_event(None, &item, Utc::now());
        stored.active = false;
        assert!(!merge_event(Some(&stored), &item, Utc::now()).active);
    }
}
