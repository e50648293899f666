// src/feed/mod.rs
//! Third-party events feed: paginated GET with `start_date`, `end_date`,
//! `page`, `per_page`, answering `{events: [...]}`.
//!
//! The raw page fetch lives behind [`EventFeed`]; [`FeedFetcher`] adds the
//! rate-limit spacing and the retry policy so every caller shares them.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FeedError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedPageRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub page: u32,
    pub per_page: u32,
}

/// Raw feed item, before normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedEvent {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "start", alias = "start_date")]
    pub start_time: Option<String>,
    #[serde(default, alias = "end", alias = "end_date")]
    pub end_time: Option<String>,
    #[serde(default, alias = "venue")]
    pub venue_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn id_as_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        S(String),
        N(u64),
    }
    Ok(match Id::deserialize(d)? {
        Id::S(s) => s,
        Id::N(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub events: Vec<FeedEvent>,
}

// --- tolerant page envelopes ---

#[derive(Deserialize)]
#[serde(untagged)]
enum PageAny {
    Wrapped { events: Vec<FeedEvent> },
    Data { data: Box<PageAny> },
    Bare(Vec<FeedEvent>),
}

fn unwrap_page(any: PageAny) -> Vec<FeedEvent> {
    match any {
        PageAny::Wrapped { events } => events,
        PageAny::Data { data } => unwrap_page(*data),
        PageAny::Bare(v) => v,
    }
}

/// Parse one page body. Accepts `{events}`, `{data:{events}}` or a bare array.
pub fn parse_page(body: &str) -> Result<FeedPage, FeedError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(FeedPage::default());
    }
    let any: PageAny =
        serde_json::from_str(trimmed).map_err(|e| FeedError::Malformed(e.to_string()))?;
    Ok(FeedPage {
        events: unwrap_page(any),
    })
}

/// Parse a feed timestamp. RFC 3339 first; naive `YYYY-MM-DD HH:MM[:SS]`
/// and bare dates are interpreted in the newsletter's local offset.
pub fn parse_feed_time(s: &str, offset: chrono::FixedOffset) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn fetch_page(&self, req: &FeedPageRequest) -> Result<FeedPage, FeedError>;
    fn name(&self) -> &'static str;
}

pub type DynEventFeed = Arc<dyn EventFeed>;

/// HTTP implementation of the feed.
pub struct HttpEventFeed {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEventFeed {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("newsletter-curation/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// `EVENTS_FEED_URL` + optional `EVENTS_FEED_API_KEY`.
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let url = std::env::var("EVENTS_FEED_URL").ok()?;
        let key = std::env::var("EVENTS_FEED_API_KEY").ok();
        Some(Self::new(url, key, timeout))
    }
}

#[async_trait]
impl EventFeed for HttpEventFeed {
    async fn fetch_page(&self, req: &FeedPageRequest) -> Result<FeedPage, FeedError> {
        let mut rb = self.client.get(&self.base_url).query(&[
            ("start_date", req.start_date.to_string()),
            ("end_date", req.end_date.to_string()),
            ("page", req.page.to_string()),
            ("per_page", req.per_page.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| FeedError::Transient(format!("feed http get: {e}")))?;
        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FeedError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(FeedError::Rejected(status.as_u16()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FeedError::Transient(format!("feed body: {e}")))?;
        parse_page(&body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Returns empty pages; used when no feed URL is configured.
pub struct EmptyFeed;

#[async_trait]
impl EventFeed for EmptyFeed {
    async fn fetch_page(&self, _req: &FeedPageRequest) -> Result<FeedPage, FeedError> {
        Ok(FeedPage::default())
    }
    fn name(&self) -> &'static str {
        "empty"
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Feed access with call spacing and retry/backoff.
pub struct FeedFetcher {
    feed: DynEventFeed,
    retry: RetryPolicy,
    limiter: Option<Limiter>,
}

impl FeedFetcher {
    pub fn new(feed: DynEventFeed, retry: RetryPolicy, min_spacing: Duration) -> Self {
        let limiter = Quota::with_period(min_spacing)
            .map(|q| RateLimiter::direct(q.allow_burst(NonZeroU32::MIN)));
        Self {
            feed,
            retry,
            limiter,
        }
    }

    /// Fetch one page. Every attempt, retries included, waits for its slot.
    pub async fn fetch(&self, req: &FeedPageRequest) -> Result<FeedPage, FeedError> {
        let label = format!("feed {} p{}", req.start_date, req.page);
        let this = self;
        self.retry
            .run(&label, |e: &FeedError| e.is_retryable(), || async move {
                if let Some(l) = &this.limiter {
                    l.until_ready().await;
                }
                this.feed.fetch_page(req).await
            })
            .await
    }

    pub fn feed_name(&self) -> &'static str {
        self.feed.name()
    }
}
