// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use newsletter_curation::config::CurationConfig;
use newsletter_curation::engine::CurationEngine;
use newsletter_curation::error::{FeedError, OracleError};
use newsletter_curation::feed::{EventFeed, FeedEvent, FeedPage, FeedPageRequest};
use newsletter_curation::ingest::types::ArticleSource;
use newsletter_curation::model::{CandidateArticle, CriteriaScores, ExternalEvent, GeneratedCopy};
use newsletter_curation::oracle::{FactCheckScores, Oracle, RewrittenCopy};
use newsletter_curation::store::MemoryStore;

/// 10:00 local (UTC-5) on 2025-06-02.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

/// Defaults with near-zero retry delays and no feed spacing.
pub fn test_config() -> CurationConfig {
    let mut cfg = CurationConfig::default();
    cfg.retry.feed_base_delay_ms = 1;
    cfg.retry.oracle_base_delay_ms = 1;
    cfg.reconcile.request_delay_ms = 0;
    cfg.validated()
}

// ------------------------------------------------------------
// Oracle
// ------------------------------------------------------------

/// Oracle whose answers are keyed by article title.
#[derive(Default)]
pub struct ScriptedOracle {
    scores: HashMap<String, CriteriaScores>,
    bodies: HashMap<String, String>,
    duplicates: Vec<Vec<String>>,
    checks: Mutex<HashMap<String, Vec<FactCheckScores>>>,
    failing_scores: HashSet<String>,
    failing_dedupe: bool,
    pub score_calls: AtomicUsize,
    pub rewrite_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(mut self, title: &str, interest: u8, local: u8, impact: u8) -> Self {
        self.scores.insert(
            title.to_string(),
            CriteriaScores {
                interest,
                local_relevance: local,
                community_impact: impact,
            },
        );
        self
    }

    pub fn body(mut self, title: &str, body: &str) -> Self {
        self.bodies.insert(title.to_string(), body.to_string());
        self
    }

    pub fn duplicates(mut self, titles: &[&str]) -> Self {
        self.duplicates
            .push(titles.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Fact-check answers for the copy headlined `title`, in call order.
    pub fn checks(self, title: &str, answers: Vec<FactCheckScores>) -> Self {
        self.checks
            .lock()
            .unwrap()
            .insert(title.to_string(), answers);
        self
    }

    pub fn fail_score(mut self, title: &str) -> Self {
        self.failing_scores.insert(title.to_string());
        self
    }

    /// Every dedup call answers with garbage.
    pub fn fail_dedupe(mut self) -> Self {
        self.failing_dedupe = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn score(&self, article: &CandidateArticle) -> Result<CriteriaScores, OracleError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_scores.contains(&article.title) {
            return Err(OracleError::Malformed("not json".into()));
        }
        Ok(self
            .scores
            .get(&article.title)
            .copied()
            .unwrap_or(CriteriaScores {
                interest: 5,
                local_relevance: 5,
                community_impact: 5,
            }))
    }

    async fn dedupe(&self, articles: &[CandidateArticle]) -> Result<Vec<Vec<usize>>, OracleError> {
        if self.failing_dedupe {
            return Err(OracleError::Malformed("groups: not an array".into()));
        }
        let groups = self
            .duplicates
            .iter()
            .map(|titles| {
                articles
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| titles.contains(&a.title))
                    .map(|(i, _)| i)
                    .collect::<Vec<_>>()
            })
            .filter(|g| g.len() > 1)
            .collect();
        Ok(groups)
    }

    async fn rewrite(
        &self,
        article: &CandidateArticle,
        _failed_score: Option<u8>,
    ) -> Result<RewrittenCopy, OracleError> {
        self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .get(&article.title)
            .cloned()
            .unwrap_or_else(|| format!("Copy for {}.", article.title));
        Ok(RewrittenCopy {
            headline: article.title.clone(),
            body,
        })
    }

    async fn fact_check(
        &self,
        generated: &GeneratedCopy,
        _original: &str,
    ) -> Result<FactCheckScores, OracleError> {
        let mut g = self.checks.lock().unwrap();
        match g.get_mut(&generated.headline) {
            Some(q) if !q.is_empty() => Ok(q.remove(0)),
            _ => Ok([8, 8, 8]),
        }
    }

    async fn summarize_event(&self, title: &str, _description: &str) -> Result<String, OracleError> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Summary of {title}."))
    }

    async fn subject_line(&self, headlines: &[String]) -> Result<String, OracleError> {
        Ok(format!("Today: {}", headlines.first().cloned().unwrap_or_default()))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// ------------------------------------------------------------
// Feed
// ------------------------------------------------------------

/// Serves fixed items per local day; listed days fail with a 503.
#[derive(Default)]
pub struct FakeFeed {
    days: HashMap<NaiveDate, Vec<FeedEvent>>,
    failing: HashSet<NaiveDate>,
    fail_all: bool,
    pub calls: AtomicUsize,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, on: NaiveDate, ev: FeedEvent) -> Self {
        self.days.entry(on).or_default().push(ev);
        self
    }

    pub fn failing_day(mut self, on: NaiveDate) -> Self {
        self.failing.insert(on);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl EventFeed for FakeFeed {
    async fn fetch_page(&self, req: &FeedPageRequest) -> Result<FeedPage, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing.contains(&req.start_date) {
            return Err(FeedError::Transient("status 503".into()));
        }
        if req.page > 1 {
            return Ok(FeedPage::default());
        }
        let mut events = Vec::new();
        for (d, evs) in &self.days {
            if *d >= req.start_date && *d <= req.end_date {
                events.extend(evs.iter().cloned());
            }
        }
        events.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(FeedPage { events })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub fn feed_event(id: &str, title: &str, start: &str, end: Option<&str>) -> FeedEvent {
    FeedEvent {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{title} description"),
        start_time: Some(start.to_string()),
        end_time: end.map(str::to_string),
        venue_name: Some("Town Hall".into()),
        address: None,
        url: Some("https://events.test/e".into()),
        image_url: None,
        category: Some("community".into()),
    }
}

// ------------------------------------------------------------
// Fixtures
// ------------------------------------------------------------

pub fn stored_event(id: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> ExternalEvent {
    ExternalEvent {
        external_id: id.to_string(),
        title: format!("Event {id}"),
        description: String::new(),
        venue: None,
        address: None,
        url: None,
        image_url: None,
        category: None,
        start,
        end,
        featured: false,
        paid_placement: false,
        active: true,
        summary: None,
        first_seen_at: start - Duration::days(10),
        last_synced_at: start - Duration::days(10),
    }
}

/// Unscored candidate with an image, ingested `minute` minutes after 08:00 UTC.
pub fn article(id: &str, title: &str, date: NaiveDate, minute: i64) -> CandidateArticle {
    let mut a = CandidateArticle::new(
        id.to_string(),
        date,
        "Gazette".into(),
        title.to_string(),
        format!("{title} original body."),
        format!("https://gazette.test/{id}"),
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap() + Duration::minutes(minute),
    );
    a.image_url = Some(format!("https://gazette.test/{id}.jpg"));
    a
}

pub fn engine_with(
    cfg: CurationConfig,
    store: Arc<MemoryStore>,
    oracle: Arc<ScriptedOracle>,
    feed: Arc<FakeFeed>,
    sources: Vec<Box<dyn ArticleSource>>,
) -> CurationEngine {
    CurationEngine::new(cfg, store, oracle, feed, sources)
}

pub fn engine(store: Arc<MemoryStore>, oracle: Arc<ScriptedOracle>, feed: Arc<FakeFeed>) -> CurationEngine {
    engine_with(test_config(), store, oracle, feed, Vec::new())
}

/// Write `ev` as-is, bypassing the feed merge.
pub async fn put_event(store: &MemoryStore, ev: ExternalEvent) {
    use newsletter_curation::store::EventStore;
    let id = ev.external_id.clone();
    let write = move |_: Option<&ExternalEvent>| ev.clone();
    store.upsert_event_with(&id, &write).await.unwrap();
}
