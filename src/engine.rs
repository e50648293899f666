// src/engine.rs
//! Curation engine: wires the store, oracle, feed and article sources into
//! the per-campaign operations the HTTP layer and the cron triggers call.
//!
//! Every operation is safe to repeat: selection is persisted once, upserts
//! converge, and state transitions are conditional writes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::campaign::{CampaignMachine, ReadinessReport, ScheduledCheck, TransitionOutcome, Trigger};
use crate::config::ai::{AiConfig, DEFAULT_AI_CONFIG_PATH};
use crate::config::CurationConfig;
use crate::error::{CurationError, Result};
use crate::factcheck::FactCheckGate;
use crate::feed::{DynEventFeed, EmptyFeed, FeedFetcher, HttpEventFeed};
use crate::ingest::config::load_sources_default;
use crate::ingest::types::ArticleSource;
use crate::ingest::{ingest_articles, IngestReport};
use crate::model::{Campaign, CandidateArticle, ExternalEvent, SectionKind, Selection};
use crate::oracle::{build_oracle, DynOracle};
use crate::reconcile::{Reconciler, SyncReport, SyncWindow};
use crate::scoring::{ArticlePipeline, PipelineReport};
use crate::selector::{EventSlot, RotationSlot, SelectionOutcome, SlotCandidate, SlotSelector};
use crate::store::{MemoryStore, Store};

pub const ENV_SNAPSHOT_PATH: &str = "STORE_SNAPSHOT_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PickMode {
    Select,
    Reselect,
}

/// Compact per-section result for run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
    pub section: SectionKind,
    pub selected: usize,
    pub capacity: usize,
    pub created: bool,
}

impl SectionSummary {
    fn from_outcome(o: &SelectionOutcome, capacity: usize) -> Self {
        Self {
            section: o.section,
            selected: o.selected_count(),
            capacity,
            created: o.created,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub campaign: Campaign,
    pub ingest: IngestReport,
    pub pipeline: PipelineReport,
    pub sections: Vec<SectionSummary>,
}

pub struct CurationEngine {
    cfg: CurationConfig,
    store: Arc<dyn Store>,
    sources: Vec<Box<dyn ArticleSource>>,
    selector: SlotSelector<dyn Store>,
    reconciler: Reconciler<dyn Store>,
    pipeline: ArticlePipeline<dyn Store>,
    campaigns: CampaignMachine<dyn Store>,
    snapshot: Option<(Arc<MemoryStore>, PathBuf)>,
}

impl CurationEngine {
    pub fn new(
        cfg: CurationConfig,
        store: Arc<dyn Store>,
        oracle: DynOracle,
        feed: DynEventFeed,
        sources: Vec<Box<dyn ArticleSource>>,
    ) -> Self {
        let offset = cfg.offset();
        let fetcher = Arc::new(FeedFetcher::new(
            feed,
            cfg.feed_retry(),
            Duration::from_millis(cfg.reconcile.request_delay_ms),
        ));
        let gate = FactCheckGate::new(oracle.clone(), cfg.factcheck.clone());
        Self {
            selector: SlotSelector::new(store.clone(), cfg.capacity.clone()),
            reconciler: Reconciler::new(
                store.clone(),
                fetcher,
                oracle.clone(),
                cfg.reconcile.clone(),
                offset,
            ),
            pipeline: ArticlePipeline::new(store.clone(), oracle.clone(), gate, cfg.scoring.clone()),
            campaigns: CampaignMachine::new(store.clone(), oracle, cfg.schedule.clone(), offset),
            cfg,
            store,
            sources,
            snapshot: None,
        }
    }

    /// Save the memory store to `path` after each mutating run.
    pub fn with_snapshot(mut self, store: Arc<MemoryStore>, path: PathBuf) -> Self {
        self.snapshot = Some((store, path));
        self
    }

    /// Build from config files and the environment:
    /// `CURATION_CONFIG_PATH`, `config/ai.json`, `EVENTS_FEED_URL`,
    /// `INGEST_SOURCES_PATH` and `STORE_SNAPSHOT_PATH`.
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = CurationConfig::load_default().context("loading curation config")?;
        let ai = AiConfig::load_or_default(DEFAULT_AI_CONFIG_PATH);
        let oracle = build_oracle(&ai, &cfg);

        let feed: DynEventFeed = match HttpEventFeed::from_env(Duration::from_secs(30)) {
            Some(f) => Arc::new(f),
            None => {
                tracing::warn!(target: "engine", "EVENTS_FEED_URL not set; event sync will see an empty feed");
                Arc::new(EmptyFeed)
            }
        };

        let sources: Vec<Box<dyn ArticleSource>> = load_sources_default()
            .context("loading article sources")?
            .iter()
            .map(|s| s.provider())
            .collect();

        let snapshot_path = std::env::var(ENV_SNAPSHOT_PATH).ok().map(PathBuf::from);
        let memory = match &snapshot_path {
            Some(p) => Arc::new(MemoryStore::load_snapshot(p)?),
            None => Arc::new(MemoryStore::new()),
        };

        tracing::info!(
            target: "engine",
            oracle = oracle.provider_name(),
            sources = sources.len(),
            snapshot = snapshot_path.is_some(),
            "curation engine ready"
        );

        let engine = Self::new(cfg, memory.clone(), oracle, feed, sources);
        Ok(match snapshot_path {
            Some(p) => engine.with_snapshot(memory, p),
            None => engine,
        })
    }

    pub fn config(&self) -> &CurationConfig {
        &self.cfg
    }

    /// The campaign the next scheduled review acts on.
    pub fn next_campaign_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = now.with_timezone(&self.cfg.offset()).date_naive();
        crate::campaign::schedule::target_date(today, &self.cfg.schedule)
    }

    /// Write the snapshot, if one is configured. Failures are logged.
    pub fn persist(&self) {
        if let Some((store, path)) = &self.snapshot {
            if let Err(e) = store.save_snapshot(path) {
                tracing::error!(target: "engine", error = ?e, "saving store snapshot failed");
            }
        }
    }

    // ---- campaign lifecycle ----

    pub async fn ensure_campaign(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        let c = self.campaigns.ensure_campaign(date, now).await?;
        self.persist();
        Ok(c)
    }

    pub async fn submit_for_review(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let out = self
            .campaigns
            .submit_for_review(date, Trigger::Manual, now)
            .await?;
        self.persist();
        Ok(out)
    }

    pub async fn run_scheduled_review_check(&self, now: DateTime<Utc>) -> Result<ScheduledCheck> {
        let out = self.campaigns.run_scheduled_review_check(now).await?;
        if out.outcome.is_transitioned() {
            self.persist();
        }
        Ok(out)
    }

    pub async fn approve(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        let c = self.campaigns.approve(date, now).await?;
        self.persist();
        Ok(c)
    }

    pub async fn mark_sent(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        let c = self.campaigns.mark_sent(date, now).await?;
        self.persist();
        Ok(c)
    }

    pub async fn archive(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        let c = self.campaigns.archive(date, now).await?;
        self.persist();
        Ok(c)
    }

    pub async fn readiness(&self, date: NaiveDate) -> Result<ReadinessReport> {
        self.campaigns.readiness(date).await
    }

    // ---- articles ----

    pub async fn ingest(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<IngestReport> {
        ingest_articles(self.store.as_ref(), &self.sources, date, now).await
    }

    pub async fn process_articles(
        &self,
        date: NaiveDate,
        rescore: bool,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport> {
        let r = self.pipeline.run(date, rescore, now).await?;
        self.persist();
        Ok(r)
    }

    pub async fn articles(&self, date: NaiveDate) -> Result<Vec<CandidateArticle>> {
        self.store.articles_for_campaign(date).await
    }

    /// Operator override: the article counts as verified.
    pub async fn force_include(&self, article_id: &str) -> Result<CandidateArticle> {
        let mut a = self
            .store
            .article(article_id)
            .await?
            .ok_or_else(|| CurationError::NotFound(format!("article {article_id}")))?;
        a.force_include = true;
        a.needs_review = false;
        self.store.save_article(a.clone()).await?;
        tracing::info!(target: "engine", id = article_id, "article force-included");
        self.persist();
        Ok(a)
    }

    // ---- selection ----

    pub async fn select_section(
        &self,
        date: NaiveDate,
        section: SectionKind,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome> {
        let out = self.pick(date, section, PickMode::Select, now).await?;
        self.persist();
        Ok(out)
    }

    pub async fn select_all(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Vec<SelectionOutcome>> {
        let mut out = Vec::with_capacity(SectionKind::ALL.len());
        for section in SectionKind::ALL {
            out.push(self.pick(date, section, PickMode::Select, now).await?);
        }
        self.persist();
        Ok(out)
    }

    pub async fn reselect(
        &self,
        date: NaiveDate,
        section: SectionKind,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome> {
        let out = self.pick(date, section, PickMode::Reselect, now).await?;
        self.persist();
        Ok(out)
    }

    pub async fn deselect(&self, date: NaiveDate, section: SectionKind, candidate_id: &str) -> Result<Selection> {
        let row = self.selector.deselect(date, section, candidate_id).await?;
        self.persist();
        Ok(row)
    }

    pub async fn restore(&self, date: NaiveDate, section: SectionKind, candidate_id: &str) -> Result<Selection> {
        let row = self.selector.restore(date, section, candidate_id).await?;
        self.persist();
        Ok(row)
    }

    async fn pick(
        &self,
        date: NaiveDate,
        section: SectionKind,
        mode: PickMode,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome> {
        match section {
            SectionKind::Articles => {
                let articles = self.store.articles_for_campaign(date).await?;
                self.run_selector(date, section, &articles, mode, now).await
            }
            SectionKind::Events | SectionKind::SponsoredEvents => {
                let events = self.store.active_events().await?;
                let offset = self.cfg.offset();
                let slots: Vec<EventSlot<'_>> = events
                    .iter()
                    .map(|e| EventSlot::new(e, section, date, offset))
                    .collect();
                self.run_selector(date, section, &slots, mode, now).await
            }
            SectionKind::DiningDeals => {
                let slots: Vec<RotationSlot> = self
                    .store
                    .dining_deals()
                    .await?
                    .iter()
                    .map(|d| RotationSlot::from_deal(d, date))
                    .collect();
                let out = self.run_selector(date, section, &slots, mode, now).await?;
                self.record_rotation(date, &out).await?;
                Ok(out)
            }
            SectionKind::Getaways => {
                let slots: Vec<RotationSlot> = self
                    .store
                    .getaways()
                    .await?
                    .iter()
                    .map(|l| RotationSlot::from_listing(l, date))
                    .collect();
                let out = self.run_selector(date, section, &slots, mode, now).await?;
                self.record_rotation(date, &out).await?;
                Ok(out)
            }
        }
    }

    async fn run_selector<C: SlotCandidate + Sync>(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidates: &[C],
        mode: PickMode,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome> {
        match mode {
            PickMode::Select => self.selector.select(date, section, candidates, now).await,
            PickMode::Reselect => self.selector.reselect(date, section, candidates, now).await,
        }
    }

    /// Stamp only the rows this call wrote; earlier picks keep their date.
    async fn record_rotation(&self, date: NaiveDate, out: &SelectionOutcome) -> Result<()> {
        if out.added.is_empty() {
            return Ok(());
        }
        self.store.record_featured(out.section, &out.added, date).await
    }

    // ---- events ----

    /// Rolling window when `range` is `None`, otherwise a manual override.
    pub async fn sync_events(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let window = match range {
            Some((start, end)) => SyncWindow::override_range(start, end)?,
            None => self.reconciler.rolling_window(now),
        };
        let report = self.reconciler.run(window, now).await;
        // partial upserts are kept even when the run fails
        self.persist();
        report
    }

    pub async fn set_event_flags(
        &self,
        external_id: &str,
        featured: Option<bool>,
        paid_placement: Option<bool>,
    ) -> Result<ExternalEvent> {
        let ev = self
            .store
            .set_event_flags(external_id, featured, paid_placement)
            .await?;
        tracing::info!(target: "engine", id = external_id, featured = ev.featured, paid = ev.paid_placement, "event flags updated");
        self.persist();
        Ok(ev)
    }

    // ---- daily run ----

    /// Create the campaign, ingest, process articles and fill every section.
    pub async fn run_daily(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<DailyReport> {
        let campaign = self.ensure_campaign(date, now).await?;
        let ingest = self.ingest(date, now).await?;
        let pipeline = self.pipeline.run(date, false, now).await?;

        let mut sections = Vec::with_capacity(SectionKind::ALL.len());
        for section in SectionKind::ALL {
            let out = self.pick(date, section, PickMode::Select, now).await?;
            sections.push(SectionSummary::from_outcome(&out, self.selector.capacity(section)));
        }
        self.persist();

        tracing::info!(
            target: "engine",
            %date,
            inserted = ingest.inserted,
            scored = pipeline.scored,
            articles = sections.first().map(|s| s.selected).unwrap_or(0),
            "daily run finished"
        );
        Ok(DailyReport {
            campaign,
            ingest,
            pipeline,
            sections,
        })
    }
}
