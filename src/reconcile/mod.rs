// src/reconcile/mod.rs
//! External source reconciler.
//!
//! One run: fetch every segment of the window (bounded parallelism, each page
//! through the shared retry and rate limit), normalize and dedupe the items,
//! upsert them in bounded batches while the run budget lasts, then run the
//! deactivation pass strictly after all upserts.
//!
//! A failed day or item is logged and counted; only a feed that was
//! unreachable for the whole window fails the run.

pub mod deactivate;
pub mod merge;
pub mod window;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;

use crate::budget::RunBudget;
use crate::config::ReconcileConfig;
use crate::error::{CurationError, Result};
use crate::feed::{FeedEvent, FeedFetcher, FeedPageRequest};
use crate::model::ExternalEvent;
use crate::oracle::DynOracle;
use crate::store::Store;
use deactivate::{plan_deactivation, protected_event_ids};
use merge::{feed_fields_changed, merge_event, normalize_item, NormalizedItem};
pub use window::{SyncWindow, WindowKind};

/// Result contract of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    /// Raw items returned by the feed across all pages.
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    /// Existing rows whose feed-owned fields did not change.
    pub unchanged: usize,
    /// Failed days, rejected items and failed upserts.
    pub errors: usize,
    pub summaries_generated: usize,
    pub summary_failures: usize,
    pub deactivated: usize,
    pub protected: usize,
    pub days_total: usize,
    pub days_failed: usize,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub budget_exhausted: bool,
    pub deactivation_skipped: bool,
}

struct SegmentFetch {
    start: NaiveDate,
    items: Vec<FeedEvent>,
    pages: u32,
    failed: bool,
    /// Stopped early because the run budget ran out.
    truncated: bool,
}

enum ItemOutcome {
    New { summarized: Option<bool> },
    Updated { changed: bool, summarized: Option<bool> },
    Failed,
}

pub struct Reconciler<S: Store + ?Sized> {
    store: Arc<S>,
    fetcher: Arc<FeedFetcher>,
    oracle: DynOracle,
    cfg: ReconcileConfig,
    offset: FixedOffset,
}

impl<S: Store + ?Sized> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        fetcher: Arc<FeedFetcher>,
        oracle: DynOracle,
        cfg: ReconcileConfig,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            fetcher,
            oracle,
            cfg,
            offset,
        }
    }

    /// The default window: local today through the configured number of days.
    pub fn rolling_window(&self, now: DateTime<Utc>) -> SyncWindow {
        let today = now.with_timezone(&self.offset).date_naive();
        SyncWindow::rolling(today, self.cfg.window_days)
    }

    pub async fn run(&self, window: SyncWindow, now: DateTime<Utc>) -> Result<SyncReport> {
        let budget = RunBudget::start(Duration::from_secs(self.cfg.run_budget_secs));
        let segments = window.segments();
        let mut report = SyncReport {
            window_start: Some(window.start),
            window_end: Some(window.end),
            days_total: segments.len(),
            ..SyncReport::default()
        };

        tracing::info!(
            target: "reconcile",
            start = %window.start,
            end = %window.end,
            kind = ?window.kind,
            feed = self.fetcher.feed_name(),
            "sync started"
        );

        // 1) fetch
        let fetches: Vec<_> = segments
            .iter()
            .map(|&(start, end)| self.fetch_segment(start, end, &budget))
            .collect();
        let fetched: Vec<SegmentFetch> = stream::iter(fetches)
            .buffer_unordered(self.cfg.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut raw = Vec::new();
        for seg in fetched {
            if seg.failed {
                report.days_failed += 1;
                report.errors += 1;
            }
            report.budget_exhausted |= seg.truncated;
            tracing::debug!(target: "reconcile", day = %seg.start, pages = seg.pages, items = seg.items.len(), "segment fetched");
            raw.extend(seg.items);
        }
        report.fetched = raw.len();

        if report.days_total > 0 && report.days_failed == report.days_total {
            counter!("reconcile_errors_total").increment(report.errors as u64);
            tracing::error!(target: "reconcile", days = report.days_total, "feed unreachable for the whole window");
            return Err(CurationError::SourceUnavailable {
                report: Box::new(report),
            });
        }

        // 2) normalize + dedupe across days
        let mut seen: HashSet<String> = HashSet::new();
        let mut items: Vec<NormalizedItem> = Vec::new();
        for r in &raw {
            if !r.id.trim().is_empty() {
                let key = merge::external_key(&self.cfg.external_id_prefix, &r.id);
                if !seen.insert(key) {
                    continue;
                }
            }
            match normalize_item(r, &self.cfg.external_id_prefix, self.offset) {
                Ok(item) => items.push(item),
                Err(reason) => {
                    report.errors += 1;
                    tracing::warn!(target: "reconcile", %reason, "feed item rejected");
                }
            }
        }

        // 3) batched upserts
        let batch_size = self.cfg.batch_size.max(1);
        report.batches_total = items.len().div_ceil(batch_size);
        for batch in items.chunks(batch_size) {
            if budget.is_exhausted() {
                report.budget_exhausted = true;
                tracing::warn!(
                    target: "reconcile",
                    completed = report.batches_completed,
                    total = report.batches_total,
                    elapsed_ms = budget.elapsed().as_millis() as u64,
                    "run budget exhausted; stopping before next batch"
                );
                break;
            }
            let work: Vec<_> = batch.iter().map(|item| self.upsert_item(item, now)).collect();
            let outcomes: Vec<ItemOutcome> = stream::iter(work)
                .buffer_unordered(self.cfg.concurrency.max(1))
                .collect()
                .await;
            for o in outcomes {
                let summarized = match o {
                    ItemOutcome::New { summarized } => {
                        report.new += 1;
                        summarized
                    }
                    ItemOutcome::Updated { changed, summarized } => {
                        if changed {
                            report.updated += 1;
                        } else {
                            report.unchanged += 1;
                        }
                        summarized
                    }
                    ItemOutcome::Failed => {
                        report.errors += 1;
                        None
                    }
                };
                match summarized {
                    Some(true) => report.summaries_generated += 1,
                    Some(false) => report.summary_failures += 1,
                    None => {}
                }
            }
            report.batches_completed += 1;
        }

        // 4) deactivation, only after every upsert above has completed
        if report.budget_exhausted {
            report.deactivation_skipped = true;
            tracing::warn!(target: "reconcile", "deactivation skipped: incomplete run");
        } else {
            self.deactivate(&seen, now, &mut report).await?;
        }

        counter!("reconcile_fetched_total").increment(report.fetched as u64);
        counter!("reconcile_new_total").increment(report.new as u64);
        counter!("reconcile_updated_total").increment(report.updated as u64);
        counter!("reconcile_errors_total").increment(report.errors as u64);
        counter!("reconcile_deactivated_total").increment(report.deactivated as u64);
        gauge!("reconcile_last_run_ts").set(now.timestamp() as f64);

        tracing::info!(
            target: "reconcile",
            fetched = report.fetched,
            new = report.new,
            updated = report.updated,
            errors = report.errors,
            deactivated = report.deactivated,
            protected = report.protected,
            days_failed = report.days_failed,
            "sync finished"
        );
        Ok(report)
    }

    /// All pages of one segment. A page failure after retries ends the
    /// segment; items from earlier pages are kept.
    async fn fetch_segment(&self, start: NaiveDate, end: NaiveDate, budget: &RunBudget) -> SegmentFetch {
        let mut out = SegmentFetch {
            start,
            items: Vec::new(),
            pages: 0,
            failed: false,
            truncated: false,
        };
        for page in 1..=self.cfg.max_pages_per_day.max(1) {
            if budget.is_exhausted() {
                out.truncated = true;
                break;
            }
            let req = FeedPageRequest {
                start_date: start,
                end_date: end,
                page,
                per_page: self.cfg.per_page,
            };
            match self.fetcher.fetch(&req).await {
                Ok(p) => {
                    out.pages += 1;
                    let n = p.events.len();
                    out.items.extend(p.events);
                    if n < self.cfg.per_page as usize {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "reconcile", day = %start, page, error = %e, "feed page failed; skipping rest of day");
                    out.failed = true;
                    break;
                }
            }
        }
        out
    }

    async fn upsert_item(&self, item: &NormalizedItem, now: DateTime<Utc>) -> ItemOutcome {
        let before = match self.store.event(&item.external_id).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(target: "reconcile", id = %item.external_id, error = %e, "event lookup failed");
                return ItemOutcome::Failed;
            }
        };
        let changed = before
            .as_ref()
            .is_some_and(|b| feed_fields_changed(b, item));

        let merge = |existing: Option<&ExternalEvent>| merge_event(existing, item, now);
        let up = match self.store.upsert_event_with(&item.external_id, &merge).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(target: "reconcile", id = %item.external_id, error = %e, "event upsert failed");
                return ItemOutcome::Failed;
            }
        };

        let summarized = self.summarize_if_missing(&up.event).await;
        if up.created {
            ItemOutcome::New { summarized }
        } else {
            ItemOutcome::Updated { changed, summarized }
        }
    }

    /// `None` when no summary was needed; otherwise whether generation worked.
    async fn summarize_if_missing(&self, ev: &ExternalEvent) -> Option<bool> {
        if ev.summary.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            return None;
        }
        if ev.description.chars().count() < self.cfg.summary_min_chars {
            return None;
        }
        match self.oracle.summarize_event(&ev.title, &ev.description).await {
            Ok(summary) => match self.store.set_summary_if_absent(&ev.external_id, &summary).await {
                Ok(_) => Some(true),
                Err(e) => {
                    tracing::warn!(target: "reconcile", id = %ev.external_id, error = %e, "storing summary failed");
                    Some(false)
                }
            },
            Err(e) => {
                tracing::warn!(target: "reconcile", id = %ev.external_id, error = %e, "summary generation failed");
                Some(false)
            }
        }
    }

    async fn deactivate(
        &self,
        seen: &HashSet<String>,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let active = self
            .store
            .active_events_with_prefix(&self.cfg.external_id_prefix)
            .await?;
        let protected = protected_event_ids(self.store.as_ref(), self.cfg.protection).await?;
        let plan = plan_deactivation(&active, seen, &protected, now);

        report.protected = plan.protected.len();
        for id in &plan.protected {
            tracing::info!(target: "reconcile", id = %id, "protected from deactivation");
        }
        for id in &plan.deactivate {
            match self.store.set_event_active(id, false).await {
                Ok(_) => report.deactivated += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(target: "reconcile", id = %id, error = %e, "deactivation failed");
                }
            }
        }
        Ok(())
    }
}
