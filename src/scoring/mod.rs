// src/scoring/mod.rs
//! Candidate scorer and deduplicator.
//!
//! A pipeline run over one campaign's pool: score unscored articles, write
//! copy for the best canonical candidates, group same-story articles and
//! retire duplicates, then send new copy through the fact-check gate. Each
//! step persists per article, so a run cut short by the budget resumes where
//! it stopped.

pub mod dedup;
pub mod scorer;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;

use crate::budget::RunBudget;
use crate::config::ScoringConfig;
use crate::error::Result;
use crate::factcheck::{FactCheckGate, FactCheckReport};
use crate::model::{CandidateArticle, GeneratedCopy};
use crate::oracle::DynOracle;
use crate::store::ArticleStore;
use dedup::{apply_groups, resolve_groups};
use scorer::score_article;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub candidates: usize,
    pub scored: usize,
    pub score_failures: usize,
    pub rewritten: usize,
    pub rewrite_failures: usize,
    pub topic_groups: usize,
    pub duplicates_retired: usize,
    /// Dedup call failed; every candidate was kept as unique.
    pub dedup_failed: bool,
    pub fact_check: FactCheckReport,
    pub budget_exhausted: bool,
}

pub struct ArticlePipeline<S: ArticleStore + ?Sized> {
    store: Arc<S>,
    oracle: DynOracle,
    gate: FactCheckGate,
    cfg: ScoringConfig,
}

impl<S: ArticleStore + ?Sized> ArticlePipeline<S> {
    pub fn new(store: Arc<S>, oracle: DynOracle, gate: FactCheckGate, cfg: ScoringConfig) -> Self {
        Self {
            store,
            oracle,
            gate,
            cfg,
        }
    }

    /// Run every step for `date`. With `rescore`, already scored articles are
    /// scored again.
    pub async fn run(&self, date: NaiveDate, rescore: bool, now: DateTime<Utc>) -> Result<PipelineReport> {
        let budget = RunBudget::start(Duration::from_secs(self.cfg.run_budget_secs));
        let mut report = PipelineReport::default();
        let mut articles = self.store.articles_for_campaign(date).await?;
        report.candidates = articles.len();

        self.score_step(&mut articles, rescore, &budget, now, &mut report)
            .await?;
        if !report.budget_exhausted {
            self.rewrite_step(&mut articles, &budget, now, &mut report)
                .await?;
        }
        if !report.budget_exhausted {
            self.dedup_step(date, &mut articles, &mut report).await?;
        }
        // retired duplicates free their rewrite slots for the new canonicals
        if !report.budget_exhausted && report.duplicates_retired > 0 {
            self.rewrite_step(&mut articles, &budget, now, &mut report)
                .await?;
        }
        if !report.budget_exhausted {
            self.fact_check_step(&mut articles, &budget, now, &mut report)
                .await?;
        }

        tracing::info!(
            target: "scoring",
            %date,
            candidates = report.candidates,
            scored = report.scored,
            score_failures = report.score_failures,
            rewritten = report.rewritten,
            groups = report.topic_groups,
            retired = report.duplicates_retired,
            verified = report.fact_check.passed,
            budget_exhausted = report.budget_exhausted,
            "article pipeline finished"
        );
        Ok(report)
    }

    fn batch_size(&self) -> usize {
        self.cfg.concurrency.max(1) * 2
    }

    async fn score_step(
        &self,
        articles: &mut [CandidateArticle],
        rescore: bool,
        budget: &RunBudget,
        now: DateTime<Utc>,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let targets: Vec<usize> = (0..articles.len())
            .filter(|&i| rescore || !articles[i].is_scored())
            .collect();

        for chunk in targets.chunks(self.batch_size()) {
            if budget.is_exhausted() {
                report.budget_exhausted = true;
                tracing::warn!(target: "scoring", remaining = targets.len() - report.scored - report.score_failures, "run budget exhausted during scoring");
                return Ok(());
            }
            let work: Vec<_> = chunk
                .iter()
                .map(|&i| {
                    let mut a = articles[i].clone();
                    let oracle = self.oracle.clone();
                    let cfg = &self.cfg;
                    async move {
                        let ok = score_article(oracle.as_ref(), &mut a, cfg, now).await;
                        (i, a, ok)
                    }
                })
                .collect();
            let done: Vec<(usize, CandidateArticle, bool)> = stream::iter(work)
                .buffer_unordered(self.cfg.concurrency.max(1))
                .collect()
                .await;
            for (i, a, ok) in done {
                if ok {
                    report.scored += 1;
                } else {
                    report.score_failures += 1;
                }
                self.store.save_article(a.clone()).await?;
                articles[i] = a;
            }
        }
        counter!("scoring_articles_total").increment(report.scored as u64);
        counter!("scoring_failures_total").increment(report.score_failures as u64);
        Ok(())
    }

    /// Copy for the top eligible candidates that have none yet.
    async fn rewrite_step(
        &self,
        articles: &mut [CandidateArticle],
        budget: &RunBudget,
        now: DateTime<Utc>,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let mut targets: Vec<usize> = (0..articles.len())
            .filter(|&i| {
                let a = &articles[i];
                a.is_active && a.is_canonical && a.generated.is_none() && a.rank_score.is_some_and(|r| r > 0.0)
            })
            .collect();
        targets.sort_by(|&a, &b| {
            let (a, b) = (&articles[a], &articles[b]);
            b.rank_score
                .unwrap_or(0.0)
                .total_cmp(&a.rank_score.unwrap_or(0.0))
                .then_with(|| a.ingested_at.cmp(&b.ingested_at))
        });
        let already = articles
            .iter()
            .filter(|a| a.is_active && a.is_canonical && a.generated.is_some())
            .count();
        targets.truncate(self.cfg.rewrite_limit.saturating_sub(already));

        for chunk in targets.chunks(self.batch_size()) {
            if budget.is_exhausted() {
                report.budget_exhausted = true;
                tracing::warn!(target: "scoring", "run budget exhausted during rewriting");
                return Ok(());
            }
            let work: Vec<_> = chunk
                .iter()
                .map(|&i| {
                    let a = articles[i].clone();
                    let oracle = self.oracle.clone();
                    async move {
                        let r = oracle.rewrite(&a, None).await;
                        (i, a, r)
                    }
                })
                .collect();
            let done: Vec<_> = stream::iter(work)
                .buffer_unordered(self.cfg.concurrency.max(1))
                .collect()
                .await;
            for (i, mut a, r) in done {
                match r {
                    Ok(copy) => {
                        a.generated = Some(GeneratedCopy {
                            version: 1,
                            headline: copy.headline,
                            body: copy.body,
                            generated_at: now,
                        });
                        report.rewritten += 1;
                        self.store.save_article(a.clone()).await?;
                        articles[i] = a;
                    }
                    Err(e) => {
                        report.rewrite_failures += 1;
                        tracing::warn!(target: "scoring", id = %a.id, error = %e, "rewrite failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn dedup_step(
        &self,
        date: NaiveDate,
        articles: &mut [CandidateArticle],
        report: &mut PipelineReport,
    ) -> Result<()> {
        let pool: Vec<usize> = (0..articles.len())
            .filter(|&i| articles[i].is_active && articles[i].rank_score.is_some_and(|r| r > 0.0))
            .collect();
        let pool_articles: Vec<CandidateArticle> = pool.iter().map(|&i| articles[i].clone()).collect();

        let proposed = match self.oracle.dedupe(&pool_articles).await {
            Ok(g) => g,
            Err(e) => {
                report.dedup_failed = true;
                tracing::warn!(target: "scoring", %date, error = %e, "dedup failed; keeping every candidate");
                Vec::new()
            }
        };
        let resolved = resolve_groups(proposed, pool.len());
        let previous = self.store.topic_groups(date).await?;
        let before: Vec<CandidateArticle> = articles.to_vec();
        let outcome = apply_groups(articles, &pool, &resolved, &previous, date);

        for (a, old) in articles.iter().zip(before.iter()) {
            if a != old {
                self.store.save_article(a.clone()).await?;
            }
        }
        report.topic_groups = outcome.groups.len();
        report.duplicates_retired = outcome.retired.len();
        for id in &outcome.retired {
            tracing::info!(target: "scoring", %date, id = %id, "duplicate retired");
        }
        counter!("dedup_retired_total").increment(outcome.retired.len() as u64);
        self.store.save_topic_groups(date, outcome.groups).await
    }

    async fn fact_check_step(
        &self,
        articles: &mut [CandidateArticle],
        budget: &RunBudget,
        now: DateTime<Utc>,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let targets: Vec<usize> = (0..articles.len())
            .filter(|&i| articles[i].is_canonical && self.gate.needs_check(&articles[i]))
            .collect();

        for chunk in targets.chunks(self.batch_size()) {
            if budget.is_exhausted() {
                report.budget_exhausted = true;
                tracing::warn!(target: "scoring", "run budget exhausted during fact-check");
                return Ok(());
            }
            let gate = &self.gate;
            let work: Vec<_> = chunk
                .iter()
                .map(|&i| {
                    let mut a = articles[i].clone();
                    async move {
                        let v = gate.check(&mut a, now).await;
                        (i, a, v)
                    }
                })
                .collect();
            let done: Vec<_> = stream::iter(work)
                .buffer_unordered(self.cfg.concurrency.max(1))
                .collect()
                .await;
            for (i, a, v) in done {
                report.fact_check.record(v);
                self.store.save_article(a.clone()).await?;
                articles[i] = a;
            }
        }
        Ok(())
    }
}
