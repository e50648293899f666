// src/campaign/mod.rs
//! Campaign state machine: draft → in_review → approved → sent, with archive
//! reachable from any state.
//!
//! Automatic transitions (the scheduled review check) return a
//! [`TransitionOutcome`] and skip silently when a precondition is not met.
//! Human actions return an error instead.

pub mod schedule;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use metrics::counter;
use serde::Serialize;

use crate::config::ScheduleConfig;
use crate::error::{CurationError, Result};
use crate::model::{Campaign, CampaignStatus, SectionKind};
use crate::oracle::DynOracle;
use crate::store::{ArticleStore, CampaignStore, SelectionStore, TransitionRequest, TransitionWrite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "status", rename_all = "snake_case")]
pub enum SkipReason {
    NotDue,
    /// The scheduled check already transitioned a campaign today.
    AlreadyRun,
    CampaignMissing,
    WrongStatus(CampaignStatus),
    NoActiveArticles,
    SubjectLineUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Transitioned { campaign: Campaign },
    Skipped { skip: SkipReason },
}

impl TransitionOutcome {
    fn skipped(reason: SkipReason) -> Self {
        TransitionOutcome::Skipped { skip: reason }
    }

    pub fn is_transitioned(&self) -> bool {
        matches!(self, TransitionOutcome::Transitioned { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledCheck {
    pub target_date: Option<NaiveDate>,
    pub outcome: TransitionOutcome,
}

/// Whether a campaign's selected articles are cleared for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub date: NaiveDate,
    pub status: CampaignStatus,
    pub has_subject_line: bool,
    pub selected_articles: usize,
    pub verified: usize,
    /// Copy missing or not yet fact-checked.
    pub pending: usize,
    pub needs_review: usize,
    pub pending_ids: Vec<String>,
    pub ready: bool,
}

pub struct CampaignMachine<S: CampaignStore + ArticleStore + SelectionStore + ?Sized> {
    store: Arc<S>,
    oracle: DynOracle,
    schedule: ScheduleConfig,
    offset: FixedOffset,
}

impl<S: CampaignStore + ArticleStore + SelectionStore + ?Sized> CampaignMachine<S> {
    pub fn new(store: Arc<S>, oracle: DynOracle, schedule: ScheduleConfig, offset: FixedOffset) -> Self {
        Self {
            store,
            oracle,
            schedule,
            offset,
        }
    }

    /// Create the draft for `date` unless it exists.
    pub async fn ensure_campaign(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        let (c, created) = self
            .store
            .insert_campaign_if_absent(Campaign::new(date, now))
            .await?;
        if created {
            tracing::info!(target: "campaign", %date, "campaign created");
        }
        Ok(c)
    }

    pub async fn submit_for_review(
        &self,
        date: NaiveDate,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        self.try_submit(date, trigger, None, now).await
    }

    /// Submit the next campaign when called inside the configured window.
    /// At most one transition per local day, however often this runs.
    pub async fn run_scheduled_review_check(&self, now: DateTime<Utc>) -> Result<ScheduledCheck> {
        let Some(day) = schedule::due_day(now, &self.schedule, self.offset) else {
            tracing::debug!(target: "campaign", "review check not due");
            return Ok(ScheduledCheck {
                target_date: None,
                outcome: TransitionOutcome::skipped(SkipReason::NotDue),
            });
        };
        let target = schedule::target_date(day, &self.schedule);
        let outcome = self
            .try_submit(target, Trigger::Scheduled, Some(day), now)
            .await?;
        Ok(ScheduledCheck {
            target_date: Some(target),
            outcome,
        })
    }

    async fn try_submit(
        &self,
        date: NaiveDate,
        trigger: Trigger,
        guard: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let Some(campaign) = self.store.campaign(date).await? else {
            return Ok(self.skip(date, trigger, SkipReason::CampaignMissing));
        };
        if guard.is_some() && campaign.review_check_on == guard {
            return Ok(self.skip(date, trigger, SkipReason::AlreadyRun));
        }
        if campaign.status != CampaignStatus::Draft {
            return Ok(self.skip(date, trigger, SkipReason::WrongStatus(campaign.status)));
        }

        let headlines = self.selected_headlines(date).await?;
        if headlines.is_empty() {
            return Ok(self.skip(date, trigger, SkipReason::NoActiveArticles));
        }

        if !campaign.has_subject_line() {
            match self.oracle.subject_line(&headlines).await {
                Ok(s) if !s.trim().is_empty() => {
                    self.store.set_subject_line(date, s.trim()).await?;
                }
                Ok(_) => return Ok(self.skip(date, trigger, SkipReason::SubjectLineUnavailable)),
                Err(e) => {
                    tracing::warn!(target: "campaign", %date, error = %e, "subject line generation failed");
                    return Ok(self.skip(date, trigger, SkipReason::SubjectLineUnavailable));
                }
            }
        }

        let req = TransitionRequest {
            date,
            from: vec![CampaignStatus::Draft],
            to: CampaignStatus::InReview,
            at: now,
            review_guard: guard,
        };
        Ok(match self.store.transition(req).await? {
            TransitionWrite::Applied(c) => {
                record_transition(&c, trigger);
                TransitionOutcome::Transitioned { campaign: c }
            }
            TransitionWrite::StatusMismatch(s) => self.skip(date, trigger, SkipReason::WrongStatus(s)),
            TransitionWrite::GuardAlreadySet => self.skip(date, trigger, SkipReason::AlreadyRun),
            TransitionWrite::Missing => self.skip(date, trigger, SkipReason::CampaignMissing),
        })
    }

    fn skip(&self, date: NaiveDate, trigger: Trigger, reason: SkipReason) -> TransitionOutcome {
        tracing::info!(target: "campaign", %date, ?trigger, ?reason, "review submission skipped");
        TransitionOutcome::skipped(reason)
    }

    /// Headlines of the selected, still active articles, in display order.
    async fn selected_headlines(&self, date: NaiveDate) -> Result<Vec<String>> {
        let rows = self.store.selections(date, SectionKind::Articles).await?;
        let mut out = Vec::new();
        for row in rows.iter().filter(|r| r.is_selected) {
            if let Some(a) = self.store.article(&row.candidate_id).await? {
                if a.is_active {
                    out.push(
                        a.generated
                            .as_ref()
                            .map(|g| g.headline.clone())
                            .unwrap_or(a.title),
                    );
                }
            }
        }
        Ok(out)
    }

    pub async fn readiness(&self, date: NaiveDate) -> Result<ReadinessReport> {
        let campaign = self
            .store
            .campaign(date)
            .await?
            .ok_or_else(|| CurationError::NotFound(format!("campaign {date}")))?;
        let rows = self.store.selections(date, SectionKind::Articles).await?;

        let mut report = ReadinessReport {
            date,
            status: campaign.status,
            has_subject_line: campaign.has_subject_line(),
            selected_articles: 0,
            verified: 0,
            pending: 0,
            needs_review: 0,
            pending_ids: Vec::new(),
            ready: false,
        };
        for row in rows.iter().filter(|r| r.is_selected) {
            report.selected_articles += 1;
            match self.store.article(&row.candidate_id).await? {
                Some(a) if a.is_verified() => report.verified += 1,
                Some(a) if a.needs_review => {
                    report.needs_review += 1;
                    report.pending_ids.push(a.id);
                }
                _ => {
                    report.pending += 1;
                    report.pending_ids.push(row.candidate_id.clone());
                }
            }
        }
        report.ready = report.selected_articles > 0
            && report.verified == report.selected_articles
            && report.has_subject_line;
        Ok(report)
    }

    /// in_review → approved. Refused while any selected article is unverified.
    pub async fn approve(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        let readiness = self.readiness(date).await?;
        if readiness.status != CampaignStatus::InReview {
            return Err(CurationError::InvalidTransition(format!(
                "cannot approve a campaign in {}",
                readiness.status.as_str()
            )));
        }
        if !readiness.ready {
            return Err(CurationError::InvalidTransition(format!(
                "{} of {} selected articles not verified",
                readiness.pending + readiness.needs_review,
                readiness.selected_articles
            )));
        }
        self.human_transition(date, &[CampaignStatus::InReview], CampaignStatus::Approved, now)
            .await
    }

    /// approved → sent. Delivery itself happens elsewhere.
    pub async fn mark_sent(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        self.human_transition(date, &[CampaignStatus::Approved], CampaignStatus::Sent, now)
            .await
    }

    pub async fn archive(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Campaign> {
        self.human_transition(
            date,
            &[
                CampaignStatus::Draft,
                CampaignStatus::InReview,
                CampaignStatus::Approved,
                CampaignStatus::Sent,
            ],
            CampaignStatus::Archived,
            now,
        )
        .await
    }

    async fn human_transition(
        &self,
        date: NaiveDate,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        let req = TransitionRequest {
            date,
            from: from.to_vec(),
            to,
            at: now,
            review_guard: None,
        };
        match self.store.transition(req).await? {
            TransitionWrite::Applied(c) => {
                record_transition(&c, Trigger::Manual);
                Ok(c)
            }
            TransitionWrite::StatusMismatch(s) => Err(CurationError::InvalidTransition(format!(
                "{} → {} not allowed",
                s.as_str(),
                to.as_str()
            ))),
            TransitionWrite::GuardAlreadySet => Err(CurationError::InvalidTransition(
                "review guard already set".to_string(),
            )),
            TransitionWrite::Missing => Err(CurationError::NotFound(format!("campaign {date}"))),
        }
    }
}

fn record_transition(c: &Campaign, trigger: Trigger) {
    counter!("campaign_transitions_total", "to" => c.status.as_str()).increment(1);
    tracing::info!(target: "campaign", date = %c.date, to = c.status.as_str(), ?trigger, "campaign transitioned");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateArticle, GeneratedCopy, Selection};
    use crate::oracle::provider::MockProvider;
    use crate::oracle::OracleClient;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()
    }

    fn machine(store: Arc<MemoryStore>) -> CampaignMachine<MemoryStore> {
        let oracle: DynOracle = Arc::new(OracleClient::new(
            MockProvider,
            Duration::from_secs(1),
            RetryPolicy::none(),
        ));
        CampaignMachine::new(
            store,
            oracle,
            ScheduleConfig::default(),
            FixedOffset::west_opt(5 * 3600).unwrap(),
        )
    }

    async fn seed_selected_article(store: &MemoryStore, verified: bool) {
        let now = Utc::now();
        let mut a = CandidateArticle::new(
            "a1".into(),
            date(),
            "Gazette".into(),
            "Library adds Sunday hours".into(),
            "Body".into(),
            "https://gazette.test/a1".into(),
            now,
        );
        a.rank_score = Some(20.0);
        if verified {
            a.force_include = true;
        }
        a.generated = Some(GeneratedCopy {
            version: 1,
            headline: "Sunday hours".into(),
            body: "Body".into(),
            generated_at: now,
        });
        store.insert_article_if_absent(a).await.unwrap();
        let row = Selection {
            campaign_date: date(),
            section: SectionKind::Articles,
            candidate_id: "a1".into(),
            selection_order: 1,
            is_featured: true,
            is_selected: true,
            rank_score: 20.0,
            selected_at: now,
        };
        store
            .insert_initial(date(), SectionKind::Articles, vec![row])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submit_without_articles_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone());
        m.ensure_campaign(date(), Utc::now()).await.unwrap();
        let out = m
            .submit_for_review(date(), Trigger::Manual, Utc::now())
            .await
            .unwrap();
        assert_eq!(out, TransitionOutcome::skipped(SkipReason::NoActiveArticles));
    }

    #[tokio::test]
    async fn submit_generates_subject_and_transitions() {
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone());
        m.ensure_campaign(date(), Utc::now()).await.unwrap();
        seed_selected_article(&store, false).await;

        let out = m
            .submit_for_review(date(), Trigger::Manual, Utc::now())
            .await
            .unwrap();
        let TransitionOutcome::Transitioned { campaign } = out else {
            panic!("expected transition, got {out:?}");
        };
        assert_eq!(campaign.status, CampaignStatus::InReview);
        assert_eq!(campaign.subject_line.as_deref(), Some("Your local news roundup"));
        assert!(campaign.submitted_at.is_some());
    }

    #[tokio::test]
    async fn scheduled_check_transitions_once_per_day() {
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone());
        m.ensure_campaign(date(), Utc::now()).await.unwrap();
        seed_selected_article(&store, false).await;

        // 20:05 local on June 2nd
        let at = Utc.with_ymd_and_hms(2025, 6, 3, 1, 5, 0).unwrap();
        let first = m.run_scheduled_review_check(at).await.unwrap();
        assert_eq!(first.target_date, Some(date()));
        assert!(first.outcome.is_transitioned());

        let second = m
            .run_scheduled_review_check(at + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(second.outcome, TransitionOutcome::skipped(SkipReason::AlreadyRun));

        let off = m
            .run_scheduled_review_check(at + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(off.outcome, TransitionOutcome::skipped(SkipReason::NotDue));
    }

    #[tokio::test]
    async fn approve_requires_verified_articles() {
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone());
        m.ensure_campaign(date(), Utc::now()).await.unwrap();
        seed_selected_article(&store, false).await;
        m.submit_for_review(date(), Trigger::Manual, Utc::now())
            .await
            .unwrap();

        let err = m.approve(date(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CurationError::InvalidTransition(_)));
        let r = m.readiness(date()).await.unwrap();
        assert_eq!(r.pending, 1);
        assert!(!r.ready);
    }

    #[tokio::test]
    async fn full_lifecycle_with_forced_article() {
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone());
        m.ensure_campaign(date(), Utc::now()).await.unwrap();
        seed_selected_article(&store, true).await;
        m.submit_for_review(date(), Trigger::Manual, Utc::now())
            .await
            .unwrap();

        let c = m.approve(date(), Utc::now()).await.unwrap();
        assert_eq!(c.status, CampaignStatus::Approved);
        let c = m.mark_sent(date(), Utc::now()).await.unwrap();
        assert_eq!(c.status, CampaignStatus::Sent);
        assert!(m.mark_sent(date(), Utc::now()).await.is_err());
        let c = m.archive(date(), Utc::now()).await.unwrap();
        assert_eq!(c.status, CampaignStatus::Archived);
    }
}
