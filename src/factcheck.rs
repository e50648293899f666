// src/factcheck.rs
//! Fact-check gate. Generated copy only counts toward campaign readiness once
//! a check on its current version scores at or above the pass threshold.
//!
//! A failing check triggers at most `max_regenerations` rewrites; copy that
//! still fails is handled by the configured [`RepeatedFailurePolicy`].

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::config::{FactCheckConfig, RepeatedFailurePolicy};
use crate::model::{CandidateArticle, FactCheckResult, GeneratedCopy};
use crate::oracle::DynOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Passed,
    /// Passed after a regeneration.
    PassedAfterRegeneration,
    HeldForReview,
    Dropped,
    PublishedAnyway,
    /// No copy to check.
    NoCopy,
    /// The oracle could not produce a verdict; retried on the next run.
    Unavailable,
}

impl GateVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Passed => "passed",
            GateVerdict::PassedAfterRegeneration => "passed_after_regeneration",
            GateVerdict::HeldForReview => "held_for_review",
            GateVerdict::Dropped => "dropped",
            GateVerdict::PublishedAnyway => "published_anyway",
            GateVerdict::NoCopy => "no_copy",
            GateVerdict::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactCheckReport {
    pub checked: usize,
    pub passed: usize,
    pub regenerated: usize,
    pub held_for_review: usize,
    pub dropped: usize,
    pub published_anyway: usize,
    pub unavailable: usize,
}

impl FactCheckReport {
    pub fn record(&mut self, v: GateVerdict) {
        match v {
            GateVerdict::Passed => self.passed += 1,
            GateVerdict::PassedAfterRegeneration => {
                self.passed += 1;
                self.regenerated += 1;
            }
            GateVerdict::HeldForReview => self.held_for_review += 1,
            GateVerdict::Dropped => self.dropped += 1,
            GateVerdict::PublishedAnyway => self.published_anyway += 1,
            GateVerdict::Unavailable => self.unavailable += 1,
            GateVerdict::NoCopy => return,
        }
        self.checked += 1;
    }
}

pub struct FactCheckGate {
    oracle: DynOracle,
    cfg: FactCheckConfig,
}

impl FactCheckGate {
    pub fn new(oracle: DynOracle, cfg: FactCheckConfig) -> Self {
        Self { oracle, cfg }
    }

    /// Whether `article` still needs a trip through [`FactCheckGate::check`].
    pub fn needs_check(&self, article: &CandidateArticle) -> bool {
        let Some(copy) = &article.generated else {
            return false;
        };
        if !article.is_active || article.needs_review || article.force_include {
            return false;
        }
        !article
            .fact_check
            .as_ref()
            .is_some_and(|fc| fc.copy_version == copy.version && fc.passed)
    }

    /// Check the article's current copy, regenerating once on failure.
    /// Mutates the article; the caller persists it.
    pub async fn check(&self, article: &mut CandidateArticle, now: DateTime<Utc>) -> GateVerdict {
        let Some(copy) = article.generated.clone() else {
            return GateVerdict::NoCopy;
        };

        let first = match article.fact_check.clone() {
            Some(fc) if fc.copy_version == copy.version => fc,
            _ => match self.run_check(article, &copy, now).await {
                Some(fc) => fc,
                None => return GateVerdict::Unavailable,
            },
        };
        if first.passed {
            return GateVerdict::Passed;
        }

        if article.regeneration_attempts >= self.cfg.max_regenerations {
            return self.apply_policy(article, first.score);
        }

        article.regeneration_attempts += 1;
        counter!("factcheck_regenerations_total").increment(1);
        let rewritten = match self.oracle.rewrite(article, Some(first.score)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "factcheck", id = %article.id, error = %e, "regeneration failed");
                return self.apply_policy(article, first.score);
            }
        };
        let next = GeneratedCopy {
            version: copy.version + 1,
            headline: rewritten.headline,
            body: rewritten.body,
            generated_at: now,
        };
        article.generated = Some(next.clone());

        match self.run_check(article, &next, now).await {
            Some(fc) if fc.passed => GateVerdict::PassedAfterRegeneration,
            Some(fc) => self.apply_policy(article, fc.score),
            None => GateVerdict::Unavailable,
        }
    }

    async fn run_check(
        &self,
        article: &mut CandidateArticle,
        copy: &GeneratedCopy,
        now: DateTime<Utc>,
    ) -> Option<FactCheckResult> {
        match self.oracle.fact_check(copy, &article.body).await {
            Ok(components) => {
                let fc = FactCheckResult::from_components(
                    &article.id,
                    copy.version,
                    components,
                    self.cfg.pass_threshold,
                    now,
                );
                counter!("factcheck_results_total", "passed" => if fc.passed { "true" } else { "false" })
                    .increment(1);
                tracing::info!(
                    target: "factcheck",
                    id = %article.id,
                    version = copy.version,
                    score = fc.score,
                    passed = fc.passed,
                    "fact-check scored"
                );
                article.fact_check = Some(fc.clone());
                Some(fc)
            }
            Err(e) => {
                tracing::warn!(target: "factcheck", id = %article.id, error = %e, "fact-check unavailable");
                None
            }
        }
    }

    fn apply_policy(&self, article: &mut CandidateArticle, score: u8) -> GateVerdict {
        let verdict = match self.cfg.on_repeated_failure {
            RepeatedFailurePolicy::HoldForReview => {
                article.needs_review = true;
                GateVerdict::HeldForReview
            }
            RepeatedFailurePolicy::Drop => {
                article.is_active = false;
                GateVerdict::Dropped
            }
            RepeatedFailurePolicy::PublishAnyway => {
                article.force_include = true;
                GateVerdict::PublishedAnyway
            }
        };
        tracing::warn!(
            target: "factcheck",
            id = %article.id,
            score,
            threshold = self.cfg.pass_threshold,
            verdict = verdict.as_str(),
            "copy failed fact-check after regeneration"
        );
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::model::CriteriaScores;
    use crate::oracle::{FactCheckScores, Oracle, RewrittenCopy};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns queued fact-check scores in order; rewrites always succeed.
    struct Checks {
        queue: Mutex<Vec<FactCheckScores>>,
        rewrites: AtomicUsize,
    }

    impl Checks {
        fn new(mut scores: Vec<FactCheckScores>) -> Arc<Self> {
            scores.reverse();
            Arc::new(Self {
                queue: Mutex::new(scores),
                rewrites: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Oracle for Checks {
        async fn score(&self, _a: &CandidateArticle) -> Result<CriteriaScores, OracleError> {
            Err(OracleError::Disabled)
        }
        async fn dedupe(&self, _a: &[CandidateArticle]) -> Result<Vec<Vec<usize>>, OracleError> {
            Ok(Vec::new())
        }
        async fn rewrite(
            &self,
            a: &CandidateArticle,
            _failed: Option<u8>,
        ) -> Result<RewrittenCopy, OracleError> {
            self.rewrites.fetch_add(1, Ordering::SeqCst);
            Ok(RewrittenCopy {
                headline: a.title.clone(),
                body: "Rewritten".into(),
            })
        }
        async fn fact_check(&self, _g: &GeneratedCopy, _o: &str) -> Result<FactCheckScores, OracleError> {
            self.queue
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| OracleError::Transient("no more".into()))
        }
        async fn summarize_event(&self, _t: &str, _d: &str) -> Result<String, OracleError> {
            Err(OracleError::Disabled)
        }
        async fn subject_line(&self, _h: &[String]) -> Result<String, OracleError> {
            Err(OracleError::Disabled)
        }
        fn provider_name(&self) -> &'static str {
            "checks"
        }
    }

    fn article() -> CandidateArticle {
        let now = Utc::now();
        let mut a = CandidateArticle::new(
            "a1".into(),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            "Gazette".into(),
            "Library expands hours".into(),
            "The library will open on Sundays.".into(),
            "https://gazette.test/a1".into(),
            now,
        );
        a.generated = Some(GeneratedCopy {
            version: 1,
            headline: "Library adds Sundays".into(),
            body: "Sunday hours start soon.".into(),
            generated_at: now,
        });
        a
    }

    fn gate(oracle: Arc<Checks>, policy: RepeatedFailurePolicy) -> FactCheckGate {
        FactCheckGate::new(
            oracle,
            FactCheckConfig {
                on_repeated_failure: policy,
                ..FactCheckConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn twenty_passes_without_regeneration() {
        let o = Checks::new(vec![[7, 7, 6]]);
        let g = gate(o.clone(), RepeatedFailurePolicy::HoldForReview);
        let mut a = article();
        assert_eq!(g.check(&mut a, Utc::now()).await, GateVerdict::Passed);
        assert!(a.is_verified());
        assert_eq!(o.rewrites.load(Ordering::SeqCst), 0);
        assert!(!g.needs_check(&a));
    }

    #[tokio::test]
    async fn eighteen_fails_and_regenerates_once() {
        let o = Checks::new(vec![[6, 6, 6], [8, 8, 8]]);
        let g = gate(o.clone(), RepeatedFailurePolicy::HoldForReview);
        let mut a = article();
        assert_eq!(
            g.check(&mut a, Utc::now()).await,
            GateVerdict::PassedAfterRegeneration
        );
        assert_eq!(a.generated.as_ref().unwrap().version, 2);
        assert_eq!(a.regeneration_attempts, 1);
        assert!(a.is_verified());
    }

    #[tokio::test]
    async fn second_failure_is_held_and_never_regenerated_again() {
        let o = Checks::new(vec![[6, 6, 6], [5, 5, 5]]);
        let g = gate(o.clone(), RepeatedFailurePolicy::HoldForReview);
        let mut a = article();
        assert_eq!(g.check(&mut a, Utc::now()).await, GateVerdict::HeldForReview);
        assert!(a.needs_review);
        assert!(!a.is_verified());

        // later runs reuse the stored result
        assert_eq!(g.check(&mut a, Utc::now()).await, GateVerdict::HeldForReview);
        assert_eq!(o.rewrites.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_policy_deactivates() {
        let o = Checks::new(vec![[6, 6, 6], [5, 5, 5]]);
        let g = gate(o, RepeatedFailurePolicy::Drop);
        let mut a = article();
        assert_eq!(g.check(&mut a, Utc::now()).await, GateVerdict::Dropped);
        assert!(!a.is_active);
    }

    #[tokio::test]
    async fn oracle_outage_leaves_article_unverified() {
        let o = Checks::new(Vec::new());
        let g = gate(o, RepeatedFailurePolicy::HoldForReview);
        let mut a = article();
        assert_eq!(g.check(&mut a, Utc::now()).await, GateVerdict::Unavailable);
        assert!(a.fact_check.is_none());
        assert!(g.needs_check(&a));
    }
}
