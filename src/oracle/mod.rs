//! Oracle client: the uniform boundary to the AI scoring / generation /
//! fact-check service.
//!
//! Every call is wrapped with a hard per-call timeout, the injected retry
//! policy (transient failures only) and response normalization. A response
//! that parses but fails validation is surfaced to the caller as-is and never
//! retried here.

pub mod normalize;
pub mod prompts;
pub mod provider;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::config::ai::AiConfig;
use crate::config::CurationConfig;
use crate::error::OracleError;
use crate::model::{CandidateArticle, CriteriaScores, GeneratedCopy};
use crate::retry::RetryPolicy;
use normalize::{normalize, normalize_text, OracleShape, Shape};
use prompts::{PromptKey, PromptRequest};
use provider::{DisabledProvider, MockProvider, OpenAiProvider, Provider};

/// Characters of body text sent with each dedupe entry.
const DEDUPE_EXCERPT_CHARS: usize = 300;
/// Characters of body text sent for scoring and rewriting.
const BODY_PROMPT_CHARS: usize = 6_000;

/// Headline + body returned by a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenCopy {
    pub headline: String,
    pub body: String,
}

/// Fact-check components: factual accuracy, context preservation,
/// absence of misleading claims. Each 0..=10.
pub type FactCheckScores = [u8; 3];

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn score(&self, article: &CandidateArticle) -> Result<CriteriaScores, OracleError>;

    /// Groups of indices into `articles` that cover the same story.
    async fn dedupe(&self, articles: &[CandidateArticle]) -> Result<Vec<Vec<usize>>, OracleError>;

    /// Generate publish-ready copy. `failed_score` is set when regenerating
    /// after a failed fact-check.
    async fn rewrite(
        &self,
        article: &CandidateArticle,
        failed_score: Option<u8>,
    ) -> Result<RewrittenCopy, OracleError>;

    async fn fact_check(
        &self,
        generated: &GeneratedCopy,
        original: &str,
    ) -> Result<FactCheckScores, OracleError>;

    async fn summarize_event(&self, title: &str, description: &str) -> Result<String, OracleError>;

    async fn subject_line(&self, headlines: &[String]) -> Result<String, OracleError>;

    fn provider_name(&self) -> &'static str;
}

pub type DynOracle = Arc<dyn Oracle>;

// ------------------------------------------------------------
// Typed responses
// ------------------------------------------------------------

fn check_rating(name: &str, v: f32) -> Result<u8, String> {
    if !v.is_finite() || !(0.0..=10.0).contains(&v) {
        return Err(format!("{name} out of range: {v}"));
    }
    Ok(v.round() as u8)
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    interest: f32,
    local_relevance: f32,
    community_impact: f32,
}

impl OracleShape for ScoreResponse {
    const SHAPE: Shape = Shape::Object;
    fn validate(&self) -> Result<(), String> {
        check_rating("interest", self.interest)?;
        check_rating("local_relevance", self.local_relevance)?;
        check_rating("community_impact", self.community_impact)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct DedupeResponse(Vec<Vec<usize>>);

impl OracleShape for DedupeResponse {
    const SHAPE: Shape = Shape::Array;
}

#[derive(Debug, Deserialize)]
struct RewriteResponse {
    headline: String,
    #[serde(alias = "content")]
    body: String,
}

impl OracleShape for RewriteResponse {
    const SHAPE: Shape = Shape::Object;
    fn validate(&self) -> Result<(), String> {
        if self.headline.trim().is_empty() {
            return Err("empty headline".to_string());
        }
        if self.body.trim().is_empty() {
            return Err("empty body".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FactCheckResponse {
    factual_accuracy: f32,
    context_preservation: f32,
    #[serde(alias = "misleading_claims")]
    no_misleading_claims: f32,
}

impl OracleShape for FactCheckResponse {
    const SHAPE: Shape = Shape::Object;
    fn validate(&self) -> Result<(), String> {
        check_rating("factual_accuracy", self.factual_accuracy)?;
        check_rating("context_preservation", self.context_preservation)?;
        check_rating("no_misleading_claims", self.no_misleading_claims)?;
        Ok(())
    }
}

// ------------------------------------------------------------
// Client
// ------------------------------------------------------------

#[derive(Debug)]
struct DailyCounter {
    day: NaiveDate,
    count: u32,
}

/// Wraps a [`Provider`] with timeout, retry, a daily call cap and
/// normalization, and implements [`Oracle`] on top of it.
pub struct OracleClient<P: Provider> {
    inner: P,
    call_timeout: Duration,
    retry: RetryPolicy,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: Provider> OracleClient<P> {
    pub fn new(inner: P, call_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            inner,
            call_timeout,
            retry,
            daily_limit: u32::MAX,
            counter: Mutex::new(DailyCounter {
                day: Utc::now().date_naive(),
                count: 0,
            }),
        }
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_limit = limit;
        self
    }

    fn reserve_call(&self) -> Result<(), OracleError> {
        let today = Utc::now().date_naive();
        let mut g = self
            .counter
            .lock()
            .map_err(|_| OracleError::Transient("oracle counter poisoned".to_string()))?;
        if g.day != today {
            g.day = today;
            g.count = 0;
        }
        if g.count >= self.daily_limit {
            return Err(OracleError::Rejected(429));
        }
        g.count += 1;
        Ok(())
    }

    async fn call(&self, req: PromptRequest) -> Result<String, OracleError> {
        self.reserve_call()?;
        let label = req.key.as_str();
        counter!("oracle_calls_total", "prompt" => label).increment(1);

        let timeout_ms = self.call_timeout.as_millis() as u64;
        let (this, req) = (self, &req);
        let result = self
            .retry
            .run(label, |e: &OracleError| e.is_retryable(), || async move {
                match tokio::time::timeout(this.call_timeout, this.inner.complete(req)).await {
                    Ok(r) => r,
                    Err(_) => Err(OracleError::Timeout(timeout_ms)),
                }
            })
            .await;

        if let Err(e) = &result {
            counter!("oracle_failures_total", "prompt" => label).increment(1);
            tracing::warn!(target: "oracle", prompt = label, provider = self.inner.name(), error = %e, "oracle call failed");
        }
        result
    }

    async fn call_typed<T: OracleShape>(&self, req: PromptRequest) -> Result<T, OracleError> {
        let key = req.key;
        let raw = self.call(req).await?;
        normalize::<T>(&raw).inspect_err(|e| {
            counter!("oracle_failures_total", "prompt" => key.as_str()).increment(1);
            tracing::warn!(target: "oracle", prompt = key.as_str(), error = %e, "oracle response rejected");
        })
    }

    async fn call_text(&self, req: PromptRequest) -> Result<String, OracleError> {
        let raw = self.call(req).await?;
        normalize_text(&raw)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl<P: Provider> Oracle for OracleClient<P> {
    async fn score(&self, article: &CandidateArticle) -> Result<CriteriaScores, OracleError> {
        let body = truncate_chars(&article.body, BODY_PROMPT_CHARS);
        let req = PromptRequest::build(
            PromptKey::ScoreArticle,
            &[
                ("title", &article.title),
                ("source", &article.source),
                ("body", &body),
            ],
        );
        let r: ScoreResponse = self.call_typed(req).await?;
        Ok(CriteriaScores {
            interest: r.interest.round() as u8,
            local_relevance: r.local_relevance.round() as u8,
            community_impact: r.community_impact.round() as u8,
        })
    }

    async fn dedupe(&self, articles: &[CandidateArticle]) -> Result<Vec<Vec<usize>>, OracleError> {
        if articles.len() < 2 {
            return Ok(Vec::new());
        }
        let listing = articles
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let text = a
                    .generated
                    .as_ref()
                    .map(|g| g.body.as_str())
                    .unwrap_or(a.body.as_str());
                format!("[{i}] {}\n{}", a.title, truncate_chars(text, DEDUPE_EXCERPT_CHARS))
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let req = PromptRequest::build(PromptKey::DedupeArticles, &[("articles", &listing)]);
        let r: DedupeResponse = self.call_typed(req).await?;
        Ok(r.0)
    }

    async fn rewrite(
        &self,
        article: &CandidateArticle,
        failed_score: Option<u8>,
    ) -> Result<RewrittenCopy, OracleError> {
        let body = truncate_chars(&article.body, BODY_PROMPT_CHARS);
        let req = match failed_score {
            None => PromptRequest::build(
                PromptKey::RewriteArticle,
                &[("title", &article.title), ("body", &body)],
            ),
            Some(score) => PromptRequest::build(
                PromptKey::RegenerateArticle,
                &[
                    ("title", &article.title),
                    ("body", &body),
                    ("score", &score.to_string()),
                ],
            ),
        };
        let r: RewriteResponse = self.call_typed(req).await?;
        Ok(RewrittenCopy {
            headline: r.headline.trim().to_string(),
            body: r.body.trim().to_string(),
        })
    }

    async fn fact_check(
        &self,
        generated: &GeneratedCopy,
        original: &str,
    ) -> Result<FactCheckScores, OracleError> {
        let original = truncate_chars(original, BODY_PROMPT_CHARS);
        let req = PromptRequest::build(
            PromptKey::FactCheck,
            &[
                ("original", &original),
                ("headline", &generated.headline),
                ("generated", &generated.body),
            ],
        );
        let r: FactCheckResponse = self.call_typed(req).await?;
        Ok([
            r.factual_accuracy.round() as u8,
            r.context_preservation.round() as u8,
            r.no_misleading_claims.round() as u8,
        ])
    }

    async fn summarize_event(&self, title: &str, description: &str) -> Result<String, OracleError> {
        let req = PromptRequest::build(
            PromptKey::SummarizeEvent,
            &[("title", title), ("description", description)],
        );
        self.call_text(req).await
    }

    async fn subject_line(&self, headlines: &[String]) -> Result<String, OracleError> {
        if headlines.is_empty() {
            return Err(OracleError::Validation("no headlines".to_string()));
        }
        let list = headlines
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n");
        let req = PromptRequest::build(PromptKey::SubjectLine, &[("headlines", &list)]);
        self.call_text(req).await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Factory: build the oracle according to config and environment.
///
/// * `AI_TEST_MODE=mock` → deterministic mock provider.
/// * `enabled == false` → disabled provider (every call fails with `Disabled`).
/// * otherwise the configured provider.
pub fn build_oracle(ai: &AiConfig, cfg: &CurationConfig) -> DynOracle {
    let timeout = cfg.oracle_timeout();
    let retry = cfg.oracle_retry();

    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(OracleClient::new(MockProvider, timeout, retry));
    }
    if !ai.enabled {
        return Arc::new(OracleClient::new(DisabledProvider, timeout, retry));
    }
    match ai.provider.as_str() {
        "openai" => {
            tracing::info!(
                target: "oracle",
                model = %ai.model,
                key_len = ai.api_key.len(),
                "openai provider configured"
            );
            let p = OpenAiProvider::new(ai.api_key.clone(), &ai.model, timeout);
            Arc::new(OracleClient::new(p, timeout, retry).with_daily_limit(ai.daily_limit))
        }
        "mock" => Arc::new(OracleClient::new(MockProvider, timeout, retry)),
        other => {
            tracing::warn!(target: "oracle", provider = other, "unknown provider; oracle disabled");
            Arc::new(OracleClient::new(DisabledProvider, timeout, retry))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::ProviderFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned responses in order; the last one repeats.
    struct Canned {
        replies: Vec<Result<String, OracleError>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl Canned {
        fn new(replies: Vec<Result<&str, OracleError>>) -> Self {
            Self {
                replies: replies.into_iter().map(|r| r.map(str::to_string)).collect(),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    impl Provider for Canned {
        fn complete<'a>(&'a self, _req: &'a PromptRequest) -> ProviderFuture<'a> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = self.replies[i.min(self.replies.len() - 1)].clone();
            let delay = self.delay;
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                reply
            })
        }
        fn name(&self) -> &'static str {
            "canned"
        }
    }

    fn article() -> CandidateArticle {
        CandidateArticle::new(
            "a1".into(),
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            "Gazette".into(),
            "Library expands hours".into(),
            "The library will open on Sundays.".into(),
            "https://example.test/a1".into(),
            Utc::now(),
        )
    }

    fn client(p: Canned) -> OracleClient<Canned> {
        OracleClient::new(
            p,
            Duration::from_millis(200),
            RetryPolicy::new(1, Duration::from_millis(1), 2),
        )
    }

    #[tokio::test]
    async fn score_parses_fenced_object() {
        let c = client(Canned::new(vec![Ok(
            "```json\n{\"interest\": 7, \"local_relevance\": 9.4, \"community_impact\": 5}\n```",
        )]));
        let s = c.score(&article()).await.unwrap();
        assert_eq!(
            s,
            CriteriaScores {
                interest: 7,
                local_relevance: 9,
                community_impact: 5
            }
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let c = client(Canned::new(vec![
            Err(OracleError::Transient("503".into())),
            Ok(r#"{"headline":"H","body":"B"}"#),
        ]));
        let r = c.rewrite(&article(), None).await.unwrap();
        assert_eq!(r.headline, "H");
        assert_eq!(c.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn validation_error_is_not_retried() {
        let c = client(Canned::new(vec![Ok(r#"{"headline":"","body":"B"}"#)]));
        let err = c.rewrite(&article(), None).await.unwrap_err();
        assert!(matches!(err, OracleError::Validation(_)));
        assert_eq!(c.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_range_rating_is_validation() {
        let c = client(Canned::new(vec![Ok(
            r#"{"interest": 14, "local_relevance": 2, "community_impact": 2}"#,
        )]));
        let err = c.score(&article()).await.unwrap_err();
        assert!(matches!(err, OracleError::Validation(_)));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let mut p = Canned::new(vec![Ok("A summary.")]);
        p.delay = Duration::from_millis(500);
        let c = OracleClient::new(p, Duration::from_millis(20), RetryPolicy::none());
        let err = c.summarize_event("Fair", "desc").await.unwrap_err();
        assert_eq!(err, OracleError::Timeout(20));
    }

    #[tokio::test]
    async fn daily_limit_blocks_calls() {
        let c = client(Canned::new(vec![Ok("Subject")])).with_daily_limit(1);
        assert!(c.subject_line(&["A".into()]).await.is_ok());
        assert_eq!(
            c.subject_line(&["A".into()]).await.unwrap_err(),
            OracleError::Rejected(429)
        );
    }
}
