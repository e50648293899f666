//! Low-level providers: one raw completion per call. Separated from
//! [`super::OracleClient`] so the same timeout/retry/normalization wrapper is
//! used for production and tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::prompts::{PromptKey, PromptRequest};
use crate::error::OracleError;

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<String, OracleError>> + Send + 'a>>;

pub trait Provider: Send + Sync + 'static {
    /// Send one prompt and return the raw response text.
    fn complete<'a>(&'a self, req: &'a PromptRequest) -> ProviderFuture<'a>;
    fn name(&self) -> &'static str;
}

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("newsletter-curation/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key,
            model: model.to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    /// Point at a compatible endpoint (proxies, local gateways).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Provider for OpenAiProvider {
    fn complete<'a>(&'a self, req: &'a PromptRequest) -> ProviderFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(OracleError::Disabled);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let body = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &req.system,
                    },
                    Msg {
                        role: "user",
                        content: &req.user,
                    },
                ],
                temperature: 0.2,
                max_tokens: req.max_tokens,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| OracleError::Transient(e.to_string()))?;

            let status = resp.status();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(OracleError::Transient(format!("status {status}")));
            }
            if !status.is_success() {
                return Err(OracleError::Rejected(status.as_u16()));
            }

            let text = resp
                .text()
                .await
                .map_err(|e| OracleError::Transient(e.to_string()))?;
            let parsed: Resp = serde_json::from_str(&text)
                .map_err(|e| OracleError::Malformed(format!("provider envelope: {e}")))?;
            Ok(parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default())
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Deterministic provider for local runs (`AI_TEST_MODE=mock`).
#[derive(Clone, Default)]
pub struct MockProvider;

impl Provider for MockProvider {
    fn complete<'a>(&'a self, req: &'a PromptRequest) -> ProviderFuture<'a> {
        let out = match req.key {
            PromptKey::ScoreArticle => {
                r#"{"interest": 6, "local_relevance": 6, "community_impact": 6}"#.to_string()
            }
            PromptKey::DedupeArticles => "[]".to_string(),
            PromptKey::RewriteArticle | PromptKey::RegenerateArticle => {
                let title = req
                    .user
                    .lines()
                    .find_map(|l| l.strip_prefix("Title: "))
                    .unwrap_or("Local update");
                serde_json::json!({
                    "headline": title,
                    "body": format!("{title}. More details are in the full story."),
                })
                .to_string()
            }
            PromptKey::FactCheck => {
                r#"{"factual_accuracy": 8, "context_preservation": 8, "no_misleading_claims": 8}"#
                    .to_string()
            }
            PromptKey::SummarizeEvent => "A community event worth a look.".to_string(),
            PromptKey::SubjectLine => "Your local news roundup".to_string(),
        };
        Box::pin(async move { Ok(out) })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Always fails with `Disabled`; used when no provider is configured.
pub struct DisabledProvider;

impl Provider for DisabledProvider {
    fn complete<'a>(&'a self, _req: &'a PromptRequest) -> ProviderFuture<'a> {
        Box::pin(async { Err(OracleError::Disabled) })
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
