// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};

/// One parsed feed item before it becomes a [`crate::model::CandidateArticle`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub source: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawArticle>>;
    fn name(&self) -> &str;
}
