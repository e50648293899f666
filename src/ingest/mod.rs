// src/ingest/mod.rs
//! Article ingestion: pull RSS sources, normalize, drop near-duplicate titles
//! and insert new candidates into a campaign's pool. Re-running is safe: an
//! article id is derived from its canonical URL and existing ids are skipped.
pub mod config;
pub mod providers;
pub mod types;

use crate::error::Result;
use crate::ingest::types::{ArticleSource, RawArticle};
use crate::model::CandidateArticle;
use crate::store::ArticleStore;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use sha2::{Digest, Sha256};
use strsim::normalized_levenshtein;

/// Titles at least this similar are treated as the same item within one run.
pub const NEAR_DUPLICATE_TITLE: f64 = 0.95;

const MAX_TEXT_CHARS: usize = 20_000;

/// Decode entities, strip tags, straighten quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// URL used for identity: trimmed, fragment removed, no trailing slash.
pub fn canonical_url(url: &str) -> String {
    let u = url.trim();
    let u = u.split('#').next().unwrap_or(u);
    u.trim_end_matches('/').to_string()
}

/// sha256 of the canonical URL, hex of the first 16 bytes.
pub fn article_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url(url).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn title_key(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Drop items whose title nearly matches an earlier one. Returns (kept, dropped).
pub fn drop_near_duplicates(items: Vec<RawArticle>, threshold: f64) -> (Vec<RawArticle>, usize) {
    let mut kept: Vec<RawArticle> = Vec::with_capacity(items.len());
    let mut keys: Vec<String> = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for it in items {
        let key = title_key(&it.title);
        if keys.iter().any(|k| normalized_levenshtein(k, &key) >= threshold) {
            dropped += 1;
            continue;
        }
        keys.push(key);
        kept.push(it);
    }
    (kept, dropped)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub already_known: usize,
    pub near_duplicates: usize,
    pub provider_errors: usize,
}

/// Fetch every source once and add new candidates to the campaign's pool.
/// A failing source is logged and counted; the others still run.
pub async fn ingest_articles<S: ArticleStore + ?Sized>(
    store: &S,
    sources: &[Box<dyn ArticleSource>],
    campaign_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    crate::metrics::ensure_described();
    let mut report = IngestReport::default();

    let mut raw = Vec::new();
    for p in sources {
        match p.fetch_latest().await {
            Ok(mut v) => raw.append(&mut v),
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, provider = p.name(), "provider error");
                counter!("ingest_provider_errors_total").increment(1);
                report.provider_errors += 1;
            }
        }
    }
    report.fetched = raw.len();

    let (kept, near) = drop_near_duplicates(raw, NEAR_DUPLICATE_TITLE);
    report.near_duplicates = near;

    for it in kept {
        let mut article = CandidateArticle::new(
            article_id(&it.url),
            campaign_date,
            it.source,
            it.title,
            it.body,
            canonical_url(&it.url),
            now,
        );
        article.image_url = it.image_url;
        article.published_at = it.published_at;
        if store.insert_article_if_absent(article).await? {
            report.inserted += 1;
        } else {
            report.already_known += 1;
        }
    }

    counter!("ingest_articles_total").increment(report.inserted as u64);
    counter!("ingest_duplicates_total").increment((report.already_known + report.near_duplicates) as u64);
    gauge!("ingest_last_run_ts").set(now.timestamp() as f64);

    tracing::info!(
        target: "ingest",
        %campaign_date,
        fetched = report.fetched,
        inserted = report.inserted,
        known = report.already_known,
        near_duplicates = report.near_duplicates,
        "ingest finished"
    );
    Ok(report)
}
