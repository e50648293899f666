// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::providers::rss::RssProvider;
use crate::ingest::types::ArticleSource;

const ENV_PATH: &str = "INGEST_SOURCES_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RssSource {
    pub name: String,
    pub url: String,
}

impl RssSource {
    pub fn provider(&self) -> Box<dyn ArticleSource> {
        Box::new(RssProvider::from_url(&self.name, &self.url))
    }
}

/// Load the RSS source list from an explicit path. Supports TOML or JSON.
pub fn load_sources_from(path: &Path) -> Result<Vec<RssSource>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load the source list using env var + fallbacks:
/// 1) $INGEST_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_sources_default() -> Result<Vec<RssSource>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<RssSource>> {
    if hint_ext == "json" {
        return parse_json(s);
    }
    parse_toml(s).or_else(|_| parse_json(s))
}

fn parse_toml(s: &str) -> Result<Vec<RssSource>> {
    #[derive(Deserialize)]
    struct TomlSources {
        sources: Vec<RssSource>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(clean_list(v.sources))
}

fn parse_json(s: &str) -> Result<Vec<RssSource>> {
    let v: Vec<RssSource> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim, drop entries without a URL, keep the first entry per URL.
fn clean_list(items: Vec<RssSource>) -> Vec<RssSource> {
    let mut out: Vec<RssSource> = Vec::new();
    for it in items {
        let url = it.url.trim().to_string();
        if url.is_empty() || out.iter().any(|o| o.url == url) {
            continue;
        }
        out.push(RssSource {
            name: it.name.trim().to_string(),
            url,
        });
    }
    out
}
