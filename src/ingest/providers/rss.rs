// src/ingest/providers/rss.rs
//! Generic RSS 2.0 article source.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::normalize_text;
use crate::ingest::types::{ArticleSource, RawArticle};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    enclosure: Option<Enclosure>,
    #[serde(rename = "media:content")]
    media_content: Option<MediaRef>,
    #[serde(rename = "media:thumbnail")]
    media_thumbnail: Option<MediaRef>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    #[serde(rename = "@url")]
    url: Option<String>,
}

impl Item {
    fn image_url(&self) -> Option<String> {
        let enclosure = self.enclosure.as_ref().and_then(|e| {
            let is_image = e.kind.as_deref().is_some_and(|k| k.starts_with("image/"));
            e.url.clone().filter(|_| is_image)
        });
        enclosure
            .or_else(|| self.media_content.as_ref().and_then(|m| m.url.clone()))
            .or_else(|| self.media_thumbnail.as_ref().and_then(|m| m.url.clone()))
            .filter(|u| u.starts_with("http"))
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

pub struct RssProvider {
    name: String,
    mode: Mode,
}

impl RssProvider {
    pub fn from_fixture(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: &str, url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("newsletter-curation/0.1")
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            name: name.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        }
    }

    pub fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawArticle>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).with_context(|| format!("parsing {} rss xml", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let url = it.link.as_deref().map(str::trim).unwrap_or_default().to_string();
            if title.is_empty() || url.is_empty() {
                continue;
            }
            out.push(RawArticle {
                source: self.name.clone(),
                body: normalize_text(it.description.as_deref().unwrap_or_default()),
                image_url: it.image_url(),
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                title,
                url,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("ingest_items_parsed_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl ArticleSource for RssProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawArticle>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("{} http get", self.name))?;
                let body = resp
                    .error_for_status()
                    .with_context(|| format!("{} http status", self.name))?
                    .text()
                    .await
                    .with_context(|| format!("{} http body", self.name))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// quick-xml only knows the five XML entities; map the common HTML ones first.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Gazette</title>
    <item>
      <title>Library adds Sunday hours</title>
      <link>https://gazette.test/library</link>
      <pubDate>Mon, 02 Jun 2025 14:30:00 +0000</pubDate>
      <description>&lt;p&gt;The library&nbsp;will open on Sundays.&lt;/p&gt;</description>
      <enclosure url="https://gazette.test/lib.jpg" type="image/jpeg" length="100"/>
    </item>
    <item>
      <title>Council meets</title>
      <link>https://gazette.test/council</link>
      <description>Agenda posted.</description>
      <media:content url="https://gazette.test/council.jpg" medium="image"/>
    </item>
    <item>
      <title></title>
      <link>https://gazette.test/empty</link>
    </item>
  </channel>
</rss>"#;

    #[tokio::test]
    async fn parses_items_images_and_dates() {
        let p = RssProvider::from_fixture("Gazette", XML);
        let items = p.fetch_latest().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].body, "The library will open on Sundays.");
        assert_eq!(items[0].image_url.as_deref(), Some("https://gazette.test/lib.jpg"));
        assert_eq!(items[0].published_at.unwrap().hour(), 14);
        assert!(items[1].published_at.is_none());
    }

    #[tokio::test]
    async fn garbage_is_an_error() {
        let p = RssProvider::from_fixture("Bad", "<html>nope");
        assert!(p.fetch_latest().await.is_err());
    }
}
