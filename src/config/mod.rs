// src/config/mod.rs
//! Engine configuration. Fixed section capacities, scoring weights, fact-check
//! threshold, reconciler limits, retry policies and the review schedule.
//!
//! Lookup order:
//! 1) $CURATION_CONFIG_PATH (must exist)
//! 2) config/curation.toml
//! 3) built-in defaults

pub mod ai;

use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::SectionKind;
use crate::retry::RetryPolicy;

pub const ENV_CONFIG_PATH: &str = "CURATION_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/curation.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    pub newsletter: NewsletterConfig,
    pub capacity: CapacityConfig,
    pub scoring: ScoringConfig,
    pub factcheck: FactCheckConfig,
    pub reconcile: ReconcileConfig,
    pub retry: RetryConfig,
    pub oracle: OracleConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsletterConfig {
    /// Local time of the newsletter's audience, minutes east of UTC.
    pub utc_offset_minutes: i32,
}

impl Default for NewsletterConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub articles: usize,
    pub events: usize,
    pub sponsored_events: usize,
    pub dining_deals: usize,
    pub getaways: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            articles: 5,
            events: 8,
            sponsored_events: 3,
            dining_deals: 8,
            getaways: 4,
        }
    }
}

impl CapacityConfig {
    pub fn for_section(&self, section: SectionKind) -> usize {
        match section {
            SectionKind::Articles => self.articles,
            SectionKind::Events => self.events,
            SectionKind::SponsoredEvents => self.sponsored_events,
            SectionKind::DiningDeals => self.dining_deals,
            SectionKind::Getaways => self.getaways,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub interest_weight: f32,
    pub local_relevance_weight: f32,
    pub community_impact_weight: f32,
    /// Subtracted from `interest` for candidates without an image.
    pub missing_image_penalty: u8,
    /// Maximum canonical candidates rewritten per run.
    pub rewrite_limit: usize,
    pub concurrency: usize,
    pub run_budget_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            interest_weight: 1.0,
            local_relevance_weight: 1.0,
            community_impact_weight: 1.0,
            missing_image_penalty: 5,
            rewrite_limit: 12,
            concurrency: 4,
            run_budget_secs: 240,
        }
    }
}

/// What happens to an article whose regenerated copy fails fact-check again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatedFailurePolicy {
    /// Keep it, flag `needs_review`; it blocks readiness until a human acts.
    #[default]
    HoldForReview,
    /// Deactivate it so it drops out of selection.
    Drop,
    /// Treat the article as verified anyway.
    PublishAnyway,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactCheckConfig {
    pub pass_threshold: u8,
    pub max_regenerations: u8,
    pub on_repeated_failure: RepeatedFailurePolicy,
}

impl Default for FactCheckConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 20,
            max_regenerations: 1,
            on_repeated_failure: RepeatedFailurePolicy::HoldForReview,
        }
    }
}

/// When a selected event stops being protected from deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionPolicy {
    /// Any `is_selected` row protects, whatever the campaign status.
    #[default]
    Always,
    /// Protection lapses once the owning campaign is sent or archived.
    UntilCampaignClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Today plus `window_days - 1` days.
    pub window_days: u32,
    pub per_page: u32,
    pub max_pages_per_day: u32,
    /// Minimum spacing between successive feed calls.
    pub request_delay_ms: u64,
    /// Concurrent day fetches.
    pub fetch_concurrency: usize,
    pub batch_size: usize,
    /// Concurrent items inside one batch.
    pub concurrency: usize,
    pub run_budget_secs: u64,
    /// Descriptions shorter than this never get a generated summary.
    pub summary_min_chars: usize,
    pub external_id_prefix: String,
    pub protection: ProtectionPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            per_page: 50,
            max_pages_per_day: 10,
            request_delay_ms: 250,
            fetch_concurrency: 2,
            batch_size: 25,
            concurrency: 4,
            run_budget_secs: 240,
            summary_min_chars: 100,
            external_id_prefix: "feed:".to_string(),
            protection: ProtectionPolicy::Always,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub feed_max_retries: u32,
    pub feed_base_delay_ms: u64,
    pub feed_backoff_factor: u32,
    pub oracle_max_retries: u32,
    pub oracle_base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            feed_max_retries: 3,
            feed_base_delay_ms: 2_000,
            feed_backoff_factor: 2,
            oracle_max_retries: 1,
            oracle_base_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub call_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Local "HH:MM" at which the automatic review check becomes due.
    pub review_time: String,
    /// How long after `review_time` the check is still considered due.
    pub window_minutes: u32,
    /// Campaign date = local today + offset.
    pub target_day_offset: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            review_time: "20:00".to_string(),
            window_minutes: 15,
            target_day_offset: 1,
        }
    }
}

impl ScheduleConfig {
    pub fn review_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(self.review_time.trim(), "%H:%M").ok()
    }
}

impl CurationConfig {
    /// Load from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading curation config from {}", path.display()))?;
        let cfg: CurationConfig = toml::from_str(&content)
            .with_context(|| format!("parsing curation config {}", path.display()))?;
        Ok(cfg.validated())
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        Ok(Self::default().validated())
    }

    /// Clamp values into workable ranges. The per-call oracle timeout is kept
    /// strictly below both run budgets.
    pub fn validated(mut self) -> Self {
        let r = &mut self.reconcile;
        r.window_days = r.window_days.max(1);
        r.per_page = r.per_page.max(1);
        r.max_pages_per_day = r.max_pages_per_day.max(1);
        r.fetch_concurrency = r.fetch_concurrency.max(1);
        r.batch_size = r.batch_size.max(1);
        r.concurrency = r.concurrency.max(1);
        self.scoring.concurrency = self.scoring.concurrency.max(1);
        self.scoring.missing_image_penalty = self.scoring.missing_image_penalty.min(10);
        self.factcheck.pass_threshold = self.factcheck.pass_threshold.min(30);

        let min_budget = self
            .reconcile
            .run_budget_secs
            .min(self.scoring.run_budget_secs);
        if min_budget > 1 && self.oracle.call_timeout_secs >= min_budget {
            let clamped = (min_budget / 2).max(1);
            tracing::warn!(
                target: "config",
                requested = self.oracle.call_timeout_secs,
                clamped,
                "oracle call timeout must be shorter than the run budget"
            );
            self.oracle.call_timeout_secs = clamped;
        }

        if self.schedule.review_time().is_none() {
            tracing::warn!(
                target: "config",
                value = %self.schedule.review_time,
                "unparseable review_time; scheduled review disabled"
            );
            self.schedule.enabled = false;
        }
        self
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.newsletter.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn feed_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.feed_max_retries,
            Duration::from_millis(self.retry.feed_base_delay_ms),
            self.retry.feed_backoff_factor,
        )
    }

    pub fn oracle_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.oracle_max_retries,
            Duration::from_millis(self.retry.oracle_base_delay_ms),
            2,
        )
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.call_timeout_secs)
    }
}
