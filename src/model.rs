// src/model.rs
//! Domain records shared by the stores, the pipeline and the API.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------
// Campaign
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    InReview,
    Approved,
    Sent,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::InReview => "in_review",
            CampaignStatus::Approved => "approved",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Archived => "archived",
        }
    }

    /// Sent or archived: nothing downstream will read its selections again.
    pub fn is_closed(&self) -> bool {
        matches!(self, CampaignStatus::Sent | CampaignStatus::Archived)
    }
}

/// One newsletter issue, keyed by its calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub date: NaiveDate,
    pub status: CampaignStatus,
    pub subject_line: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    /// Local day on which the scheduled review check transitioned this campaign.
    pub review_check_on: Option<NaiveDate>,
}

impl Campaign {
    pub fn new(date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            date,
            status: CampaignStatus::Draft,
            subject_line: None,
            created_at: now,
            submitted_at: None,
            approved_at: None,
            sent_at: None,
            archived_at: None,
            review_check_on: None,
        }
    }

    pub fn has_subject_line(&self) -> bool {
        self.subject_line
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

// ------------------------------------------------------------
// Articles
// ------------------------------------------------------------

/// Oracle ratings, each 0..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaScores {
    pub interest: u8,
    pub local_relevance: u8,
    pub community_impact: u8,
}

/// Publish-ready copy produced by the oracle. `version` starts at 1 and is
/// bumped on regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCopy {
    pub version: u32,
    pub headline: String,
    pub body: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateArticle {
    /// sha256 of the canonical URL, hex, first 16 bytes.
    pub id: String,
    pub campaign_date: NaiveDate,
    pub source: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,

    pub scores: Option<CriteriaScores>,
    /// 0..=30. `Some(0.0)` marks a scoring failure.
    pub rank_score: Option<f32>,
    pub scored_at: Option<DateTime<Utc>>,

    /// Eligible for the current campaign. Cleared for duplicates and dropped items.
    pub is_active: bool,
    pub topic_group_id: Option<String>,
    pub is_canonical: bool,

    pub generated: Option<GeneratedCopy>,
    pub regeneration_attempts: u8,
    pub fact_check: Option<FactCheckResult>,
    /// Failed fact-check twice and is held for a human decision.
    pub needs_review: bool,
    /// Operator override: counts as verified regardless of fact-check.
    pub force_include: bool,
}

impl CandidateArticle {
    pub fn new(
        id: String,
        campaign_date: NaiveDate,
        source: String,
        title: String,
        body: String,
        url: String,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            campaign_date,
            source,
            title,
            body,
            url,
            image_url: None,
            published_at: None,
            ingested_at,
            scores: None,
            rank_score: None,
            scored_at: None,
            is_active: true,
            topic_group_id: None,
            is_canonical: true,
            generated: None,
            regeneration_attempts: 0,
            fact_check: None,
            needs_review: false,
            force_include: false,
        }
    }

    pub fn is_scored(&self) -> bool {
        self.rank_score.is_some()
    }

    /// Length of the generated copy, `None` until one is written.
    pub fn generated_len(&self) -> Option<usize> {
        self.generated.as_ref().map(|g| g.body.chars().count())
    }

    /// Passing fact-check for the current copy version, or forced by an operator.
    pub fn is_verified(&self) -> bool {
        if self.force_include {
            return true;
        }
        match (&self.generated, &self.fact_check) {
            (Some(copy), Some(fc)) => fc.passed && fc.copy_version == copy.version,
            _ => false,
        }
    }
}

/// Dedup unit: one canonical article plus its duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicGroup {
    pub id: String,
    pub campaign_date: NaiveDate,
    pub canonical_id: String,
    pub duplicate_ids: Vec<String>,
}

impl TopicGroup {
    pub fn members(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_id.as_str())
            .chain(self.duplicate_ids.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub article_id: String,
    pub copy_version: u32,
    pub factual_accuracy: u8,
    pub context_preservation: u8,
    pub no_misleading_claims: u8,
    /// Sum of the three components, 0..=30.
    pub score: u8,
    pub passed: bool,
    pub checked_at: DateTime<Utc>,
}

impl FactCheckResult {
    pub fn from_components(
        article_id: &str,
        copy_version: u32,
        components: [u8; 3],
        threshold: u8,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let [factual_accuracy, context_preservation, no_misleading_claims] =
            components.map(|c| c.min(10));
        let score = factual_accuracy + context_preservation + no_misleading_claims;
        Self {
            article_id: article_id.to_string(),
            copy_version,
            factual_accuracy,
            context_preservation,
            no_misleading_claims,
            score,
            passed: score >= threshold,
            checked_at,
        }
    }
}

// ------------------------------------------------------------
// Events and listings
// ------------------------------------------------------------

/// Mirror of one feed item plus locally owned overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub venue: Option<String>,
    pub address: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,

    // Locally owned.
    pub featured: bool,
    pub paid_placement: bool,
    pub active: bool,
    pub summary: Option<String>,

    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl ExternalEvent {
    /// End time, or start time for open-ended items.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end.unwrap_or(self.start)
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.effective_end() < now
    }

    /// Whether the event runs on `day` in the newsletter's local time.
    pub fn occurs_on(&self, day: NaiveDate, offset: FixedOffset) -> bool {
        let start = self.start.with_timezone(&offset).date_naive();
        let end = self.effective_end().with_timezone(&offset).date_naive();
        start <= day && day <= end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiningDeal {
    pub id: String,
    pub restaurant: String,
    pub title: String,
    pub description: String,
    pub active: bool,
    pub featured: bool,
    pub last_featured_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetawayListing {
    pub id: String,
    pub title: String,
    pub location: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub nightly_rate_cents: Option<u32>,
    pub active: bool,
    pub featured: bool,
    pub last_featured_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

// ------------------------------------------------------------
// Selections
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Articles,
    Events,
    SponsoredEvents,
    DiningDeals,
    Getaways,
}

impl SectionKind {
    pub const ALL: [SectionKind; 5] = [
        SectionKind::Articles,
        SectionKind::Events,
        SectionKind::SponsoredEvents,
        SectionKind::DiningDeals,
        SectionKind::Getaways,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Articles => "articles",
            SectionKind::Events => "events",
            SectionKind::SponsoredEvents => "sponsored_events",
            SectionKind::DiningDeals => "dining_deals",
            SectionKind::Getaways => "getaways",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Sections whose candidates are `ExternalEvent`s.
    pub fn is_event_section(&self) -> bool {
        matches!(self, SectionKind::Events | SectionKind::SponsoredEvents)
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted pick of one candidate for one campaign section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub campaign_date: NaiveDate,
    pub section: SectionKind,
    pub candidate_id: String,
    /// 1-based display order.
    pub selection_order: u32,
    pub is_featured: bool,
    pub is_selected: bool,
    pub rank_score: f32,
    pub selected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fact_check_boundary_is_twenty() {
        let now = Utc::now();
        let fail = FactCheckResult::from_components("a", 1, [6, 6, 6], 20, now);
        assert_eq!(fail.score, 18);
        assert!(!fail.passed);
        let pass = FactCheckResult::from_components("a", 1, [7, 7, 6], 20, now);
        assert_eq!(pass.score, 20);
        assert!(pass.passed);
    }

    #[test]
    fn components_are_capped_at_ten() {
        let r = FactCheckResult::from_components("a", 1, [12, 10, 10], 20, Utc::now());
        assert_eq!(r.score, 30);
    }

    #[test]
    fn multi_day_event_occurs_on_each_day() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = Utc::now();
        let ev = ExternalEvent {
            external_id: "feed:1".into(),
            title: "Fair".into(),
            description: String::new(),
            venue: None,
            address: None,
            url: None,
            image_url: None,
            category: None,
            start: Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap(),
            end: Some(Utc.with_ymd_and_hms(2025, 6, 3, 22, 0, 0).unwrap()),
            featured: false,
            paid_placement: false,
            active: true,
            summary: None,
            first_seen_at: now,
            last_synced_at: now,
        };
        for d in 1..=3 {
            assert!(ev.occurs_on(NaiveDate::from_ymd_opt(2025, 6, d).unwrap(), offset));
        }
        assert!(!ev.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(), offset));
    }

    #[test]
    fn section_names_round_trip() {
        for k in SectionKind::ALL {
            assert_eq!(SectionKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(SectionKind::parse("nope"), None);
    }
}
