// src/store/mod.rs
//! Persistence boundary. Every write is an upsert keyed by a natural
//! identifier (campaign date, article id, external id, or
//! campaign+section+candidate) and is atomic per row, so repeated or
//! concurrent invocations converge on the same state.
//!
//! Components are generic over `S: Store + ?Sized` so both concrete stores
//! and `Arc<dyn Store>` plug in.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::model::{
    Campaign, CampaignStatus, CandidateArticle, DiningDeal, ExternalEvent, GetawayListing,
    SectionKind, Selection, TopicGroup,
};

pub use memory::MemoryStore;

/// Conditional status change, applied atomically by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub date: NaiveDate,
    /// Allowed current statuses.
    pub from: Vec<CampaignStatus>,
    pub to: CampaignStatus,
    pub at: DateTime<Utc>,
    /// When set, the write is refused if `review_check_on` already equals this
    /// day, and on success `review_check_on` is set to it.
    pub review_guard: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionWrite {
    Applied(Campaign),
    StatusMismatch(CampaignStatus),
    GuardAlreadySet,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventUpsert {
    pub event: ExternalEvent,
    pub created: bool,
}

/// Result of the check-and-insert for the first selection of a section.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialInsert {
    Inserted(Vec<Selection>),
    /// Rows already existed; nothing was written.
    Existing(Vec<Selection>),
}

/// Read-merge-write callback. Receives the stored row (if any) and returns the
/// row to persist.
pub type EventMerge<'a> = &'a (dyn Fn(Option<&ExternalEvent>) -> ExternalEvent + Send + Sync);

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn campaign(&self, date: NaiveDate) -> Result<Option<Campaign>>;

    /// Insert when no campaign exists for the date. Returns the stored row
    /// and whether it was created by this call.
    async fn insert_campaign_if_absent(&self, campaign: Campaign) -> Result<(Campaign, bool)>;

    async fn set_subject_line(&self, date: NaiveDate, subject: &str) -> Result<Campaign>;

    async fn transition(&self, req: TransitionRequest) -> Result<TransitionWrite>;

    async fn campaigns_with_status(&self, statuses: &[CampaignStatus]) -> Result<Vec<Campaign>>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Returns false when an article with the same id already exists.
    async fn insert_article_if_absent(&self, article: CandidateArticle) -> Result<bool>;

    async fn article(&self, id: &str) -> Result<Option<CandidateArticle>>;

    /// Ordered by ingestion time.
    async fn articles_for_campaign(&self, date: NaiveDate) -> Result<Vec<CandidateArticle>>;

    async fn save_article(&self, article: CandidateArticle) -> Result<()>;

    /// Replace the campaign's topic groups.
    async fn save_topic_groups(&self, date: NaiveDate, groups: Vec<TopicGroup>) -> Result<()>;

    async fn topic_groups(&self, date: NaiveDate) -> Result<Vec<TopicGroup>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn event(&self, external_id: &str) -> Result<Option<ExternalEvent>>;

    async fn upsert_event_with(&self, external_id: &str, merge: EventMerge<'_>) -> Result<EventUpsert>;

    /// Store `summary` only when the event has none. Returns whether it was written.
    async fn set_summary_if_absent(&self, external_id: &str, summary: &str) -> Result<bool>;

    async fn active_events(&self) -> Result<Vec<ExternalEvent>>;

    async fn active_events_with_prefix(&self, prefix: &str) -> Result<Vec<ExternalEvent>>;

    async fn set_event_active(&self, external_id: &str, active: bool) -> Result<ExternalEvent>;

    async fn set_event_flags(
        &self,
        external_id: &str,
        featured: Option<bool>,
        paid_placement: Option<bool>,
    ) -> Result<ExternalEvent>;
}

#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Ordered by `selection_order`.
    async fn selections(&self, date: NaiveDate, section: SectionKind) -> Result<Vec<Selection>>;

    /// Insert `rows` only if the (campaign, section) pair has no rows yet.
    async fn insert_initial(
        &self,
        date: NaiveDate,
        section: SectionKind,
        rows: Vec<Selection>,
    ) -> Result<InitialInsert>;

    /// Append rows; fails with `CapacityExceeded` if the selected count would
    /// go over `capacity`.
    async fn append(
        &self,
        date: NaiveDate,
        section: SectionKind,
        capacity: usize,
        rows: Vec<Selection>,
    ) -> Result<Vec<Selection>>;

    /// Toggle one row. Turning a row on is refused past `capacity`.
    async fn set_selected(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidate_id: &str,
        selected: bool,
        capacity: usize,
    ) -> Result<Selection>;

    /// Make `candidate_id` the only featured row of the section.
    async fn set_featured(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidate_id: &str,
    ) -> Result<()>;

    /// Every `is_selected` row across campaigns for the given sections.
    async fn selected_rows(&self, sections: &[SectionKind]) -> Result<Vec<Selection>>;
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn dining_deals(&self) -> Result<Vec<DiningDeal>>;

    async fn getaways(&self) -> Result<Vec<GetawayListing>>;

    async fn upsert_dining_deal(&self, deal: DiningDeal) -> Result<()>;

    async fn upsert_getaway(&self, listing: GetawayListing) -> Result<()>;

    /// Stamp `last_featured_on` for rotation.
    async fn record_featured(&self, section: SectionKind, ids: &[String], date: NaiveDate) -> Result<()>;
}

pub trait Store: CampaignStore + ArticleStore + EventStore + SelectionStore + ListingStore {}

impl<T> Store for T where T: CampaignStore + ArticleStore + EventStore + SelectionStore + ListingStore {}
