// src/store/memory.rs
//! In-process store. One mutex guards the whole state so each trait method
//! is a single atomic read-check-write; the lock is never held across an
//! `.await`. The state can be saved to and restored from a JSON snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{
    ArticleStore, CampaignStore, EventMerge, EventStore, EventUpsert, InitialInsert, ListingStore,
    SelectionStore, TransitionRequest, TransitionWrite,
};
use crate::error::{CurationError, Result};
use crate::model::{
    Campaign, CampaignStatus, CandidateArticle, DiningDeal, ExternalEvent, GetawayListing,
    SectionKind, Selection, TopicGroup,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct State {
    campaigns: BTreeMap<NaiveDate, Campaign>,
    articles: BTreeMap<String, CandidateArticle>,
    topic_groups: BTreeMap<NaiveDate, Vec<TopicGroup>>,
    events: BTreeMap<String, ExternalEvent>,
    selections: Vec<Selection>,
    dining_deals: BTreeMap<String, DiningDeal>,
    getaways: BTreeMap<String, GetawayListing>,
}

impl State {
    fn section_rows(&self, date: NaiveDate, section: SectionKind) -> Vec<Selection> {
        let mut rows: Vec<Selection> = self
            .selections
            .iter()
            .filter(|s| s.campaign_date == date && s.section == section)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.selection_order);
        rows
    }

    fn selected_count(&self, date: NaiveDate, section: SectionKind) -> usize {
        self.selections
            .iter()
            .filter(|s| s.campaign_date == date && s.section == section && s.is_selected)
            .count()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| CurationError::Store("memory store lock poisoned".to_string()))
    }

    /// Load a snapshot written by [`MemoryStore::save_snapshot`]. A missing file
    /// yields an empty store.
    pub fn load_snapshot(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading store snapshot {}", path.display()))?;
        let state: State = serde_json::from_str(&content)
            .with_context(|| format!("parsing store snapshot {}", path.display()))?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Write the whole state as JSON: temp file next to `path`, then rename.
    pub fn save_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let json = {
            let g = self.lock()?;
            serde_json::to_string_pretty(&*g).context("serializing store snapshot")?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("renaming snapshot to {}", path.display()))?;
        Ok(())
    }
}

fn not_found(what: &str, key: impl std::fmt::Display) -> CurationError {
    CurationError::NotFound(format!("{what} {key}"))
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn campaign(&self, date: NaiveDate) -> Result<Option<Campaign>> {
        Ok(self.lock()?.campaigns.get(&date).cloned())
    }

    async fn insert_campaign_if_absent(&self, campaign: Campaign) -> Result<(Campaign, bool)> {
        let mut g = self.lock()?;
        if let Some(existing) = g.campaigns.get(&campaign.date) {
            return Ok((existing.clone(), false));
        }
        g.campaigns.insert(campaign.date, campaign.clone());
        Ok((campaign, true))
    }

    async fn set_subject_line(&self, date: NaiveDate, subject: &str) -> Result<Campaign> {
        let mut g = self.lock()?;
        let c = g
            .campaigns
            .get_mut(&date)
            .ok_or_else(|| not_found("campaign", date))?;
        c.subject_line = Some(subject.to_string());
        Ok(c.clone())
    }

    async fn transition(&self, req: TransitionRequest) -> Result<TransitionWrite> {
        let mut g = self.lock()?;
        let Some(c) = g.campaigns.get_mut(&req.date) else {
            return Ok(TransitionWrite::Missing);
        };
        if let Some(day) = req.review_guard {
            if c.review_check_on == Some(day) {
                return Ok(TransitionWrite::GuardAlreadySet);
            }
        }
        if !req.from.contains(&c.status) {
            return Ok(TransitionWrite::StatusMismatch(c.status));
        }
        c.status = req.to;
        match req.to {
            CampaignStatus::InReview => c.submitted_at = Some(req.at),
            CampaignStatus::Approved => c.approved_at = Some(req.at),
            CampaignStatus::Sent => c.sent_at = Some(req.at),
            CampaignStatus::Archived => c.archived_at = Some(req.at),
            CampaignStatus::Draft => {}
        }
        if let Some(day) = req.review_guard {
            c.review_check_on = Some(day);
        }
        Ok(TransitionWrite::Applied(c.clone()))
    }

    async fn campaigns_with_status(&self, statuses: &[CampaignStatus]) -> Result<Vec<Campaign>> {
        Ok(self
            .lock()?
            .campaigns
            .values()
            .filter(|c| statuses.contains(&c.status))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn insert_article_if_absent(&self, article: CandidateArticle) -> Result<bool> {
        let mut g = self.lock()?;
        if g.articles.contains_key(&article.id) {
            return Ok(false);
        }
        g.articles.insert(article.id.clone(), article);
        Ok(true)
    }

    async fn article(&self, id: &str) -> Result<Option<CandidateArticle>> {
        Ok(self.lock()?.articles.get(id).cloned())
    }

    async fn articles_for_campaign(&self, date: NaiveDate) -> Result<Vec<CandidateArticle>> {
        let g = self.lock()?;
        let mut out: Vec<CandidateArticle> = g
            .articles
            .values()
            .filter(|a| a.campaign_date == date)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn save_article(&self, article: CandidateArticle) -> Result<()> {
        self.lock()?.articles.insert(article.id.clone(), article);
        Ok(())
    }

    async fn save_topic_groups(&self, date: NaiveDate, groups: Vec<TopicGroup>) -> Result<()> {
        self.lock()?.topic_groups.insert(date, groups);
        Ok(())
    }

    async fn topic_groups(&self, date: NaiveDate) -> Result<Vec<TopicGroup>> {
        Ok(self
            .lock()?
            .topic_groups
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn event(&self, external_id: &str) -> Result<Option<ExternalEvent>> {
        Ok(self.lock()?.events.get(external_id).cloned())
    }

    async fn upsert_event_with(&self, external_id: &str, merge: EventMerge<'_>) -> Result<EventUpsert> {
        let mut g = self.lock()?;
        let existing = g.events.get(external_id);
        let created = existing.is_none();
        let mut next = merge(existing);
        next.external_id = external_id.to_string();
        g.events.insert(external_id.to_string(), next.clone());
        Ok(EventUpsert {
            event: next,
            created,
        })
    }

    async fn set_summary_if_absent(&self, external_id: &str, summary: &str) -> Result<bool> {
        let mut g = self.lock()?;
        let ev = g
            .events
            .get_mut(external_id)
            .ok_or_else(|| not_found("event", external_id))?;
        if ev.summary.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            return Ok(false);
        }
        ev.summary = Some(summary.to_string());
        Ok(true)
    }

    async fn active_events(&self) -> Result<Vec<ExternalEvent>> {
        Ok(self
            .lock()?
            .events
            .values()
            .filter(|e| e.active)
            .cloned()
            .collect())
    }

    async fn active_events_with_prefix(&self, prefix: &str) -> Result<Vec<ExternalEvent>> {
        Ok(self
            .lock()?
            .events
            .values()
            .filter(|e| e.active && e.external_id.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn set_event_active(&self, external_id: &str, active: bool) -> Result<ExternalEvent> {
        let mut g = self.lock()?;
        let ev = g
            .events
            .get_mut(external_id)
            .ok_or_else(|| not_found("event", external_id))?;
        ev.active = active;
        Ok(ev.clone())
    }

    async fn set_event_flags(
        &self,
        external_id: &str,
        featured: Option<bool>,
        paid_placement: Option<bool>,
    ) -> Result<ExternalEvent> {
        let mut g = self.lock()?;
        let ev = g
            .events
            .get_mut(external_id)
            .ok_or_else(|| not_found("event", external_id))?;
        if let Some(f) = featured {
            ev.featured = f;
        }
        if let Some(p) = paid_placement {
            ev.paid_placement = p;
        }
        Ok(ev.clone())
    }
}

#[async_trait]
impl SelectionStore for MemoryStore {
    async fn selections(&self, date: NaiveDate, section: SectionKind) -> Result<Vec<Selection>> {
        Ok(self.lock()?.section_rows(date, section))
    }

    async fn insert_initial(
        &self,
        date: NaiveDate,
        section: SectionKind,
        rows: Vec<Selection>,
    ) -> Result<InitialInsert> {
        let mut g = self.lock()?;
        let existing = g.section_rows(date, section);
        if !existing.is_empty() {
            return Ok(InitialInsert::Existing(existing));
        }
        g.selections.extend(rows);
        Ok(InitialInsert::Inserted(g.section_rows(date, section)))
    }

    async fn append(
        &self,
        date: NaiveDate,
        section: SectionKind,
        capacity: usize,
        rows: Vec<Selection>,
    ) -> Result<Vec<Selection>> {
        let mut g = self.lock()?;
        let adding = rows.iter().filter(|r| r.is_selected).count();
        let attempted = g.selected_count(date, section) + adding;
        if attempted > capacity {
            return Err(CurationError::CapacityExceeded {
                section: section.to_string(),
                capacity,
                attempted,
            });
        }
        for row in rows {
            let dup = g.selections.iter().any(|s| {
                s.campaign_date == date && s.section == section && s.candidate_id == row.candidate_id
            });
            if !dup {
                g.selections.push(row);
            }
        }
        Ok(g.section_rows(date, section))
    }

    async fn set_selected(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidate_id: &str,
        selected: bool,
        capacity: usize,
    ) -> Result<Selection> {
        let mut g = self.lock()?;
        let count = g.selected_count(date, section);
        let row = g
            .selections
            .iter_mut()
            .find(|s| s.campaign_date == date && s.section == section && s.candidate_id == candidate_id)
            .ok_or_else(|| not_found("selection", format!("{date}/{section}/{candidate_id}")))?;
        if selected && !row.is_selected && count + 1 > capacity {
            return Err(CurationError::CapacityExceeded {
                section: section.to_string(),
                capacity,
                attempted: count + 1,
            });
        }
        row.is_selected = selected;
        if !selected {
            row.is_featured = false;
        }
        Ok(row.clone())
    }

    async fn set_featured(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidate_id: &str,
    ) -> Result<()> {
        let mut g = self.lock()?;
        let mut found = false;
        for s in g
            .selections
            .iter_mut()
            .filter(|s| s.campaign_date == date && s.section == section)
        {
            s.is_featured = s.candidate_id == candidate_id;
            found |= s.is_featured;
        }
        if !found {
            return Err(not_found("selection", format!("{date}/{section}/{candidate_id}")));
        }
        Ok(())
    }

    async fn selected_rows(&self, sections: &[SectionKind]) -> Result<Vec<Selection>> {
        Ok(self
            .lock()?
            .selections
            .iter()
            .filter(|s| s.is_selected && sections.contains(&s.section))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn dining_deals(&self) -> Result<Vec<DiningDeal>> {
        Ok(self.lock()?.dining_deals.values().cloned().collect())
    }

    async fn getaways(&self) -> Result<Vec<GetawayListing>> {
        Ok(self.lock()?.getaways.values().cloned().collect())
    }

    async fn upsert_dining_deal(&self, deal: DiningDeal) -> Result<()> {
        self.lock()?.dining_deals.insert(deal.id.clone(), deal);
        Ok(())
    }

    async fn upsert_getaway(&self, listing: GetawayListing) -> Result<()> {
        self.lock()?.getaways.insert(listing.id.clone(), listing);
        Ok(())
    }

    async fn record_featured(&self, section: SectionKind, ids: &[String], date: NaiveDate) -> Result<()> {
        let mut g = self.lock()?;
        for id in ids {
            match section {
                SectionKind::DiningDeals => {
                    if let Some(d) = g.dining_deals.get_mut(id) {
                        d.last_featured_on = Some(date);
                    }
                }
                SectionKind::Getaways => {
                    if let Some(l) = g.getaways.get_mut(id) {
                        l.last_featured_on = Some(date);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn row(id: &str, order: u32) -> Selection {
        Selection {
            campaign_date: day(),
            section: SectionKind::Articles,
            candidate_id: id.into(),
            selection_order: order,
            is_featured: order == 1,
            is_selected: true,
            rank_score: 10.0,
            selected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn initial_insert_happens_once() {
        let s = MemoryStore::new();
        let first = s
            .insert_initial(day(), SectionKind::Articles, vec![row("a", 1)])
            .await
            .unwrap();
        assert!(matches!(first, InitialInsert::Inserted(ref v) if v.len() == 1));
        let second = s
            .insert_initial(day(), SectionKind::Articles, vec![row("b", 1), row("c", 2)])
            .await
            .unwrap();
        match second {
            InitialInsert::Existing(v) => {
                assert_eq!(v.len(), 1);
                assert_eq!(v[0].candidate_id, "a");
            }
            other => panic!("expected existing rows, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_refuses_to_overflow_capacity() {
        let s = MemoryStore::new();
        s.insert_initial(day(), SectionKind::Articles, vec![row("a", 1), row("b", 2)])
            .await
            .unwrap();
        let err = s
            .append(day(), SectionKind::Articles, 2, vec![row("c", 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, CurationError::CapacityExceeded { attempted: 3, .. }));

        s.set_selected(day(), SectionKind::Articles, "a", false, 2)
            .await
            .unwrap();
        let rows = s
            .append(day(), SectionKind::Articles, 2, vec![row("c", 3)])
            .await
            .unwrap();
        assert_eq!(rows.iter().filter(|r| r.is_selected).count(), 2);
    }

    #[tokio::test]
    async fn review_guard_blocks_second_transition() {
        let s = MemoryStore::new();
        s.insert_campaign_if_absent(Campaign::new(day(), Utc::now()))
            .await
            .unwrap();
        let req = TransitionRequest {
            date: day(),
            from: vec![CampaignStatus::Draft],
            to: CampaignStatus::InReview,
            at: Utc::now(),
            review_guard: Some(day()),
        };
        assert!(matches!(
            s.transition(req.clone()).await.unwrap(),
            TransitionWrite::Applied(_)
        ));
        assert_eq!(
            s.transition(req).await.unwrap(),
            TransitionWrite::GuardAlreadySet
        );
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");
        let s = MemoryStore::new();
        s.insert_campaign_if_absent(Campaign::new(day(), Utc::now()))
            .await
            .unwrap();
        s.insert_initial(day(), SectionKind::Articles, vec![row("a", 1)])
            .await
            .unwrap();
        s.save_snapshot(&path).unwrap();

        let restored = MemoryStore::load_snapshot(&path).unwrap();
        assert!(restored.campaign(day()).await.unwrap().is_some());
        assert_eq!(
            restored
                .selections(day(), SectionKind::Articles)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(MemoryStore::load_snapshot(&dir.path().join("missing.json")).is_ok());
    }
}
