// src/selector.rs
//! Bounded slot selector: rank eligible candidates, take the top `capacity`,
//! persist the pick once per (campaign, section).
//!
//! The first invocation writes through [`SelectionStore::insert_initial`],
//! which is a check-and-insert; any later or concurrent invocation gets the
//! persisted rows back unchanged. Freed slots are only refilled by an explicit
//! [`SlotSelector::reselect`].

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use metrics::counter;
use serde::Serialize;

use crate::config::CapacityConfig;
use crate::error::Result;
use crate::model::{
    CandidateArticle, DiningDeal, ExternalEvent, GetawayListing, SectionKind, Selection,
};
use crate::store::{InitialInsert, SelectionStore};

/// Anything that can compete for a slot.
pub trait SlotCandidate {
    fn candidate_id(&self) -> &str;
    fn rank_score(&self) -> f32;
    /// Earlier wins on equal rank (ingestion time or event start).
    fn tie_break_at(&self) -> DateTime<Utc>;
    fn is_eligible(&self) -> bool;
    /// Marked featured or sponsored by an operator or upstream.
    fn externally_featured(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOutcome {
    pub section: SectionKind,
    pub selections: Vec<Selection>,
    /// True when this call wrote rows.
    pub created: bool,
    /// Candidates this call selected, in slot order.
    pub added: Vec<String>,
}

impl SelectionOutcome {
    pub fn selected(&self) -> impl Iterator<Item = &Selection> {
        self.selections.iter().filter(|s| s.is_selected)
    }

    pub fn selected_count(&self) -> usize {
        self.selected().count()
    }
}

fn compare<C: SlotCandidate>(a: &C, b: &C) -> Ordering {
    b.rank_score()
        .total_cmp(&a.rank_score())
        .then_with(|| a.tie_break_at().cmp(&b.tie_break_at()))
        .then_with(|| a.candidate_id().cmp(b.candidate_id()))
}

/// Eligible candidates not in `exclude`, best first, at most `limit`.
pub fn rank<'a, C: SlotCandidate>(
    candidates: &'a [C],
    limit: usize,
    exclude: &HashSet<&str>,
) -> Vec<&'a C> {
    let mut pool: Vec<&C> = candidates
        .iter()
        .filter(|c| c.is_eligible() && !exclude.contains(c.candidate_id()))
        .collect();
    pool.sort_by(|a, b| compare(*a, *b));
    pool.truncate(limit);
    pool
}

fn build_rows<C: SlotCandidate>(
    date: NaiveDate,
    section: SectionKind,
    picked: &[&C],
    first_order: u32,
    promote_top: bool,
    now: DateTime<Utc>,
) -> Vec<Selection> {
    picked
        .iter()
        .enumerate()
        .map(|(i, c)| Selection {
            campaign_date: date,
            section,
            candidate_id: c.candidate_id().to_string(),
            selection_order: first_order + i as u32,
            is_featured: c.externally_featured() || (promote_top && i == 0),
            is_selected: true,
            rank_score: c.rank_score(),
            selected_at: now,
        })
        .collect()
}

pub struct SlotSelector<S: SelectionStore + ?Sized> {
    store: Arc<S>,
    capacity: CapacityConfig,
}

impl<S: SelectionStore + ?Sized> SlotSelector<S> {
    pub fn new(store: Arc<S>, capacity: CapacityConfig) -> Self {
        Self { store, capacity }
    }

    pub fn capacity(&self, section: SectionKind) -> usize {
        self.capacity.for_section(section)
    }

    /// First selection for the pair, or the persisted one if it exists.
    pub async fn select<C: SlotCandidate>(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidates: &[C],
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome> {
        counter!("selection_runs_total", "section" => section.as_str()).increment(1);

        let existing = self.store.selections(date, section).await?;
        if !existing.is_empty() {
            tracing::debug!(target: "selector", %date, %section, rows = existing.len(), "selection already persisted");
            return Ok(SelectionOutcome {
                section,
                selections: existing,
                created: false,
                added: Vec::new(),
            });
        }

        let capacity = self.capacity(section);
        let picked = rank(candidates, capacity, &HashSet::new());
        if picked.is_empty() {
            tracing::info!(target: "selector", %date, %section, "no eligible candidates");
            return Ok(SelectionOutcome {
                section,
                selections: Vec::new(),
                created: false,
                added: Vec::new(),
            });
        }
        let promote = !picked.iter().any(|c| c.externally_featured());
        let rows = build_rows(date, section, &picked, 1, promote, now);

        match self.store.insert_initial(date, section, rows).await? {
            InitialInsert::Inserted(rows) => {
                tracing::info!(
                    target: "selector",
                    %date,
                    %section,
                    selected = rows.len(),
                    capacity,
                    eligible = candidates.iter().filter(|c| c.is_eligible()).count(),
                    "selection persisted"
                );
                let added = rows.iter().map(|r| r.candidate_id.clone()).collect();
                Ok(SelectionOutcome {
                    section,
                    selections: rows,
                    created: true,
                    added,
                })
            }
            InitialInsert::Existing(rows) => {
                tracing::info!(target: "selector", %date, %section, "lost race; returning persisted selection");
                Ok(SelectionOutcome {
                    section,
                    selections: rows,
                    created: false,
                    added: Vec::new(),
                })
            }
        }
    }

    /// Fill slots freed by deselection. Candidates that already have a row
    /// (selected or not) are never picked again.
    pub async fn reselect<C: SlotCandidate>(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidates: &[C],
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome> {
        let existing = self.store.selections(date, section).await?;
        if existing.is_empty() {
            return self.select(date, section, candidates, now).await;
        }
        counter!("selection_runs_total", "section" => section.as_str()).increment(1);

        let capacity = self.capacity(section);
        let selected = existing.iter().filter(|s| s.is_selected).count();
        let free = capacity.saturating_sub(selected);
        let exclude: HashSet<&str> = existing.iter().map(|s| s.candidate_id.as_str()).collect();
        let picked = rank(candidates, free, &exclude);

        let next_order = existing
            .iter()
            .map(|s| s.selection_order)
            .max()
            .unwrap_or(0)
            + 1;
        let rows = if picked.is_empty() {
            existing
        } else {
            let new_rows = build_rows(date, section, &picked, next_order, false, now);
            self.store.append(date, section, capacity, new_rows).await?
        };

        let rows = self.ensure_featured(date, section, rows).await?;
        tracing::info!(target: "selector", %date, %section, added = picked.len(), free, "reselection done");
        Ok(SelectionOutcome {
            section,
            selections: rows,
            created: !picked.is_empty(),
            added: picked.iter().map(|c| c.candidate_id().to_string()).collect(),
        })
    }

    /// Promote the best selected row when no selected row is featured.
    async fn ensure_featured(
        &self,
        date: NaiveDate,
        section: SectionKind,
        rows: Vec<Selection>,
    ) -> Result<Vec<Selection>> {
        if rows.iter().any(|s| s.is_selected && s.is_featured) {
            return Ok(rows);
        }
        let top = rows
            .iter()
            .filter(|s| s.is_selected)
            .min_by(|a, b| {
                b.rank_score
                    .total_cmp(&a.rank_score)
                    .then_with(|| a.selection_order.cmp(&b.selection_order))
            })
            .map(|s| s.candidate_id.clone());
        match top {
            Some(id) => {
                self.store.set_featured(date, section, &id).await?;
                self.store.selections(date, section).await
            }
            None => Ok(rows),
        }
    }

    /// Turn one row off. The slot stays empty until `reselect`.
    pub async fn deselect(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidate_id: &str,
    ) -> Result<Selection> {
        let capacity = self.capacity(section);
        let row = self
            .store
            .set_selected(date, section, candidate_id, false, capacity)
            .await?;
        tracing::info!(target: "selector", %date, %section, candidate = candidate_id, "deselected");
        Ok(row)
    }

    /// Turn a previously deselected row back on, within capacity.
    pub async fn restore(
        &self,
        date: NaiveDate,
        section: SectionKind,
        candidate_id: &str,
    ) -> Result<Selection> {
        let capacity = self.capacity(section);
        self.store
            .set_selected(date, section, candidate_id, true, capacity)
            .await
    }
}

// ------------------------------------------------------------
// Section candidates
// ------------------------------------------------------------

impl SlotCandidate for CandidateArticle {
    fn candidate_id(&self) -> &str {
        &self.id
    }
    fn rank_score(&self) -> f32 {
        self.rank_score.unwrap_or(0.0)
    }
    fn tie_break_at(&self) -> DateTime<Utc> {
        self.ingested_at
    }
    /// Scored above zero, canonical, active.
    fn is_eligible(&self) -> bool {
        self.is_active && self.is_canonical && self.rank_score.is_some_and(|r| r > 0.0)
    }
}

/// An event competing for a day's event or sponsored slots.
#[derive(Debug, Clone)]
pub struct EventSlot<'a> {
    event: &'a ExternalEvent,
    eligible: bool,
}

impl<'a> EventSlot<'a> {
    pub fn new(
        event: &'a ExternalEvent,
        section: SectionKind,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Self {
        let sponsored_ok = section != SectionKind::SponsoredEvents
            || event.featured
            || event.paid_placement;
        Self {
            event,
            eligible: event.active && sponsored_ok && event.occurs_on(day, offset),
        }
    }
}

impl SlotCandidate for EventSlot<'_> {
    fn candidate_id(&self) -> &str {
        &self.event.external_id
    }
    /// Paid placements first, then featured events, then the rest.
    fn rank_score(&self) -> f32 {
        if self.event.paid_placement {
            3.0
        } else if self.event.featured {
            2.0
        } else {
            1.0
        }
    }
    fn tie_break_at(&self) -> DateTime<Utc> {
        self.event.start
    }
    fn is_eligible(&self) -> bool {
        self.eligible
    }
    fn externally_featured(&self) -> bool {
        self.event.featured || self.event.paid_placement
    }
}

/// Days-since-last-shown cap used by rotation ranking.
const ROTATION_CAP_DAYS: i64 = 30;

/// Dining deal or getaway listing under rotation: items not shown recently
/// rank higher.
#[derive(Debug, Clone)]
pub struct RotationSlot {
    id: String,
    active: bool,
    featured: bool,
    last_featured_on: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    day: NaiveDate,
}

impl RotationSlot {
    pub fn from_deal(d: &DiningDeal, day: NaiveDate) -> Self {
        Self {
            id: d.id.clone(),
            active: d.active,
            featured: d.featured,
            last_featured_on: d.last_featured_on,
            created_at: d.created_at,
            day,
        }
    }

    pub fn from_listing(l: &GetawayListing, day: NaiveDate) -> Self {
        Self {
            id: l.id.clone(),
            active: l.active,
            featured: l.featured,
            last_featured_on: l.last_featured_on,
            created_at: l.created_at,
            day,
        }
    }
}

impl SlotCandidate for RotationSlot {
    fn candidate_id(&self) -> &str {
        &self.id
    }
    fn rank_score(&self) -> f32 {
        let days = match self.last_featured_on {
            Some(d) => (self.day - d).num_days().clamp(0, ROTATION_CAP_DAYS),
            None => ROTATION_CAP_DAYS,
        };
        (days + 1) as f32
    }
    fn tie_break_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn is_eligible(&self) -> bool {
        self.active
    }
    fn externally_featured(&self) -> bool {
        self.featured
    }
}
