// src/reconcile/window.rs
//! Sync window: the rolling week fetched day by day, or an explicit range for
//! manual backfill.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CurationError, Result};

/// Longest accepted override range, in days.
pub const MAX_OVERRIDE_DAYS: i64 = 62;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rolling,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub kind: WindowKind,
}

impl SyncWindow {
    /// `today` through `today + days - 1`.
    pub fn rolling(today: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: today,
            end: today + Duration::days(span),
            kind: WindowKind::Rolling,
        }
    }

    pub fn override_range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(CurationError::Validation(format!(
                "window end {end} is before start {start}"
            )));
        }
        if (end - start).num_days() >= MAX_OVERRIDE_DAYS {
            return Err(CurationError::Validation(format!(
                "window longer than {MAX_OVERRIDE_DAYS} days"
            )));
        }
        Ok(Self {
            start,
            end,
            kind: WindowKind::Override,
        })
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }

    /// Date ranges requested from the feed. The rolling window is always one
    /// request range per day; an override is a single range.
    pub fn segments(&self) -> Vec<(NaiveDate, NaiveDate)> {
        match self.kind {
            WindowKind::Rolling => self.days().into_iter().map(|d| (d, d)).collect(),
            WindowKind::Override => vec![(self.start, self.end)],
        }
    }
}
