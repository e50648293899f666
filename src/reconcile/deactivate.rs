// src/reconcile/deactivate.rs
//! Deactivation pass: ended, feed-absent, unprotected records only.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::ProtectionPolicy;
use crate::error::Result;
use crate::model::{CampaignStatus, ExternalEvent, SectionKind};
use crate::store::{CampaignStore, SelectionStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeactivationPlan {
    pub deactivate: Vec<String>,
    /// Would have been deactivated but is referenced by a live selection.
    pub protected: Vec<String>,
}

/// Decide which active records to turn off. Records that have not ended are
/// never touched: absence may only mean they fell outside this window.
pub fn plan_deactivation(
    active: &[ExternalEvent],
    seen: &HashSet<String>,
    protected: &HashSet<String>,
    now: DateTime<Utc>,
) -> DeactivationPlan {
    let mut plan = DeactivationPlan::default();
    for ev in active {
        if !ev.active || seen.contains(&ev.external_id) || !ev.has_ended(now) {
            continue;
        }
        if protected.contains(&ev.external_id) {
            plan.protected.push(ev.external_id.clone());
        } else {
            plan.deactivate.push(ev.external_id.clone());
        }
    }
    plan.deactivate.sort();
    plan.protected.sort();
    plan
}

/// External ids referenced by an `is_selected` event row. Under
/// `UntilCampaignClosed`, rows of sent or archived campaigns no longer count;
/// a row whose campaign is missing still protects.
pub async fn protected_event_ids<S>(store: &S, policy: ProtectionPolicy) -> Result<HashSet<String>>
where
    S: CampaignStore + SelectionStore + ?Sized,
{
    let rows = store
        .selected_rows(&[SectionKind::Events, SectionKind::SponsoredEvents])
        .await?;
    if policy == ProtectionPolicy::Always {
        return Ok(rows.into_iter().map(|r| r.candidate_id).collect());
    }

    let mut status: HashMap<NaiveDate, Option<CampaignStatus>> = HashMap::new();
    let mut out = HashSet::new();
    for row in rows {
        let st = match status.get(&row.campaign_date) {
            Some(s) => *s,
            None => {
                let s = store.campaign(row.campaign_date).await?.map(|c| c.status);
                status.insert(row.campaign_date, s);
                s
            }
        };
        if !st.is_some_and(|s| s.is_closed()) {
            out.insert(row.candidate_id);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ev(id: &str, ends_in_hours: i64) -> ExternalEvent {
        let now = Utc::now();
        ExternalEvent {
            external_id: id.into(),
            title: id.into(),
            description: String::new(),
            venue: None,
            address: None,
            url: None,
            image_url: None,
            category: None,
            start: now + Duration::hours(ends_in_hours - 2),
            end: Some(now + Duration::hours(ends_in_hours)),
            featured: false,
            paid_placement: false,
            active: true,
            summary: None,
            first_seen_at: now,
            last_synced_at: now,
        }
    }

    #[test]
    fn only_ended_absent_unprotected_records_go() {
        let active = vec![
            ev("feed:past", -5),
            ev("feed:future", 48),
            ev("feed:seen", -5),
            ev("feed:kept", -5),
        ];
        let seen: HashSet<String> = ["feed:seen".to_string()].into();
        let protected: HashSet<String> = ["feed:kept".to_string()].into();
        let plan = plan_deactivation(&active, &seen, &protected, Utc::now());
        assert_eq!(plan.deactivate, vec!["feed:past".to_string()]);
        assert_eq!(plan.protected, vec!["feed:kept".to_string()]);
    }

    #[test]
    fn open_ended_event_uses_start_time() {
        let mut e = ev("feed:open", -1);
        e.end = None;
        e.start = Utc::now() + Duration::hours(3);
        let plan = plan_deactivation(&[e], &HashSet::new(), &HashSet::new(), Utc::now());
        assert!(plan.deactivate.is_empty());
    }
}
