// src/scoring/dedup.rs
//! Topic grouping. The oracle proposes groups of indices; this module turns
//! them into a partition of the pool, picks one canonical member per group
//! and retires the rest.

use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::model::{CandidateArticle, TopicGroup};

/// Every index in `0..n` in exactly one group. The first group an index
/// appears in wins; out-of-range indices are ignored; leftovers become
/// singletons.
pub fn resolve_groups(proposed: Vec<Vec<usize>>, n: usize) -> Vec<Vec<usize>> {
    let mut seen = vec![false; n];
    let mut out: Vec<Vec<usize>> = Vec::new();
    for g in proposed {
        let mut members = Vec::new();
        for i in g {
            if i < n && !seen[i] {
                seen[i] = true;
                members.push(i);
            }
        }
        if !members.is_empty() {
            out.push(members);
        }
    }
    for (i, taken) in seen.iter().enumerate() {
        if !taken {
            out.push(vec![i]);
        }
    }
    out
}

/// Longest generated copy wins, then higher rank, then earlier ingestion,
/// then id. Members without copy rank below any member with copy; raw
/// source bodies never take part.
fn canonical_order(a: &CandidateArticle, b: &CandidateArticle) -> Ordering {
    a.generated_len()
        .cmp(&b.generated_len())
        .then_with(|| {
            a.rank_score
                .unwrap_or(0.0)
                .total_cmp(&b.rank_score.unwrap_or(0.0))
        })
        .then_with(|| Reverse(a.ingested_at).cmp(&Reverse(b.ingested_at)))
        .then_with(|| Reverse(&a.id).cmp(&Reverse(&b.id)))
}

/// Index (into `articles`) of the canonical member.
pub fn pick_canonical(members: &[usize], articles: &[CandidateArticle]) -> Option<usize> {
    members
        .iter()
        .copied()
        .max_by(|&a, &b| canonical_order(&articles[a], &articles[b]))
}

pub fn group_id(canonical_id: &str) -> String {
    let short: String = canonical_id.chars().take(12).collect();
    format!("tg-{short}")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingOutcome {
    pub groups: Vec<TopicGroup>,
    /// Ids that were active and lost their canonical status in this pass.
    pub retired: Vec<String>,
}

/// Apply resolved groups over `pool` (indices into `articles`) and rebuild the
/// campaign's full group list.
///
/// * Duplicates already retired under a pool member's previous group follow
///   that member into its new group.
/// * Previous groups with no member in the pool are kept unchanged.
/// * Every article not covered by any group gets a singleton group.
pub fn apply_groups(
    articles: &mut [CandidateArticle],
    pool: &[usize],
    resolved: &[Vec<usize>],
    previous: &[TopicGroup],
    date: NaiveDate,
) -> GroupingOutcome {
    let prev_by_canonical: HashMap<&str, &TopicGroup> = previous
        .iter()
        .map(|g| (g.canonical_id.as_str(), g))
        .collect();
    let index_by_id: HashMap<String, usize> = articles
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id.clone(), i))
        .collect();

    let mut out = GroupingOutcome::default();
    let mut covered: HashSet<String> = HashSet::new();

    for group in resolved {
        let members: Vec<usize> = group.iter().filter_map(|&p| pool.get(p).copied()).collect();
        let Some(canonical) = pick_canonical(&members, articles) else {
            continue;
        };
        let canonical_id = articles[canonical].id.clone();
        let gid = group_id(&canonical_id);

        let mut duplicates: Vec<String> = Vec::new();
        for &m in &members {
            let id = articles[m].id.clone();
            if let Some(prev) = prev_by_canonical.get(id.as_str()) {
                for d in &prev.duplicate_ids {
                    if *d != canonical_id && !duplicates.contains(d) {
                        duplicates.push(d.clone());
                    }
                }
            }
            if m != canonical && !duplicates.contains(&id) {
                duplicates.push(id);
            }
        }

        {
            let c = &mut articles[canonical];
            c.is_canonical = true;
            c.topic_group_id = Some(gid.clone());
        }
        for d in &duplicates {
            if let Some(&i) = index_by_id.get(d) {
                let a = &mut articles[i];
                if a.is_active {
                    out.retired.push(a.id.clone());
                }
                a.is_active = false;
                a.is_canonical = false;
                a.topic_group_id = Some(gid.clone());
            }
        }

        covered.insert(canonical_id.clone());
        covered.extend(duplicates.iter().cloned());
        out.groups.push(TopicGroup {
            id: gid,
            campaign_date: date,
            canonical_id,
            duplicate_ids: duplicates,
        });
    }

    for prev in previous {
        if prev.members().any(|m| covered.contains(m)) {
            continue;
        }
        covered.extend(prev.members().map(str::to_string));
        out.groups.push(prev.clone());
    }

    for a in articles.iter_mut() {
        if covered.contains(&a.id) {
            continue;
        }
        let gid = group_id(&a.id);
        a.topic_group_id = Some(gid.clone());
        covered.insert(a.id.clone());
        out.groups.push(TopicGroup {
            id: gid,
            campaign_date: date,
            canonical_id: a.id.clone(),
            duplicate_ids: Vec::new(),
        });
    }

    out
}
