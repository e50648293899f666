// src/scoring/scorer.rs
//! Per-article scoring: oracle ratings folded into one rank score.

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::model::{CandidateArticle, CriteriaScores};
use crate::oracle::Oracle;

pub const MAX_RANK: f32 = 30.0;

/// Apply the missing-image penalty to `interest` (floored at 0).
pub fn apply_image_penalty(scores: CriteriaScores, has_image: bool, penalty: u8) -> CriteriaScores {
    if has_image {
        return scores;
    }
    CriteriaScores {
        interest: scores.interest.saturating_sub(penalty),
        ..scores
    }
}

/// Weighted sum of the three ratings, clamped to 0..=30.
pub fn weighted_rank(scores: &CriteriaScores, cfg: &ScoringConfig) -> f32 {
    let raw = scores.interest as f32 * cfg.interest_weight
        + scores.local_relevance as f32 * cfg.local_relevance_weight
        + scores.community_impact as f32 * cfg.community_impact_weight;
    if raw.is_finite() {
        raw.clamp(0.0, MAX_RANK)
    } else {
        0.0
    }
}

/// Score one article in place. Returns false when the oracle failed; the
/// article is then marked with rank 0 so it never reaches selection.
pub async fn score_article(
    oracle: &dyn Oracle,
    article: &mut CandidateArticle,
    cfg: &ScoringConfig,
    now: DateTime<Utc>,
) -> bool {
    let has_image = article
        .image_url
        .as_deref()
        .is_some_and(|u| !u.trim().is_empty());
    match oracle.score(article).await {
        Ok(raw) => {
            let scores = apply_image_penalty(raw, has_image, cfg.missing_image_penalty);
            article.rank_score = Some(weighted_rank(&scores, cfg));
            article.scores = Some(scores);
            article.scored_at = Some(now);
            true
        }
        Err(e) => {
            tracing::warn!(target: "scoring", id = %article.id, error = %e, "scoring failed; rank set to 0");
            article.scores = None;
            article.rank_score = Some(0.0);
            article.scored_at = Some(now);
            false
        }
    }
}
