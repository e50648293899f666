// tests/reconcile_sync.rs
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use common::*;
use newsletter_curation::config::ProtectionPolicy;
use newsletter_curation::error::CurationError;
use newsletter_curation::model::{Campaign, CampaignStatus, SectionKind, Selection};
use newsletter_curation::store::{
    CampaignStore, EventStore, MemoryStore, SelectionStore, TransitionRequest,
};

async fn seed_past_events(store: &MemoryStore) {
    let selected = stored_event(
        "feed:old-selected",
        Utc.with_ymd_and_hms(2025, 5, 30, 18, 0, 0).unwrap(),
        Some(Utc.with_ymd_and_hms(2025, 5, 30, 20, 0, 0).unwrap()),
    );
    let unselected = stored_event(
        "feed:old-unselected",
        Utc.with_ymd_and_hms(2025, 5, 31, 18, 0, 0).unwrap(),
        None,
    );
    let future = stored_event(
        "feed:future",
        Utc.with_ymd_and_hms(2025, 6, 5, 18, 0, 0).unwrap(),
        None,
    );
    let manual = stored_event(
        "local:manual",
        Utc.with_ymd_and_hms(2025, 5, 20, 18, 0, 0).unwrap(),
        None,
    );
    for ev in [selected, unselected, future, manual] {
        put_event(store, ev).await;
    }

    store
        .insert_campaign_if_absent(Campaign::new(day(1), now()))
        .await
        .unwrap();
    let row = Selection {
        campaign_date: day(1),
        section: SectionKind::Events,
        candidate_id: "feed:old-selected".into(),
        selection_order: 1,
        is_featured: true,
        is_selected: true,
        rank_score: 1.0,
        selected_at: now(),
    };
    store
        .insert_initial(day(1), SectionKind::Events, vec![row])
        .await
        .unwrap();
}

async fn is_active(store: &MemoryStore, id: &str) -> bool {
    store.event(id).await.unwrap().unwrap().active
}

#[tokio::test]
async fn selected_past_event_survives_deactivation() {
    let store = Arc::new(MemoryStore::new());
    seed_past_events(&store).await;
    let feed = FakeFeed::new()
        .with_event(day(3), feed_event("new-1", "Farmers Market", "2025-06-03T14:00:00Z", None))
        .build();
    let engine = engine(store.clone(), ScriptedOracle::new().build(), feed);

    let report = engine.sync_events(None, now()).await.unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.protected, 1);
    assert_eq!(report.days_total, 7);
    assert!(!report.deactivation_skipped);

    assert!(is_active(&store, "feed:old-selected").await);
    assert!(!is_active(&store, "feed:old-unselected").await);
    assert!(is_active(&store, "feed:future").await, "not ended: absence proves nothing");
    assert!(is_active(&store, "local:manual").await, "other sources are never touched");
    assert!(is_active(&store, "feed:new-1").await);
}

#[tokio::test]
async fn protection_lapses_once_campaign_is_sent_when_configured() {
    let store = Arc::new(MemoryStore::new());
    seed_past_events(&store).await;
    store
        .transition(TransitionRequest {
            date: day(1),
            from: vec![CampaignStatus::Draft],
            to: CampaignStatus::Sent,
            at: now(),
            review_guard: None,
        })
        .await
        .unwrap();

    let mut cfg = test_config();
    cfg.reconcile.protection = ProtectionPolicy::UntilCampaignClosed;
    let engine = engine_with(
        cfg,
        store.clone(),
        ScriptedOracle::new().build(),
        FakeFeed::new().build(),
        Vec::new(),
    );

    let report = engine.sync_events(None, now()).await.unwrap();
    assert_eq!(report.deactivated, 2);
    assert_eq!(report.protected, 0);
    assert!(!is_active(&store, "feed:old-selected").await);
}

#[tokio::test]
async fn override_window_keeps_local_flags() {
    let store = Arc::new(MemoryStore::new());
    let mut ev = stored_event(
        "feed:42",
        Utc.with_ymd_and_hms(2025, 6, 10, 18, 0, 0).unwrap(),
        None,
    );
    ev.featured = true;
    ev.paid_placement = true;
    ev.summary = Some("Kept summary.".into());
    put_event(&store, ev).await;

    let feed = FakeFeed::new()
        .with_event(day(10), feed_event("42", "Renamed &amp; Moved", "2025-06-10T19:00:00Z", None))
        .build();
    let engine = engine(store.clone(), ScriptedOracle::new().build(), feed.clone());

    let report = engine
        .sync_events(Some((day(10), day(12))), now())
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.days_total, 1, "override is fetched as one range");
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

    let stored = store.event("feed:42").await.unwrap().unwrap();
    assert_eq!(stored.title, "Renamed & Moved");
    assert_eq!(stored.start, Utc.with_ymd_and_hms(2025, 6, 10, 19, 0, 0).unwrap());
    assert!(stored.featured);
    assert!(stored.paid_placement);
    assert_eq!(stored.summary.as_deref(), Some("Kept summary."));
}

#[tokio::test]
async fn unreachable_feed_fails_without_deactivating() {
    let store = Arc::new(MemoryStore::new());
    seed_past_events(&store).await;
    let engine = engine(
        store.clone(),
        ScriptedOracle::new().build(),
        FakeFeed::new().unreachable().build(),
    );

    let err = engine.sync_events(None, now()).await.unwrap_err();
    match err {
        CurationError::SourceUnavailable { report } => {
            assert_eq!(report.days_failed, 7);
            assert_eq!(report.deactivated, 0);
        }
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
    assert!(is_active(&store, "feed:old-unselected").await);
}

#[tokio::test]
async fn one_failing_day_does_not_abort_the_run() {
    let store = Arc::new(MemoryStore::new());
    let feed = FakeFeed::new()
        .with_event(day(3), feed_event("a", "Concert", "2025-06-03T23:00:00Z", None))
        .with_event(day(4), feed_event("b", "Lost", "2025-06-04T23:00:00Z", None))
        .with_event(day(5), feed_event("c", "Parade", "2025-06-05T15:00:00Z", None))
        .failing_day(day(4))
        .build();
    let engine = engine(store.clone(), ScriptedOracle::new().build(), feed);

    let report = engine.sync_events(None, now()).await.unwrap();
    assert_eq!(report.days_failed, 1);
    assert!(report.errors >= 1);
    assert_eq!(report.new, 2);
    assert!(store.event("feed:a").await.unwrap().is_some());
    assert!(store.event("feed:b").await.unwrap().is_none());
    assert!(store.event("feed:c").await.unwrap().is_some());
}

#[tokio::test]
async fn rerun_converges_and_summarizes_once() {
    let store = Arc::new(MemoryStore::new());
    let mut cfg = test_config();
    cfg.reconcile.summary_min_chars = 5;
    let oracle = ScriptedOracle::new().build();
    let feed = FakeFeed::new()
        .with_event(day(2), feed_event("a", "Story Hour", "2025-06-02T20:00:00Z", None))
        .with_event(day(2), feed_event("bad", "", "2025-06-02T20:00:00Z", None))
        .build();
    let engine = engine_with(cfg, store.clone(), oracle.clone(), feed, Vec::new());

    let first = engine.sync_events(None, now()).await.unwrap();
    assert_eq!(first.new, 1);
    assert_eq!(first.errors, 1, "item without a title is rejected");
    assert_eq!(first.summaries_generated, 1);

    let second = engine.sync_events(None, now()).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.summaries_generated, 0);
    assert_eq!(oracle.summary_calls.load(Ordering::SeqCst), 1);

    let ev = store.event("feed:a").await.unwrap().unwrap();
    assert_eq!(ev.summary.as_deref(), Some("Summary of Story Hour."));
}

#[tokio::test]
async fn exhausted_budget_skips_deactivation() {
    let store = Arc::new(MemoryStore::new());
    seed_past_events(&store).await;
    let feed = FakeFeed::new()
        .with_event(day(3), feed_event("new-1", "Farmers Market", "2025-06-03T14:00:00Z", None))
        .build();
    let mut cfg = test_config();
    cfg.reconcile.run_budget_secs = 0;
    let engine = engine_with(cfg, store.clone(), ScriptedOracle::new().build(), feed.clone(), Vec::new());

    let report = engine.sync_events(None, now()).await.unwrap();
    assert!(report.budget_exhausted);
    assert!(report.deactivation_skipped);
    assert_eq!(report.deactivated, 0);
    assert_eq!(report.new, 0);
    assert!(report.batches_completed <= report.batches_total);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 0);

    // the ended event would have been retired by a complete run
    assert!(is_active(&store, "feed:old-unselected").await);
    assert!(is_active(&store, "feed:future").await);
}
