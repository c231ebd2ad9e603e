mod common;

use common::*;
use minesync_storage::{Clock, SyncTier};
use minesync_sync::{LoadSource, RemoteError, SaveOptions, SaveOutcome, SyncError, Winner};
use minesync_types::{keys, EpochMillis, GameStateDocument, UserId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn store_locally(h: &Harness, doc: &GameStateDocument) {
    let json = serde_json::to_string(doc).unwrap();
    h.sync_tier
        .set(&keys::game_state(&doc.user_id), &json)
        .unwrap();
}

// ── First load ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_load_returns_fresh_default() {
    let h = harness();
    let user = user();

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Default);
    assert_eq!(loaded.document.version, 1);
    assert_eq!(loaded.document.user_id, user);
    assert_eq!(loaded.document.payload, json!({}));
    assert_eq!(loaded.resolution.unwrap().winner, Winner::None);
    assert_eq!(loaded.error, None);
}

#[tokio::test(start_paused = true)]
async fn default_payload_is_pluggable() {
    let h = harness();
    let facade = h
        .facade
        .with_default_payload(|user| json!({ "ore": 0, "owner": user.as_str() }));

    let doc = facade.load(&user()).await;
    assert_eq!(doc.payload, json!({ "ore": 0, "owner": "4021" }));
}

#[tokio::test(start_paused = true)]
async fn save_then_load_round_trips_through_memory() {
    let h = harness();
    let user = user();

    assert!(h.facade.save(&user, doc(12), SaveOptions::manual()).await);
    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Memory);
    assert_eq!(loaded.document.payload["ore"], json!(12));
    assert!(loaded.resolution.is_none());
}

// ── Invalidate ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn invalidate_drops_memory_only() {
    let h = harness();
    let user = user();
    h.remote.fail_pulls(RemoteError::Network("offline".into()));

    assert!(h.facade.save(&user, doc(3), SaveOptions::manual()).await);
    h.facade.invalidate(&user).await;

    let loaded = h.facade.load_detailed(&user).await;
    assert_ne!(loaded.source, LoadSource::Memory);
    assert_eq!(loaded.document.payload["ore"], json!(3));
    assert!(h.sync_tier.get(&keys::game_state(&user)).unwrap().is_some());
}

// ── Offline recovery ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn offline_save_failure_still_loads_local_copy() {
    init_tracing();
    let h = harness();
    let user = user();
    h.remote
        .fail_pushes(3, RemoteError::Network("offline".into()));
    h.remote.fail_pulls(RemoteError::Network("offline".into()));

    assert!(!h.facade.save(&user, doc(42), SaveOptions::manual()).await);
    assert_eq!(h.remote.push_count(), 3);

    h.facade.invalidate(&user).await;
    let loaded = h.facade.load(&user).await;
    assert_eq!(loaded.payload["ore"], json!(42));
}

#[tokio::test(start_paused = true)]
async fn backup_is_used_when_tier_copy_is_corrupted() {
    let h = harness();
    let user = user();
    h.remote.fail_pushes(3, RemoteError::Timeout);

    assert!(!h.facade.save(&user, doc(6), SaveOptions::manual()).await);
    h.sync_tier
        .set(&keys::game_state(&user), "{not json")
        .unwrap();
    h.facade.invalidate(&user).await;

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Backup);
    assert_eq!(loaded.document.payload["ore"], json!(6));
}

#[tokio::test(start_paused = true)]
async fn deferred_state_outranks_older_backup_after_reload() {
    let h = harness();
    let user = user();

    assert_eq!(h.facade.load(&user).await.version, 1);
    let first = h.facade.save_detailed(&user, doc(1), SaveOptions::manual()).await;
    assert_eq!(first, SaveOutcome::Saved { version: 2, batched: false });

    let later = doc_with(&user, json!({ "ore": 99 }))
        .with_last_modified(EpochMillis::new(START_MS + 60_000));
    let second = h.facade.save_detailed(&user, later, SaveOptions::manual()).await;
    assert_eq!(second, SaveOutcome::Deferred { retry_in: Duration::from_secs(5) });

    h.facade.invalidate(&user).await;
    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Local);
    assert_eq!(loaded.document.payload["ore"], json!(99));
    assert_eq!(loaded.document.version, 3);
}

// ── Reconciliation ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn recent_local_progress_beats_remote() {
    let h = harness();
    let user = user();
    let now = h.clock.now();
    store_locally(
        &h,
        &doc_with(&user, json!({ "ore": 50 })).with_last_modified(now),
    );
    h.remote.set_stored(
        doc_with(&user, json!({ "ore": 40 })).with_last_modified(now.saturating_sub(HOUR / 6)),
    );

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Local);
    assert_eq!(loaded.document.payload["ore"], json!(50));
    assert!(loaded.resolution.unwrap().merge_recommended);
}

#[tokio::test(start_paused = true)]
async fn implausible_local_lead_defers_to_remote() {
    let h = harness();
    let user = user();
    let now = h.clock.now();
    store_locally(
        &h,
        &doc_with(&user, json!({ "ore": 9000 })).with_last_modified(now),
    );
    h.remote.set_stored(
        doc_with(&user, json!({ "ore": 40 })).with_last_modified(now.saturating_sub(50 * HOUR)),
    );

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Remote);
    assert_eq!(loaded.document.payload["ore"], json!(40));

    // The remote winner is cached locally.
    let raw = h.sync_tier.get(&keys::game_state(&user)).unwrap().unwrap();
    assert!(raw.contains("\"ore\":40"));
}

#[tokio::test(start_paused = true)]
async fn remote_only_state_is_adopted() {
    let h = harness();
    let user = user();
    h.remote.set_stored(doc(17).with_version(5));

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Remote);
    assert_eq!(loaded.document.version, 5);
}

#[tokio::test(start_paused = true)]
async fn foreign_local_document_is_ignored() {
    let h = harness();
    let user = user();
    let stranger = UserId::new("13");
    let json = serde_json::to_string(&doc_with(&stranger, json!({ "ore": 1 }))).unwrap();
    h.sync_tier.set(&keys::game_state(&user), &json).unwrap();

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.source, LoadSource::Default);
    assert_eq!(loaded.error, Some(SyncError::ConflictUnresolvable));
}

#[tokio::test(start_paused = true)]
async fn save_with_wrong_owner_is_refused() {
    let h = harness();
    let stranger = UserId::new("13");

    let saved = h
        .facade
        .save(&user(), doc_with(&stranger, json!({ "ore": 1 })), SaveOptions::manual())
        .await;
    assert!(!saved);
    assert_eq!(h.remote.push_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn large_state_round_trips_through_async_tier() {
    let h = harness();
    let user = user();
    let log: Vec<u64> = (0..60_000).collect();
    let big = doc_with(&user, json!({ "ore": 1, "history": { "log": log } }))
        .with_last_modified(EpochMillis::new(START_MS));
    h.remote.fail_pulls(RemoteError::Timeout);

    assert!(h.facade.save(&user, big, SaveOptions::manual()).await);
    h.facade.invalidate(&user).await;

    let loaded = h.facade.load_detailed(&user).await;
    assert_eq!(loaded.document.payload["history"]["log"][59_999], json!(59_999));
    assert!(h.sync_tier.get(&keys::game_state(&user)).unwrap().is_none());
}
