use minesync_storage::{
    AsyncTier, BackupRotator, LocalTierStore, ManualClock, MemoryAsyncTier, MemorySyncTier,
    StorageError, StorageFailure, StorageOutcome, StoreConfig, SyncTier, TierKind,
};
use minesync_types::{keys, EpochMillis, GameStateDocument, UserId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    sync_tier: Arc<MemorySyncTier>,
    async_tier: Arc<MemoryAsyncTier>,
    rotator: Arc<BackupRotator>,
    store: LocalTierStore,
}

fn fixture(quota: u64, config: StoreConfig) -> Fixture {
    let sync_tier = Arc::new(MemorySyncTier::new(quota));
    let async_tier = Arc::new(MemoryAsyncTier::new());
    let clock = Arc::new(ManualClock::new(EpochMillis::new(1_700_000_000_000)));
    let rotator = Arc::new(BackupRotator::new(
        sync_tier.clone(),
        clock.clone(),
        config.clone(),
    ));
    let store = LocalTierStore::new(
        sync_tier.clone(),
        async_tier.clone(),
        rotator.clone(),
        clock,
        config,
    );
    Fixture {
        sync_tier,
        async_tier,
        rotator,
        store,
    }
}

fn small_config() -> StoreConfig {
    StoreConfig {
        size_threshold_bytes: 512,
        ..Default::default()
    }
}

fn doc(payload: serde_json::Value) -> GameStateDocument {
    GameStateDocument::new(UserId::new("42"), payload)
}

fn big_doc() -> GameStateDocument {
    doc(json!({ "ore": 1, "history": vec![7u32; 400] }))
}

// ── Routing ──────────────────────────────────────────────────────

#[tokio::test]
async fn small_document_goes_to_sync_tier() {
    let f = fixture(1 << 20, small_config());
    let outcome = f.store.write("gameState_42", &doc(json!({ "ore": 3 }))).await;

    assert!(matches!(outcome, StorageOutcome::Written { tier: TierKind::Sync, .. }));
    assert!(f.sync_tier.get("gameState_42").unwrap().is_some());
    assert!(f.async_tier.get("gameState_42").await.unwrap().is_none());
}

#[tokio::test]
async fn large_document_goes_to_async_tier() {
    let f = fixture(1 << 20, small_config());
    let outcome = f.store.write("gameState_42", &big_doc()).await;

    assert!(matches!(outcome, StorageOutcome::Written { tier: TierKind::Async, .. }));
    assert!(f.sync_tier.get("gameState_42").unwrap().is_none());
    assert!(f.async_tier.get("gameState_42").await.unwrap().is_some());
}

#[tokio::test]
async fn read_returns_written_document_from_either_tier() {
    let f = fixture(1 << 20, small_config());
    let small = doc(json!({ "ore": 3 }));
    let big = big_doc();
    f.store.write("a", &small).await;
    f.store.write("b", &big).await;

    assert_eq!(f.store.read("a").await.unwrap(), small);
    assert_eq!(f.store.read("b").await.unwrap(), big);
}

#[tokio::test]
async fn moving_between_tiers_drops_stale_copy() {
    let f = fixture(1 << 20, small_config());
    f.store.write("gameState_42", &big_doc()).await;
    f.store.write("gameState_42", &doc(json!({ "ore": 9 }))).await;

    assert!(f.async_tier.get("gameState_42").await.unwrap().is_none());
    assert_eq!(
        f.store.read("gameState_42").await.unwrap().payload,
        json!({ "ore": 9 })
    );

    f.store.write("gameState_42", &big_doc()).await;
    assert!(f.sync_tier.get("gameState_42").unwrap().is_none());
}

// ── Hybrid metadata ──────────────────────────────────────────────

#[tokio::test]
async fn hybrid_mode_writes_meta_for_async_payloads() {
    let f = fixture(1 << 20, small_config());
    f.store.write("gameState_42", &big_doc().with_version(6)).await;

    let meta = f.store.metadata("gameState_42").unwrap();
    assert_eq!(meta.tier, TierKind::Async);
    assert_eq!(meta.version, 6);
    assert!(meta.size > 512);
    assert!(f.store.exists("gameState_42"));
    assert_eq!(f.store.size_of("gameState_42").await, meta.size);
    assert!(f.store.last_saved("gameState_42").is_some());
}

#[tokio::test]
async fn non_hybrid_mode_skips_meta() {
    let config = StoreConfig {
        hybrid: false,
        ..small_config()
    };
    let f = fixture(1 << 20, config);
    f.store.write("gameState_42", &doc(json!({}))).await;
    assert!(f.store.metadata("gameState_42").is_none());
    assert!(f.store.exists("gameState_42"));
    assert!(f.store.size_of("gameState_42").await > 0);
}

// ── Quota handling ───────────────────────────────────────────────

#[tokio::test]
async fn quota_failure_evicts_and_retries_once() {
    let f = fixture(2048, StoreConfig::default());
    let user = UserId::new("42");
    for i in 0..3 {
        f.rotator
            .snapshot(&user, &doc(json!({ "ore": i, "pad": "x".repeat(250) })))
            .unwrap();
    }
    f.sync_tier.set("cache_big", &"y".repeat(400)).unwrap();

    let outcome = f
        .store
        .write("gameState_42", &doc(json!({ "pad": "z".repeat(700) })))
        .await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert!(f.sync_tier.get("cache_big").unwrap().is_none());
    assert_eq!(f.rotator.count(&user), 1);
}

#[tokio::test]
async fn persistent_quota_failure_is_reported_not_thrown() {
    let f = fixture(256, StoreConfig::default());
    let outcome = f
        .store
        .write("gameState_42", &doc(json!({ "pad": "z".repeat(1024) })))
        .await;
    assert_eq!(
        outcome,
        StorageOutcome::Failed {
            reason: StorageFailure::Quota
        }
    );
    assert!(outcome.is_quota());
}

// ── Corruption & removal ─────────────────────────────────────────

#[tokio::test]
async fn corrupted_record_reads_as_none() {
    let f = fixture(1 << 20, small_config());
    f.sync_tier.set("gameState_42", "{\"userId\":").unwrap();
    assert!(f.store.read("gameState_42").await.is_none());
}

#[tokio::test]
async fn try_read_reports_corruption() {
    let f = fixture(1 << 20, small_config());
    f.sync_tier.set("gameState_42", "{\"userId\":").unwrap();

    let err = f.store.try_read("gameState_42").await.unwrap_err();
    assert!(
        matches!(&err, StorageError::Corrupted { key, .. } if key == "gameState_42"),
        "{err:?}"
    );
    assert!(f.store.try_read("gameState_7").await.unwrap().is_none());
}

#[tokio::test]
async fn structurally_invalid_record_reads_as_none() {
    let f = fixture(1 << 20, small_config());
    f.sync_tier
        .set("gameState_42", r#"{"userId":"42","payload":{}}"#)
        .unwrap();
    assert!(f.store.read("gameState_42").await.is_none());
}

#[tokio::test]
async fn remove_clears_both_tiers_and_meta() {
    let f = fixture(1 << 20, small_config());
    let key = keys::game_state(&UserId::new("42"));
    f.store.write(&key, &big_doc()).await;
    f.store.remove(&key).await.unwrap();

    assert!(f.store.read(&key).await.is_none());
    assert!(!f.store.exists(&key));
    assert_eq!(f.store.size_of(&key).await, 0);
}

#[tokio::test]
async fn missing_key_reads_as_none() {
    let f = fixture(1 << 20, small_config());
    assert!(f.store.read("gameState_nobody").await.is_none());
    assert_eq!(f.store.size_of("gameState_nobody").await, 0);
}
