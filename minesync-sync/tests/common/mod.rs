#![allow(dead_code)]

use async_trait::async_trait;
use minesync_storage::{ManualClock, MemoryAsyncTier, MemorySyncTier};
use minesync_sync::{
    Ack, CacheFacade, EngineParts, PushOptions, RemoteError, RemoteResult, RemoteSync, SyncConfig,
};
use minesync_types::{EpochMillis, GameStateDocument, UserId};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const START_MS: u64 = 1_700_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn user() -> UserId {
    UserId::new("4021")
}

pub fn doc_with(user: &UserId, payload: Value) -> GameStateDocument {
    GameStateDocument::new(user.clone(), payload).with_last_modified(EpochMillis::new(START_MS))
}

pub fn doc(ore: u64) -> GameStateDocument {
    doc_with(&user(), json!({ "ore": ore, "inventory": [{ "item": "pick", "qty": 1 }] }))
}

/// In-process remote whose push results are scripted per call.
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<VecDeque<RemoteResult<Ack>>>,
    delay: Mutex<Duration>,
    pushes: Mutex<Vec<(GameStateDocument, PushOptions)>>,
    unloads: Mutex<Vec<GameStateDocument>>,
    stored: Mutex<HashMap<UserId, GameStateDocument>>,
    pull_error: Mutex<Option<RemoteError>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues results for upcoming pushes. Unscripted pushes succeed.
    pub fn script(&self, results: impl IntoIterator<Item = RemoteResult<Ack>>) {
        self.script.lock().unwrap().extend(results);
    }

    pub fn fail_pushes(&self, n: usize, error: RemoteError) {
        self.script((0..n).map(|_| Err(error.clone())));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_stored(&self, doc: GameStateDocument) {
        self.stored
            .lock()
            .unwrap()
            .insert(doc.user_id.clone(), doc);
    }

    pub fn fail_pulls(&self, error: RemoteError) {
        *self.pull_error.lock().unwrap() = Some(error);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn pushes(&self) -> Vec<(GameStateDocument, PushOptions)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn last_push(&self) -> Option<GameStateDocument> {
        self.pushes.lock().unwrap().last().map(|(d, _)| d.clone())
    }

    pub fn unloads(&self) -> Vec<GameStateDocument> {
        self.unloads.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSync for ScriptedRemote {
    async fn push(&self, doc: &GameStateDocument, options: &PushOptions) -> RemoteResult<Ack> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pushes.lock().unwrap().push((doc.clone(), *options));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Ack::default()));
        if result.is_ok() {
            self.set_stored(doc.clone());
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn pull(&self, user: &UserId) -> RemoteResult<Option<GameStateDocument>> {
        if let Some(e) = self.pull_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.stored.lock().unwrap().get(user).cloned())
    }

    fn push_unload(&self, doc: &GameStateDocument) {
        self.unloads.lock().unwrap().push(doc.clone());
    }
}

pub struct Harness {
    pub facade: CacheFacade,
    pub remote: Arc<ScriptedRemote>,
    pub sync_tier: Arc<MemorySyncTier>,
    pub async_tier: Arc<MemoryAsyncTier>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    let remote = ScriptedRemote::new();
    let sync_tier = Arc::new(MemorySyncTier::default());
    let async_tier = Arc::new(MemoryAsyncTier::new());
    let clock = Arc::new(ManualClock::new(EpochMillis::new(START_MS)));
    let facade = CacheFacade::init(
        config,
        EngineParts {
            sync_tier: sync_tier.clone(),
            async_tier: async_tier.clone(),
            remote: remote.clone(),
            clock: clock.clone(),
        },
    );
    Harness {
        facade,
        remote,
        sync_tier,
        async_tier,
        clock,
    }
}

/// Lets spawned follow-up saves and timers run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
