//! Per-user save scheduling.
//!
//! Each user moves through `Idle -> Saving -> (Retrying) -> Idle`. A request
//! that arrives while a save is in flight only marks the user pending and
//! replaces the latest document; when the in-flight save settles a single
//! follow-up save picks up whatever is latest at that moment. Requests inside
//! the minimum interval arm one deferred timer instead of sending.
//!
//! State lives behind a short-held mutex that is never held across an await.

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::outcome::{SaveOptions, SaveOutcome};
use crate::remote::{PushOptions, RemoteSync};
use futures::future::{join_all, BoxFuture, FutureExt};
use minesync_storage::{Clock, LocalTierStore};
use minesync_types::{keys, GameStateDocument, IntegrityValidator, SaveReason, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Saving,
    Retrying,
}

#[derive(Debug)]
struct UserSync {
    phase: Phase,
    pending: bool,
    /// Newest document handed to the scheduler and not yet picked up.
    latest: Option<(GameStateDocument, SaveOptions)>,
    last_success: Option<Instant>,
    /// Highest version stamped onto an outgoing document.
    last_version: u64,
    /// Highest version the remote acknowledged.
    acked_version: u64,
    backoff: Backoff,
    deferred: Option<JoinHandle<()>>,
    consecutive_failures: u32,
}

impl UserSync {
    fn new(config: &SyncConfig) -> Self {
        Self {
            phase: Phase::Idle,
            pending: false,
            latest: None,
            last_success: None,
            last_version: 0,
            acked_version: 0,
            backoff: Backoff::from_config(config),
            deferred: None,
            consecutive_failures: 0,
        }
    }

    fn timer_armed(&self) -> bool {
        self.deferred.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.deferred.take() {
            handle.abort();
        }
    }

    /// Raises `doc` to the next unsent version so local copies always outrank
    /// backups of earlier saves.
    fn floor_version(&self, mut doc: GameStateDocument) -> GameStateDocument {
        doc.version = doc.version.max(self.last_version + 1);
        doc
    }

    /// Records a new latest document, keeping the strongest flags of any
    /// request it replaces.
    fn offer(&mut self, doc: GameStateDocument, options: SaveOptions) {
        let options = match self.latest.take() {
            Some((_, prev)) => SaveOptions {
                reason: options.reason,
                critical: options.critical || prev.critical,
                force: options.force || prev.force,
            },
            None => options,
        };
        self.latest = Some((doc, options));
    }
}

/// A stamped document claimed for sending.
type Job = (GameStateDocument, SaveOptions);

enum Gate {
    Run(Job),
    Coalesce,
    Defer(Duration),
}

struct Inner {
    config: SyncConfig,
    store: Arc<LocalTierStore>,
    remote: Arc<dyn RemoteSync>,
    clock: Arc<dyn Clock>,
    validator: IntegrityValidator,
    users: Mutex<HashMap<UserId, UserSync>>,
    idle: Notify,
    storage_warning: AtomicBool,
}

/// Serializes, debounces and retries saves per user.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        config: SyncConfig,
        store: Arc<LocalTierStore>,
        remote: Arc<dyn RemoteSync>,
        clock: Arc<dyn Clock>,
        validator: IntegrityValidator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                remote,
                clock,
                validator,
                users: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                storage_warning: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    fn users(&self) -> MutexGuard<'_, HashMap<UserId, UserSync>> {
        self.inner
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True while the most recent local write ended over quota.
    pub fn storage_warning(&self) -> bool {
        self.inner.storage_warning.load(Ordering::Relaxed)
    }

    /// True if `user` has a save in flight or state waiting to be sent.
    pub fn has_pending(&self, user: &UserId) -> bool {
        self.users().get(user).is_some_and(|s| {
            s.phase != Phase::Idle || s.pending || s.latest.is_some()
        })
    }

    /// Raises the version floor for `user`, e.g. after loading a document
    /// that was saved in an earlier session.
    pub fn observe_version(&self, user: &UserId, version: u64) {
        let config = &self.inner.config;
        let mut users = self.users();
        let state = users
            .entry(user.clone())
            .or_insert_with(|| UserSync::new(config));
        state.last_version = state.last_version.max(version);
    }

    /// Records `version` as already held by the remote, e.g. after a load
    /// adopted it. Acks for older saves that arrive later are superseded.
    pub fn observe_remote(&self, user: &UserId, version: u64) {
        let config = &self.inner.config;
        let mut users = self.users();
        let state = users
            .entry(user.clone())
            .or_insert_with(|| UserSync::new(config));
        state.last_version = state.last_version.max(version);
        state.acked_version = state.acked_version.max(version);
    }

    /// Highest version the remote has acknowledged for `user`.
    pub fn acked_version(&self, user: &UserId) -> u64 {
        self.users().get(user).map_or(0, |s| s.acked_version)
    }

    // ── Requests ────────────────────────────────────────────────

    /// Submits `doc` for saving.
    pub async fn request(&self, doc: GameStateDocument, options: SaveOptions) -> SaveOutcome {
        let report = self.inner.validator.validate(&doc);
        if !report.valid {
            warn!(
                "Rejected save for {}: {}",
                doc.user_id,
                report.errors.join("; ")
            );
            return SaveOutcome::Failed {
                error: SyncError::Validation(report.errors),
                attempts: 0,
                locally_persisted: false,
                notify: true,
            };
        }

        if options.reason == SaveReason::BeforeUnload {
            return match self.unload(doc) {
                Ok(version) => SaveOutcome::Dispatched { version },
                Err(error) => SaveOutcome::Failed {
                    error,
                    attempts: 0,
                    locally_persisted: false,
                    notify: false,
                },
            };
        }

        let user = doc.user_id.clone();
        let (gate, doc) = {
            let mut users = self.users();
            let state = users
                .entry(user.clone())
                .or_insert_with(|| UserSync::new(&self.inner.config));
            let doc = state.floor_version(doc);
            state.offer(doc.clone(), options);

            let gate = if state.phase != Phase::Idle {
                state.pending = true;
                Gate::Coalesce
            } else if let Some(wait) = self.interval_remaining(state, &options) {
                if !state.timer_armed() {
                    state.deferred = Some(self.spawn_deferred(user.clone(), wait));
                }
                Gate::Defer(wait)
            } else {
                match self.claim(state) {
                    Some(job) => {
                        state.cancel_timer();
                        state.phase = Phase::Saving;
                        Gate::Run(job)
                    }
                    None => Gate::Coalesce,
                }
            };
            (gate, doc)
        };

        match gate {
            Gate::Run(job) => self.run_detached(user, job).await,
            Gate::Coalesce => {
                debug!("Save for {} coalesced into in-flight save", user);
                self.write_local(&doc).await;
                SaveOutcome::Coalesced
            }
            Gate::Defer(wait) => {
                debug!("Save for {} deferred by {:?}", user, wait);
                self.write_local(&doc).await;
                SaveOutcome::Deferred { retry_in: wait }
            }
        }
    }

    fn interval_remaining(&self, state: &UserSync, options: &SaveOptions) -> Option<Duration> {
        if options.bypasses_interval() {
            return None;
        }
        let last = state.last_success?;
        let interval = match options.reason {
            SaveReason::Manual => self.inner.config.min_save_interval(),
            _ => self.inner.config.auto_save_interval(),
        };
        interval
            .checked_sub(last.elapsed())
            .filter(|wait| !wait.is_zero())
    }

    fn spawn_deferred(&self, user: UserId, wait: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.fire_deferred(user).await;
        })
    }

    async fn fire_deferred(&self, user: UserId) {
        let start = {
            let mut users = self.users();
            let Some(state) = users.get_mut(&user) else {
                return;
            };
            state.deferred = None;
            if state.latest.is_none() {
                None
            } else if state.phase != Phase::Idle {
                state.pending = true;
                None
            } else {
                let job = self.claim(state);
                if job.is_some() {
                    state.phase = Phase::Saving;
                }
                job
            }
        };
        if let Some(job) = start {
            let outcome = self.drive(user.clone(), job).await;
            debug!("Deferred save for {} finished: {:?}", user, outcome);
        }
    }

    // ── Save loop ───────────────────────────────────────────────

    /// Runs one save of `job` for `user`. The caller must have claimed the
    /// job and moved the user into `Saving` under the same lock.
    fn drive(&self, user: UserId, job: Job) -> BoxFuture<'static, SaveOutcome> {
        let this = self.clone();
        async move { this.run_save(user, job).await }.boxed()
    }

    /// Runs the save on its own task so a caller that stops waiting never
    /// strands the user in `Saving`.
    async fn run_detached(&self, user: UserId, job: Job) -> SaveOutcome {
        match tokio::spawn(self.drive(user.clone(), job)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Save task for {} ended abnormally: {}", user, e);
                self.settle(&user);
                SaveOutcome::Failed {
                    error: SyncError::Aborted(e.to_string()),
                    attempts: 0,
                    locally_persisted: false,
                    notify: true,
                }
            }
        }
    }

    async fn run_save(&self, user: UserId, job: Job) -> SaveOutcome {
        let (mut doc, mut options) = job;
        let mut version = doc.version;

        let mut locally_persisted = self.persist_before_push(&doc).await;

        let mut push = PushOptions {
            reason: options.reason,
            critical: options.critical,
        };
        let max_retries = self.inner.config.max_retry_attempts;
        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match self.inner.remote.push(&doc, &push).await {
                Ok(ack) => break Ok(ack),
                Err(e) if e.is_throttled() => break Err(e),
                Err(e) if e.is_retryable() && attempts <= max_retries => {
                    let delay = self.enter_retry(&user);
                    warn!(
                        "Save attempt {} for {} v{} failed: {}; retrying in {:?}",
                        attempts, user, version, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    if let Some((next, next_options)) = self.claim_pending(&user) {
                        debug!(
                            "Retry for {} picks up newer state v{} over v{}",
                            user, next.version, version
                        );
                        options = SaveOptions {
                            critical: options.critical || next_options.critical,
                            ..next_options
                        };
                        push = PushOptions {
                            reason: options.reason,
                            critical: options.critical,
                        };
                        version = next.version;
                        doc = next;
                        locally_persisted = self.persist_before_push(&doc).await;
                    }
                    self.set_phase(&user, Phase::Saving);
                }
                Err(e) => break Err(e),
            }
        };

        let outcome = {
            let mut users = self.users();
            let Some(state) = users.get_mut(&user) else {
                return SaveOutcome::Coalesced;
            };
            match result {
                Ok(ack) => {
                    if version < state.acked_version {
                        debug!(
                            "Ignoring late ack for {} v{} (already acked v{})",
                            user, version, state.acked_version
                        );
                        SaveOutcome::Superseded { version }
                    } else {
                        state.acked_version = version;
                        state.last_success = Some(Instant::now());
                        state.backoff.reset();
                        state.consecutive_failures = 0;
                        info!("Saved {} v{} after {} attempt(s)", user, version, attempts);
                        SaveOutcome::Saved {
                            version,
                            batched: ack.batched,
                        }
                    }
                }
                Err(e) if e.is_throttled() => {
                    let retry_in = self.throttle_wait(&e);
                    if state.latest.is_none() {
                        state.latest = Some((doc, options));
                    }
                    if !state.timer_armed() {
                        state.deferred = Some(self.spawn_deferred(user.clone(), retry_in));
                    }
                    info!("Save for {} throttled ({}), re-queued in {:?}", user, e, retry_in);
                    SaveOutcome::Throttled {
                        retry_in,
                        notify: options.reason == SaveReason::Manual,
                    }
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    let notify = options.reason == SaveReason::Manual
                        || options.critical
                        || state.consecutive_failures
                            >= self.inner.config.persistent_failure_threshold;
                    warn!(
                        "Save for {} v{} failed after {} attempt(s): {} (local copy: {})",
                        user, version, attempts, e, locally_persisted
                    );
                    SaveOutcome::Failed {
                        error: SyncError::from(e),
                        attempts,
                        locally_persisted,
                        notify,
                    }
                }
            }
        };

        let follow_up = {
            let mut users = self.users();
            match users.get_mut(&user) {
                Some(state) if state.pending && !state.timer_armed() => {
                    let job = self.claim(state);
                    if job.is_some() {
                        state.phase = Phase::Saving;
                    }
                    job
                }
                _ => None,
            }
        };
        if let Some(job) = follow_up {
            debug!("Issuing coalesced follow-up save for {}", user);
            tokio::spawn(self.drive(user, job));
        } else {
            self.settle(&user);
        }
        outcome
    }

    /// Takes the latest document off `state` and stamps it for sending.
    fn claim(&self, state: &mut UserSync) -> Option<Job> {
        let (mut doc, options) = state.latest.take()?;
        state.pending = false;
        let version = doc.version.max(state.last_version + 1);
        state.last_version = version;
        doc.version = version;
        doc.save_reason = options.reason;
        doc.last_saved = Some(self.inner.clock.now().to_rfc3339());
        Some((doc, options))
    }

    /// Claims state that arrived while the current save was in flight.
    fn claim_pending(&self, user: &UserId) -> Option<Job> {
        let mut users = self.users();
        let state = users.get_mut(user)?;
        if !state.pending {
            return None;
        }
        self.claim(state)
    }

    fn settle(&self, user: &UserId) {
        {
            let mut users = self.users();
            if let Some(state) = users.get_mut(user) {
                state.phase = Phase::Idle;
                state.pending = false;
            }
        }
        self.inner.idle.notify_waiters();
    }

    fn enter_retry(&self, user: &UserId) -> Duration {
        let mut users = self.users();
        match users.get_mut(user) {
            Some(state) => {
                state.phase = Phase::Retrying;
                state.backoff.record_failure()
            }
            None => Duration::from_millis(self.inner.config.initial_backoff_ms),
        }
    }

    fn set_phase(&self, user: &UserId, phase: Phase) {
        if let Some(state) = self.users().get_mut(user) {
            state.phase = phase;
        }
    }

    fn throttle_wait(&self, error: &RemoteError) -> Duration {
        let requeue = self.inner.config.throttle_requeue();
        match error {
            RemoteError::TooManyRequests {
                retry_after: Some(after),
            } => (*after).max(requeue),
            _ => requeue,
        }
    }

    // ── Local durability ────────────────────────────────────────

    /// Writes the working copy and a backup snapshot before any network
    /// call. Returns true if at least one durable copy landed.
    async fn persist_before_push(&self, doc: &GameStateDocument) -> bool {
        let wrote = self.write_local(doc).await;
        let rotator = self.inner.store.rotator();
        let snapped = match rotator.snapshot(&doc.user_id, doc) {
            Ok(key) => {
                debug!("Pre-save snapshot {}", key);
                true
            }
            Err(e) => {
                if e.is_quota() {
                    self.inner.storage_warning.store(true, Ordering::Relaxed);
                }
                warn!("Pre-save snapshot for {} failed: {}", doc.user_id, e);
                false
            }
        };
        wrote || snapped
    }

    async fn write_local(&self, doc: &GameStateDocument) -> bool {
        let outcome = self
            .inner
            .store
            .write(&keys::game_state(&doc.user_id), doc)
            .await;
        if outcome.is_success() {
            self.inner.storage_warning.store(false, Ordering::Relaxed);
            return true;
        }
        if outcome.is_quota() {
            self.inner.storage_warning.store(true, Ordering::Relaxed);
        }
        warn!("Local write for {} failed: {:?}", doc.user_id, outcome);
        false
    }

    // ── Unload and shutdown ─────────────────────────────────────

    /// Bypasses every gate: writes the unload backup synchronously and hands
    /// the document to the remote's fire-and-forget path. Returns true if the
    /// local backup was written.
    pub fn save_on_unload(&self, doc: GameStateDocument) -> bool {
        if !self.inner.validator.validate(&doc).valid {
            warn!("Skipping unload save for {}: invalid document", doc.user_id);
            return false;
        }
        self.unload(doc).is_ok()
    }

    fn unload(&self, mut doc: GameStateDocument) -> SyncResult<u64> {
        {
            let mut users = self.users();
            let state = users
                .entry(doc.user_id.clone())
                .or_insert_with(|| UserSync::new(&self.inner.config));
            let version = doc.version.max(state.last_version + 1);
            state.last_version = version;
            state.latest = None;
            state.pending = false;
            state.cancel_timer();
            doc.version = version;
        }
        doc.save_reason = SaveReason::BeforeUnload;
        doc.last_saved = Some(self.inner.clock.now().to_rfc3339());

        let persisted = self
            .inner
            .store
            .rotator()
            .snapshot_latest(&doc.user_id, &doc);
        if let Err(e) = &persisted {
            if e.is_quota() {
                self.inner.storage_warning.store(true, Ordering::Relaxed);
            }
            warn!("Unload backup for {} failed: {}", doc.user_id, e);
        }
        self.inner.remote.push_unload(&doc);
        info!("Unload save dispatched for {} v{}", doc.user_id, doc.version);
        let version = doc.version;
        persisted.map(|_| version).map_err(SyncError::from)
    }

    /// Sends every user's outstanding state once, ignoring the interval
    /// gate, and waits for in-flight saves to settle.
    pub async fn flush_all(&self) {
        let users: Vec<UserId> = self
            .users()
            .iter()
            .filter(|(_, s)| s.phase != Phase::Idle || s.latest.is_some())
            .map(|(user, _)| user.clone())
            .collect();
        if users.is_empty() {
            return;
        }
        debug!("Flushing {} user(s)", users.len());
        join_all(users.into_iter().map(|user| self.flush_user(user))).await;
    }

    async fn flush_user(&self, user: UserId) {
        enum Step {
            Run(Job),
            Wait,
            Done,
        }

        let mut ran = false;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut users = self.users();
                let Some(state) = users.get_mut(&user) else {
                    return;
                };
                match state.phase {
                    Phase::Idle if !ran => match self.claim(state) {
                        Some(job) => {
                            state.cancel_timer();
                            state.phase = Phase::Saving;
                            Step::Run(job)
                        }
                        None => Step::Done,
                    },
                    Phase::Idle => Step::Done,
                    _ => Step::Wait,
                }
            };

            match step {
                Step::Run(job) => {
                    ran = true;
                    self.run_detached(user.clone(), job).await;
                }
                Step::Wait => notified.await,
                Step::Done => return,
            }
        }
    }

    /// Cancels every armed timer. In-flight saves run to completion.
    pub fn shutdown(&self) {
        let mut users = self.users();
        for state in users.values_mut() {
            state.cancel_timer();
        }
        debug!("Scheduler shut down, {} user(s) tracked", users.len());
    }
}
