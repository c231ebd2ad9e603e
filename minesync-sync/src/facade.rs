//! The public load/save surface.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::outcome::{LoadOutcome, LoadSource, SaveOptions, SaveOutcome};
use crate::remote::RemoteSync;
use crate::resolver::{ConflictResolver, Winner};
use crate::scheduler::SyncScheduler;
use minesync_storage::{AsyncTier, BackupRotator, Clock, LocalTierStore, SyncTier};
use minesync_types::{keys, GameStateDocument, IntegrityValidator, SaveReason, UserId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Builds the payload of a brand-new player's document.
pub type DefaultPayload = Arc<dyn Fn(&UserId) -> Value + Send + Sync>;

/// Collaborators the facade is assembled from.
pub struct EngineParts {
    pub sync_tier: Arc<dyn SyncTier>,
    pub async_tier: Arc<dyn AsyncTier>,
    pub remote: Arc<dyn RemoteSync>,
    pub clock: Arc<dyn Clock>,
}

/// Owns the in-memory working copies and fronts the local tiers, the
/// scheduler and the remote.
///
/// Neither `load` nor `save` ever returns an error: failures are logged and
/// reflected in the returned document or flag.
pub struct CacheFacade {
    memory: RwLock<HashMap<UserId, GameStateDocument>>,
    store: Arc<LocalTierStore>,
    rotator: Arc<BackupRotator>,
    remote: Arc<dyn RemoteSync>,
    resolver: ConflictResolver,
    scheduler: SyncScheduler,
    validator: IntegrityValidator,
    clock: Arc<dyn Clock>,
    default_payload: DefaultPayload,
}

impl CacheFacade {
    /// Wires up storage, scheduling and reconciliation from `parts`.
    pub fn init(config: SyncConfig, parts: EngineParts) -> Self {
        let validator = IntegrityValidator::default();
        let rotator = Arc::new(BackupRotator::new(
            parts.sync_tier.clone(),
            parts.clock.clone(),
            config.storage.clone(),
        ));
        let store = Arc::new(LocalTierStore::new(
            parts.sync_tier,
            parts.async_tier,
            rotator.clone(),
            parts.clock.clone(),
            config.storage.clone(),
        ));
        let resolver =
            ConflictResolver::new(config.conflict.clone()).with_validator(validator.clone());
        let scheduler = SyncScheduler::new(
            config,
            store.clone(),
            parts.remote.clone(),
            parts.clock.clone(),
            validator.clone(),
        );
        info!("Cache facade initialized");
        Self {
            memory: RwLock::new(HashMap::new()),
            store,
            rotator,
            remote: parts.remote,
            resolver,
            scheduler,
            validator,
            clock: parts.clock,
            default_payload: Arc::new(|_| json!({})),
        }
    }

    /// Sets the payload used for players with no valid saved state.
    pub fn with_default_payload(
        mut self,
        f: impl Fn(&UserId) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default_payload = Arc::new(f);
        self
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn rotator(&self) -> &Arc<BackupRotator> {
        &self.rotator
    }

    // ── Load ────────────────────────────────────────────────────

    /// Returns the current document for `user`.
    pub async fn load(&self, user: &UserId) -> GameStateDocument {
        self.load_detailed(user).await.document
    }

    /// Like [`Self::load`], also reporting where the document came from.
    ///
    /// Order: memory, then the local tiers (falling back to the newest
    /// backup), then the remote. When both a local and a remote candidate
    /// exist the resolver picks the winner.
    pub async fn load_detailed(&self, user: &UserId) -> LoadOutcome {
        if let Some(doc) = self.memory.read().await.get(user) {
            if self.validator.validate_for(doc, user).valid {
                return LoadOutcome {
                    document: doc.clone(),
                    source: LoadSource::Memory,
                    resolution: None,
                    error: None,
                };
            }
        }

        let local = self.local_candidate(user).await;
        let remote = match self.remote.pull(user).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Remote load for {} failed, using local state: {}", user, e);
                None
            }
        };

        let resolution = self.resolver.resolve(
            local.as_ref().map(|(doc, _)| doc),
            remote.as_ref(),
            user,
        );

        let found_remote = remote.is_some();
        let (document, source) = match (resolution.winner, local, remote) {
            (Winner::Local, Some((doc, source)), _) => (doc, source),
            (Winner::Remote, _, Some(doc)) => {
                self.adopt_remote(&doc).await;
                (doc, LoadSource::Remote)
            }
            _ => {
                info!("No usable state for {}, starting fresh", user);
                (self.default_document(user), LoadSource::Default)
            }
        };

        let error = (source == LoadSource::Default
            && (found_remote || self.store.exists(&keys::game_state(user))))
        .then_some(SyncError::ConflictUnresolvable);
        if let Some(e) = &error {
            warn!("Stored state for {} discarded: {}", user, e);
        }

        if source == LoadSource::Remote {
            self.scheduler.observe_remote(user, document.version);
        } else {
            self.scheduler.observe_version(user, document.version);
        }
        self.memory
            .write()
            .await
            .insert(user.clone(), document.clone());
        LoadOutcome {
            document,
            source,
            resolution: Some(resolution),
            error,
        }
    }

    /// The better of the tier copy and the newest backup, by version then
    /// modification time. Tier writes carry the next unsent version, so a
    /// deferred or coalesced copy outranks the backup of the save before it.
    async fn local_candidate(&self, user: &UserId) -> Option<(GameStateDocument, LoadSource)> {
        let stored = self
            .store
            .read(&keys::game_state(user))
            .await
            .filter(|doc| self.validator.validate_for(doc, user).valid)
            .map(|doc| (doc, LoadSource::Local));
        let backup = self
            .rotator
            .latest(user)
            .map(|record| record.into_document())
            .filter(|doc| self.validator.validate_for(doc, user).valid)
            .map(|doc| (doc, LoadSource::Backup));

        match (stored, backup) {
            (Some(s), Some(b)) => {
                let newer_backup = (b.0.version, b.0.effective_timestamp())
                    > (s.0.version, s.0.effective_timestamp());
                Some(if newer_backup { b } else { s })
            }
            (s, b) => s.or(b),
        }
    }

    async fn adopt_remote(&self, doc: &GameStateDocument) {
        let outcome = self.store.write(&keys::game_state(&doc.user_id), doc).await;
        if !outcome.is_success() {
            warn!(
                "Could not cache remote state for {} locally: {:?}",
                doc.user_id, outcome
            );
        }
    }

    fn default_document(&self, user: &UserId) -> GameStateDocument {
        GameStateDocument::new(user.clone(), (self.default_payload)(user))
            .with_last_modified(self.clock.now())
    }

    // ── Save ────────────────────────────────────────────────────

    /// Saves `doc` for `user`. Returns true if the save was accepted.
    pub async fn save(&self, user: &UserId, doc: GameStateDocument, options: SaveOptions) -> bool {
        self.save_detailed(user, doc, options).await.is_success()
    }

    /// Like [`Self::save`], returning the full outcome.
    pub async fn save_detailed(
        &self,
        user: &UserId,
        doc: GameStateDocument,
        options: SaveOptions,
    ) -> SaveOutcome {
        let report = self.validator.validate_for(&doc, user);
        if !report.valid {
            warn!("Refusing save for {}: {}", user, report.errors.join("; "));
            return SaveOutcome::Failed {
                error: SyncError::Validation(report.errors),
                attempts: 0,
                locally_persisted: false,
                notify: true,
            };
        }

        self.memory
            .write()
            .await
            .insert(user.clone(), doc.clone());
        let outcome = self.scheduler.request(doc, options).await;

        if let SaveOutcome::Saved { version, .. } | SaveOutcome::Dispatched { version } = &outcome
        {
            if let Some(cached) = self.memory.write().await.get_mut(user) {
                cached.version = cached.version.max(*version);
            }
        }
        debug!("Save for {} ({}) -> {:?}", user, options.reason, outcome);
        outcome
    }

    /// Saves bypassing the minimum interval. Still coalesces with an
    /// in-flight save.
    pub async fn force_save(&self, user: &UserId, doc: GameStateDocument) -> bool {
        let options = SaveOptions {
            force: true,
            ..SaveOptions::manual()
        };
        self.save(user, doc, options).await
    }

    /// Drops the in-memory copy for `user`. Durable tiers are untouched.
    pub async fn invalidate(&self, user: &UserId) {
        if self.memory.write().await.remove(user).is_some() {
            debug!("Invalidated cached state for {}", user);
        }
    }

    /// Unload path for the in-memory copy of `user`. Returns true if a local
    /// backup was written.
    pub async fn save_on_unload(&self, user: &UserId) -> bool {
        let Some(mut doc) = self.memory.read().await.get(user).cloned() else {
            debug!("Nothing cached to save on unload for {}", user);
            return false;
        };
        doc.save_reason = SaveReason::BeforeUnload;
        self.scheduler.save_on_unload(doc)
    }

    pub async fn flush_all(&self) {
        self.scheduler.flush_all().await;
    }

    pub fn has_pending(&self, user: &UserId) -> bool {
        self.scheduler.has_pending(user)
    }

    /// True once local storage has run out of quota.
    pub fn storage_warning(&self) -> bool {
        self.scheduler.storage_warning()
    }

    /// Flushes outstanding saves, cancels timers and clears memory.
    pub async fn dispose(&self) {
        self.scheduler.flush_all().await;
        self.scheduler.shutdown();
        self.memory.write().await.clear();
        info!("Cache facade disposed");
    }
}
