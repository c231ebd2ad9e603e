//! Save scheduling, remote sync and conflict resolution for minesync.
//!
//! [`CacheFacade`] is the entry point. It keeps the in-memory working copy
//! per player, reads through the local tiers and the remote on load, and
//! hands saves to the [`SyncScheduler`], which coalesces, debounces and
//! retries them against a [`RemoteSync`] implementation.
//!
//! ```no_run
//! use minesync_storage::{MemoryAsyncTier, MemorySyncTier, SystemClock};
//! use minesync_sync::{
//!     CacheFacade, EngineParts, HttpRemoteClient, HttpRemoteConfig, SaveOptions, SyncConfig,
//! };
//! use minesync_types::UserId;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = HttpRemoteClient::new(HttpRemoteConfig::from_env("https://game.example.com"))?;
//! let facade = CacheFacade::init(
//!     SyncConfig::from_env(),
//!     EngineParts {
//!         sync_tier: Arc::new(MemorySyncTier::default()),
//!         async_tier: Arc::new(MemoryAsyncTier::new()),
//!         remote: Arc::new(remote),
//!         clock: Arc::new(SystemClock),
//!     },
//! );
//!
//! let user = UserId::new("4021");
//! let mut doc = facade.load(&user).await;
//! doc.touch(serde_json::json!({ "ore": 12 }));
//! facade.save(&user, doc, SaveOptions::manual()).await;
//! facade.dispose().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod config;
mod error;
mod facade;
mod outcome;
mod remote;
mod resolver;
mod scheduler;

pub use backoff::Backoff;
pub use config::{ConflictPolicy, SyncConfig};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use facade::{CacheFacade, DefaultPayload, EngineParts};
pub use outcome::{FailureCategory, LoadOutcome, LoadSource, SaveOptions, SaveOutcome};
pub use remote::{Ack, HttpRemoteClient, HttpRemoteConfig, Identity, PushOptions, RemoteSync};
pub use resolver::{ConflictResolver, Resolution, Winner};
pub use scheduler::SyncScheduler;
