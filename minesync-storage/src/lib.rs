//! Local durable storage for minesync.
//!
//! Provides the two physical tiers a game state can live in and the two
//! components that own durable local copies:
//!
//! - [`LocalTierStore`] routes each document to the synchronous small-object
//!   tier or the asynchronous large-object tier by serialized size, and in
//!   hybrid mode keeps a small metadata record in the synchronous tier.
//! - [`BackupRotator`] writes timestamped snapshots, keeps the newest few per
//!   user and runs cross-user emergency eviction under quota pressure.
//!
//! # Example
//!
//! ```
//! use minesync_storage::{
//!     BackupRotator, LocalTierStore, MemoryAsyncTier, MemorySyncTier, StoreConfig, SystemClock,
//! };
//! use std::sync::Arc;
//!
//! let sync_tier = Arc::new(MemorySyncTier::default());
//! let clock = Arc::new(SystemClock);
//! let config = StoreConfig::default();
//! let rotator = Arc::new(BackupRotator::new(sync_tier.clone(), clock.clone(), config.clone()));
//! let store = LocalTierStore::new(
//!     sync_tier,
//!     Arc::new(MemoryAsyncTier::new()),
//!     rotator,
//!     clock,
//!     config,
//! );
//! assert!(!store.exists("gameState_42"));
//! ```

mod backup;
mod clock;
mod config;
mod error;
mod file_tier;
mod local;
mod tier;

pub use backup::{BackupMeta, BackupRecord, BackupRotator, EvictionReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{env_parse, StoreConfig};
pub use error::{StorageError, StorageResult};
pub use file_tier::FileAsyncTier;
pub use local::{LocalTierStore, StorageFailure, StorageOutcome, TierMeta};
pub use tier::{
    AsyncTier, MemoryAsyncTier, MemorySyncTier, StorageUsage, SyncTier, TierKind,
    DEFAULT_SYNC_QUOTA_BYTES,
};
