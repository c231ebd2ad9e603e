//! Directory-backed large-object tier.
//!
//! One file per key under a root directory. Keys are percent-encoded into
//! file names so any user id round-trips through `keys()`.

use crate::error::{StorageError, StorageResult};
use crate::tier::AsyncTier;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

const FILE_EXTENSION: &str = "json";

/// Distinguishes temp files of overlapping writes to the same key.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Large-object tier storing each key as a file.
#[derive(Debug)]
pub struct FileAsyncTier {
    root: PathBuf,
    ready: Arc<RwLock<bool>>,
}

impl FileAsyncTier {
    /// Creates a tier rooted at `root`. The directory is created on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_root(&self) -> StorageResult<()> {
        if *self.ready.read().await {
            return Ok(());
        }
        let mut ready = self.ready.write().await;
        if !*ready {
            fs::create_dir_all(&self.root).await?;
            info!("Created large-object tier directory: {:?}", self.root);
            *ready = true;
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{FILE_EXTENSION}", encode_key(key)))
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl AsyncTier for FileAsyncTier {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.ensure_root().await?;
        let path = self.path_for(key);
        // Write then rename so a crash never leaves a torn file behind.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote {} bytes to {:?}", value.len(), path);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn size_of(&self, key: &str) -> StorageResult<Option<u64>> {
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_key(stem) {
                Some(key) => keys.push(key),
                None => debug!("Skipping undecodable file name: {:?}", path),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
