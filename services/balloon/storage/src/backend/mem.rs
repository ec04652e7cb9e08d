//! In-memory chunk store for tests and dry runs

use crate::{ChunkStore, StorageError, TransferMeta};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Inner {
    metas: BTreeMap<u16, TransferMeta>,
    chunks: BTreeMap<(u16, u16), Bytes>,
    artifacts: BTreeMap<u16, Bytes>,
}

/// Chunk store that keeps everything in memory
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: Mutex<Inner>,
}

impl MemoryChunkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembled photo for `index`, if one was written
    pub fn artifact(&self, index: u16) -> Option<Bytes> {
        self.lock().artifacts.get(&index).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put_meta(&self, meta: TransferMeta) -> Result<(), StorageError> {
        self.lock().metas.insert(meta.index, meta);
        Ok(())
    }

    async fn load_metas(&self) -> Result<Vec<TransferMeta>, StorageError> {
        Ok(self.lock().metas.values().copied().collect())
    }

    async fn put_chunk(&self, index: u16, chunk: u16, data: &[u8]) -> Result<(), StorageError> {
        debug!("Storing chunk {} of transfer {} ({} bytes)", chunk, index, data.len());
        self.lock()
            .chunks
            .insert((index, chunk), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn get_chunk(&self, index: u16, chunk: u16) -> Result<Bytes, StorageError> {
        self.lock()
            .chunks
            .get(&(index, chunk))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("chunk {} of transfer {}", chunk, index)))
    }

    async fn list_chunks(&self, index: u16) -> Result<Vec<u16>, StorageError> {
        Ok(self
            .lock()
            .chunks
            .range((index, 0)..=(index, u16::MAX))
            .map(|(&(_, chunk), _)| chunk)
            .collect())
    }

    async fn put_artifact(&self, index: u16, data: &[u8]) -> Result<String, StorageError> {
        self.lock()
            .artifacts
            .insert(index, Bytes::copy_from_slice(data));
        Ok(format!("memory:{:03}.jpg", index))
    }
}
