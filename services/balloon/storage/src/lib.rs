//! Photo transfer reassembly for the balloon ground station.
//!
//! Photos come down the radio as numbered chunks, in any order and
//! sometimes more than once. This crate tracks every transfer by index,
//! persists each chunk as it arrives and writes the finished artifact once
//! the last missing chunk lands. Chunks live in a pluggable [`ChunkStore`]:
//! a directory tree on disk, or memory for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod transfer;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data does not match what was recorded for it
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Chunk or transfer not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Chunk rejected
    #[error("Invalid chunk: {0}")]
    Invalid(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What is known about a transfer before any chunk bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMeta {
    /// Transfer index
    pub index: u16,
    /// Declared number of chunks
    pub chunk_count: u16,
    /// Declared size of the finished photo
    pub file_size: u32,
}

/// Where chunks and finished photos are kept
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Record a new transfer
    async fn put_meta(&self, meta: TransferMeta) -> Result<(), StorageError>;

    /// Every transfer recorded so far
    async fn load_metas(&self) -> Result<Vec<TransferMeta>, StorageError>;

    /// Save one chunk, replacing any previous bytes
    async fn put_chunk(&self, index: u16, chunk: u16, data: &[u8]) -> Result<(), StorageError>;

    /// Read one chunk back
    async fn get_chunk(&self, index: u16, chunk: u16) -> Result<Bytes, StorageError>;

    /// Chunk numbers stored for a transfer, ascending
    async fn list_chunks(&self, index: u16) -> Result<Vec<u16>, StorageError>;

    /// Save the assembled photo. Returns where it was written.
    async fn put_artifact(&self, index: u16, data: &[u8]) -> Result<String, StorageError>;
}

/// Chunk store selection
#[derive(Clone, Debug, Default)]
pub enum StoreMode {
    /// Keep everything in memory (tests and dry runs)
    #[default]
    InMemory,
    /// Directory tree rooted at `photos_dir`
    File {
        /// Root directory for chunks and photos
        photos_dir: String,
    },
}

// Re-export main types
pub use backend::file::FileChunkStore;
pub use backend::mem::MemoryChunkStore;
pub use transfer::{ChunkOutcome, Transfer, TransferStatus, TransferTable};

/// Open the store selected by `mode`
pub fn open_store(mode: &StoreMode) -> Result<Box<dyn ChunkStore>, StorageError> {
    match mode {
        StoreMode::InMemory => Ok(Box::new(MemoryChunkStore::new())),
        StoreMode::File { photos_dir } => Ok(Box::new(FileChunkStore::new(photos_dir)?)),
    }
}

#[async_trait]
impl ChunkStore for Box<dyn ChunkStore> {
    async fn put_meta(&self, meta: TransferMeta) -> Result<(), StorageError> {
        (**self).put_meta(meta).await
    }

    async fn load_metas(&self) -> Result<Vec<TransferMeta>, StorageError> {
        (**self).load_metas().await
    }

    async fn put_chunk(&self, index: u16, chunk: u16, data: &[u8]) -> Result<(), StorageError> {
        (**self).put_chunk(index, chunk, data).await
    }

    async fn get_chunk(&self, index: u16, chunk: u16) -> Result<Bytes, StorageError> {
        (**self).get_chunk(index, chunk).await
    }

    async fn list_chunks(&self, index: u16) -> Result<Vec<u16>, StorageError> {
        (**self).list_chunks(index).await
    }

    async fn put_artifact(&self, index: u16, data: &[u8]) -> Result<String, StorageError> {
        (**self).put_artifact(index, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_modes() {
        let store = open_store(&StoreMode::InMemory).unwrap();
        store.put_chunk(1, 0, b"abc").await.unwrap();
        assert_eq!(store.get_chunk(1, 0).await.unwrap(), Bytes::from_static(b"abc"));

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&StoreMode::File {
            photos_dir: dir.path().to_string_lossy().into_owned(),
        })
        .unwrap();
        assert!(store.load_metas().await.unwrap().is_empty());
    }
}
