//! Directory-tree chunk store
//!
//! Layout under the photos directory:
//!
//! ```text
//! 007/transfer.json   declared chunk count and size
//! 007/000.chunk       chunk bytes, one file per chunk
//! 007.jpg             assembled photo
//! ```

use crate::{ChunkStore, StorageError, TransferMeta};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const META_FILE: &str = "transfer.json";
const CHUNK_EXT: &str = "chunk";

/// Chunk store backed by the filesystem
#[derive(Debug, Clone)]
pub struct FileChunkStore {
    photos_dir: PathBuf,
}

impl FileChunkStore {
    /// Open (and create if needed) a store rooted at `photos_dir`
    pub fn new(photos_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let photos_dir = photos_dir.into();
        std::fs::create_dir_all(&photos_dir)?;
        info!("Photo store at {}", photos_dir.display());
        Ok(Self { photos_dir })
    }

    /// Root directory
    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    fn transfer_dir(&self, index: u16) -> PathBuf {
        self.photos_dir.join(format!("{:03}", index))
    }

    fn chunk_path(&self, index: u16, chunk: u16) -> PathBuf {
        self.transfer_dir(index)
            .join(format!("{:03}.{}", chunk, CHUNK_EXT))
    }

    fn artifact_path(&self, index: u16) -> PathBuf {
        self.photos_dir.join(format!("{:03}.jpg", index))
    }

    async fn load_meta(&self, path: &Path) -> Result<TransferMeta, StorageError> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!("Invalid transfer file {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl ChunkStore for FileChunkStore {
    async fn put_meta(&self, meta: TransferMeta) -> Result<(), StorageError> {
        let dir = self.transfer_dir(meta.index);
        fs::create_dir_all(&dir).await?;
        let content = serde_json::to_string_pretty(&meta)?;
        fs::write(dir.join(META_FILE), content).await?;
        Ok(())
    }

    async fn load_metas(&self) -> Result<Vec<TransferMeta>, StorageError> {
        let mut metas = Vec::new();
        let mut entries = fs::read_dir(&self.photos_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let meta_file = entry.path().join(META_FILE);
            if !fs::try_exists(&meta_file).await? {
                continue;
            }
            match self.load_meta(&meta_file).await {
                Ok(meta) => {
                    debug!("Loaded transfer {:03}: {:?}", meta.index, meta);
                    metas.push(meta);
                }
                Err(e) => warn!("Skipping {}: {}", meta_file.display(), e),
            }
        }
        metas.sort_by_key(|meta| meta.index);
        Ok(metas)
    }

    async fn put_chunk(&self, index: u16, chunk: u16, data: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(self.transfer_dir(index)).await?;
        fs::write(self.chunk_path(index, chunk), data).await?;
        Ok(())
    }

    async fn get_chunk(&self, index: u16, chunk: u16) -> Result<Bytes, StorageError> {
        match fs::read(self.chunk_path(index, chunk)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(format!(
                "chunk {:03} of transfer {:03}",
                chunk, index
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_chunks(&self, index: u16) -> Result<Vec<u16>, StorageError> {
        let dir = self.transfer_dir(index);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CHUNK_EXT) {
                continue;
            }
            if let Some(chunk) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u16>().ok())
            {
                chunks.push(chunk);
            }
        }
        chunks.sort_unstable();
        Ok(chunks)
    }

    async fn put_artifact(&self, index: u16, data: &[u8]) -> Result<String, StorageError> {
        let path = self.artifact_path(index);
        fs::write(&path, data).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileChunkStore) {
        let dir = TempDir::new().unwrap();
        let store = FileChunkStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_chunk_layout() {
        let (dir, store) = store();

        store.put_chunk(7, 2, b"third").await.unwrap();
        store.put_chunk(7, 0, b"first").await.unwrap();

        assert!(dir.path().join("007/002.chunk").exists());
        assert!(dir.path().join("007/000.chunk").exists());
        assert_eq!(store.list_chunks(7).await.unwrap(), vec![0, 2]);
        assert_eq!(
            store.get_chunk(7, 2).await.unwrap(),
            Bytes::from_static(b"third")
        );

        let location = store.put_artifact(7, b"firstthird").await.unwrap();
        assert!(location.ends_with("007.jpg"));
        assert_eq!(std::fs::read(dir.path().join("007.jpg")).unwrap(), b"firstthird");
    }

    #[tokio::test]
    async fn test_missing_chunk() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get_chunk(1, 0).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(store.list_chunks(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_meta_roundtrip_and_corruption() {
        let (dir, store) = store();
        let meta = TransferMeta {
            index: 3,
            chunk_count: 12,
            file_size: 2900,
        };
        store.put_meta(meta).await.unwrap();

        std::fs::create_dir_all(dir.path().join("004")).unwrap();
        std::fs::write(dir.path().join("004").join(META_FILE), "not json").unwrap();

        // Reopen to make sure nothing is cached
        let reopened = FileChunkStore::new(dir.path()).unwrap();
        assert_eq!(reopened.load_metas().await.unwrap(), vec![meta]);
    }

    #[tokio::test]
    async fn test_writes_interleave_with_other_tasks() {
        let (_dir, store) = store();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);

        let writer = async {
            for chunk in 0..8u16 {
                store.put_chunk(9, chunk, &[chunk as u8; 256]).await.unwrap();
                tx.send(chunk).await.unwrap();
            }
            drop(tx);
        };
        let reader = async {
            let mut seen = Vec::new();
            while let Some(chunk) = rx.recv().await {
                seen.push(chunk);
            }
            seen
        };
        let ((), seen) = tokio::join!(writer, reader);

        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        assert_eq!(store.list_chunks(9).await.unwrap(), seen);
        assert_eq!(store.get_chunk(9, 7).await.unwrap().len(), 256);
    }
}
