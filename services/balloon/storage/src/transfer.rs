//! Transfer table: per-index reassembly state

use crate::{ChunkStore, StorageError, TransferMeta};
use balloon_wire::PhotoChunk;
use crc32fast::Hasher;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

fn chunk_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// One photo transfer in progress (or finished)
#[derive(Debug, Clone)]
pub struct Transfer {
    meta: TransferMeta,
    missing: BTreeSet<u16>,
    crcs: BTreeMap<u16, u32>,
    complete: bool,
    artifact: Option<String>,
}

impl Transfer {
    fn new(meta: TransferMeta) -> Self {
        Self {
            meta,
            missing: (0..meta.chunk_count).collect(),
            crcs: BTreeMap::new(),
            complete: false,
            artifact: None,
        }
    }

    /// Transfer index
    pub fn index(&self) -> u16 {
        self.meta.index
    }

    /// Declared number of chunks
    pub fn chunk_count(&self) -> u16 {
        self.meta.chunk_count
    }

    /// Declared photo size in bytes
    pub fn file_size(&self) -> u32 {
        self.meta.file_size
    }

    /// Chunks not yet received, ascending
    pub fn missing(&self) -> impl Iterator<Item = u16> + '_ {
        self.missing.iter().copied()
    }

    /// Number of distinct chunks received
    pub fn received(&self) -> usize {
        self.meta.chunk_count as usize - self.missing.len()
    }

    /// Fraction of chunks received, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        self.received() as f64 / self.meta.chunk_count as f64
    }

    /// Whether the artifact has been written
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Where the assembled photo was written
    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    /// Serializable snapshot for status reporting
    pub fn status(&self) -> TransferStatus {
        TransferStatus {
            index: self.meta.index,
            chunks: self.meta.chunk_count,
            file_size: self.meta.file_size,
            received: self.received(),
            missing: self.missing().collect(),
            percent: (self.progress() * 1000.0).round() / 10.0,
            complete: self.complete,
            artifact: self.artifact.clone(),
        }
    }
}

/// Status of a transfer as reported to the web relay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferStatus {
    /// Transfer index
    pub index: u16,
    /// Declared chunk count
    pub chunks: u16,
    /// Declared photo size
    pub file_size: u32,
    /// Distinct chunks received
    pub received: usize,
    /// Chunk numbers still missing
    pub missing: Vec<u16>,
    /// Progress in percent, one decimal
    pub percent: f64,
    /// Whether the photo is assembled
    pub complete: bool,
    /// Artifact location once assembled
    pub artifact: Option<String>,
}

/// What happened to a chunk handed to [`TransferTable::add_chunk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// New chunk saved, transfer still incomplete
    Stored,
    /// Same bytes as the saved copy, nothing changed
    Duplicate,
    /// Different bytes replaced the saved copy, transfer still incomplete
    Replaced,
    /// The transfer's artifact was written (or rewritten)
    Completed {
        /// Artifact location
        artifact: String,
    },
}

/// All transfers seen by the ground station, keyed by index
pub struct TransferTable<S> {
    store: S,
    transfers: BTreeMap<u16, Transfer>,
}

impl<S: ChunkStore> TransferTable<S> {
    /// Empty table over `store`
    pub fn new(store: S) -> Self {
        Self {
            store,
            transfers: BTreeMap::new(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuild the table from whatever the store already holds.
    ///
    /// Returns the number of transfers recovered. Transfers whose chunks are
    /// all present are reassembled.
    pub async fn recover(&mut self) -> Result<usize, StorageError> {
        let metas = self.store.load_metas().await?;
        for meta in &metas {
            if meta.chunk_count == 0 {
                warn!("Ignoring stored transfer {:03} with no chunks", meta.index);
                continue;
            }

            let mut transfer = Transfer::new(*meta);
            for chunk in self.store.list_chunks(meta.index).await? {
                if chunk >= meta.chunk_count {
                    warn!(
                        "Ignoring stored chunk {:03} of transfer {:03} (count {})",
                        chunk, meta.index, meta.chunk_count
                    );
                    continue;
                }
                let data = self.store.get_chunk(meta.index, chunk).await?;
                transfer.crcs.insert(chunk, chunk_crc(&data));
                transfer.missing.remove(&chunk);
            }

            if transfer.missing.is_empty() {
                self.assemble(&mut transfer).await?;
            }
            info!(
                "Recovered transfer {:03}: {}/{} chunks",
                meta.index,
                transfer.received(),
                meta.chunk_count
            );
            self.transfers.insert(meta.index, transfer);
        }
        Ok(self.transfers.len())
    }

    /// Record one chunk.
    ///
    /// Chunks may arrive in any order and more than once. Invalid chunks are
    /// rejected with [`StorageError::Invalid`] and leave the table unchanged.
    pub async fn add_chunk(&mut self, chunk: &PhotoChunk) -> Result<ChunkOutcome, StorageError> {
        if chunk.chunk_count == 0 {
            return Err(StorageError::Invalid(format!(
                "transfer {:03} declares zero chunks",
                chunk.index
            )));
        }
        if chunk.chunk >= chunk.chunk_count {
            return Err(StorageError::Invalid(format!(
                "chunk {} of transfer {:03} is outside its {} chunks",
                chunk.chunk, chunk.index, chunk.chunk_count
            )));
        }

        let mut transfer = match self.transfers.remove(&chunk.index) {
            Some(existing) if existing.chunk_count() != chunk.chunk_count => {
                let count = existing.chunk_count();
                self.transfers.insert(chunk.index, existing);
                return Err(StorageError::Invalid(format!(
                    "transfer {:03} has {} chunks, chunk {} claims {}",
                    chunk.index, count, chunk.chunk, chunk.chunk_count
                )));
            }
            Some(existing) => existing,
            None => {
                let meta = TransferMeta {
                    index: chunk.index,
                    chunk_count: chunk.chunk_count,
                    file_size: chunk.file_size,
                };
                self.store.put_meta(meta).await?;
                info!(
                    "New photo transfer {:03}: {} chunks, {} bytes",
                    meta.index, meta.chunk_count, meta.file_size
                );
                Transfer::new(meta)
            }
        };

        let result = self.apply(&mut transfer, chunk).await;
        self.transfers.insert(chunk.index, transfer);
        result
    }

    async fn apply(
        &self,
        transfer: &mut Transfer,
        chunk: &PhotoChunk,
    ) -> Result<ChunkOutcome, StorageError> {
        let crc = chunk_crc(&chunk.data);
        let replaced = match transfer.crcs.get(&chunk.chunk) {
            Some(&saved) if saved == crc => {
                // A failed assembly leaves the transfer full but incomplete
                if transfer.missing.is_empty() && !transfer.complete {
                    let artifact = self.assemble(transfer).await?;
                    return Ok(ChunkOutcome::Completed { artifact });
                }
                return Ok(ChunkOutcome::Duplicate);
            }
            Some(&saved) => {
                warn!(
                    "Chunk {:03} of transfer {:03} changed (crc {:08x} -> {:08x}), overwriting",
                    chunk.chunk, chunk.index, saved, crc
                );
                true
            }
            None => false,
        };

        self.store
            .put_chunk(chunk.index, chunk.chunk, &chunk.data)
            .await?;
        transfer.crcs.insert(chunk.chunk, crc);
        transfer.missing.remove(&chunk.chunk);

        if transfer.missing.is_empty() && (!transfer.complete || replaced) {
            let artifact = self.assemble(transfer).await?;
            return Ok(ChunkOutcome::Completed { artifact });
        }

        Ok(if replaced {
            ChunkOutcome::Replaced
        } else {
            ChunkOutcome::Stored
        })
    }

    async fn assemble(&self, transfer: &mut Transfer) -> Result<String, StorageError> {
        let mut photo = Vec::with_capacity(transfer.file_size() as usize);
        for chunk in 0..transfer.chunk_count() {
            photo.extend_from_slice(&self.store.get_chunk(transfer.index(), chunk).await?);
        }

        if photo.len() != transfer.file_size() as usize {
            warn!(
                "Transfer {:03} assembled to {} bytes, {} declared",
                transfer.index(),
                photo.len(),
                transfer.file_size()
            );
        }

        let artifact = self.store.put_artifact(transfer.index(), &photo).await?;
        info!("Photo {:03} complete: {}", transfer.index(), artifact);
        transfer.complete = true;
        transfer.artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Transfer for `index`
    pub fn get(&self, index: u16) -> Option<&Transfer> {
        self.transfers.get(&index)
    }

    /// Every transfer, ascending by index
    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }

    /// Number of transfers
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Whether no transfer has been seen
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
