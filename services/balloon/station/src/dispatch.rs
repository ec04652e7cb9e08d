//! Ground dispatch loop.
//!
//! Consumes link events one at a time. Telemetry updates the shared
//! snapshots and is relayed; photo chunks go to reassembly.

use std::sync::Arc;

use async_trait::async_trait;
use balloon_link::source::SharedReceiver;
use balloon_link::{LinkEvent, Queue, Task, TaskError, Worker};
use balloon_storage::{ChunkOutcome, ChunkStore, StorageError, TransferTable};
use balloon_wire::{Message, PhotoChunk};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::relay::{LocationKind, WebRelay};
use crate::snapshot::Snapshots;

/// Owns the transfer table and feeds snapshots and the relay
pub struct Dispatcher<S> {
    snapshots: Arc<RwLock<Snapshots>>,
    transfers: TransferTable<S>,
    relay: WebRelay,
}

impl<S: ChunkStore + 'static> Dispatcher<S> {
    /// Dispatcher writing chunks through `transfers`
    pub fn new(transfers: TransferTable<S>, relay: WebRelay) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(Snapshots::new())),
            transfers,
            relay,
        }
    }

    /// Snapshots, shared with readers
    pub fn snapshots(&self) -> Arc<RwLock<Snapshots>> {
        self.snapshots.clone()
    }

    /// Transfer table
    pub fn transfers(&self) -> &TransferTable<S> {
        &self.transfers
    }

    /// Run as a task draining `events`
    pub fn spawn(self, events: SharedReceiver<LinkEvent>) -> Task {
        Task::spawn("dispatch", Queue::new(events), self)
    }

    /// Handle one event
    pub async fn handle(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { link, peer } => info!("{} up ({})", link, peer),
            LinkEvent::Disconnected { link } => warn!("{} down", link),
            LinkEvent::Message { message, .. } => self.dispatch(message).await,
        }
    }

    async fn dispatch(&mut self, message: Message) {
        match message {
            Message::Location(location) => {
                let stats = {
                    let mut snapshots = self.snapshots.write().await;
                    snapshots.location = Some(location);
                    snapshots.stats()
                };
                self.relay.post_stats(stats);
                self.relay.post_location(&location, LocationKind::Balloon);
            }
            Message::Telemetry(telemetry) => {
                let stats = {
                    let mut snapshots = self.snapshots.write().await;
                    snapshots.telemetry = Some(telemetry);
                    snapshots.stats()
                };
                self.relay.post_stats(stats);
            }
            Message::CompanionTelemetry(companion) => {
                let stats = {
                    let mut snapshots = self.snapshots.write().await;
                    snapshots.companion = Some(companion);
                    snapshots.stats()
                };
                if companion.is_connected() {
                    self.relay.post_stats(stats);
                } else {
                    debug!("Companion has no reading yet");
                }
            }
            Message::PhotoChunk(chunk) => self.photo_chunk(&chunk).await,
            other => debug!("Ignoring {:?} on the ground", other.msg_type()),
        }
    }

    async fn photo_chunk(&mut self, chunk: &PhotoChunk) {
        match self.transfers.add_chunk(chunk).await {
            Ok(ChunkOutcome::Duplicate) => {
                debug!("Duplicate chunk {} of photo {}", chunk.chunk, chunk.index)
            }
            Ok(_) => {
                if let Some(transfer) = self.transfers.get(chunk.index) {
                    debug!(
                        "Photo {:03}: {}/{} chunks",
                        chunk.index,
                        transfer.received(),
                        transfer.chunk_count()
                    );
                    self.relay.post_photo(&transfer.status());
                }
            }
            Err(StorageError::Invalid(reason)) => warn!("Rejected photo chunk: {}", reason),
            Err(e) => warn!("Failed to store photo chunk: {}", e),
        }
    }
}

#[async_trait]
impl<S: ChunkStore + 'static> Worker<LinkEvent> for Dispatcher<S> {
    async fn started(&mut self) -> Result<(), TaskError> {
        match self.transfers.recover().await {
            Ok(0) => {}
            Ok(n) => info!("Resumed {} photo transfers", n),
            Err(e) => warn!("Could not recover photo transfers: {}", e),
        }
        Ok(())
    }

    async fn work(&mut self, event: LinkEvent) -> Result<(), TaskError> {
        self.handle(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::tests::serve;
    use crate::relay::{Endpoint, PHOTOS_PATH, STATS_PATH};
    use balloon_storage::MemoryChunkStore;
    use balloon_wire::{CompanionTelemetry, Location, Telemetry};
    use bytes::Bytes;
    use tokio::sync::{mpsc, Mutex};

    fn message(message: Message) -> LinkEvent {
        LinkEvent::Message {
            link: "radio",
            message,
        }
    }

    fn chunk(n: u16, data: &'static [u8]) -> Message {
        Message::PhotoChunk(PhotoChunk {
            index: 7,
            chunk: n,
            chunk_count: 3,
            file_size: 6,
            data: Bytes::from_static(data),
        })
    }

    #[tokio::test]
    async fn test_snapshots_and_reassembly() {
        let mut dispatcher =
            Dispatcher::new(TransferTable::new(MemoryChunkStore::new()), WebRelay::disabled());
        let snapshots = dispatcher.snapshots();

        let telemetry = Telemetry {
            uptime: 3661,
            phase: 1,
            cpu: 42,
            ..Default::default()
        };
        dispatcher.handle(message(Message::Telemetry(telemetry))).await;
        dispatcher
            .handle(message(Message::Location(Location {
                latitude: 1.0,
                ..Default::default()
            })))
            .await;

        for (n, data) in [(1, &b"bb"[..]), (0, &b"aa"[..]), (2, &b"cc"[..])] {
            dispatcher.handle(message(chunk(n, data))).await;
        }
        // Out-of-range chunk is logged, not fatal
        dispatcher
            .handle(message(Message::PhotoChunk(PhotoChunk {
                index: 7,
                chunk: 5,
                chunk_count: 3,
                ..Default::default()
            })))
            .await;

        let snapshot = snapshots.read().await.clone();
        assert_eq!(snapshot.telemetry, Some(telemetry));
        assert_eq!(snapshot.location.unwrap().latitude, 1.0);

        let transfer = dispatcher.transfers().get(7).unwrap();
        assert!(transfer.is_complete());
        assert_eq!(
            dispatcher.transfers().store().artifact(7),
            Some(Bytes::from_static(b"aabbcc"))
        );
    }

    #[tokio::test]
    async fn test_relays_stats_and_photo_status() {
        let (url, mut requests) = serve(200).await;
        let relay = WebRelay::new(vec![Endpoint {
            url,
            token: "t".into(),
        }])
        .unwrap();
        let mut dispatcher = Dispatcher::new(TransferTable::new(MemoryChunkStore::new()), relay);

        // No reading yet: stored but not posted
        dispatcher
            .handle(message(Message::CompanionTelemetry(CompanionTelemetry::default())))
            .await;
        dispatcher.handle(message(chunk(0, b"aa"))).await;

        let request = requests.recv().await.unwrap();
        assert_eq!(request.path, PHOTOS_PATH);
        assert_eq!(request.body["index"], 7);
        assert_eq!(request.body["missing"], serde_json::json!([1, 2]));
        assert_eq!(request.body["complete"], false);

        dispatcher
            .handle(message(Message::CompanionTelemetry(CompanionTelemetry {
                battery: 55,
                signal: 2,
                ..Default::default()
            })))
            .await;
        let request = requests.recv().await.unwrap();
        assert_eq!(request.path, STATS_PATH);
        assert_eq!(request.body["droid"]["connected"], true);
        assert_eq!(request.body["droid"]["battery"], 55);
    }

    #[tokio::test]
    async fn test_runs_as_task() {
        let (tx, rx) = mpsc::channel(8);
        let dispatcher =
            Dispatcher::new(TransferTable::new(MemoryChunkStore::new()), WebRelay::disabled());
        let snapshots = dispatcher.snapshots();
        let task = dispatcher.spawn(Arc::new(Mutex::new(rx)));

        tx.send(LinkEvent::Connected {
            link: "radio",
            peer: "test".into(),
        })
        .await
        .unwrap();
        tx.send(message(Message::Telemetry(Telemetry {
            uptime: 9,
            ..Default::default()
        })))
        .await
        .unwrap();
        drop(tx);

        task.join().await.unwrap();
        assert_eq!(snapshots.read().await.telemetry.unwrap().uptime, 9);
    }
}
