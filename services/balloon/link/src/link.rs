//! Self-healing links.
//!
//! A [`Link`] supervises one transport: it connects through its
//! [`Connector`], runs a read task and a write task over the stream, and
//! reconnects whenever either one ends. Outgoing messages wait in an
//! [`Outbox`] that survives reconnects. Incoming messages and connection
//! changes are delivered as [`LinkEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use balloon_wire::Message;

use crate::source::{Frames, Once, Queue, SharedReceiver};
use crate::task::{Task, Worker};
use crate::transport::{Connection, Connector};
use crate::TaskError;

/// Wait between failed connect attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default outbox capacity
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Something that happened on a link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Stream established
    Connected {
        /// Link name
        link: &'static str,
        /// Peer description
        peer: String,
    },
    /// Stream lost or closed
    Disconnected {
        /// Link name
        link: &'static str,
    },
    /// Message received
    Message {
        /// Link name
        link: &'static str,
        /// The decoded message
        message: Message,
    },
}

/// Snapshot of a link's connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Whether a stream is up
    pub connected: bool,
    /// Peer learned at connect time
    pub peer: Option<String>,
}

/// Connection state of one link. Only the owning supervisor changes it.
#[derive(Debug)]
pub struct LinkState {
    name: &'static str,
    status: watch::Sender<LinkStatus>,
}

impl LinkState {
    /// Create a disconnected state
    pub fn new(name: &'static str) -> Arc<Self> {
        let (status, _) = watch::channel(LinkStatus::default());
        Arc::new(Self { name, status })
    }

    /// Link name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a stream is up
    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    /// Current status
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    fn set_connected(&self, peer: String) {
        self.status.send_replace(LinkStatus {
            connected: true,
            peer: Some(peer),
        });
    }

    fn set_disconnected(&self) {
        self.status.send_modify(|status| status.connected = false);
    }
}

/// FIFO of outgoing messages, retained across reconnects
#[derive(Debug, Clone)]
pub struct Outbox {
    name: &'static str,
    tx: mpsc::Sender<Message>,
    rx: SharedReceiver<Message>,
}

impl Outbox {
    /// Create an outbox holding at most `capacity` messages (at least one)
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Queue a message. Returns false if the outbox is full.
    pub fn push(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    "{} outbox full, dropping {:?} message",
                    self.name,
                    message.msg_type()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Messages waiting to be written
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything queued without waiting. Empty while a writer holds
    /// the queue.
    pub fn drain(&self) -> Vec<Message> {
        let mut drained = Vec::new();
        if let Ok(mut rx) = self.rx.try_lock() {
            while let Ok(message) = rx.try_recv() {
                drained.push(message);
            }
        }
        drained
    }

    fn receiver(&self) -> SharedReceiver<Message> {
        self.rx.clone()
    }
}

/// Forwards decoded messages to the event channel and marks the link down
/// when the stream ends
struct Inbound {
    state: Arc<LinkState>,
    events: mpsc::Sender<LinkEvent>,
}

#[async_trait]
impl Worker<Message> for Inbound {
    async fn work(&mut self, message: Message) -> Result<(), TaskError> {
        debug!(component = "message", "{} <- {:?}", self.state.name(), message);
        self.events
            .send(LinkEvent::Message {
                link: self.state.name(),
                message,
            })
            .await
            .map_err(|_| TaskError::Closed)
    }

    async fn stopped(&mut self, cause: Option<&TaskError>) {
        self.state.set_disconnected();
        match cause {
            Some(e) => warn!("{} link lost: {}", self.state.name(), e),
            None => info!("{} link closed", self.state.name()),
        }
        let _ = self
            .events
            .send(LinkEvent::Disconnected {
                link: self.state.name(),
            })
            .await;
    }
}

/// Writes queued messages as frames
struct Outbound<W> {
    name: &'static str,
    writer: W,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Worker<Message> for Outbound<W> {
    async fn work(&mut self, message: Message) -> Result<(), TaskError> {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{}: dropping unencodable message: {}", self.name, e);
                return Ok(());
            }
        };
        debug!(component = "message", "{} -> {:?}", self.name, message);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Read and write tasks over one established stream
#[derive(Debug)]
pub struct Session {
    reader: Task,
    writer: Task,
}

impl Session {
    /// Mark the link connected and start both tasks
    pub async fn start(
        connection: Connection,
        state: Arc<LinkState>,
        outbox: &Outbox,
        events: &mpsc::Sender<LinkEvent>,
    ) -> Session {
        let name = state.name();
        let Connection { stream, peer } = connection;
        info!("{} link connected to {} over {}", name, peer, stream.kind());

        state.set_connected(peer.clone());
        let _ = events.send(LinkEvent::Connected { link: name, peer }).await;

        let (read_half, write_half) = tokio::io::split(stream);
        let reader = Task::spawn(
            format!("{}-read", name),
            Frames::new(name, read_half),
            Inbound {
                state,
                events: events.clone(),
            },
        );
        let writer = Task::spawn(
            format!("{}-write", name),
            Queue::new(outbox.receiver()),
            Outbound {
                name,
                writer: write_half,
            },
        );

        Session { reader, writer }
    }

    /// Resolves when either task has ended
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.reader.finished() => {}
            _ = self.writer.finished() => {}
        }
    }

    /// Stop both tasks and wait for them. The link is disconnected after.
    pub async fn shutdown(self) {
        let _ = self.writer.shutdown().await;
        let _ = self.reader.shutdown().await;
    }
}

/// Supervisor for one outbound transport
pub struct Link<C> {
    connector: C,
    state: Arc<LinkState>,
    outbox: Outbox,
    events: mpsc::Sender<LinkEvent>,
    retry_interval: Duration,
}

impl<C: Connector> Link<C> {
    /// Create a supervisor. Nothing happens until [`Link::spawn`].
    pub fn new(
        name: &'static str,
        connector: C,
        outbox: Outbox,
        events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            connector,
            state: LinkState::new(name),
            outbox,
            events,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Override the wait between failed connect attempts
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Connection state, shared with observers
    pub fn state(&self) -> Arc<LinkState> {
        self.state.clone()
    }

    /// Run the supervisor as a task
    pub fn spawn(self) -> Task {
        let name = format!("{}-link", self.state.name());
        Task::spawn(name, Once::new(), self)
    }

    /// Connect, serve, and reconnect forever
    async fn supervise(&mut self) {
        let name = self.state.name();
        loop {
            info!("{} link connecting to {}", name, self.connector.target());
            match self.connector.connect().await {
                Ok(connection) => {
                    let session =
                        Session::start(connection, self.state.clone(), &self.outbox, &self.events)
                            .await;
                    session.closed().await;
                    session.shutdown().await;
                }
                Err(e) => {
                    warn!(
                        "{} link failed to connect to {}: {}; retrying in {:?}",
                        name,
                        self.connector.target(),
                        e,
                        self.retry_interval
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl<C: Connector> Worker<()> for Link<C> {
    async fn work(&mut self, _item: ()) -> Result<(), TaskError> {
        self.supervise().await;
        Ok(())
    }

    async fn stopped(&mut self, _cause: Option<&TaskError>) {
        self.state.set_disconnected();
    }
}
