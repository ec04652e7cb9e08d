//! Cooperative tasks, transports and self-healing links for the balloon.
//!
//! This crate runs the balloon's links: the radio between the OBC and the
//! ground station, and the companion link between the OBC and the phone.
//! Every long-running activity is a [`Task`]: a source that decides how each
//! cycle waits, and a worker with `started`, `work` and `stopped` hooks.
//!
//! ## Features
//!
//! - **Tasks**: interval, readiness, line, framed-message, queue and accept
//!   sources; panics are caught and `stopped` runs exactly once
//! - **Links**: connect, read/write loops, fixed-interval reconnect
//! - **Outboxes**: FIFO queues that survive reconnects
//! - **Radio**: serial modem with AT configuration, TCP dial or listen
//! - **Companion**: Bluetooth RFCOMM (`bluetooth` feature) or TCP
//!
//! ## Example
//!
//! ```rust,no_run
//! use balloon_link::{LinkEvent, Link, Outbox, TcpConnector};
//! use tokio::sync::mpsc;
//!
//! # async fn example() {
//! let (events_tx, mut events) = mpsc::channel(64);
//! let outbox = Outbox::new("radio", 256);
//!
//! let _link = Link::new("radio", TcpConnector::new("obc.local:9910"), outbox.clone(), events_tx)
//!     .spawn();
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LinkEvent::Connected { link, peer } => println!("{} connected to {}", link, peer),
//!         LinkEvent::Disconnected { link } => println!("{} disconnected", link),
//!         LinkEvent::Message { link, message } => println!("{}: {:?}", link, message),
//!     }
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod companion;
pub mod error;
pub mod link;
pub mod radio;
pub mod source;
pub mod task;
pub mod transport;

// Re-export main types
pub use companion::{companion_connector, CompanionTransport, COMPANION_RETRY_INTERVAL};
pub use error::{LinkError, TaskError};
pub use link::{
    Link, LinkEvent, LinkState, LinkStatus, Outbox, Session, DEFAULT_OUTBOX_CAPACITY,
    DEFAULT_RETRY_INTERVAL,
};
pub use radio::{
    configure, HandshakeTimeouts, RadioInfo, RadioListener, SerialRadioConnector,
    DEFAULT_BAUD_RATE, DEFAULT_POWER_LEVEL, RADIO_TCP_PORT,
};
pub use source::{Accept, Frames, Interval, Lines, Once, Queue, ReadChunks, DEFAULT_INTERVAL};
pub use task::{Source, Task, Worker};
pub use transport::{Connection, Connector, IoStream, TcpConnector};

#[cfg(feature = "bluetooth")]
pub use companion::rfcomm::RfcommConnector;
