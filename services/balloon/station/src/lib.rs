//! Ground station for the balloon.
//!
//! The [`Dispatcher`] drains link events from the radio, keeps the latest
//! [`Snapshots`], reassembles photos and hands everything to the
//! [`WebRelay`], which posts JSON to zero or more flight dashboards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod error;
pub mod relay;
pub mod snapshot;

// Re-export main types
pub use dispatch::Dispatcher;
pub use error::RelayError;
pub use relay::{Endpoint, LocationKind, WebClient, WebRelay, LOCATION_INTERVAL, MAX_FAILURES};
pub use snapshot::Snapshots;
