//! Flight state for the balloon OBC.
//!
//! [`PhaseTracker`] classifies the flight from recent altitude fixes and
//! [`GpsTracker`] turns the receiver's NMEA feed into a wire [`Location`].
//!
//! ```rust
//! use balloon_flight::{FlightPhase, GpsTracker, PhaseTracker};
//!
//! let mut gps = GpsTracker::new();
//! let mut phase = PhaseTracker::new();
//!
//! let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
//! if let Some(altitude) = gps.update(line).unwrap() {
//!     phase.push(altitude);
//! }
//! assert_eq!(phase.phase(), FlightPhase::Preflight);
//! ```
//!
//! [`Location`]: balloon_wire::Location

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gps;
pub mod phase;

// Re-export main types
pub use gps::{parse_sentence, GgaFix, GpsError, GpsTracker, RmcFix, Sentence, INIT_SENTENCES};
pub use phase::{FlightPhase, PhaseTracker, RATE_PER_FIX, WINDOW};
