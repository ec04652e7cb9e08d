//! Flight-phase state machine.
//!
//! The phase is derived from the last [`WINDOW`] altitude fixes. It only
//! moves forward: preflight, ascent, descent, landed.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::info;

/// Number of altitude fixes the phase is evaluated over
pub const WINDOW: usize = 5;

/// Vertical rate, in kilometres per fix, that counts as climbing or falling
pub const RATE_PER_FIX: f32 = 0.001;

/// Stage of the flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightPhase {
    /// On the ground before launch
    #[default]
    Preflight,
    /// Climbing
    Ascent,
    /// Falling after burst
    Descent,
    /// Back on the ground
    Landed,
}

impl FlightPhase {
    /// Wire id carried in telemetry
    pub fn id(self) -> u8 {
        match self {
            FlightPhase::Preflight => 0,
            FlightPhase::Ascent => 1,
            FlightPhase::Descent => 2,
            FlightPhase::Landed => 3,
        }
    }

    /// Phase for a wire id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(FlightPhase::Preflight),
            1 => Some(FlightPhase::Ascent),
            2 => Some(FlightPhase::Descent),
            3 => Some(FlightPhase::Landed),
            _ => None,
        }
    }

    /// Lowercase name
    pub fn name(self) -> &'static str {
        match self {
            FlightPhase::Preflight => "preflight",
            FlightPhase::Ascent => "ascent",
            FlightPhase::Descent => "descent",
            FlightPhase::Landed => "landed",
        }
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tracks the flight phase from a stream of altitude fixes
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    phase: FlightPhase,
    window: VecDeque<f32>,
}

impl PhaseTracker {
    /// Tracker in preflight with an empty window
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    /// Altitude change across the window that triggers a transition
    pub fn threshold() -> f32 {
        RATE_PER_FIX * WINDOW as f32
    }

    /// Add an altitude fix in kilometres.
    ///
    /// Returns the new phase when this fix caused a transition.
    pub fn push(&mut self, altitude: f32) -> Option<FlightPhase> {
        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(altitude);
        if self.window.len() < WINDOW {
            return None;
        }

        let (first, last) = match (self.window.front(), self.window.back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return None,
        };
        let delta = last - first;
        let v = Self::threshold();

        let next = match self.phase {
            FlightPhase::Preflight if delta >= v => FlightPhase::Ascent,
            FlightPhase::Ascent if delta <= -v => FlightPhase::Descent,
            FlightPhase::Descent if delta > -v && delta < v => FlightPhase::Landed,
            _ => return None,
        };

        info!(
            "Flight phase {} -> {} (altitude change {:.3} km over {} fixes)",
            self.phase, next, delta, WINDOW
        );
        self.phase = next;
        Some(next)
    }
}
