//! NMEA 0183 position parsing.
//!
//! Only the two sentences the receiver is configured to emit are read:
//! `GGA` (fix, altitude, satellites) and `RMC` (validity, ground speed).
//! Both GPS and multi-constellation talkers (`$GP`, `$GN`) are accepted.

use balloon_wire::Location;
use thiserror::Error;
use tracing::trace;

/// Sent to the receiver at startup: 1 Hz updates, RMC and GGA only
pub const INIT_SENTENCES: [&str; 2] = [
    "$PMTK220,1000*1F",
    "$PMTK314,0,1,0,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0*28",
];

/// NMEA parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpsError {
    /// Checksum does not match the sentence body
    #[error("NMEA checksum mismatch: expected {expected:02X}, computed {actual:02X}")]
    Checksum {
        /// Checksum carried by the sentence
        expected: u8,
        /// Checksum computed over the body
        actual: u8,
    },
    /// Sentence is missing fields or has unparsable ones
    #[error("Malformed {sentence} sentence: {reason}")]
    Malformed {
        /// Sentence type
        sentence: &'static str,
        /// What was wrong
        reason: String,
    },
}

/// Position fix from a `GGA` sentence
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GgaFix {
    /// UTC time of day in seconds
    pub utc_seconds: Option<f32>,
    /// Latitude in decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees
    pub longitude: Option<f64>,
    /// Fix quality (0 = none)
    pub quality: u8,
    /// Satellites in use
    pub satellites: u8,
    /// Antenna altitude in metres
    pub altitude: Option<f32>,
}

/// Navigation data from an `RMC` sentence
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RmcFix {
    /// Receiver reports the data as valid
    pub valid: bool,
    /// Latitude in decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees
    pub longitude: Option<f64>,
    /// Speed over ground in knots
    pub speed: Option<f32>,
}

/// A sentence this parser understands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sentence {
    /// Global positioning fix
    Gga(GgaFix),
    /// Recommended minimum navigation data
    Rmc(RmcFix),
}

fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Validate the checksum, if the sentence carries one, and return the body
/// between `$` and `*`.
fn body(line: &str) -> Result<&str, GpsError> {
    let line = line.trim().trim_start_matches('$');
    match line.split_once('*') {
        Some((body, sum)) => {
            let expected = u8::from_str_radix(sum.trim(), 16).map_err(|_| GpsError::Malformed {
                sentence: "NMEA",
                reason: format!("bad checksum field {:?}", sum),
            })?;
            let actual = checksum(body);
            if expected != actual {
                return Err(GpsError::Checksum { expected, actual });
            }
            Ok(body)
        }
        None => Ok(line),
    }
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) plus hemisphere to signed decimal degrees
fn coordinate(
    raw: &str,
    hemisphere: &str,
    sentence: &'static str,
) -> Result<Option<f64>, GpsError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let malformed = || GpsError::Malformed {
        sentence,
        reason: format!("bad coordinate {:?}", raw),
    };

    let dot = raw.find('.').unwrap_or(raw.len());
    if dot < 3 {
        return Err(malformed());
    }
    let (degrees, minutes) = match (raw.get(..dot - 2), raw.get(dot - 2..)) {
        (Some(degrees), Some(minutes)) => (degrees, minutes),
        _ => return Err(malformed()),
    };
    let degrees: f64 = degrees.parse().map_err(|_| malformed())?;
    let minutes: f64 = minutes.parse().map_err(|_| malformed())?;
    let value = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Ok(Some(value)),
        "S" | "W" => Ok(Some(-value)),
        _ => Err(malformed()),
    }
}

fn number<T: std::str::FromStr>(
    raw: &str,
    sentence: &'static str,
    field: &str,
) -> Result<Option<T>, GpsError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| GpsError::Malformed {
        sentence,
        reason: format!("bad {} {:?}", field, raw),
    })
}

/// `hhmmss.ss` to seconds since midnight
fn time_of_day(raw: &str) -> Option<f32> {
    if raw.len() < 6 {
        return None;
    }
    let hours: f32 = raw.get(0..2)?.parse().ok()?;
    let minutes: f32 = raw.get(2..4)?.parse().ok()?;
    let seconds: f32 = raw.get(4..)?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse one NMEA line.
///
/// Returns `Ok(None)` for well-formed sentences of other types.
pub fn parse_sentence(line: &str) -> Result<Option<Sentence>, GpsError> {
    let body = body(line)?;
    let fields: Vec<&str> = body.split(',').collect();
    let kind = fields[0].get(2..).unwrap_or("");

    match kind {
        "GGA" => {
            const NAME: &str = "GGA";
            if fields.len() < 10 {
                return Err(GpsError::Malformed {
                    sentence: NAME,
                    reason: format!("{} fields", fields.len()),
                });
            }
            Ok(Some(Sentence::Gga(GgaFix {
                utc_seconds: time_of_day(fields[1]),
                latitude: coordinate(fields[2], fields[3], NAME)?,
                longitude: coordinate(fields[4], fields[5], NAME)?,
                quality: number(fields[6], NAME, "quality")?.unwrap_or(0),
                satellites: number(fields[7], NAME, "satellites")?.unwrap_or(0),
                altitude: number(fields[9], NAME, "altitude")?,
            })))
        }
        "RMC" => {
            const NAME: &str = "RMC";
            if fields.len() < 8 {
                return Err(GpsError::Malformed {
                    sentence: NAME,
                    reason: format!("{} fields", fields.len()),
                });
            }
            Ok(Some(Sentence::Rmc(RmcFix {
                valid: fields[2] == "A",
                latitude: coordinate(fields[3], fields[4], NAME)?,
                longitude: coordinate(fields[5], fields[6], NAME)?,
                speed: number(fields[7], NAME, "speed")?,
            })))
        }
        _ => {
            trace!("Ignoring NMEA sentence {}", fields[0]);
            Ok(None)
        }
    }
}

/// Latest position assembled from the GPS feed
#[derive(Debug, Clone, Default)]
pub struct GpsTracker {
    location: Location,
    fixes: u64,
}

impl GpsTracker {
    /// Tracker with no fix
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in wire form (altitude in kilometres)
    pub fn location(&self) -> Location {
        self.location
    }

    /// Number of GGA fixes seen
    pub fn fixes(&self) -> u64 {
        self.fixes
    }

    /// Fold one NMEA line into the position.
    ///
    /// Returns the altitude in kilometres when the line was a GGA fix with
    /// one, for the flight-phase tracker.
    pub fn update(&mut self, line: &str) -> Result<Option<f32>, GpsError> {
        match parse_sentence(line)? {
            Some(Sentence::Gga(fix)) => {
                self.fixes += 1;
                if let Some(latitude) = fix.latitude {
                    self.location.latitude = latitude;
                }
                if let Some(longitude) = fix.longitude {
                    self.location.longitude = longitude;
                }
                self.location.quality = fix.quality;
                self.location.satellites = fix.satellites;
                Ok(fix.altitude.map(|metres| {
                    self.location.altitude = metres / 1000.0;
                    self.location.altitude
                }))
            }
            Some(Sentence::Rmc(fix)) => {
                if let Some(speed) = fix.speed.filter(|_| fix.valid) {
                    self.location.speed = speed;
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
