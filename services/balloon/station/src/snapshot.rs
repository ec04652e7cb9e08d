//! Latest telemetry seen by the ground station

use balloon_flight::FlightPhase;
use balloon_wire::{CompanionTelemetry, Location, Telemetry};
use serde_json::{json, Map, Value};

/// Most recent value of each telemetry message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshots {
    /// Balloon position
    pub location: Option<Location>,
    /// OBC telemetry
    pub telemetry: Option<Telemetry>,
    /// Companion telemetry
    pub companion: Option<CompanionTelemetry>,
}

impl Snapshots {
    /// Empty snapshots
    pub fn new() -> Self {
        Self::default()
    }

    /// Merged stats document posted to `/api/stats/`.
    ///
    /// Telemetry fields sit at the top level next to a `mode` name, the
    /// position under `location` and the companion under `droid`.
    pub fn stats(&self) -> Value {
        let mut stats = Map::new();

        if let Some(telemetry) = &self.telemetry {
            if let Ok(Value::Object(fields)) = serde_json::to_value(telemetry) {
                stats.extend(fields);
            }
            let mode = FlightPhase::from_id(telemetry.phase)
                .map(FlightPhase::name)
                .unwrap_or("unknown");
            stats.insert("mode".into(), json!(mode));
        }

        let location = self
            .location
            .and_then(|location| serde_json::to_value(location).ok())
            .unwrap_or_else(|| json!({}));
        stats.insert("location".into(), location);

        let droid = match &self.companion {
            Some(companion) if companion.is_connected() => {
                let mut droid = match serde_json::to_value(companion) {
                    Ok(Value::Object(fields)) => fields,
                    _ => Map::new(),
                };
                droid.insert("connected".into(), json!(true));
                Value::Object(droid)
            }
            Some(_) => json!({ "connected": false }),
            None => json!({}),
        };
        stats.insert("droid".into(), droid);

        Value::Object(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        assert_eq!(
            Snapshots::new().stats(),
            json!({ "location": {}, "droid": {} })
        );
    }

    #[test]
    fn test_merged_stats() {
        let snapshots = Snapshots {
            location: Some(Location {
                latitude: 47.5,
                longitude: -122.25,
                altitude: 1.5,
                quality: 1,
                satellites: 9,
                speed: 3.5,
            }),
            telemetry: Some(Telemetry {
                uptime: 3661,
                phase: 1,
                cpu: 42,
                free_mem: 1024,
                int_temp: 21.5,
                int_humidity: 40.0,
                ext_temp: -5.0,
            }),
            companion: Some(CompanionTelemetry {
                battery: 80,
                signal: 3,
                photo_count: 12,
                ..Default::default()
            }),
        };

        let stats = snapshots.stats();
        assert_eq!(stats["uptime"], 3661);
        assert_eq!(stats["mode"], "ascent");
        assert_eq!(stats["free_mem"], 1024);
        assert_eq!(stats["location"]["latitude"], 47.5);
        assert_eq!(stats["location"]["satellites"], 9);
        assert_eq!(stats["droid"]["connected"], true);
        assert_eq!(stats["droid"]["battery"], 80);
        assert_eq!(stats["droid"]["photo_count"], 12);
    }

    #[test]
    fn test_companion_without_reading() {
        let snapshots = Snapshots {
            companion: Some(CompanionTelemetry {
                photo_count: 4,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(snapshots.stats()["droid"], json!({ "connected": false }));
    }
}
