//! Flight computer role.
//!
//! One scheduler runs the radio and companion links, the GPS and sensor
//! feeds, a periodic report to the ground, and a router between the links.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use balloon_flight::{FlightPhase, GpsTracker, PhaseTracker, INIT_SENTENCES};
use balloon_link::{
    companion_connector, Interval, Lines, Link, LinkEvent, Outbox, Queue, Task, TaskError, Worker,
};
use balloon_wire::{CompanionTelemetry, Location, Message, Telemetry};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

use crate::config::{ObcConfig, SerialDevice};
use crate::radio::{spawn_radio, RADIO};
use crate::system::{self, SystemStats};
use crate::{component_debug, component_info, component_warn};

/// Link name of the companion in [`LinkEvent`]s
pub const COMPANION: &str = "companion";

/// Latest sensor-board values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReadings {
    /// Inside the payload box, °C
    pub internal_temp: f32,
    /// Inside the payload box, %RH
    pub internal_humidity: f32,
    /// Outside air, °C
    pub external_temp: f32,
}

#[derive(Deserialize)]
struct SensorUpdate {
    internal_temp: Option<f32>,
    internal_humidity: Option<f32>,
    external_temp: Option<f32>,
}

impl SensorReadings {
    /// Merge one JSON line. Keys left out keep their last value.
    pub fn merge_line(&mut self, line: &str) -> Result<(), serde_json::Error> {
        let update: SensorUpdate = serde_json::from_str(line)?;
        if let Some(value) = update.internal_temp {
            self.internal_temp = value;
        }
        if let Some(value) = update.internal_humidity {
            self.internal_humidity = value;
        }
        if let Some(value) = update.external_temp {
            self.external_temp = value;
        }
        Ok(())
    }
}

/// What the OBC knows between reports
#[derive(Debug, Clone, Default)]
pub struct ObcSnapshots {
    /// Last GPS position
    pub location: Location,
    /// Current flight phase
    pub phase: FlightPhase,
    /// Last sensor values
    pub sensors: SensorReadings,
    /// Companion telemetry received since the last report
    pub companion: Option<CompanionTelemetry>,
}

type SharedSnapshots = Arc<RwLock<ObcSnapshots>>;

/// Folds NMEA lines into the location and flight phase
pub struct GpsWorker {
    gps: GpsTracker,
    phases: PhaseTracker,
    snapshots: SharedSnapshots,
}

impl GpsWorker {
    fn new(snapshots: SharedSnapshots) -> Self {
        Self {
            gps: GpsTracker::new(),
            phases: PhaseTracker::new(),
            snapshots,
        }
    }
}

#[async_trait]
impl Worker<String> for GpsWorker {
    async fn work(&mut self, line: String) -> Result<(), TaskError> {
        match self.gps.update(&line) {
            Ok(altitude) => {
                if let Some(altitude) = altitude {
                    self.phases.push(altitude);
                }
                let mut snapshots = self.snapshots.write().await;
                snapshots.location = self.gps.location();
                snapshots.phase = self.phases.phase();
            }
            Err(e) => component_debug!("gps", "Skipping sentence: {}", e),
        }
        Ok(())
    }
}

/// Merges sensor-board JSON lines
pub struct SensorWorker {
    snapshots: SharedSnapshots,
}

#[async_trait]
impl Worker<String> for SensorWorker {
    async fn work(&mut self, line: String) -> Result<(), TaskError> {
        let mut snapshots = self.snapshots.write().await;
        if let Err(e) = snapshots.sensors.merge_line(&line) {
            component_warn!("sensors", "Bad sensor line {:?}: {}", line, e);
        }
        Ok(())
    }
}

/// Queues the periodic report on the radio
pub struct Reporter {
    radio: Outbox,
    snapshots: SharedSnapshots,
    booted: Instant,
}

impl Reporter {
    fn new(radio: Outbox, snapshots: SharedSnapshots) -> Self {
        Self {
            radio,
            snapshots,
            booted: Instant::now(),
        }
    }

    async fn report(&mut self, stats: SystemStats) {
        let (snapshot, companion) = {
            let mut snapshots = self.snapshots.write().await;
            let companion = snapshots.companion.take();
            (snapshots.clone(), companion)
        };

        if let Some(companion) = companion {
            self.radio.push(Message::CompanionTelemetry(companion));
        }
        let uptime = self.booted.elapsed().as_secs().min(u32::MAX as u64) as u32;
        self.radio.push(Message::Telemetry(Telemetry {
            uptime,
            phase: snapshot.phase.id(),
            cpu: stats.cpu,
            free_mem: stats.free_mem,
            int_temp: snapshot.sensors.internal_temp,
            int_humidity: snapshot.sensors.internal_humidity,
            ext_temp: snapshot.sensors.external_temp,
        }));
        self.radio.push(Message::Location(snapshot.location));
        component_debug!("report", "Queued report at uptime {}s", uptime);
    }
}

#[async_trait]
impl Worker<()> for Reporter {
    async fn work(&mut self, _tick: ()) -> Result<(), TaskError> {
        let stats = system::sample().await;
        self.report(stats).await;
        Ok(())
    }
}

/// Moves messages between the radio and the companion
pub struct Router {
    radio: Outbox,
    companion: Option<Outbox>,
    snapshots: SharedSnapshots,
}

impl Router {
    async fn route(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { link, peer } => {
                component_info!("link", "{} up ({})", link, peer)
            }
            LinkEvent::Disconnected { link } => component_warn!("link", "{} down", link),
            LinkEvent::Message {
                link: RADIO,
                message,
            } if message.msg_type().is_control() => match &self.companion {
                Some(companion) => {
                    companion.push(message);
                }
                None => component_warn!(
                    "link",
                    "No companion for {:?} command",
                    message.msg_type()
                ),
            },
            LinkEvent::Message {
                link: COMPANION,
                message: Message::CompanionTelemetry(telemetry),
            } => self.snapshots.write().await.companion = Some(telemetry),
            LinkEvent::Message {
                link: COMPANION,
                message: Message::PhotoChunk(chunk),
            } => {
                self.radio.push(Message::PhotoChunk(chunk));
            }
            LinkEvent::Message { link, message } => {
                component_debug!("link", "Ignoring {:?} from {}", message.msg_type(), link)
            }
        }
    }
}

#[async_trait]
impl Worker<LinkEvent> for Router {
    async fn work(&mut self, event: LinkEvent) -> Result<(), TaskError> {
        self.route(event).await;
        Ok(())
    }
}

fn open_serial(device: &SerialDevice) -> Result<SerialStream, tokio_serial::Error> {
    tokio_serial::new(&device.path, device.baud).open_native_async()
}

async fn spawn_gps(device: &SerialDevice, snapshots: SharedSnapshots) -> Option<Task> {
    let mut port = match open_serial(device) {
        Ok(port) => port,
        Err(e) => {
            component_warn!("gps", "GPS unavailable on {}: {}", device.path, e);
            return None;
        }
    };
    for sentence in INIT_SENTENCES {
        if let Err(e) = port.write_all(format!("{}\r\n", sentence).as_bytes()).await {
            component_warn!("gps", "Failed to configure GPS: {}", e);
            break;
        }
    }
    component_info!("gps", "Reading GPS on {}", device.path);
    Some(Task::spawn("gps", Lines::new(port), GpsWorker::new(snapshots)))
}

fn spawn_sensors(device: &SerialDevice, snapshots: SharedSnapshots) -> Option<Task> {
    match open_serial(device) {
        Ok(port) => {
            component_info!("sensors", "Reading sensors on {}", device.path);
            Some(Task::spawn("sensors", Lines::new(port), SensorWorker { snapshots }))
        }
        Err(e) => {
            component_warn!("sensors", "Sensor board unavailable on {}: {}", device.path, e);
            None
        }
    }
}

/// Run the flight computer until a shutdown signal
pub async fn run(config: ObcConfig) -> Result<()> {
    let snapshots = SharedSnapshots::default();
    let (events_tx, events_rx) = mpsc::channel(config.outbox_capacity);
    let radio_outbox = Outbox::new(RADIO, config.outbox_capacity);
    let mut tasks = Vec::new();

    let (radio, _) = spawn_radio(
        &config.radio,
        config.radio_retry,
        radio_outbox.clone(),
        events_tx.clone(),
    )
    .await?;
    tasks.push(radio);

    let companion_outbox = match config.companion.transport() {
        None => {
            info!("No companion configured");
            None
        }
        Some(transport) => match companion_connector(&transport) {
            Ok(connector) => {
                let outbox = Outbox::new(COMPANION, config.outbox_capacity);
                let link = Link::new(COMPANION, connector, outbox.clone(), events_tx.clone())
                    .with_retry_interval(config.companion_retry);
                tasks.push(link.spawn());
                Some(outbox)
            }
            Err(e) => {
                warn!("Companion disabled: {}", e);
                None
            }
        },
    };
    drop(events_tx);

    tasks.push(Task::spawn(
        "router",
        Queue::new(Arc::new(Mutex::new(events_rx))),
        Router {
            radio: radio_outbox.clone(),
            companion: companion_outbox,
            snapshots: snapshots.clone(),
        },
    ));

    if let Some(device) = &config.gps {
        tasks.extend(spawn_gps(device, snapshots.clone()).await);
    }
    if let Some(device) = &config.sensors {
        tasks.extend(spawn_sensors(device, snapshots.clone()));
    }

    tasks.push(Task::spawn(
        "report",
        Interval::new(config.report_interval),
        Reporter::new(radio_outbox.clone(), snapshots),
    ));

    info!("Flight computer running with {} tasks", tasks.len());
    crate::shutdown_signal().await?;

    for task in tasks.into_iter().rev() {
        let name = task.name().to_string();
        if let Err(e) = task.shutdown().await {
            warn!("Task {} ended with error: {}", name, e);
        }
    }
    let unsent = radio_outbox.drain().len();
    if unsent > 0 {
        info!("Discarded {} unsent radio messages", unsent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use balloon_wire::PhotoChunk;
    use bytes::Bytes;

    fn gga(altitude_m: f32) -> String {
        format!(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,{:.1},M,46.9,M,,",
            altitude_m
        )
    }

    fn from(link: &'static str, message: Message) -> LinkEvent {
        LinkEvent::Message { link, message }
    }

    #[test]
    fn test_sensor_lines_merge() {
        let mut readings = SensorReadings::default();
        readings
            .merge_line(r#"{"internal_temp": 21.5, "internal_humidity": 40.0}"#)
            .unwrap();
        readings
            .merge_line(r#"{"external_temp": -5.0, "pressure": 1013}"#)
            .unwrap();
        assert_eq!(
            readings,
            SensorReadings {
                internal_temp: 21.5,
                internal_humidity: 40.0,
                external_temp: -5.0
            }
        );
        assert!(readings.merge_line("not json").is_err());
        assert_eq!(readings.internal_temp, 21.5);
    }

    #[tokio::test]
    async fn test_gps_drives_phase() {
        let snapshots = SharedSnapshots::default();
        let mut worker = GpsWorker::new(snapshots.clone());

        for step in 0..6 {
            worker.work(gga(100.0 + step as f32 * 20.0)).await.unwrap();
        }
        worker.work("$GPGGA,garbage*00".to_string()).await.unwrap();

        let snapshot = snapshots.read().await.clone();
        assert_eq!(snapshot.phase, FlightPhase::Ascent);
        assert_eq!(snapshot.location.satellites, 8);
        assert!((snapshot.location.altitude - 0.2).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_router_forwards_between_links() {
        let radio = Outbox::new(RADIO, 8);
        let companion = Outbox::new(COMPANION, 8);
        let snapshots = SharedSnapshots::default();
        let mut router = Router {
            radio: radio.clone(),
            companion: Some(companion.clone()),
            snapshots: snapshots.clone(),
        };

        router
            .route(from(RADIO, Message::StartPhotoTransfer { index: 4 }))
            .await;
        router
            .route(from(RADIO, Message::AddPhoneNumber("+15551234".into())))
            .await;
        // Telemetry from the ground is not a command
        router
            .route(from(RADIO, Message::Telemetry(Telemetry::default())))
            .await;
        assert_eq!(
            companion.drain(),
            vec![
                Message::StartPhotoTransfer { index: 4 },
                Message::AddPhoneNumber("+15551234".into())
            ]
        );

        let chunk = Message::PhotoChunk(PhotoChunk {
            index: 4,
            chunk: 0,
            chunk_count: 1,
            file_size: 2,
            data: Bytes::from_static(b"hi"),
        });
        router.route(from(COMPANION, chunk.clone())).await;
        assert_eq!(radio.drain(), vec![chunk]);

        let telemetry = CompanionTelemetry {
            battery: 80,
            signal: 3,
            ..Default::default()
        };
        router
            .route(from(COMPANION, Message::CompanionTelemetry(telemetry)))
            .await;
        assert_eq!(snapshots.read().await.companion, Some(telemetry));
        assert!(radio.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_contents() {
        let radio = Outbox::new(RADIO, 8);
        let snapshots = SharedSnapshots::default();
        let mut reporter = Reporter::new(radio.clone(), snapshots.clone());
        {
            let mut snapshot = snapshots.write().await;
            snapshot.phase = FlightPhase::Ascent;
            snapshot.sensors = SensorReadings {
                internal_temp: 21.5,
                internal_humidity: 40.0,
                external_temp: -5.0,
            };
            snapshot.companion = Some(CompanionTelemetry {
                battery: 50,
                ..Default::default()
            });
        }

        tokio::time::advance(std::time::Duration::from_secs(3661)).await;
        reporter
            .report(SystemStats {
                cpu: 42,
                free_mem: 1024,
            })
            .await;

        let queued = radio.drain();
        assert_eq!(queued.len(), 3);
        assert!(matches!(queued[0], Message::CompanionTelemetry(c) if c.battery == 50));
        assert_eq!(
            queued[1],
            Message::Telemetry(Telemetry {
                uptime: 3661,
                phase: 1,
                cpu: 42,
                free_mem: 1024,
                int_temp: 21.5,
                int_humidity: 40.0,
                ext_temp: -5.0,
            })
        );
        assert!(matches!(queued[2], Message::Location(_)));

        // Companion telemetry is sent once
        reporter.report(SystemStats::default()).await;
        assert_eq!(radio.drain().len(), 2);
    }
}
