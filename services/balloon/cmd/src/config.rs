//! Configuration for the balloon binary.
//!
//! Values start from defaults, are overridden by the YAML file and then by
//! `BALLOON_*` environment variables. Command-line flags are applied last by
//! `main`.

use anyhow::{bail, Result};
use balloon_link::{
    CompanionTransport, DEFAULT_BAUD_RATE, DEFAULT_OUTBOX_CAPACITY, DEFAULT_POWER_LEVEL,
};
use balloon_station::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// How a side reaches the radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RadioConfig {
    /// Serial modem
    Serial {
        /// Device path
        path: String,
        /// UART speed
        #[serde(default = "default_baud")]
        baud: u32,
        /// Transmit power level
        #[serde(default = "default_power_level")]
        power_level: u8,
    },
    /// Dial a TCP radio stand-in
    Connect {
        /// `host:port`
        addr: String,
    },
    /// Accept one TCP radio connection at a time
    Listen {
        /// Bind address
        addr: String,
    },
}

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_power_level() -> u8 {
    DEFAULT_POWER_LEVEL
}

impl FromStr for RadioConfig {
    type Err = String;

    /// `serial:<path>[@baud]`, `connect:<host:port>` or `listen:<addr>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mode, target) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <mode>:<target>, got {:?}", s))?;
        match mode {
            "serial" => {
                let (path, baud) = match target.rsplit_once('@') {
                    Some((path, baud)) => (
                        path,
                        baud.parse()
                            .map_err(|_| format!("bad baud rate {:?}", baud))?,
                    ),
                    None => (target, DEFAULT_BAUD_RATE),
                };
                Ok(RadioConfig::Serial {
                    path: path.to_string(),
                    baud,
                    power_level: DEFAULT_POWER_LEVEL,
                })
            }
            "connect" => Ok(RadioConfig::Connect {
                addr: target.to_string(),
            }),
            "listen" => Ok(RadioConfig::Listen {
                addr: target.to_string(),
            }),
            other => Err(format!("unknown radio mode {:?}", other)),
        }
    }
}

/// How the OBC reaches the companion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum CompanionConfig {
    /// Bluetooth RFCOMM
    Bluetooth {
        /// Device address
        address: String,
        /// Service the device must offer
        service_uuid: String,
        /// RFCOMM channel
        channel: u8,
    },
    /// TCP, for bench testing
    Tcp {
        /// `host:port`
        addr: String,
    },
    /// No companion
    None,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        CompanionConfig::from(CompanionTransport::default())
    }
}

impl From<CompanionTransport> for CompanionConfig {
    fn from(transport: CompanionTransport) -> Self {
        match transport {
            CompanionTransport::Tcp { addr } => CompanionConfig::Tcp { addr },
            CompanionTransport::Bluetooth {
                address,
                service_uuid,
                channel,
            } => CompanionConfig::Bluetooth {
                address,
                service_uuid,
                channel,
            },
        }
    }
}

impl CompanionConfig {
    /// Transport to connect with, if a companion is configured
    pub fn transport(&self) -> Option<CompanionTransport> {
        match self {
            CompanionConfig::Bluetooth {
                address,
                service_uuid,
                channel,
            } => Some(CompanionTransport::Bluetooth {
                address: address.clone(),
                service_uuid: service_uuid.clone(),
                channel: *channel,
            }),
            CompanionConfig::Tcp { addr } => Some(CompanionTransport::Tcp { addr: addr.clone() }),
            CompanionConfig::None => None,
        }
    }
}

impl FromStr for CompanionConfig {
    type Err = String;

    /// `none`, `bluetooth`, `bluetooth:<address>` or `tcp:<host:port>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "none" => Ok(CompanionConfig::None),
            None if s == "bluetooth" => Ok(CompanionConfig::default()),
            Some(("bluetooth", address)) => match CompanionTransport::default() {
                CompanionTransport::Bluetooth {
                    service_uuid,
                    channel,
                    ..
                } => Ok(CompanionConfig::Bluetooth {
                    address: address.to_string(),
                    service_uuid,
                    channel,
                }),
                other => Ok(other.into()),
            },
            Some(("tcp", addr)) => Ok(CompanionConfig::Tcp {
                addr: addr.to_string(),
            }),
            _ => Err(format!("unknown companion transport {:?}", s)),
        }
    }
}

/// A line-oriented serial peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDevice {
    /// Device path
    pub path: String,
    /// UART speed
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl SerialDevice {
    fn new(path: &str, baud: u32) -> Self {
        Self {
            path: path.to_string(),
            baud,
        }
    }
}

/// Flight computer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObcConfig {
    /// Radio to the ground
    pub radio: RadioConfig,
    /// Companion device
    pub companion: CompanionConfig,
    /// GPS receiver
    pub gps: Option<SerialDevice>,
    /// Sensor board emitting JSON lines
    pub sensors: Option<SerialDevice>,
    /// Time between reports to the ground
    #[serde(with = "duration")]
    pub report_interval: Duration,
    /// Wait after a failed radio connect
    #[serde(with = "duration")]
    pub radio_retry: Duration,
    /// Wait after a failed companion connect
    #[serde(with = "duration")]
    pub companion_retry: Duration,
    /// Messages each outbox holds
    pub outbox_capacity: usize,
}

impl Default for ObcConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::Serial {
                path: "/dev/ttyO4".to_string(),
                baud: DEFAULT_BAUD_RATE,
                power_level: DEFAULT_POWER_LEVEL,
            },
            companion: CompanionConfig::default(),
            gps: Some(SerialDevice::new("/dev/ttyO1", 9600)),
            sensors: Some(SerialDevice::new("/dev/ttyO2", 115200)),
            report_interval: Duration::from_secs(5),
            radio_retry: Duration::from_secs(15),
            companion_retry: balloon_link::COMPANION_RETRY_INTERVAL,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Ground station settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundConfig {
    /// Radio to the balloon
    pub radio: RadioConfig,
    /// Where photos are reassembled; in memory when unset
    pub photos_dir: Option<String>,
    /// Dashboards to relay to
    pub endpoints: Vec<Endpoint>,
    /// Chase-car GPS receiver
    pub gps: Option<SerialDevice>,
    /// Minimum spacing between location posts
    #[serde(with = "duration")]
    pub location_interval: Duration,
    /// Wait after a failed radio connect
    #[serde(with = "duration")]
    pub radio_retry: Duration,
    /// Messages the radio outbox holds
    pub outbox_capacity: usize,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::Listen {
                addr: format!("0.0.0.0:{}", balloon_link::RADIO_TCP_PORT),
            },
            photos_dir: Some("./photos".to_string()),
            endpoints: Vec::new(),
            gps: None,
            location_interval: balloon_station::LOCATION_INTERVAL,
            radio_retry: Duration::from_secs(15),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalloonConfig {
    /// Flight computer
    pub obc: ObcConfig,
    /// Ground station
    pub ground: GroundConfig,
}

impl BalloonConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<BalloonConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject capacities and intervals of zero
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("obc.report_interval", self.obc.report_interval),
            ("obc.radio_retry", self.obc.radio_retry),
            ("obc.companion_retry", self.obc.companion_retry),
            ("ground.location_interval", self.ground.location_interval),
            ("ground.radio_retry", self.ground.radio_retry),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                bail!("{} must be greater than zero", key);
            }
        }
        if self.obc.outbox_capacity == 0 {
            bail!("obc.outbox_capacity must be greater than zero");
        }
        if self.ground.outbox_capacity == 0 {
            bail!("ground.outbox_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Apply `BALLOON_*` overrides. Unparsable values are ignored.
    pub fn apply_environment_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(key: &str, value: Option<String>) -> Option<T>
        where
            T::Err: std::fmt::Display,
        {
            let value = value?;
            match value.parse() {
                Ok(parsed) => {
                    info!("{} overridden by environment: {}", key, value);
                    Some(parsed)
                }
                Err(e) => {
                    warn!("Ignoring {}={:?}: {}", key, value, e);
                    None
                }
            }
        }

        if let Some(radio) = parsed("BALLOON_OBC_RADIO", var("BALLOON_OBC_RADIO")) {
            self.obc.radio = radio;
        }
        if let Some(companion) = parsed("BALLOON_COMPANION", var("BALLOON_COMPANION")) {
            self.obc.companion = companion;
        }
        if let Some(path) = var("BALLOON_GPS") {
            self.obc.gps = device(&path, self.obc.gps.as_ref());
        }
        if let Some(path) = var("BALLOON_SENSORS") {
            self.obc.sensors = device(&path, self.obc.sensors.as_ref());
        }
        if let Some(interval) =
            parsed::<humantime::Duration>("BALLOON_REPORT_INTERVAL", var("BALLOON_REPORT_INTERVAL"))
        {
            self.obc.report_interval = interval.into();
        }

        if let Some(radio) = parsed("BALLOON_GROUND_RADIO", var("BALLOON_GROUND_RADIO")) {
            self.ground.radio = radio;
        }
        if let Some(dir) = var("BALLOON_PHOTOS_DIR") {
            self.ground.photos_dir = if dir.is_empty() { None } else { Some(dir) };
        }
        if let Some(endpoints) = var("BALLOON_ENDPOINTS") {
            match parse_endpoints(&endpoints) {
                Ok(endpoints) => self.ground.endpoints = endpoints,
                Err(e) => warn!("Ignoring BALLOON_ENDPOINTS: {}", e),
            }
        }
    }
}

/// `none` disables the device; anything else is a path
pub fn device(path: &str, current: Option<&SerialDevice>) -> Option<SerialDevice> {
    if path == "none" || path.is_empty() {
        return None;
    }
    Some(SerialDevice {
        path: path.to_string(),
        baud: current.map_or(DEFAULT_BAUD_RATE, |device| device.baud),
    })
}

/// Comma-separated `token@url` pairs
pub fn parse_endpoints(s: &str) -> Result<Vec<Endpoint>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('@')
                .map(|(token, url)| Endpoint {
                    url: url.to_string(),
                    token: token.to_string(),
                })
                .ok_or_else(|| format!("expected token@url, got {:?}", entry))
        })
        .collect()
}

/// Durations written the human way (`5s`, `1m 30s`)
mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
