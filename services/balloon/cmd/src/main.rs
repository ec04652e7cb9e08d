//! Balloon binary.
//!
//! `balloon obc` runs the flight computer: radio to the ground, companion
//! link, GPS, sensors and the periodic report. `balloon ground` runs the
//! ground station: radio, photo reassembly and the web relay.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

mod config;
mod ground;
mod logging;
mod obc;
mod radio;
mod system;

use config::{BalloonConfig, CompanionConfig, RadioConfig};
use logging::BalloonLogFormatter;

const CRATES: [&str; 6] = [
    "balloon",
    "balloon_wire",
    "balloon_link",
    "balloon_storage",
    "balloon_flight",
    "balloon_station",
];

/// High-altitude balloon telemetry and command link
#[derive(Parser, Debug)]
#[command(name = "balloon", version, about = "Balloon flight computer and ground station")]
struct Args {
    /// YAML configuration file
    #[arg(long, global = true, default_value = "balloon.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); falls back to BALLOON_LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the on-board flight computer
    Obc {
        /// Radio, e.g. serial:/dev/ttyO4 or connect:ground.local:9910
        #[arg(long)]
        radio: Option<RadioConfig>,

        /// Companion, e.g. bluetooth:AA:BB:CC:DD:EE:FF, tcp:127.0.0.1:9920 or none
        #[arg(long)]
        companion: Option<CompanionConfig>,

        /// GPS serial device, or none
        #[arg(long)]
        gps: Option<String>,

        /// Sensor board serial device, or none
        #[arg(long)]
        sensors: Option<String>,

        /// Report interval, e.g. 5s
        #[arg(long)]
        report_interval: Option<humantime::Duration>,
    },
    /// Run the ground station
    Ground {
        /// Radio, e.g. listen:0.0.0.0:9910 or serial:/dev/ttyUSB0
        #[arg(long)]
        radio: Option<RadioConfig>,

        /// Photo directory; in memory when empty
        #[arg(long)]
        photos_dir: Option<String>,

        /// Dashboards as token@url, comma-separated
        #[arg(long)]
        endpoints: Option<String>,

        /// Chase-car GPS serial device
        #[arg(long)]
        gps: Option<String>,

        /// Read operator commands from stdin
        #[arg(long)]
        interactive: bool,
    },
}

fn init_logging(level: &str, role: &str) -> Result<()> {
    let mut filter = EnvFilter::new("warn");
    for name in CRATES {
        let directive = format!("{}={}", name, level)
            .parse::<Directive>()
            .with_context(|| format!("Invalid log level {:?}", level))?;
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(BalloonLogFormatter::new(role))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
pub(crate) async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("BALLOON_LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    let role = match args.role {
        Role::Obc { .. } => "obc",
        Role::Ground { .. } => "ground",
    };
    init_logging(&level, role)?;

    let mut config = BalloonConfig::load_from_file(&args.config)?;
    info!("Starting balloon {} v{}", role, env!("CARGO_PKG_VERSION"));

    match args.role {
        Role::Obc {
            radio,
            companion,
            gps,
            sensors,
            report_interval,
        } => {
            let settings = &mut config.obc;
            if let Some(radio) = radio {
                settings.radio = radio;
            }
            if let Some(companion) = companion {
                settings.companion = companion;
            }
            if let Some(gps) = gps {
                settings.gps = config::device(&gps, settings.gps.as_ref());
            }
            if let Some(sensors) = sensors {
                settings.sensors = config::device(&sensors, settings.sensors.as_ref());
            }
            if let Some(interval) = report_interval {
                settings.report_interval = interval.into();
            }
            config.validate()?;
            obc::run(config.obc).await
        }
        Role::Ground {
            radio,
            photos_dir,
            endpoints,
            gps,
            interactive,
        } => {
            let settings = &mut config.ground;
            if let Some(radio) = radio {
                settings.radio = radio;
            }
            if let Some(dir) = photos_dir {
                settings.photos_dir = Some(dir).filter(|dir| !dir.is_empty());
            }
            if let Some(endpoints) = endpoints {
                settings.endpoints =
                    config::parse_endpoints(&endpoints).map_err(anyhow::Error::msg)?;
            }
            if let Some(gps) = gps {
                settings.gps = config::device(&gps, settings.gps.as_ref());
            }
            config.validate()?;
            ground::run(config.ground, interactive).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_obc_flags() {
        let args = Args::parse_from([
            "balloon",
            "--log-level",
            "debug",
            "obc",
            "--radio",
            "connect:ground:9910",
            "--companion",
            "none",
            "--report-interval",
            "2s",
        ]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.role {
            Role::Obc {
                radio,
                companion,
                report_interval,
                ..
            } => {
                assert_eq!(
                    radio,
                    Some(RadioConfig::Connect {
                        addr: "ground:9910".into()
                    })
                );
                assert_eq!(companion, Some(CompanionConfig::None));
                assert_eq!(
                    report_interval.map(|interval| *interval),
                    Some(std::time::Duration::from_secs(2))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
