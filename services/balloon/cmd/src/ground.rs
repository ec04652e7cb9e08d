//! Ground station role.
//!
//! Receives from the balloon over the radio, reassembles photos and relays
//! everything to the configured dashboards. Optionally reads a chase-car GPS
//! and operator commands from stdin.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use balloon_flight::GpsTracker;
use balloon_link::{Lines, Outbox, Task, TaskError, Worker};
use balloon_station::{Dispatcher, LocationKind, WebRelay};
use balloon_storage::{open_store, StoreMode, TransferTable};
use balloon_wire::Message;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

use crate::config::{GroundConfig, SerialDevice};
use crate::radio::{spawn_radio, RADIO};
use crate::{component_debug, component_info, component_warn};

/// Operator command to send up to the balloon.
///
/// `start <index>`, `stop`, `text <message>` or `phone <number>`.
pub fn parse_command(line: &str) -> Result<Message> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match verb {
        "start" => {
            let index = rest
                .parse()
                .with_context(|| format!("bad photo index {:?}", rest))?;
            Ok(Message::StartPhotoTransfer { index })
        }
        "stop" => Ok(Message::StopPhotoTransfer),
        "text" if !rest.is_empty() => {
            Ok(Message::SendText(Bytes::copy_from_slice(rest.as_bytes())))
        }
        "phone" if !rest.is_empty() => Ok(Message::AddPhoneNumber(rest.to_string())),
        "text" | "phone" => bail!("{} needs an argument", verb),
        _ => Err(anyhow!("unknown command {:?}", verb)),
    }
}

/// Queues operator commands on the radio
struct CommandWorker {
    radio: Outbox,
}

#[async_trait]
impl Worker<String> for CommandWorker {
    async fn work(&mut self, line: String) -> Result<(), TaskError> {
        match parse_command(&line) {
            Ok(message) => {
                let kind = message.msg_type();
                if self.radio.push(message) {
                    component_info!("command", "Queued {:?}", kind);
                }
            }
            Err(e) => component_warn!("command", "{}", e),
        }
        Ok(())
    }
}

/// Posts the chase car's position
struct ChaseWorker {
    gps: GpsTracker,
    relay: WebRelay,
}

#[async_trait]
impl Worker<String> for ChaseWorker {
    async fn work(&mut self, line: String) -> Result<(), TaskError> {
        match self.gps.update(&line) {
            Ok(Some(_)) if self.gps.location().quality > 0 => {
                self.relay
                    .post_location(&self.gps.location(), LocationKind::Chase);
            }
            Ok(_) => {}
            Err(e) => component_debug!("chase", "Skipping sentence: {}", e),
        }
        Ok(())
    }
}

fn spawn_chase(device: &SerialDevice, relay: WebRelay) -> Option<Task> {
    match tokio_serial::new(&device.path, device.baud).open_native_async() {
        Ok(port) => {
            component_info!("chase", "Reading chase GPS on {}", device.path);
            Some(Task::spawn(
                "chase-gps",
                Lines::new(port),
                ChaseWorker {
                    gps: GpsTracker::new(),
                    relay,
                },
            ))
        }
        Err(e) => {
            component_warn!("chase", "Chase GPS unavailable on {}: {}", device.path, e);
            None
        }
    }
}

/// Run the ground station until a shutdown signal
pub async fn run(config: GroundConfig, interactive: bool) -> Result<()> {
    let mode = match &config.photos_dir {
        Some(dir) => StoreMode::File {
            photos_dir: dir.clone(),
        },
        None => StoreMode::InMemory,
    };
    let store = open_store(&mode).context("Failed to open photo store")?;
    let relay = WebRelay::new(config.endpoints.clone())
        .context("Failed to build web relay")?
        .with_location_interval(config.location_interval);
    info!(
        "Photos in {}, relaying to {} endpoints",
        config.photos_dir.as_deref().unwrap_or("memory"),
        relay.clients().len()
    );

    let (events_tx, events_rx) = mpsc::channel(config.outbox_capacity);
    let radio_outbox = Outbox::new(RADIO, config.outbox_capacity);
    let mut tasks = Vec::new();

    let dispatcher = Dispatcher::new(TransferTable::new(store), relay.clone());
    tasks.push(dispatcher.spawn(Arc::new(Mutex::new(events_rx))));

    let (radio, _) =
        spawn_radio(&config.radio, config.radio_retry, radio_outbox.clone(), events_tx).await?;
    tasks.push(radio);

    if let Some(device) = &config.gps {
        tasks.extend(spawn_chase(device, relay));
    }
    if interactive {
        info!("Reading commands from stdin: start <n> | stop | text <msg> | phone <number>");
        tasks.push(Task::spawn(
            "commands",
            Lines::new(tokio::io::stdin()),
            CommandWorker {
                radio: radio_outbox.clone(),
            },
        ));
    }

    info!("Ground station running");
    crate::shutdown_signal().await?;

    for task in tasks.into_iter().rev() {
        let name = task.name().to_string();
        if let Err(e) = task.shutdown().await {
            warn!("Task {} ended with error: {}", name, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use balloon_station::Endpoint;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("start 12").unwrap(),
            Message::StartPhotoTransfer { index: 12 }
        );
        assert_eq!(parse_command("  stop ").unwrap(), Message::StopPhotoTransfer);
        assert_eq!(
            parse_command("text hello from the ground").unwrap(),
            Message::SendText(Bytes::from_static(b"hello from the ground"))
        );
        assert_eq!(
            parse_command("phone +15551234").unwrap(),
            Message::AddPhoneNumber("+15551234".into())
        );

        assert!(parse_command("start").is_err());
        assert!(parse_command("start 70000").is_err());
        assert!(parse_command("phone").is_err());
        assert!(parse_command("launch").is_err());
    }

    #[tokio::test]
    async fn test_commands_queue_on_radio() {
        let radio = Outbox::new(RADIO, 4);
        let mut worker = CommandWorker {
            radio: radio.clone(),
        };
        worker.work("start 3".into()).await.unwrap();
        worker.work("bogus".into()).await.unwrap();
        worker.work("stop".into()).await.unwrap();

        assert_eq!(
            radio.drain(),
            vec![
                Message::StartPhotoTransfer { index: 3 },
                Message::StopPhotoTransfer
            ]
        );
    }

    #[tokio::test]
    async fn test_chase_ignores_lines_without_fix() {
        let relay = WebRelay::new(vec![Endpoint {
            url: "http://127.0.0.1:9".into(),
            token: "t".into(),
        }])
        .unwrap();
        let mut worker = ChaseWorker {
            gps: GpsTracker::new(),
            relay: relay.clone(),
        };

        worker
            .work("$GPGGA,123520,,,,,0,00,,,M,,M,,".into())
            .await
            .unwrap();
        // Still allowed to post, so nothing was sent
        assert!(relay.post_location(&Default::default(), LocationKind::Chase));
    }
}
