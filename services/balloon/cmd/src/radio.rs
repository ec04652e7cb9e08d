//! Radio link construction shared by both roles

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use balloon_link::{
    Link, LinkEvent, LinkState, Outbox, RadioListener, SerialRadioConnector, Task, TcpConnector,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::RadioConfig;

/// Link name of the radio in [`LinkEvent`]s
pub const RADIO: &str = "radio";

/// Start the radio described by `config`
pub async fn spawn_radio(
    config: &RadioConfig,
    retry_interval: Duration,
    outbox: Outbox,
    events: mpsc::Sender<LinkEvent>,
) -> Result<(Task, Arc<LinkState>)> {
    match config {
        RadioConfig::Serial {
            path,
            baud,
            power_level,
        } => {
            info!("Radio on {} at {} baud", path, baud);
            let connector = SerialRadioConnector::new(path.clone(), *baud, *power_level);
            let link =
                Link::new(RADIO, connector, outbox, events).with_retry_interval(retry_interval);
            let state = link.state();
            Ok((link.spawn(), state))
        }
        RadioConfig::Connect { addr } => {
            info!("Radio over TCP to {}", addr);
            let link = Link::new(RADIO, TcpConnector::new(addr.clone()), outbox, events)
                .with_retry_interval(retry_interval);
            let state = link.state();
            Ok((link.spawn(), state))
        }
        RadioConfig::Listen { addr } => {
            let listener = RadioListener::new(outbox, events);
            let state = listener.state();
            let (task, local) = listener
                .listen(addr)
                .await
                .with_context(|| format!("Failed to listen for the radio on {}", addr))?;
            info!("Waiting for the radio on {}", local);
            Ok((task, state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balloon_wire::{Message, Telemetry};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_listen_binds() {
        let (tx, mut rx) = mpsc::channel(8);
        let outbox = Outbox::new(RADIO, 8);
        let (task, state) = spawn_radio(
            &RadioConfig::Listen {
                addr: "127.0.0.1:0".into(),
            },
            Duration::from_secs(1),
            outbox,
            tx,
        )
        .await
        .unwrap();

        // Nothing connected yet
        assert!(!state.is_connected());
        task.shutdown().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_delivers_messages() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (task, _state) = spawn_radio(
            &RadioConfig::Connect {
                addr: addr.to_string(),
            },
            Duration::from_secs(1),
            Outbox::new(RADIO, 8),
            tx,
        )
        .await
        .unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();
        let telemetry = Message::Telemetry(Telemetry {
            uptime: 5,
            ..Default::default()
        });
        peer.write_all(&telemetry.encode().unwrap()).await.unwrap();

        match rx.recv().await.unwrap() {
            LinkEvent::Connected { link, .. } => assert_eq!(link, RADIO),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            LinkEvent::Message {
                link: RADIO,
                message: telemetry
            }
        );

        task.shutdown().await.unwrap();
        drop(peer);
    }
}
