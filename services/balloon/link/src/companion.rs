//! Companion device transports.
//!
//! The companion is a phone riding with the OBC. It is reached over
//! Bluetooth RFCOMM in flight, or over TCP when testing on the bench.

use std::time::Duration;

use crate::transport::{Connector, TcpConnector};
use crate::LinkError;

/// Bluetooth address of the flight companion
pub const COMPANION_ADDRESS: &str = "0C:DF:A4:B1:D7:7A";
/// Service the companion advertises
pub const COMPANION_SERVICE_UUID: &str = "de746609-6dbf-4917-9040-40d1d2ce9c79";
/// RFCOMM channel the companion listens on
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;
/// Wait between failed connect attempts
pub const COMPANION_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// How to reach the companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionTransport {
    /// TCP `host:port`
    Tcp {
        /// Address to dial
        addr: String,
    },
    /// Bluetooth RFCOMM
    Bluetooth {
        /// Device address
        address: String,
        /// Service UUID the device must offer
        service_uuid: String,
        /// RFCOMM channel
        channel: u8,
    },
}

impl Default for CompanionTransport {
    fn default() -> Self {
        CompanionTransport::Bluetooth {
            address: COMPANION_ADDRESS.to_string(),
            service_uuid: COMPANION_SERVICE_UUID.to_string(),
            channel: DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

/// Build the connector for a companion transport
pub fn companion_connector(
    transport: &CompanionTransport,
) -> Result<Box<dyn Connector>, LinkError> {
    match transport {
        CompanionTransport::Tcp { addr } => Ok(Box::new(TcpConnector::new(addr.clone()))),
        #[cfg(feature = "bluetooth")]
        CompanionTransport::Bluetooth {
            address,
            service_uuid,
            channel,
        } => Ok(Box::new(rfcomm::RfcommConnector::new(
            address,
            service_uuid,
            *channel,
        )?)),
        #[cfg(not(feature = "bluetooth"))]
        CompanionTransport::Bluetooth { .. } => Err(LinkError::Unsupported(
            "bluetooth (built without the bluetooth feature)".to_string(),
        )),
    }
}

#[cfg(feature = "bluetooth")]
pub mod rfcomm {
    //! Bluetooth RFCOMM connector

    use async_trait::async_trait;
    use bluer::rfcomm::{SocketAddr, Stream};
    use bluer::{Address, Uuid};
    use tracing::{debug, info};

    use crate::transport::{Connection, Connector, IoStream};
    use crate::LinkError;

    /// Finds the companion through BlueZ and opens an RFCOMM stream
    #[derive(Debug, Clone)]
    pub struct RfcommConnector {
        address: Address,
        service: Uuid,
        channel: u8,
    }

    impl RfcommConnector {
        /// Connector for `address`, which must offer `service_uuid`
        pub fn new(address: &str, service_uuid: &str, channel: u8) -> Result<Self, LinkError> {
            let address = address
                .parse::<Address>()
                .map_err(|e| LinkError::Discovery(format!("bad address {}: {}", address, e)))?;
            let service = Uuid::parse_str(service_uuid).map_err(|e| {
                LinkError::Discovery(format!("bad service uuid {}: {}", service_uuid, e))
            })?;
            Ok(Self {
                address,
                service,
                channel,
            })
        }
    }

    #[async_trait]
    impl Connector for RfcommConnector {
        async fn connect(&mut self) -> Result<Connection, LinkError> {
            let session = bluer::Session::new().await?;
            let adapter = session.default_adapter().await?;
            if !adapter.is_powered().await? {
                info!("Powering on Bluetooth adapter {}", adapter.name());
                adapter.set_powered(true).await?;
            }

            let device = adapter.device(self.address)?;
            let uuids = device.uuids().await?.unwrap_or_default();
            if !uuids.contains(&self.service) {
                return Err(LinkError::Discovery(format!(
                    "{} does not offer service {}",
                    self.address, self.service
                )));
            }

            let name = device
                .name()
                .await?
                .unwrap_or_else(|| self.address.to_string());
            debug!("Found companion {} at {}", name, self.address);

            let stream = Stream::connect(SocketAddr::new(self.address, self.channel)).await?;
            Ok(Connection {
                stream: IoStream::Rfcomm(stream),
                peer: format!("{} ({})", name, self.address),
            })
        }

        fn target(&self) -> String {
            format!("rfcomm://{}/{}", self.address, self.channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transport() {
        match CompanionTransport::default() {
            CompanionTransport::Bluetooth {
                address, channel, ..
            } => {
                assert_eq!(address, COMPANION_ADDRESS);
                assert_eq!(channel, DEFAULT_RFCOMM_CHANNEL);
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_tcp_connector() {
        let connector = companion_connector(&CompanionTransport::Tcp {
            addr: "127.0.0.1:9920".into(),
        })
        .unwrap();
        assert_eq!(connector.target(), "tcp://127.0.0.1:9920");
    }

    #[cfg(not(feature = "bluetooth"))]
    #[test]
    fn test_bluetooth_unsupported() {
        assert!(matches!(
            companion_connector(&CompanionTransport::default()),
            Err(LinkError::Unsupported(_))
        ));
    }

    #[cfg(feature = "bluetooth")]
    #[test]
    fn test_rfcomm_bad_address() {
        assert!(matches!(
            rfcomm::RfcommConnector::new("not-an-address", COMPANION_SERVICE_UUID, 1),
            Err(LinkError::Discovery(_))
        ));
    }
}
