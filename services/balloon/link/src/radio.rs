//! Radio transports.
//!
//! On the balloon the radio is a serial modem configured with AT commands
//! before use. For bench work it can be replaced by TCP: the ground station
//! either dials the OBC or listens on [`RADIO_TCP_PORT`] for it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

use crate::link::{LinkEvent, LinkState, Outbox, Session};
use crate::source::Accept;
use crate::task::{Task, Worker};
use crate::transport::{Connection, Connector, IoStream};
use crate::{LinkError, TaskError};

/// TCP port used by the radio stand-in
pub const RADIO_TCP_PORT: u16 = 9910;
/// Default UART speed
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// Default transmit power level
pub const DEFAULT_POWER_LEVEL: u8 = 4;

/// Bounds on the AT command exchange
#[derive(Debug, Clone)]
pub struct HandshakeTimeouts {
    /// Wait for `OK\r` after `+++`
    pub command_mode: Duration,
    /// Idle time that ends a response line
    pub line: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            command_mode: Duration::from_secs(4),
            line: Duration::from_secs(1),
        }
    }
}

/// What the modem reported during configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioInfo {
    /// Whether the modem answered `+++`
    pub configured: bool,
    /// Modem address (`ATMY`)
    pub address: Option<String>,
    /// Firmware version lines (`ATVL`), joined with `/`
    pub firmware: Option<String>,
    /// Power level read back after setting it (`ATPL`)
    pub power_level: Option<u8>,
}

/// Run the AT configuration sequence on a freshly opened modem.
///
/// If the modem does not answer `+++` the sequence is skipped and the radio
/// is used unconfigured.
pub async fn configure<S>(
    port: &mut S,
    power_level: u8,
    timeouts: &HandshakeTimeouts,
) -> std::io::Result<RadioInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("Configuring radio");
    port.write_all(b"+++").await?;
    port.flush().await?;

    let mut ok = [0u8; 3];
    match timeout(timeouts.command_mode, port.read_exact(&mut ok)).await {
        Ok(Ok(_)) if &ok == b"OK\r" => {}
        Ok(Err(e)) => return Err(e),
        _ => {
            warn!("Radio did not enter command mode, skipping configuration");
            return Ok(RadioInfo::default());
        }
    }

    let mut info = RadioInfo {
        configured: true,
        ..Default::default()
    };

    send(port, "ATMY").await?;
    info.address = read_line(port, timeouts.line).await?;

    send(port, "ATVL").await?;
    let firmware: Vec<String> = read_lines(port, timeouts.line)
        .await?
        .into_iter()
        .filter(|line| line != "OK")
        .collect();
    if !firmware.is_empty() {
        info.firmware = Some(firmware.join("/"));
    }

    send(port, &format!("ATPL {}", power_level)).await?;
    read_lines(port, timeouts.line).await?;

    send(port, "ATPL").await?;
    info.power_level = read_lines(port, timeouts.line)
        .await?
        .first()
        // AT parameters are hex
        .and_then(|level| u8::from_str_radix(level, 16).ok());

    send(port, "ATCN").await?;
    read_lines(port, timeouts.line).await?;

    info!(
        "Radio configured: address={}, firmware={}, power_level={}",
        info.address.as_deref().unwrap_or("?"),
        info.firmware.as_deref().unwrap_or("?"),
        info.power_level.map_or("?".to_string(), |p| p.to_string())
    );
    Ok(info)
}

async fn send<S: AsyncWrite + Unpin>(port: &mut S, command: &str) -> std::io::Result<()> {
    port.write_all(command.as_bytes()).await?;
    port.write_all(b"\r").await?;
    port.flush().await
}

/// Read one `\r`-terminated response. A quiet line or end-of-stream ends it.
async fn read_line<S: AsyncRead + Unpin>(
    port: &mut S,
    idle: Duration,
) -> std::io::Result<Option<String>> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match timeout(idle, port.read(&mut byte)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(_)) => match byte[0] {
                b'\r' => break,
                b'\n' => {}
                b => line.push(b),
            },
            Ok(Err(e)) => return Err(e),
        }
    }

    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

async fn read_lines<S: AsyncRead + Unpin>(
    port: &mut S,
    idle: Duration,
) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    while let Some(line) = read_line(port, idle).await? {
        lines.push(line);
    }
    Ok(lines)
}

/// Opens and configures the serial modem
#[derive(Debug, Clone)]
pub struct SerialRadioConnector {
    path: String,
    baud_rate: u32,
    power_level: u8,
    timeouts: HandshakeTimeouts,
}

impl SerialRadioConnector {
    /// Connector for the modem at `path`
    pub fn new(path: impl Into<String>, baud_rate: u32, power_level: u8) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            power_level,
            timeouts: HandshakeTimeouts::default(),
        }
    }

    /// Override handshake timeouts
    pub fn with_timeouts(mut self, timeouts: HandshakeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[async_trait]
impl Connector for SerialRadioConnector {
    async fn connect(&mut self) -> Result<Connection, LinkError> {
        let mut port = tokio_serial::new(&self.path, self.baud_rate).open_native_async()?;
        let info = configure(&mut port, self.power_level, &self.timeouts).await?;

        let peer = match info.address {
            Some(address) => format!("{} (address {})", self.path, address),
            None => self.path.clone(),
        };
        Ok(Connection {
            stream: IoStream::Serial(port),
            peer,
        })
    }

    fn target(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }
}

/// Serves one radio connection at a time on a TCP port.
///
/// A new connection replaces the previous one; its tasks are stopped before
/// the new ones start.
pub struct RadioListener {
    state: Arc<LinkState>,
    outbox: Outbox,
    events: mpsc::Sender<LinkEvent>,
    current: Option<Session>,
}

impl RadioListener {
    /// Create a listener for the `radio` link
    pub fn new(outbox: Outbox, events: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            state: LinkState::new("radio"),
            outbox,
            events,
            current: None,
        }
    }

    /// Connection state, shared with observers
    pub fn state(&self) -> Arc<LinkState> {
        self.state.clone()
    }

    /// Bind `addr` and start accepting. Returns the task and bound address.
    pub async fn listen(self, addr: &str) -> std::io::Result<(Task, SocketAddr)> {
        let accept = Accept::new(TcpListener::bind(addr).await?);
        let local = accept.local_addr()?;
        info!("Radio listening on {}", local);
        Ok((Task::spawn("radio-listener", accept, self), local))
    }
}

#[async_trait]
impl Worker<(TcpStream, SocketAddr)> for RadioListener {
    async fn work(&mut self, conn: (TcpStream, SocketAddr)) -> Result<(), TaskError> {
        let (stream, addr) = conn;
        info!("Radio connection from {}", addr);
        if let Some(previous) = self.current.take() {
            previous.shutdown().await;
        }

        stream.set_nodelay(true)?;
        let connection = Connection {
            stream: IoStream::Tcp(stream),
            peer: addr.to_string(),
        };
        self.current =
            Some(Session::start(connection, self.state.clone(), &self.outbox, &self.events).await);
        Ok(())
    }

    async fn stopped(&mut self, _cause: Option<&TaskError>) {
        if let Some(session) = self.current.take() {
            session.shutdown().await;
        }
    }
}
