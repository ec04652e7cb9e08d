//! Byte-stream transports for balloon links.
//!
//! Every link speaks the same framed protocol over whatever stream its
//! connector produced: TCP, a serial UART, Bluetooth RFCOMM, or an
//! in-process pipe.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_serial::SerialStream;
use tracing::debug;

use crate::LinkError;

/// Unified stream type for every transport
pub enum IoStream {
    /// TCP socket
    Tcp(TcpStream),
    /// Serial UART
    Serial(SerialStream),
    /// In-process pipe
    Memory(DuplexStream),
    /// Bluetooth RFCOMM socket
    #[cfg(feature = "bluetooth")]
    Rfcomm(bluer::rfcomm::Stream),
}

impl IoStream {
    /// Transport kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            IoStream::Tcp(_) => "tcp",
            IoStream::Serial(_) => "serial",
            IoStream::Memory(_) => "memory",
            #[cfg(feature = "bluetooth")]
            IoStream::Rfcomm(_) => "rfcomm",
        }
    }
}

impl std::fmt::Debug for IoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IoStream").field(&self.kind()).finish()
    }
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::Serial(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::Memory(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "bluetooth")]
            IoStream::Rfcomm(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::Serial(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::Memory(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "bluetooth")]
            IoStream::Rfcomm(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::Serial(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::Memory(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "bluetooth")]
            IoStream::Rfcomm(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::Serial(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::Memory(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "bluetooth")]
            IoStream::Rfcomm(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// An established stream and a description of the far end
#[derive(Debug)]
pub struct Connection {
    /// The stream
    pub stream: IoStream,
    /// Peer address or device metadata learned while connecting
    pub peer: String,
}

/// Establishes a link's stream. Called again after every drop.
#[async_trait]
pub trait Connector: Send + 'static {
    /// Discover and connect
    async fn connect(&mut self) -> Result<Connection, LinkError>;

    /// Human-readable target, for logs
    fn target(&self) -> String;
}

#[async_trait]
impl Connector for Box<dyn Connector> {
    async fn connect(&mut self) -> Result<Connection, LinkError> {
        (**self).connect().await
    }

    fn target(&self) -> String {
        (**self).target()
    }
}

/// Dials a TCP address
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Connector for `host:port`
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&mut self) -> Result<Connection, LinkError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?.to_string();
        debug!("TCP connection established to {}", peer);
        Ok(Connection {
            stream: IoStream::Tcp(stream),
            peer,
        })
    }

    fn target(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ping").await.unwrap();
        });

        let mut connector = TcpConnector::new(addr.to_string());
        assert_eq!(connector.target(), format!("tcp://{}", addr));

        let mut conn = connector.connect().await.unwrap();
        assert_eq!(conn.peer, addr.to_string());

        let mut buf = [0u8; 4];
        conn.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut connector = TcpConnector::new(addr.to_string());
        assert!(matches!(connector.connect().await, Err(LinkError::Io(_))));
    }
}
