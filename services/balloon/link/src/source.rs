//! Work sources for [`crate::Task`].
//!
//! Each source decides how a task waits between cycles: a timer, stream
//! readiness, a line, a framed message, a queue or an inbound connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines as LineStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::warn;

use balloon_wire::{Message, ReadError, StreamReader};

use crate::task::Source;
use crate::TaskError;

/// Default period of an interval task
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Yields once per period. The first cycle happens one period after spawn.
#[derive(Debug)]
pub struct Interval {
    interval: time::Interval,
}

impl Interval {
    /// Create an interval source. A zero period is raised to one millisecond.
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

#[async_trait]
impl Source for Interval {
    type Item = ();

    async fn next(&mut self) -> Result<Option<()>, TaskError> {
        self.interval.tick().await;
        Ok(Some(()))
    }
}

/// Yields a single cycle immediately, for tasks whose work is one long loop
#[derive(Debug, Default)]
pub struct Once {
    fired: bool,
}

impl Once {
    /// Create a one-shot source
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Source for Once {
    type Item = ();

    async fn next(&mut self) -> Result<Option<()>, TaskError> {
        if self.fired {
            return Ok(None);
        }
        self.fired = true;
        Ok(Some(()))
    }
}

/// Waits for read readiness and yields whatever bytes are buffered
#[derive(Debug)]
pub struct ReadChunks<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> ReadChunks<R> {
    /// Wrap a byte stream
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> Source for ReadChunks<R> {
    type Item = Bytes;

    async fn next(&mut self) -> Result<Option<Bytes>, TaskError> {
        let chunk = {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(None);
            }
            Bytes::copy_from_slice(available)
        };
        self.reader.consume(chunk.len());
        Ok(Some(chunk))
    }
}

/// Yields one non-empty line per cycle
#[derive(Debug)]
pub struct Lines<R> {
    lines: LineStream<BufReader<R>>,
}

impl<R: AsyncRead + Unpin + Send + 'static> Lines<R> {
    /// Wrap a byte stream
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> Source for Lines<R> {
    type Item = String;

    async fn next(&mut self) -> Result<Option<String>, TaskError> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }
}

/// Yields one decoded message per cycle.
///
/// Framing errors are logged and absorbed. End-of-stream is reported as
/// [`TaskError::Closed`] so the owning link notices the drop.
#[derive(Debug)]
pub struct Frames<R> {
    name: String,
    reader: StreamReader<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> Frames<R> {
    /// Wrap a byte stream; `name` labels framing warnings
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: StreamReader::new(reader),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> Source for Frames<R> {
    type Item = Message;

    async fn next(&mut self) -> Result<Option<Message>, TaskError> {
        loop {
            match self.reader.read().await {
                Ok(Some(message)) => return Ok(Some(message)),
                Ok(None) => return Err(TaskError::Closed),
                Err(ReadError::Framing(e)) => warn!("{}: {}", self.name, e),
                Err(ReadError::Io(e)) => return Err(e.into()),
            }
        }
    }
}

/// Shared receiving end of a queue. It outlives the tasks that drain it.
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Yields queued items in FIFO order
#[derive(Debug)]
pub struct Queue<T> {
    rx: SharedReceiver<T>,
}

impl<T: Send + 'static> Queue<T> {
    /// Drain a shared receiver
    pub fn new(rx: SharedReceiver<T>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<T: Send + 'static> Source for Queue<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>, TaskError> {
        Ok(self.rx.lock().await.recv().await)
    }
}

/// Yields inbound TCP connections
#[derive(Debug)]
pub struct Accept {
    listener: TcpListener,
}

impl Accept {
    /// Accept on a bound listener
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Source for Accept {
    type Item = (TcpStream, SocketAddr);

    async fn next(&mut self) -> Result<Option<Self::Item>, TaskError> {
        loop {
            match self.listener.accept().await {
                Ok(conn) => return Ok(Some(conn)),
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_lines_skip_blank() {
        let mut lines = Lines::new(&b"$GPGGA,1\r\n\r\n   \nsecond\n"[..]);
        assert_eq!(lines.next().await.unwrap(), Some("$GPGGA,1".to_string()));
        assert_eq!(lines.next().await.unwrap(), Some("second".to_string()));
        assert_eq!(lines.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_chunks() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut chunks = ReadChunks::new(rx);

        tx.write_all(b"abc").await.unwrap();
        assert_eq!(chunks.next().await.unwrap(), Some(Bytes::from_static(b"abc")));

        drop(tx);
        assert_eq!(chunks.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frames_absorb_garbage() {
        let mut bytes = vec![0xFF; 12];
        bytes.extend_from_slice(&Message::StopPhotoTransfer.encode().unwrap());

        let mut frames = Frames::new("test", std::io::Cursor::new(bytes));
        assert_eq!(frames.next().await.unwrap(), Some(Message::StopPhotoTransfer));
        assert!(matches!(frames.next().await, Err(TaskError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_interval_ticks() {
        let mut interval = Interval::new(Duration::ZERO);
        assert_eq!(interval.next().await.unwrap(), Some(()));
        assert_eq!(interval.next().await.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn test_once() {
        let mut once = Once::new();
        assert_eq!(once.next().await.unwrap(), Some(()));
        assert_eq!(once.next().await.unwrap(), None);
    }
}
