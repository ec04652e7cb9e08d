//! Byte-at-a-time frame synchronization.
//!
//! [`FrameSync`] is the sans-io core: feed it bytes and it yields decoded
//! messages or framing errors. [`StreamReader`] drives it from any
//! `AsyncRead`.
//!
//! On a failed attempt the bytes after the first byte of that attempt are
//! replayed, so a frame starting inside a corrupted one is still found. Only
//! the first failure of a desynchronization episode is reported; later ones
//! are traced until a frame decodes again.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::trace;

use crate::frame::Frame;
use crate::header::{Header, HEADER_LEN, MAX_FRAME_LEN};
use crate::message::Message;
use crate::{ReadError, WireError};

/// Reader state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Collecting the 8 header bytes
    AwaitingHeader,
    /// Header accepted, collecting the rest of the frame
    AwaitingBody {
        /// Total frame length implied by the header
        frame_len: usize,
    },
    /// A frame was just produced
    Complete,
}

/// Sans-io frame scanner
#[derive(Debug)]
pub struct FrameSync {
    state: ReadState,
    buf: Vec<u8>,
    backlog: VecDeque<u8>,
    synced: bool,
}

impl FrameSync {
    /// Create a scanner waiting for a header
    pub fn new() -> Self {
        Self {
            state: ReadState::AwaitingHeader,
            buf: Vec::with_capacity(MAX_FRAME_LEN),
            backlog: VecDeque::new(),
            synced: true,
        }
    }

    /// Current state
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Bytes waiting to be rescanned
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Feed one byte.
    ///
    /// Returns `Some` when a frame completes or a reportable failure occurs.
    /// Call [`FrameSync::drain`] afterwards until it returns `None`, since
    /// replayed bytes may hold further frames.
    pub fn push(&mut self, byte: u8) -> Option<Result<Message, WireError>> {
        self.backlog.push_back(byte);
        self.drain()
    }

    /// Process queued bytes until an outcome is produced or none are left
    pub fn drain(&mut self) -> Option<Result<Message, WireError>> {
        while let Some(byte) = self.backlog.pop_front() {
            if let Some(outcome) = self.step(byte) {
                return Some(outcome);
            }
        }
        None
    }

    fn step(&mut self, byte: u8) -> Option<Result<Message, WireError>> {
        if self.state == ReadState::Complete {
            self.buf.clear();
            self.state = ReadState::AwaitingHeader;
        }
        self.buf.push(byte);

        match self.state {
            ReadState::AwaitingHeader => {
                if self.buf.len() < HEADER_LEN {
                    return None;
                }
                match Header::decode(&self.buf) {
                    Ok(header) => {
                        self.state = ReadState::AwaitingBody {
                            frame_len: header.frame_len(),
                        };
                        None
                    }
                    Err(e) => self.fail(e),
                }
            }
            ReadState::AwaitingBody { frame_len } => {
                if self.buf.len() < frame_len {
                    return None;
                }
                match Frame::decode(&self.buf) {
                    Ok(frame) => {
                        self.state = ReadState::Complete;
                        self.synced = true;
                        // A checksummed frame whose payload is too short is
                        // consumed rather than rescanned.
                        Some(Message::from_frame(&frame))
                    }
                    Err(e) => self.fail(e),
                }
            }
            ReadState::Complete => None,
        }
    }

    fn fail(&mut self, error: WireError) -> Option<Result<Message, WireError>> {
        let failed = std::mem::take(&mut self.buf);
        self.state = ReadState::AwaitingHeader;
        for &byte in failed[1..].iter().rev() {
            self.backlog.push_front(byte);
        }

        if self.synced {
            self.synced = false;
            Some(Err(error))
        } else {
            trace!("Resync: {}", error);
            None
        }
    }
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads messages off an async byte stream.
///
/// `read` is cancel safe: partial frames stay in the scanner between calls.
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: BufReader<R>,
    sync: FrameSync,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Wrap a byte stream
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            sync: FrameSync::new(),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` at end-of-stream. Framing errors leave the reader
    /// usable; the next call continues scanning.
    pub async fn read(&mut self) -> Result<Option<Message>, ReadError> {
        loop {
            if let Some(outcome) = self.sync.drain() {
                return Ok(Some(outcome?));
            }

            let mut byte = [0u8; 1];
            if self.inner.read(&mut byte).await? == 0 {
                return Ok(None);
            }
            if let Some(outcome) = self.sync.push(byte[0]) {
                return Ok(Some(outcome?));
            }
        }
    }

    /// Scanner state
    pub fn state(&self) -> ReadState {
        self.sync.state()
    }

    /// Unwrap the underlying stream, dropping any buffered bytes
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Location, Telemetry};
    use bytes::Bytes;

    fn feed(sync: &mut FrameSync, bytes: &[u8]) -> Vec<Result<Message, WireError>> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(outcome) = sync.push(b) {
                out.push(outcome);
                while let Some(outcome) = sync.drain() {
                    out.push(outcome);
                }
            }
        }
        out
    }

    fn telemetry(uptime: u32) -> Message {
        Message::Telemetry(Telemetry {
            uptime,
            ..Default::default()
        })
    }

    #[test]
    fn test_clean_stream() {
        let mut sync = FrameSync::new();
        let mut bytes = telemetry(1).encode().unwrap().to_vec();
        bytes.extend_from_slice(&Message::StopPhotoTransfer.encode().unwrap());

        let out = feed(&mut sync, &bytes);
        assert_eq!(out, vec![Ok(telemetry(1)), Ok(Message::StopPhotoTransfer)]);
        assert_eq!(sync.state(), ReadState::Complete);
    }

    #[test]
    fn test_garbage_prefix_reports_once() {
        let mut sync = FrameSync::new();
        let mut bytes = vec![0x00, 0x9D, 0x13, 0x37, 0xFF, 0x9D, 0x9A, 0x42, 0x11, 0x22, 0x33];
        bytes.extend_from_slice(&telemetry(7).encode().unwrap());

        let out = feed(&mut sync, &bytes);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(WireError::BadMarker { .. })));
        assert_eq!(out[1], Ok(telemetry(7)));
    }

    #[test]
    fn test_frame_inside_corrupted_frame() {
        // A header that claims a long payload swallows the next frame; the
        // replay must still find it.
        let inner = Message::from(Location {
            altitude: 3.5,
            ..Default::default()
        })
        .encode()
        .unwrap();

        let mut bytes = vec![0x9D, 0x9A, 0x01, 200, 0, 0, 0, 0];
        bytes.extend_from_slice(&inner);
        bytes.extend_from_slice(&[0u8; 200]);

        let mut sync = FrameSync::new();
        let out = feed(&mut sync, &bytes);

        assert_eq!(out.len(), 3);
        assert!(matches!(
            out[0],
            Err(WireError::BadChecksum { expected: 0, .. })
        ));
        assert_eq!(
            out[1],
            Ok(Message::Location(Location {
                altitude: 3.5,
                ..Default::default()
            }))
        );
        // the zero padding after the recovered frame is a new episode
        assert!(matches!(out[2], Err(WireError::BadMarker { actual: 0, .. })));
    }

    #[test]
    fn test_corrupted_then_clean_reports_each_episode() {
        let mut first = telemetry(1).encode().unwrap().to_vec();
        first[10] ^= 0xFF;
        let mut second = telemetry(2).encode().unwrap().to_vec();
        second[10] ^= 0xFF;

        let mut bytes = first;
        bytes.extend_from_slice(&telemetry(3).encode().unwrap());
        bytes.extend_from_slice(&second);
        bytes.extend_from_slice(&telemetry(4).encode().unwrap());

        let out = feed(&mut FrameSync::new(), &bytes);
        let errors = out.iter().filter(|o| o.is_err()).count();
        let messages: Vec<_> = out.into_iter().filter_map(Result::ok).collect();

        assert_eq!(errors, 2);
        assert_eq!(messages, vec![telemetry(3), telemetry(4)]);
    }

    #[test]
    fn test_malformed_payload_consumed() {
        let frame = Frame::new(
            crate::header::MessageType::Location,
            Bytes::from_static(&[1, 2, 3]),
        )
        .unwrap();
        let mut bytes = frame.encode().to_vec();
        bytes.extend_from_slice(&telemetry(9).encode().unwrap());

        let out = feed(&mut FrameSync::new(), &bytes);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(WireError::Malformed { kind: "Location", .. })));
        assert_eq!(out[1], Ok(telemetry(9)));
    }

    #[tokio::test]
    async fn test_stream_reader() {
        let mut bytes = vec![0xAA, 0xBB];
        bytes.extend_from_slice(&telemetry(5).encode().unwrap());
        bytes.extend_from_slice(&Message::AddPhoneNumber("+123".into()).encode().unwrap());
        bytes.extend_from_slice(&[0x9D, 0x9A, 0x01]);

        let mut reader = StreamReader::new(&bytes[..]);

        assert!(matches!(
            reader.read().await,
            Err(ReadError::Framing(WireError::BadMarker { .. }))
        ));
        assert_eq!(reader.read().await.unwrap(), Some(telemetry(5)));
        assert_eq!(
            reader.read().await.unwrap(),
            Some(Message::AddPhoneNumber("+123".into()))
        );
        // truncated frame at end-of-stream
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_reader_split_writes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let bytes = telemetry(11).encode().unwrap();

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for piece in bytes.chunks(3) {
                tx.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = StreamReader::new(rx);
        assert_eq!(reader.read().await.unwrap(), Some(telemetry(11)));
        writer.await.unwrap();
        assert_eq!(reader.read().await.unwrap(), None);
    }
}
