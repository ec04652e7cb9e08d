//! Typed messages carried in frame payloads.
//!
//! Every registered type decodes eagerly into a plain struct. Field order and
//! widths match the schema table in [`crate::schema`]; the tests there hold
//! the two in agreement.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::header::{MessageType, MAX_PAYLOAD_LEN};
use crate::{EncodeError, WireError};

/// GPS location of the payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Altitude in kilometres
    pub altitude: f32,
    /// GPS fix quality
    pub quality: u8,
    /// Satellites in view
    pub satellites: u8,
    /// Ground speed in knots
    pub speed: f32,
}

impl Location {
    /// Encoded payload size
    pub const SIZE: usize = 8 + 8 + 4 + 1 + 1 + 4;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_f64(self.latitude);
        buf.put_f64(self.longitude);
        buf.put_f32(self.altitude);
        buf.put_u8(self.quality);
        buf.put_u8(self.satellites);
        buf.put_f32(self.speed);
    }

    fn parse(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len("Location", buf, Self::SIZE)?;
        Ok(Self {
            latitude: buf.get_f64(),
            longitude: buf.get_f64(),
            altitude: buf.get_f32(),
            quality: buf.get_u8(),
            satellites: buf.get_u8(),
            speed: buf.get_f32(),
        })
    }
}

/// OBC health and environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Seconds since boot
    pub uptime: u32,
    /// Flight phase id
    pub phase: u8,
    /// CPU usage in percent
    pub cpu: u8,
    /// Free memory in MiB
    pub free_mem: u16,
    /// Internal temperature in Celsius
    pub int_temp: f32,
    /// Internal relative humidity in percent
    pub int_humidity: f32,
    /// External temperature in Celsius
    pub ext_temp: f32,
}

impl Telemetry {
    /// Encoded payload size
    pub const SIZE: usize = 4 + 1 + 1 + 2 + 4 + 4 + 4;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32(self.uptime);
        buf.put_u8(self.phase);
        buf.put_u8(self.cpu);
        buf.put_u16(self.free_mem);
        buf.put_f32(self.int_temp);
        buf.put_f32(self.int_humidity);
        buf.put_f32(self.ext_temp);
    }

    fn parse(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len("Telemetry", buf, Self::SIZE)?;
        Ok(Self {
            uptime: buf.get_u32(),
            phase: buf.get_u8(),
            cpu: buf.get_u8(),
            free_mem: buf.get_u16(),
            int_temp: buf.get_f32(),
            int_humidity: buf.get_f32(),
            ext_temp: buf.get_f32(),
        })
    }
}

/// Status reported by the companion device
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanionTelemetry {
    /// Battery level in percent
    pub battery: u8,
    /// Cellular signal strength in bars
    pub signal: u8,
    /// Motion classifier state
    pub motion_state: u8,
    /// Seconds spent in the current motion state
    pub motion_duration: u16,
    /// Photos taken so far
    pub photo_count: u16,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl CompanionTelemetry {
    /// Encoded payload size
    pub const SIZE: usize = 1 + 1 + 1 + 2 + 2 + 8 + 8;

    /// The companion reports all-zero battery and signal until it has a
    /// reading; treat that as not connected.
    pub fn is_connected(&self) -> bool {
        !(self.battery == 0 && self.signal == 0)
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.battery);
        buf.put_u8(self.signal);
        buf.put_u8(self.motion_state);
        buf.put_u16(self.motion_duration);
        buf.put_u16(self.photo_count);
        buf.put_f64(self.latitude);
        buf.put_f64(self.longitude);
    }

    fn parse(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len("CompanionTelemetry", buf, Self::SIZE)?;
        Ok(Self {
            battery: buf.get_u8(),
            signal: buf.get_u8(),
            motion_state: buf.get_u8(),
            motion_duration: buf.get_u16(),
            photo_count: buf.get_u16(),
            latitude: buf.get_f64(),
            longitude: buf.get_f64(),
        })
    }
}

/// One chunk of a photo transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoChunk {
    /// Transfer index
    pub index: u16,
    /// 0-based chunk number
    pub chunk: u16,
    /// Total number of chunks in the transfer
    pub chunk_count: u16,
    /// Size of the complete photo in bytes
    pub file_size: u32,
    /// Raw chunk bytes, preserved verbatim
    pub data: Bytes,
}

impl PhotoChunk {
    /// Size of the fixed header that precedes the chunk bytes
    pub const HEADER_SIZE: usize = 2 + 2 + 2 + 4;
    /// Most chunk bytes that fit in one frame
    pub const MAX_DATA: usize = MAX_PAYLOAD_LEN - Self::HEADER_SIZE;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.index);
        buf.put_u16(self.chunk);
        buf.put_u16(self.chunk_count);
        buf.put_u32(self.file_size);
        buf.put_slice(&self.data);
    }

    fn parse(payload: &Bytes) -> Result<Self, WireError> {
        ensure_len("PhotoChunk", payload, Self::HEADER_SIZE)?;
        let mut buf = &payload[..Self::HEADER_SIZE];
        Ok(Self {
            index: buf.get_u16(),
            chunk: buf.get_u16(),
            chunk_count: buf.get_u16(),
            file_size: buf.get_u32(),
            data: payload.slice(Self::HEADER_SIZE..),
        })
    }
}

/// A decoded message, one variant per registered type
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Type 0
    Location(Location),
    /// Type 1
    Telemetry(Telemetry),
    /// Type 2
    CompanionTelemetry(CompanionTelemetry),
    /// Type 3
    PhotoChunk(PhotoChunk),
    /// Type 10
    StartPhotoTransfer {
        /// Transfer index to start with
        index: u16,
    },
    /// Type 11
    StopPhotoTransfer,
    /// Type 12, opaque body
    SendText(Bytes),
    /// Type 13
    AddPhoneNumber(String),
}

impl Message {
    /// Registered type of this message
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Location(_) => MessageType::Location,
            Message::Telemetry(_) => MessageType::Telemetry,
            Message::CompanionTelemetry(_) => MessageType::CompanionTelemetry,
            Message::PhotoChunk(_) => MessageType::PhotoChunk,
            Message::StartPhotoTransfer { .. } => MessageType::StartPhotoTransfer,
            Message::StopPhotoTransfer => MessageType::StopPhotoTransfer,
            Message::SendText(_) => MessageType::SendText,
            Message::AddPhoneNumber(_) => MessageType::AddPhoneNumber,
        }
    }

    /// Pack the payload and wrap it in a frame
    pub fn to_frame(&self) -> Result<Frame, EncodeError> {
        let mut buf = BytesMut::with_capacity(MAX_PAYLOAD_LEN);
        match self {
            Message::Location(m) => m.put(&mut buf),
            Message::Telemetry(m) => m.put(&mut buf),
            Message::CompanionTelemetry(m) => m.put(&mut buf),
            Message::PhotoChunk(m) => m.put(&mut buf),
            Message::StartPhotoTransfer { index } => buf.put_u16(*index),
            Message::StopPhotoTransfer => {}
            Message::SendText(body) => buf.put_slice(body),
            Message::AddPhoneNumber(number) => buf.put_slice(number.as_bytes()),
        }
        Frame::new(self.msg_type(), buf.freeze())
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        Ok(self.to_frame()?.encode())
    }

    /// Unpack the payload of a verified frame
    pub fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        let payload = &frame.payload;
        Ok(match frame.msg_type {
            MessageType::Location => Message::Location(Location::parse(payload)?),
            MessageType::Telemetry => Message::Telemetry(Telemetry::parse(payload)?),
            MessageType::CompanionTelemetry => {
                Message::CompanionTelemetry(CompanionTelemetry::parse(payload)?)
            }
            MessageType::PhotoChunk => Message::PhotoChunk(PhotoChunk::parse(payload)?),
            MessageType::StartPhotoTransfer => {
                ensure_len("StartPhotoTransfer", payload, 2)?;
                Message::StartPhotoTransfer {
                    index: (&payload[..2]).get_u16(),
                }
            }
            MessageType::StopPhotoTransfer => Message::StopPhotoTransfer,
            MessageType::SendText => Message::SendText(payload.clone()),
            MessageType::AddPhoneNumber => Message::AddPhoneNumber(
                String::from_utf8(payload.to_vec()).map_err(|_| WireError::Malformed {
                    kind: "AddPhoneNumber",
                    len: payload.len(),
                })?,
            ),
        })
    }

    /// Decode and verify wire bytes
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Self::from_frame(&Frame::decode(buf)?)
    }
}

impl From<Location> for Message {
    fn from(m: Location) -> Self {
        Message::Location(m)
    }
}

impl From<Telemetry> for Message {
    fn from(m: Telemetry) -> Self {
        Message::Telemetry(m)
    }
}

impl From<CompanionTelemetry> for Message {
    fn from(m: CompanionTelemetry) -> Self {
        Message::CompanionTelemetry(m)
    }
}

impl From<PhotoChunk> for Message {
    fn from(m: PhotoChunk) -> Self {
        Message::PhotoChunk(m)
    }
}

fn ensure_len(kind: &'static str, buf: &[u8], len: usize) -> Result<(), WireError> {
    if buf.len() < len {
        return Err(WireError::Malformed {
            kind,
            len: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{END_LEN, HEADER_LEN};

    #[test]
    fn test_telemetry_scenario() {
        let telemetry = Telemetry {
            uptime: 3661,
            phase: 1,
            cpu: 42,
            free_mem: 1024,
            int_temp: 21.5,
            int_humidity: 40.0,
            ext_temp: -5.0,
        };

        let bytes = Message::from(telemetry).encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + Telemetry::SIZE + END_LEN);
        assert_eq!(bytes.len(), 30);
        assert_eq!(bytes[2], 1);

        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.msg_type, MessageType::Telemetry);
        assert_eq!(Message::from_frame(&frame).unwrap(), Message::Telemetry(telemetry));
    }

    #[test]
    fn test_roundtrip_all_types() {
        let messages = vec![
            Message::Location(Location {
                latitude: 37.7749,
                longitude: -122.4194,
                altitude: 28.5,
                quality: 1,
                satellites: 9,
                speed: 12.25,
            }),
            Message::Telemetry(Telemetry::default()),
            Message::CompanionTelemetry(CompanionTelemetry {
                battery: 87,
                signal: 3,
                motion_state: 2,
                motion_duration: 600,
                photo_count: 41,
                latitude: -33.8688,
                longitude: 151.2093,
            }),
            Message::PhotoChunk(PhotoChunk {
                index: 7,
                chunk: 2,
                chunk_count: 3,
                file_size: 600,
                data: Bytes::from(vec![0xAB; PhotoChunk::MAX_DATA]),
            }),
            Message::StartPhotoTransfer { index: 513 },
            Message::StopPhotoTransfer,
            Message::SendText(Bytes::new()),
            Message::AddPhoneNumber("+15551234567".to_string()),
        ];

        for message in messages {
            let bytes = message.encode().unwrap();
            assert_eq!(bytes[2], message.msg_type().id());
            assert_eq!(Message::decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_companion_telemetry_size() {
        assert_eq!(CompanionTelemetry::SIZE, 23);
        assert_eq!(Location::SIZE, 26);
        assert_eq!(PhotoChunk::MAX_DATA, 245);
    }

    #[test]
    fn test_photo_chunk_too_large() {
        let chunk = PhotoChunk {
            data: Bytes::from(vec![0; PhotoChunk::MAX_DATA + 1]),
            ..Default::default()
        };
        assert_eq!(
            Message::from(chunk).encode(),
            Err(EncodeError::PayloadTooLarge(256))
        );
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let frame = Frame::new(MessageType::Location, Bytes::from_static(&[0; 4])).unwrap();
        assert_eq!(
            Message::from_frame(&frame),
            Err(WireError::Malformed {
                kind: "Location",
                len: 4
            })
        );
    }

    #[test]
    fn test_companion_connected() {
        assert!(!CompanionTelemetry::default().is_connected());
        let t = CompanionTelemetry {
            battery: 50,
            ..Default::default()
        };
        assert!(t.is_connected());
    }
}
