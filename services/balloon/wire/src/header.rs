//! Frame header processing for the wire protocol.
//!
//! The header is the fixed 8-byte prefix of every frame: the begin marker,
//! the message type, the payload length and the CRC32 of the payload. It is
//! enough to know how many more bytes belong to the frame, which is what the
//! stream reader needs before it can validate the rest.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{EncodeError, WireError};

/// Begin-of-frame marker
pub const BEGIN_MARKER: u16 = 0x9D9A;
/// End-of-frame marker
pub const END_MARKER: u16 = 0x9592;

/// Marker size in bytes
pub const MARKER_LEN: usize = 2;
/// Header size in bytes (marker + type + length + crc32)
pub const HEADER_LEN: usize = MARKER_LEN + 1 + 1 + 4;
/// Trailer size in bytes
pub const END_LEN: usize = MARKER_LEN;

/// Largest payload the length byte can describe
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
/// Largest possible frame on the wire (265 bytes)
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + END_LEN;

/// Registered message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// GPS location of the payload
    Location = 0,
    /// OBC health and environment
    Telemetry = 1,
    /// Status reported by the companion device
    CompanionTelemetry = 2,
    /// One chunk of a photo transfer
    PhotoChunk = 3,
    /// Ask the companion to start sending a photo
    StartPhotoTransfer = 10,
    /// Ask the companion to stop sending photos
    StopPhotoTransfer = 11,
    /// Ask the companion to send its text message
    SendText = 12,
    /// Register a phone number on the companion
    AddPhoneNumber = 13,
}

impl MessageType {
    /// Every registered type, in id order
    pub const ALL: [MessageType; 8] = [
        MessageType::Location,
        MessageType::Telemetry,
        MessageType::CompanionTelemetry,
        MessageType::PhotoChunk,
        MessageType::StartPhotoTransfer,
        MessageType::StopPhotoTransfer,
        MessageType::SendText,
        MessageType::AddPhoneNumber,
    ];

    /// Numeric id on the wire
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Whether this is a ground-to-companion control message
    pub fn is_control(self) -> bool {
        matches!(
            self,
            MessageType::StartPhotoTransfer
                | MessageType::StopPhotoTransfer
                | MessageType::SendText
                | MessageType::AddPhoneNumber
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Location),
            1 => Ok(MessageType::Telemetry),
            2 => Ok(MessageType::CompanionTelemetry),
            3 => Ok(MessageType::PhotoChunk),
            10 => Ok(MessageType::StartPhotoTransfer),
            11 => Ok(MessageType::StopPhotoTransfer),
            12 => Ok(MessageType::SendText),
            13 => Ok(MessageType::AddPhoneNumber),
            _ => Err(WireError::BadType(value)),
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type
    pub msg_type: MessageType,
    /// Payload length in bytes
    pub len: u8,
    /// CRC32 of the payload
    pub crc32: u32,
}

impl Header {
    /// Build the header for a payload of at most 255 bytes
    pub fn for_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self, EncodeError> {
        let len =
            u8::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLarge(payload.len()))?;
        Ok(Self {
            msg_type,
            len,
            crc32: payload_crc(payload),
        })
    }

    /// Total frame length implied by this header
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.len as usize + END_LEN
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(BEGIN_MARKER);
        buf.put_u8(self.msg_type.id());
        buf.put_u8(self.len);
        buf.put_u32(self.crc32);
    }

    /// Decode the header from the start of `buf` (big-endian).
    ///
    /// Checks the begin marker and that the type is registered; the payload
    /// itself is not looked at.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Incomplete {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let begin = buf.get_u16();
        if begin != BEGIN_MARKER {
            return Err(WireError::BadMarker {
                expected: BEGIN_MARKER,
                actual: begin,
            });
        }

        let msg_type = MessageType::try_from(buf.get_u8())?;
        let len = buf.get_u8();
        let crc32 = buf.get_u32();

        Ok(Self {
            msg_type,
            len,
            crc32,
        })
    }
}

/// CRC32 (IEEE) over a payload
pub fn payload_crc(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        for msg_type in MessageType::ALL {
            assert_eq!(MessageType::try_from(msg_type.id()).unwrap(), msg_type);
        }
        assert_eq!(MessageType::try_from(4), Err(WireError::BadType(4)));
        assert_eq!(MessageType::try_from(0xFF), Err(WireError::BadType(0xFF)));
    }

    #[test]
    fn test_header_encode_decode() {
        let header = Header::for_payload(MessageType::Telemetry, b"hello").unwrap();

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..2], &[0x9D, 0x9A]);

        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.frame_len(), HEADER_LEN + 5 + END_LEN);
    }

    #[test]
    fn test_header_rejects_oversized_payload() {
        let payload = [0u8; 256];
        assert_eq!(
            Header::for_payload(MessageType::PhotoChunk, &payload),
            Err(EncodeError::PayloadTooLarge(256))
        );
        let header = Header::for_payload(MessageType::PhotoChunk, &payload[..255]).unwrap();
        assert_eq!(header.len, 255);
    }

    #[test]
    fn test_header_bad_marker() {
        let mut buf = BytesMut::new();
        Header::for_payload(MessageType::Location, &[])
            .unwrap()
            .encode(&mut buf);
        buf[0] = 0x12;

        assert_eq!(
            Header::decode(&buf),
            Err(WireError::BadMarker {
                expected: BEGIN_MARKER,
                actual: 0x129A
            })
        );
    }

    #[test]
    fn test_header_incomplete() {
        assert!(matches!(
            Header::decode(&[0x9D, 0x9A, 0x01]),
            Err(WireError::Incomplete { needed: 8, available: 3 })
        ));
    }

    #[test]
    fn test_max_frame_len() {
        assert_eq!(MAX_FRAME_LEN, 265);
    }
}
