//! Message framing for the wire protocol.
//!
//! A frame is the header, the payload and the end marker. `Frame` holds a
//! payload whose checksum has already been computed (encode path) or
//! verified (decode path); it says nothing about the payload's schema.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::header::{
    payload_crc, Header, MessageType, END_LEN, END_MARKER, HEADER_LEN, MAX_PAYLOAD_LEN,
};
use crate::{EncodeError, WireError};

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type
    pub msg_type: MessageType,
    /// CRC32 of the payload
    pub crc32: u32,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame around a payload, computing its checksum
    pub fn new(msg_type: MessageType, payload: Bytes) -> Result<Self, EncodeError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EncodeError::PayloadTooLarge(payload.len()));
        }

        Ok(Self {
            msg_type,
            crc32: payload_crc(&payload),
            payload,
        })
    }

    /// Header describing this frame
    pub fn header(&self) -> Header {
        Header {
            msg_type: self.msg_type,
            len: self.payload.len() as u8,
            crc32: self.crc32,
        }
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.payload.len() + END_LEN
    }

    /// Append the encoded frame to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        self.header().encode(buf);
        buf.put_slice(&self.payload);
        buf.put_u16(END_MARKER);
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode and verify one frame from the start of `buf`.
    ///
    /// Checks run in wire order: begin marker, type, length, checksum, end
    /// marker. Trailing bytes after the end marker are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = Header::decode(buf)?;

        let frame_len = header.frame_len();
        if buf.len() < frame_len {
            return Err(WireError::Incomplete {
                needed: frame_len,
                available: buf.len(),
            });
        }

        let payload = &buf[HEADER_LEN..HEADER_LEN + header.len as usize];
        let crc32 = payload_crc(payload);
        if crc32 != header.crc32 {
            return Err(WireError::BadChecksum {
                expected: header.crc32,
                actual: crc32,
            });
        }

        let mut trailer = &buf[HEADER_LEN + payload.len()..frame_len];
        let end = trailer.get_u16();
        if end != END_MARKER {
            return Err(WireError::BadMarker {
                expected: END_MARKER,
                actual: end,
            });
        }

        Ok(Self {
            msg_type: header.msg_type,
            crc32,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}
