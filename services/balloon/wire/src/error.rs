//! Wire protocol error types.

use thiserror::Error;

/// Framing errors raised while decoding bytes off the wire.
///
/// All of these are recoverable: the stream reader discards the failed
/// attempt and resynchronizes on the next begin marker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Begin or end marker did not match
    #[error("bad marker: got 0x{actual:04X}, expected 0x{expected:04X}")]
    BadMarker {
        /// Marker value required at this position
        expected: u16,
        /// Value actually read
        actual: u16,
    },

    /// Message type is not in the registry
    #[error("bad message type {0}")]
    BadType(u8),

    /// CRC32 over the payload did not match the header
    #[error("bad checksum: got 0x{actual:08X}, expected 0x{expected:08X}")]
    BadChecksum {
        /// Checksum carried in the header
        expected: u32,
        /// Checksum recomputed over the payload
        actual: u32,
    },

    /// Incomplete frame (need more data)
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes required to finish the frame
        needed: usize,
        /// Bytes available in the buffer
        available: usize,
    },

    /// Payload is too short for the fixed fields of its schema
    #[error("malformed {kind} payload: {len} bytes")]
    Malformed {
        /// Schema name
        kind: &'static str,
        /// Payload length received
        len: usize,
    },
}

/// Encoding errors. These are configuration or programmer errors and are
/// reported to the caller rather than retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// No schema registered for this type id
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Field name not present in the schema
    #[error("{schema} has no field named {field:?}")]
    UnknownField {
        /// Schema name
        schema: &'static str,
        /// Offending field name
        field: String,
    },

    /// Value does not fit the declared width of the field
    #[error("{schema}.{field} expects {expected}, got {actual}")]
    FieldType {
        /// Schema name
        schema: &'static str,
        /// Field name
        field: &'static str,
        /// Declared encoding
        expected: &'static str,
        /// Supplied value kind
        actual: &'static str,
    },

    /// More values supplied than the schema has fields
    #[error("{schema} takes {expected} fields, got {actual}")]
    Arity {
        /// Schema name
        schema: &'static str,
        /// Number of fields in the schema
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },

    /// Payload exceeds the 255 byte length field
    #[error("payload of {0} bytes exceeds the 255 byte limit")]
    PayloadTooLarge(usize),
}

/// Errors returned by [`crate::StreamReader::read`]
#[derive(Error, Debug)]
pub enum ReadError {
    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A framing condition was hit while scanning
    #[error("framing error: {0}")]
    Framing(#[from] WireError),
}

impl ReadError {
    /// Whether the stream is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReadError::Framing(_))
    }
}
