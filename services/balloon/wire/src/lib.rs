//! Wire protocol framing, typed messages and stream resynchronization for the
//! balloon link.
//!
//! This crate provides the byte-level protocol shared by the on-board
//! computer, the companion device and the ground station: frame encoding and
//! verification, the static message schema table, eager decoding into typed
//! messages, and a byte-at-a-time reader that recovers from corruption.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u16 begin marker     | 0x9D9A                     |
//! +----------------------+----------------------------+
//! | u8 type              | registered message type    |
//! +----------------------+----------------------------+
//! | u8 length            | payload length (0..255)    |
//! +----------------------+----------------------------+
//! | u32 crc32            | CRC32 of the payload       |
//! +----------------------+----------------------------+
//! | payload              | schema fields, big-endian  |
//! +----------------------+----------------------------+
//! | u16 end marker       | 0x9592                     |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod frame;
pub mod header;
pub mod message;
pub mod reader;
pub mod schema;

// Re-export main types
pub use chunk::{Chunker, DEFAULT_CHUNK_SIZE};
pub use error::{EncodeError, ReadError, WireError};
pub use frame::Frame;
pub use header::{
    payload_crc, Header, MessageType, BEGIN_MARKER, END_MARKER, HEADER_LEN, MAX_FRAME_LEN,
    MAX_PAYLOAD_LEN,
};
pub use message::{CompanionTelemetry, Location, Message, PhotoChunk, Telemetry};
pub use reader::{FrameSync, ReadState, StreamReader};
pub use schema::{encode, Field, FieldKind, Schema, Value};
