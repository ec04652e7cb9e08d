//! Static schema table for the registered message types.
//!
//! Each schema is an ordered list of fixed-width big-endian fields. Encoding
//! from named values fills omitted fields with zero; the trailing `Bytes`
//! field, where present, takes whatever is left of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::Frame;
use crate::header::{MessageType, MAX_PAYLOAD_LEN};
use crate::EncodeError;

/// Encoding of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned byte
    U8,
    /// Unsigned 16-bit
    U16,
    /// Unsigned 32-bit
    U32,
    /// IEEE single
    F32,
    /// IEEE double
    F64,
    /// Opaque bytes to the end of the payload
    Bytes,
}

impl FieldKind {
    /// Fixed width in bytes, `None` for the trailing byte field
    pub fn width(self) -> Option<usize> {
        match self {
            FieldKind::U8 => Some(1),
            FieldKind::U16 => Some(2),
            FieldKind::U32 | FieldKind::F32 => Some(4),
            FieldKind::F64 => Some(8),
            FieldKind::Bytes => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Bytes => "bytes",
        }
    }

    fn zero(self) -> Value {
        match self {
            FieldKind::U8 => Value::U8(0),
            FieldKind::U16 => Value::U16(0),
            FieldKind::U32 => Value::U32(0),
            FieldKind::F32 => Value::F32(0.0),
            FieldKind::F64 => Value::F64(0.0),
            FieldKind::Bytes => Value::Bytes(Bytes::new()),
        }
    }
}

/// Named field in a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: &'static str,
    /// Field encoding
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

/// Field value used by the dynamic encoder and the named accessor
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned byte
    U8(u8),
    /// Unsigned 16-bit
    U16(u16),
    /// Unsigned 32-bit
    U32(u32),
    /// IEEE single
    F32(f32),
    /// IEEE double
    F64(f64),
    /// Opaque bytes
    Bytes(Bytes),
}

impl Value {
    fn kind(&self) -> FieldKind {
        match self {
            Value::U8(_) => FieldKind::U8,
            Value::U16(_) => FieldKind::U16,
            Value::U32(_) => FieldKind::U32,
            Value::F32(_) => FieldKind::F32,
            Value::F64(_) => FieldKind::F64,
            Value::Bytes(_) => FieldKind::Bytes,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        match self {
            Value::U8(v) => buf.put_u8(*v),
            Value::U16(v) => buf.put_u16(*v),
            Value::U32(v) => buf.put_u32(*v),
            Value::F32(v) => buf.put_f32(*v),
            Value::F64(v) => buf.put_f64(*v),
            Value::Bytes(v) => buf.put_slice(v),
        }
    }

    /// Numeric value widened to f64, `None` for bytes
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U8(v) => Some(f64::from(*v)),
            Value::U16(v) => Some(f64::from(*v)),
            Value::U32(v) => Some(f64::from(*v)),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    f32 => F32,
    f64 => F64,
    Bytes => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v.as_bytes()))
    }
}

/// Layout of one message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Schema name
    pub name: &'static str,
    /// Type this schema describes
    pub msg_type: MessageType,
    /// Fields in wire order
    pub fields: &'static [Field],
}

use FieldKind::{F32, F64, U16, U32, U8};

static SCHEMAS: [Schema; 8] = [
    Schema {
        name: "Location",
        msg_type: MessageType::Location,
        fields: &[
            field("latitude", F64),
            field("longitude", F64),
            field("altitude", F32),
            field("quality", U8),
            field("satellites", U8),
            field("speed", F32),
        ],
    },
    Schema {
        name: "Telemetry",
        msg_type: MessageType::Telemetry,
        fields: &[
            field("uptime", U32),
            field("phase", U8),
            field("cpu", U8),
            field("free_mem", U16),
            field("int_temp", F32),
            field("int_humidity", F32),
            field("ext_temp", F32),
        ],
    },
    Schema {
        name: "CompanionTelemetry",
        msg_type: MessageType::CompanionTelemetry,
        fields: &[
            field("battery", U8),
            field("signal", U8),
            field("motion_state", U8),
            field("motion_duration", U16),
            field("photo_count", U16),
            field("latitude", F64),
            field("longitude", F64),
        ],
    },
    Schema {
        name: "PhotoChunk",
        msg_type: MessageType::PhotoChunk,
        fields: &[
            field("index", U16),
            field("chunk", U16),
            field("chunk_count", U16),
            field("file_size", U32),
            field("data", FieldKind::Bytes),
        ],
    },
    Schema {
        name: "StartPhotoTransfer",
        msg_type: MessageType::StartPhotoTransfer,
        fields: &[field("index", U16)],
    },
    Schema {
        name: "StopPhotoTransfer",
        msg_type: MessageType::StopPhotoTransfer,
        fields: &[],
    },
    Schema {
        name: "SendText",
        msg_type: MessageType::SendText,
        fields: &[field("body", FieldKind::Bytes)],
    },
    Schema {
        name: "AddPhoneNumber",
        msg_type: MessageType::AddPhoneNumber,
        fields: &[field("number", FieldKind::Bytes)],
    },
];

impl Schema {
    /// Schema registered for a type
    pub fn of(msg_type: MessageType) -> &'static Schema {
        let pos = match msg_type {
            MessageType::Location => 0,
            MessageType::Telemetry => 1,
            MessageType::CompanionTelemetry => 2,
            MessageType::PhotoChunk => 3,
            MessageType::StartPhotoTransfer => 4,
            MessageType::StopPhotoTransfer => 5,
            MessageType::SendText => 6,
            MessageType::AddPhoneNumber => 7,
        };
        &SCHEMAS[pos]
    }

    /// Schema registered for a raw type id
    pub fn lookup(type_id: u8) -> Option<&'static Schema> {
        SCHEMAS.iter().find(|s| s.msg_type.id() == type_id)
    }

    /// Size of the fixed-width part of the payload
    pub fn fixed_len(&self) -> usize {
        self.fields.iter().filter_map(|f| f.kind.width()).sum()
    }

    /// Position of a field by name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Pack named values in schema order. Omitted fields encode as zero.
    pub fn pack(&self, values: &[(&str, Value)]) -> Result<Bytes, EncodeError> {
        if values.len() > self.fields.len() {
            return Err(EncodeError::Arity {
                schema: self.name,
                expected: self.fields.len(),
                actual: values.len(),
            });
        }

        let mut slots: Vec<Value> = self.fields.iter().map(|f| f.kind.zero()).collect();
        for (name, value) in values {
            let pos = self.position(name).ok_or_else(|| EncodeError::UnknownField {
                schema: self.name,
                field: name.to_string(),
            })?;
            let field = self.fields[pos];
            if value.kind() != field.kind {
                return Err(EncodeError::FieldType {
                    schema: self.name,
                    field: field.name,
                    expected: field.kind.name(),
                    actual: value.kind().name(),
                });
            }
            slots[pos] = value.clone();
        }

        let mut buf = BytesMut::with_capacity(self.fixed_len());
        for value in &slots {
            value.put(&mut buf);
        }
        if buf.len() > MAX_PAYLOAD_LEN {
            return Err(EncodeError::PayloadTooLarge(buf.len()));
        }
        Ok(buf.freeze())
    }

    /// Unpack a single named field from a payload
    pub fn unpack(&self, payload: &Bytes, name: &str) -> Option<Value> {
        let mut offset = 0;
        for field in self.fields {
            let Some(width) = field.kind.width() else {
                // trailing bytes
                let start = offset.min(payload.len());
                return (field.name == name).then(|| Value::Bytes(payload.slice(start..)));
            };
            if field.name == name {
                if payload.len() < offset + width {
                    return None;
                }
                let mut buf = &payload[offset..offset + width];
                return Some(match field.kind {
                    U8 => Value::U8(buf.get_u8()),
                    U16 => Value::U16(buf.get_u16()),
                    U32 => Value::U32(buf.get_u32()),
                    F32 => Value::F32(buf.get_f32()),
                    F64 => Value::F64(buf.get_f64()),
                    FieldKind::Bytes => return None,
                });
            }
            offset += width;
        }
        None
    }
}

/// Encode a frame from named field values.
///
/// The type id must be registered. Unnamed fields take their zero default.
pub fn encode(type_id: u8, values: &[(&str, Value)]) -> Result<Frame, EncodeError> {
    let schema = Schema::lookup(type_id).ok_or(EncodeError::UnknownType(type_id))?;
    let payload = schema.pack(values)?;
    Frame::new(schema.msg_type, payload)
}

impl Frame {
    /// Read a named field out of the payload via the schema table.
    ///
    /// Returns `None` when the schema has no such field or the payload is
    /// too short to hold it.
    pub fn field(&self, name: &str) -> Option<Value> {
        Schema::of(self.msg_type).unpack(&self.payload, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CompanionTelemetry, Location, Message, PhotoChunk, Telemetry};

    #[test]
    fn test_schema_sizes_match_messages() {
        assert_eq!(Schema::of(MessageType::Location).fixed_len(), Location::SIZE);
        assert_eq!(Schema::of(MessageType::Telemetry).fixed_len(), Telemetry::SIZE);
        assert_eq!(
            Schema::of(MessageType::CompanionTelemetry).fixed_len(),
            CompanionTelemetry::SIZE
        );
        assert_eq!(
            Schema::of(MessageType::PhotoChunk).fixed_len(),
            PhotoChunk::HEADER_SIZE
        );
        for msg_type in MessageType::ALL {
            assert_eq!(Schema::of(msg_type).msg_type, msg_type);
        }
    }

    #[test]
    fn test_dynamic_matches_typed() {
        let frame = encode(
            1,
            &[
                ("uptime", Value::U32(3661)),
                ("phase", Value::U8(1)),
                ("cpu", Value::U8(42)),
                ("free_mem", Value::U16(1024)),
                ("int_temp", Value::F32(21.5)),
                ("int_humidity", Value::F32(40.0)),
                ("ext_temp", Value::F32(-5.0)),
            ],
        )
        .unwrap();

        let typed = Message::Telemetry(Telemetry {
            uptime: 3661,
            phase: 1,
            cpu: 42,
            free_mem: 1024,
            int_temp: 21.5,
            int_humidity: 40.0,
            ext_temp: -5.0,
        })
        .to_frame()
        .unwrap();

        assert_eq!(frame, typed);
        assert_eq!(frame.field("cpu"), Some(Value::U8(42)));
        assert_eq!(frame.field("ext_temp"), Some(Value::F32(-5.0)));
    }

    #[test]
    fn test_defaults_fill_omitted_fields() {
        let frame = encode(0, &[("altitude", Value::F32(12.5))]).unwrap();
        assert_eq!(frame.payload.len(), Location::SIZE);

        match Message::from_frame(&frame).unwrap() {
            Message::Location(loc) => {
                assert_eq!(loc.altitude, 12.5);
                assert_eq!(loc.latitude, 0.0);
                assert_eq!(loc.satellites, 0);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_trailing_bytes_field() {
        let frame = encode(
            3,
            &[
                ("index", Value::U16(7)),
                ("chunk_count", Value::U16(3)),
                ("data", Value::from(Bytes::from_static(b"\xFF\xD8\xFF"))),
            ],
        )
        .unwrap();

        assert_eq!(frame.payload.len(), PhotoChunk::HEADER_SIZE + 3);
        assert_eq!(
            frame.field("data"),
            Some(Value::Bytes(Bytes::from_static(b"\xFF\xD8\xFF")))
        );
        assert_eq!(frame.field("index").and_then(|v| v.as_f64()), Some(7.0));
    }

    #[test]
    fn test_encode_errors() {
        assert_eq!(encode(4, &[]), Err(EncodeError::UnknownType(4)));

        assert_eq!(
            encode(10, &[("idx", Value::U16(1))]),
            Err(EncodeError::UnknownField {
                schema: "StartPhotoTransfer",
                field: "idx".to_string()
            })
        );

        assert_eq!(
            encode(10, &[("index", Value::U8(1))]),
            Err(EncodeError::FieldType {
                schema: "StartPhotoTransfer",
                field: "index",
                expected: "u16",
                actual: "u8"
            })
        );

        assert_eq!(
            encode(11, &[("index", Value::U16(1))]),
            Err(EncodeError::Arity {
                schema: "StopPhotoTransfer",
                expected: 0,
                actual: 1
            })
        );

        let body = Value::Bytes(Bytes::from(vec![b'x'; 256]));
        assert_eq!(
            encode(12, &[("body", body)]),
            Err(EncodeError::PayloadTooLarge(256))
        );
    }

    #[test]
    fn test_field_unknown_or_short() {
        let frame = Frame::new(MessageType::Telemetry, Bytes::from_static(&[0, 0, 0, 1])).unwrap();
        assert_eq!(frame.field("uptime"), Some(Value::U32(1)));
        assert_eq!(frame.field("cpu"), None);
        assert_eq!(frame.field("nope"), None);
    }
}
