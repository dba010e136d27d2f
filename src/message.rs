//! The message model: a parsed or constructed D-Bus message is a header
//! value (a struct of fixed shape) plus an ordered body.
//!
//! The header type is `(yyyyuua(yv))`: endianness byte, message type,
//! flags, protocol version, body size, serial, and an array of
//! `(code, variant)` header fields. The body's types are given by the
//! `Signature` header field; a message with `body_size == 0` has an
//! empty body.

use crate::ser::{Serializer, SizeCounter};
use crate::types::{TypeArena, TypeId};
use crate::value::{Array, DValue, Variant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0,
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl MessageType {
    pub fn from_byte(b: u8) -> MessageType {
        match b {
            1 => MessageType::MethodCall,
            2 => MessageType::MethodReturn,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            _ => MessageType::Invalid,
        }
    }
}

/// Header flag bits.
pub mod flags {
    pub const NO_REPLY_EXPECTED: u8 = 0x01;
    pub const NO_AUTO_START: u8 = 0x02;
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: u8 = 0x04;
}

/// Header field codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderField {
    Invalid = 0,
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

/// The fixed header type, allocated into `arena`.
pub fn header_type(arena: &mut TypeArena) -> TypeId {
    let field = arena.alloc_struct(vec![TypeArena::BYTE, TypeArena::VARIANT]);
    let fields = arena.alloc_array(field);
    arena.alloc_struct(vec![
        TypeArena::BYTE,
        TypeArena::BYTE,
        TypeArena::BYTE,
        TypeArena::BYTE,
        TypeArena::UINT32,
        TypeArena::UINT32,
        fields,
    ])
}

/// A whole message: header value plus body values.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    header: DValue,
    body: Vec<DValue>,
}

impl Message {
    pub fn from_parts(header: DValue, body: Vec<DValue>) -> Message {
        Message { header, body }
    }

    pub fn header(&self) -> &DValue {
        &self.header
    }

    pub fn body(&self) -> &[DValue] {
        &self.body
    }

    fn header_field(&self, i: usize) -> Option<&DValue> {
        self.header.as_struct()?.get(i)
    }

    /// The endianness byte the header declares (`b'l'` or `b'B'`).
    pub fn endianness(&self) -> Option<u8> {
        self.header_field(0)?.as_byte()
    }

    pub fn message_type(&self) -> Option<MessageType> {
        Some(MessageType::from_byte(self.header_field(1)?.as_byte()?))
    }

    pub fn flags(&self) -> Option<u8> {
        self.header_field(2)?.as_byte()
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.header_field(3)?.as_byte()
    }

    pub fn body_size(&self) -> Option<u32> {
        self.header_field(4)?.as_u32()
    }

    pub fn serial(&self) -> Option<u32> {
        self.header_field(5)?.as_u32()
    }

    /// Find a header field by code.
    pub fn lookup_field(&self, code: HeaderField) -> Option<&Variant> {
        let fields = self.header_field(6)?.as_array()?;
        for field in fields.elements() {
            let pair = field.as_struct()?;
            if pair.first()?.as_byte()? == code as u8 {
                return pair.get(1)?.as_variant();
            }
        }
        None
    }

    /// Concatenated signature of the body values.
    pub fn body_signature(&self) -> String {
        let mut out = String::new();
        for v in &self.body {
            v.write_signature(&mut out);
        }
        out
    }

    /// Number of file-descriptor indices carried in the body. The
    /// descriptors themselves travel out-of-band.
    pub fn count_unix_fds(&self) -> u32 {
        self.body.iter().map(count_fds).sum()
    }

    /// Serialize header, padding and body. The body is 8-byte aligned.
    pub fn serialize(&self, s: &mut dyn Serializer) {
        self.header.serialize(s);
        s.insert_padding(8);
        for v in &self.body {
            v.serialize(s);
        }
    }

    fn build(
        msg_type: MessageType,
        flag_bits: u8,
        serial: u32,
        header_fields: Vec<(HeaderField, DValue)>,
        body: Vec<DValue>,
    ) -> Message {
        let body_size = {
            let mut counter = SizeCounter::new();
            for v in &body {
                v.serialize(&mut counter);
            }
            counter.pos() as u32
        };

        let field_values = header_fields
            .into_iter()
            .map(|(code, value)| {
                DValue::Struct(vec![
                    DValue::Byte(code as u8),
                    DValue::Variant(Box::new(Variant::new(value))),
                ])
            })
            .collect();

        let mut arena = TypeArena::new();
        let field_type = arena.alloc_struct(vec![TypeArena::BYTE, TypeArena::VARIANT]);
        let header = DValue::Struct(vec![
            DValue::Byte(b'l'),
            DValue::Byte(msg_type as u8),
            DValue::Byte(flag_bits),
            DValue::Byte(1),
            DValue::Uint32(body_size),
            DValue::Uint32(serial),
            DValue::Array(Array::new(&arena, field_type, field_values)),
        ]);
        Message { header, body }
    }

    /// A method call with the usual addressing fields. The header is
    /// little-endian and carries the body signature and the count of
    /// file-descriptor indices, even when both are empty.
    pub fn method_call(
        serial: u32,
        path: &str,
        interface: &str,
        destination: &str,
        member: &str,
        body: Vec<DValue>,
    ) -> Message {
        let signature: String = body.iter().map(|v| v.signature()).collect();
        let fd_count: u32 = body.iter().map(count_fds).sum();
        Message::build(
            MessageType::MethodCall,
            0,
            serial,
            vec![
                (HeaderField::Path, DValue::Path(path.into())),
                (HeaderField::Interface, DValue::Str(interface.into())),
                (HeaderField::Destination, DValue::Str(destination.into())),
                (HeaderField::Member, DValue::Str(member.into())),
                (HeaderField::Signature, DValue::Signature(signature)),
                (HeaderField::UnixFds, DValue::Uint32(fd_count)),
            ],
            body,
        )
    }

    /// A reply to the method call with serial `reply_serial`.
    pub fn method_return(
        serial: u32,
        reply_serial: u32,
        destination: &str,
        body: Vec<DValue>,
    ) -> Message {
        let signature: String = body.iter().map(|v| v.signature()).collect();
        Message::build(
            MessageType::MethodReturn,
            0,
            serial,
            vec![
                (HeaderField::Destination, DValue::Str(destination.into())),
                (HeaderField::Signature, DValue::Signature(signature)),
                (HeaderField::ReplySerial, DValue::Uint32(reply_serial)),
            ],
            body,
        )
    }

    /// The `Hello` call that registers a connection with the bus.
    pub fn hello(serial: u32) -> Message {
        Message::method_call(
            serial,
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "org.freedesktop.DBus",
            "Hello",
            Vec::new(),
        )
    }
}

fn count_fds(v: &DValue) -> u32 {
    match v {
        DValue::UnixFd(_) => 1,
        DValue::Variant(var) => count_fds(var.value()),
        DValue::Array(arr) => arr.elements().iter().map(count_fds).sum(),
        DValue::Struct(fields) => fields.iter().map(count_fds).sum(),
        DValue::DictEntry(e) => count_fds(e.key()) + count_fds(e.value()),
        _ => 0,
    }
}

// Parse-time helpers: the header has just been parsed against
// `header_type`, so its shape is guaranteed.

pub(crate) fn header_body_size(header: &DValue) -> u32 {
    header
        .as_struct()
        .and_then(|s| s.get(4))
        .and_then(|v| v.as_u32())
        .expect("message header shape")
}

pub(crate) fn header_signature_field(header: &DValue) -> Option<&str> {
    let fields = header.as_struct()?.get(6)?.as_array()?;
    for field in fields.elements() {
        let pair = field.as_struct()?;
        if pair.first()?.as_byte()? == HeaderField::Signature as u8 {
            return pair.get(1)?.as_variant()?.value().as_signature();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::{parse_message, parse_message_le};
    use crate::ser::{serialize_message, serialize_message_le};
    use crate::types::TypeArena;

    #[test]
    fn header_type_signature() {
        let mut arena = TypeArena::new();
        let t = header_type(&mut arena);
        assert_eq!(arena.signature(t), "(yyyyuua(yv))");
    }

    #[test]
    fn method_call_round_trips() {
        let body = vec![DValue::Str("hi".into()), DValue::Uint32(7)];
        let msg = Message::method_call(3, "/obj", "com.example.Iface", "com.example", "Frob", body);
        assert_eq!(msg.body_signature(), "su");
        // "hi" costs 7 bytes, one pad byte aligns the u32.
        assert_eq!(msg.body_size(), Some(12));

        let bytes = serialize_message_le(&msg);
        let parsed = parse_message(&bytes).unwrap();
        assert_eq!(parsed.message_type(), Some(MessageType::MethodCall));
        assert_eq!(parsed.serial(), Some(3));
        assert_eq!(parsed.protocol_version(), Some(1));
        assert_eq!(
            parsed
                .lookup_field(HeaderField::Member)
                .and_then(|v| v.value().as_str()),
            Some("Frob")
        );
        assert_eq!(
            parsed
                .lookup_field(HeaderField::Path)
                .and_then(|v| v.value().as_path()),
            Some("/obj")
        );
        assert_eq!(parsed.body(), msg.body());
        assert_eq!(serialize_message(&parsed), bytes);
    }

    #[test]
    fn hello_has_an_empty_body() {
        let msg = Message::hello(1);
        assert_eq!(msg.body_size(), Some(0));
        let bytes = serialize_message_le(&msg);
        let parsed = parse_message_le(&bytes).unwrap();
        assert!(parsed.body().is_empty());
        // The signature field is present but empty, as is the fd count.
        assert_eq!(
            parsed
                .lookup_field(HeaderField::Signature)
                .and_then(|v| v.value().as_signature()),
            Some("")
        );
        assert_eq!(
            parsed
                .lookup_field(HeaderField::UnixFds)
                .and_then(|v| v.value().as_u32()),
            Some(0)
        );
        assert_eq!(serialize_message_le(&parsed), bytes);
    }

    #[test]
    fn body_size_matches_serialized_body_length() {
        let msg = Message::method_return(4, 3, "com.example", vec![DValue::Int64(-1)]);
        let bytes = serialize_message_le(&msg);
        let parsed = parse_message_le(&bytes).unwrap();
        let header_with_padding = bytes.len() as u32 - parsed.body_size().unwrap();
        assert_eq!(header_with_padding % 8, 0);
        assert_eq!(parsed.flags(), Some(0));
        assert_eq!(
            parsed
                .lookup_field(HeaderField::ReplySerial)
                .and_then(|v| v.value().as_u32()),
            Some(3)
        );
    }

    #[test]
    fn missing_signature_field_is_rejected() {
        let mut arena = TypeArena::new();
        let field_type = arena.alloc_struct(vec![TypeArena::BYTE, TypeArena::VARIANT]);
        let header = DValue::Struct(vec![
            DValue::Byte(b'l'),
            DValue::Byte(1),
            DValue::Byte(0),
            DValue::Byte(1),
            DValue::Uint32(4),
            DValue::Uint32(9),
            DValue::Array(Array::new(&arena, field_type, vec![])),
        ]);
        let msg = Message::from_parts(header, vec![DValue::Uint32(5)]);
        let bytes = serialize_message_le(&msg);
        let err = parse_message(&bytes).unwrap_err();
        assert!(err.msg.contains("missing signature header field"));
    }

    #[test]
    fn bad_endianness_byte_is_rejected() {
        let err = parse_message(&[b'x', 1, 0, 1]).unwrap_err();
        assert_eq!(err.pos, 0);
        assert!(err.msg.contains("bad endianness byte"));
        assert!(parse_message(&[]).is_err());
    }

    #[test]
    fn counts_fd_indices_anywhere_in_the_body() {
        let body = vec![
            DValue::UnixFd(0),
            DValue::Struct(vec![
                DValue::UnixFd(1),
                DValue::Variant(Box::new(Variant::new(DValue::UnixFd(2)))),
            ]),
            DValue::Uint32(5),
        ];
        let msg = Message::method_call(1, "/f", "i.f", "d.f", "M", body);
        assert_eq!(msg.count_unix_fds(), 3);
    }

    #[test]
    fn unknown_message_types_read_as_invalid() {
        assert_eq!(MessageType::from_byte(0), MessageType::Invalid);
        assert_eq!(MessageType::from_byte(200), MessageType::Invalid);
        assert_eq!(MessageType::from_byte(2), MessageType::MethodReturn);
    }
}
