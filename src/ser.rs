//! Two-pass serialization.
//!
//! Pass one runs a dry-run serializer over the value: it only advances a
//! position counter, and records the byte length of every array it
//! visits in an append-only table (the slot is reserved before the
//! elements are measured, so nested arrays land in preorder). Pass two
//! writes into a buffer, consuming the recorded lengths in the same
//! order. This avoids backpatching the output buffer and handles nested
//! arrays without any length bookkeeping in the value model itself.
//!
//! Serialization is infallible for any value the constructors accept.

use byteorder::ByteOrder;
use std::marker::PhantomData;

use crate::align::align;
use crate::message::Message;
use crate::value::DValue;

/// Value written into an array length slot until the real length is
/// known. Never visible in the output.
const SIZE_PLACEHOLDER: u32 = 0xDEAD_BEEF;

/// Sink for the wire encoding. Multi-byte writes are endianness-aware in
/// the buffer-backed implementation and position-only in the dry runs.
pub trait Serializer {
    fn write_byte(&mut self, c: u8);
    fn write_bytes(&mut self, buf: &[u8]);
    fn write_u16(&mut self, x: u16);
    fn write_u32(&mut self, x: u32);
    fn write_u64(&mut self, x: u64);

    fn write_f64(&mut self, d: f64) {
        self.write_u64(d.to_bits());
    }

    /// Write zero bytes until the position reaches the next multiple of
    /// `alignment` (a power of two).
    fn insert_padding(&mut self, alignment: usize);

    /// Number of bytes serialized so far.
    fn pos(&self) -> usize;

    /// Serialize one array. The callback receives the serializer and the
    /// array's byte length (a placeholder during the dry run) and
    /// returns the length it measured; the two passes must visit arrays
    /// in the same order.
    fn record_array_size(&mut self, f: &mut dyn FnMut(&mut dyn Serializer, u32) -> u32);
}

/// Dry run that only counts bytes. Used for `serialized_size`.
#[derive(Default)]
pub struct SizeCounter {
    pos: usize,
}

impl SizeCounter {
    pub fn new() -> SizeCounter {
        SizeCounter::default()
    }
}

impl Serializer for SizeCounter {
    fn write_byte(&mut self, _c: u8) {
        self.pos += 1;
    }

    fn write_bytes(&mut self, buf: &[u8]) {
        self.pos += buf.len();
    }

    fn write_u16(&mut self, _x: u16) {
        self.pos += 2;
    }

    fn write_u32(&mut self, _x: u32) {
        self.pos += 4;
    }

    fn write_u64(&mut self, _x: u64) {
        self.pos += 8;
    }

    fn insert_padding(&mut self, alignment: usize) {
        self.pos = align(self.pos, alignment);
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn record_array_size(&mut self, f: &mut dyn FnMut(&mut dyn Serializer, u32) -> u32) {
        f(self, SIZE_PLACEHOLDER);
    }
}

/// Dry run that additionally fills the array length table for the emit
/// pass.
#[derive(Default)]
pub struct SizeRecorder {
    pos: usize,
    sizes: Vec<u32>,
}

impl SizeRecorder {
    pub fn new() -> SizeRecorder {
        SizeRecorder::default()
    }

    pub fn into_sizes(self) -> Vec<u32> {
        self.sizes
    }
}

impl Serializer for SizeRecorder {
    fn write_byte(&mut self, _c: u8) {
        self.pos += 1;
    }

    fn write_bytes(&mut self, buf: &[u8]) {
        self.pos += buf.len();
    }

    fn write_u16(&mut self, _x: u16) {
        self.pos += 2;
    }

    fn write_u32(&mut self, _x: u32) {
        self.pos += 4;
    }

    fn write_u64(&mut self, _x: u64) {
        self.pos += 8;
    }

    fn insert_padding(&mut self, alignment: usize) {
        self.pos = align(self.pos, alignment);
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn record_array_size(&mut self, f: &mut dyn FnMut(&mut dyn Serializer, u32) -> u32) {
        // Reserve the slot before recursing so nested arrays land after
        // their parent, matching the emit pass's read order.
        let slot = self.sizes.len();
        self.sizes.push(SIZE_PLACEHOLDER);
        let measured = f(self, SIZE_PLACEHOLDER);
        self.sizes[slot] = measured;
    }
}

/// Emit pass: writes the encoding into a growing buffer under byte order
/// `E`, reading array lengths from the table the dry run produced.
pub struct ByteWriter<E: ByteOrder> {
    buf: Vec<u8>,
    sizes: Vec<u32>,
    next_array: usize,
    _endian: PhantomData<fn() -> E>,
}

impl<E: ByteOrder> ByteWriter<E> {
    pub fn new(sizes: Vec<u32>, capacity: usize) -> ByteWriter<E> {
        ByteWriter {
            buf: Vec::with_capacity(capacity),
            sizes,
            next_array: 0,
            _endian: PhantomData,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl<E: ByteOrder> Serializer for ByteWriter<E> {
    fn write_byte(&mut self, c: u8) {
        self.buf.push(c);
    }

    fn write_bytes(&mut self, buf: &[u8]) {
        self.buf.extend_from_slice(buf);
    }

    fn write_u16(&mut self, x: u16) {
        let mut tmp = [0u8; 2];
        E::write_u16(&mut tmp, x);
        self.buf.extend_from_slice(&tmp);
    }

    fn write_u32(&mut self, x: u32) {
        let mut tmp = [0u8; 4];
        E::write_u32(&mut tmp, x);
        self.buf.extend_from_slice(&tmp);
    }

    fn write_u64(&mut self, x: u64) {
        let mut tmp = [0u8; 8];
        E::write_u64(&mut tmp, x);
        self.buf.extend_from_slice(&tmp);
    }

    fn insert_padding(&mut self, alignment: usize) {
        let new_len = align(self.buf.len(), alignment);
        self.buf.resize(new_len, 0);
    }

    fn pos(&self) -> usize {
        self.buf.len()
    }

    fn record_array_size(&mut self, f: &mut dyn FnMut(&mut dyn Serializer, u32) -> u32) {
        let size = *self
            .sizes
            .get(self.next_array)
            .expect("array size table exhausted");
        self.next_array += 1;
        f(self, size);
    }
}

/// Serialize a single value to bytes under byte order `E`.
pub fn serialize_value<E: ByteOrder>(value: &DValue) -> Vec<u8> {
    let mut recorder = SizeRecorder::new();
    value.serialize(&mut recorder);
    let size = recorder.pos();
    let mut writer = ByteWriter::<E>::new(recorder.into_sizes(), size);
    value.serialize(&mut writer);
    writer.into_bytes()
}

/// Serialize a whole message (header, padding, body) under byte order
/// `E`.
pub fn serialize_message_endian<E: ByteOrder>(message: &Message) -> Vec<u8> {
    let mut recorder = SizeRecorder::new();
    message.serialize(&mut recorder);
    let size = recorder.pos();
    let mut writer = ByteWriter::<E>::new(recorder.into_sizes(), size);
    message.serialize(&mut writer);
    writer.into_bytes()
}

pub fn serialize_message_le(message: &Message) -> Vec<u8> {
    serialize_message_endian::<byteorder::LE>(message)
}

pub fn serialize_message_be(message: &Message) -> Vec<u8> {
    serialize_message_endian::<byteorder::BE>(message)
}

/// Serialize a message under the byte order its own header declares
/// (`'B'` selects big-endian, anything else little-endian).
pub fn serialize_message(message: &Message) -> Vec<u8> {
    if message.endianness() == Some(b'B') {
        serialize_message_be(message)
    } else {
        serialize_message_le(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeArena;
    use crate::value::{Array, DictEntry, Variant};
    use byteorder::{BE, LE};

    #[test]
    fn serialize_byte() {
        let bytes = serialize_value::<LE>(&DValue::Byte(0x42));
        assert_eq!(bytes, vec![0x42]);
    }

    #[test]
    fn serialize_u32_both_orders() {
        let v = DValue::Uint32(0x0102_0304);
        assert_eq!(serialize_value::<LE>(&v), vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(serialize_value::<BE>(&v), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn serialize_int() {
        let bytes = serialize_value::<LE>(&DValue::Int32(37));
        assert_eq!(bytes, vec![37, 0, 0, 0]);
    }

    #[test]
    fn serialize_empty_array() {
        let arena = TypeArena::new();
        let v = DValue::Array(Array::new(&arena, TypeArena::BYTE, vec![]));
        assert_eq!(serialize_value::<LE>(&v), vec![0, 0, 0, 0]);
    }

    #[test]
    fn serialize_u32_array() {
        let arena = TypeArena::new();
        let v = DValue::Array(Array::new(
            &arena,
            TypeArena::UINT32,
            vec![DValue::Uint32(0x11), DValue::Uint32(0x22)],
        ));
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![8, 0, 0, 0, 0x11, 0, 0, 0, 0x22, 0, 0, 0]
        );
    }

    #[test]
    fn serialize_intary() {
        let v = DValue::Array(Array::from_elements(
            (1..=4).map(DValue::Int32).collect(),
        ));
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![16, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0]
        );
    }

    #[test]
    fn serialize_struct_byte_u32() {
        let v = DValue::Struct(vec![DValue::Byte(0x01), DValue::Uint32(0x02)]);
        assert_eq!(serialize_value::<LE>(&v), vec![1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn serialize_variant_u32() {
        let v = DValue::Variant(Box::new(Variant::new(DValue::Uint32(0x7f))));
        // Signature "u" occupies bytes 0..3, one pad byte aligns the u32.
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![1, b'u', 0, 0, 0x7f, 0, 0, 0]
        );
    }

    #[test]
    fn serialize_variant_int() {
        let v = DValue::Variant(Box::new(Variant::new(DValue::Int32(37))));
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![1, 105, 0, 0, 37, 0, 0, 0]
        );
    }

    #[test]
    fn serialize_nested_struct() {
        let inner = DValue::Struct(vec![DValue::Str("Hello".into()), DValue::Double(8.3)]);
        let v = DValue::Struct(vec![
            DValue::Str("Hi".into()),
            DValue::Double(0.2),
            inner,
        ]);
        assert_eq!(v.signature(), "(sd(sd))");
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![
                2, 0, 0, 0, 72, 105, 0, 0, 154, 153, 153, 153, 153, 153, 201, 63, 5, 0, 0, 0, 72,
                101, 108, 108, 111, 0, 0, 0, 0, 0, 0, 0, 154, 153, 153, 153, 153, 153, 32, 64,
            ]
        );
    }

    #[test]
    fn serialize_dict_of_variants() {
        let entry = |k: &str, v: DValue| {
            DValue::DictEntry(Box::new(DictEntry::new(
                DValue::Str(k.into()),
                DValue::Variant(Box::new(Variant::new(v))),
            )))
        };
        let v = DValue::Array(Array::from_elements(vec![
            entry("a", DValue::Str("Hi".into())),
            entry("b", DValue::Double(0.2)),
            entry(
                "c",
                DValue::Struct(vec![DValue::Str("Hello".into()), DValue::Double(8.3)]),
            ),
        ]));
        assert_eq!(v.signature(), "a{sv}");
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![
                88, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 97, 0, 1, 115, 0, 0, 0, 0, 2, 0, 0, 0, 72,
                105, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 98, 0, 1, 100, 0, 0, 0, 0, 0, 0, 0, 0, 154,
                153, 153, 153, 153, 153, 201, 63, 1, 0, 0, 0, 99, 0, 4, 40, 115, 100, 41, 0, 0, 0,
                0, 0, 5, 0, 0, 0, 72, 101, 108, 108, 111, 0, 0, 0, 0, 0, 0, 0, 154, 153, 153, 153,
                153, 153, 32, 64,
            ]
        );
    }

    #[test]
    fn nested_arrays_share_one_size_table_in_preorder() {
        let inner1 = DValue::Array(Array::from_elements(vec![DValue::Byte(1), DValue::Byte(2)]));
        let inner2 = DValue::Array(Array::from_elements(vec![DValue::Byte(3)]));
        let v = DValue::Array(Array::from_elements(vec![inner1, inner2]));
        assert_eq!(v.signature(), "aay");
        assert_eq!(
            serialize_value::<LE>(&v),
            vec![
                // outer length 13: inner1 (4 + 2) + pad (2) + inner2 (4 + 1)
                13, 0, 0, 0, 2, 0, 0, 0, 1, 2, 0, 0, 1, 0, 0, 0, 3,
            ]
        );
    }

    #[test]
    fn determinism() {
        let v = DValue::Struct(vec![
            DValue::Str("abc".into()),
            DValue::Variant(Box::new(Variant::new(DValue::Double(f64::NAN)))),
        ]);
        assert_eq!(serialize_value::<LE>(&v), serialize_value::<LE>(&v));
        assert_eq!(serialize_value::<BE>(&v), serialize_value::<BE>(&v));
    }
}
