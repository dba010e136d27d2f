//! The D-Bus value model.
//!
//! [`DValue`] is a tagged tree paralleling the type model. Values own
//! their children exclusively. The one place a value needs to keep a
//! *type* alive is an array, whose element type cannot be recovered from
//! the elements when there are none, so every array owns a private
//! [`TypeArena`] holding a clone of that type.

use std::fmt;

use crate::ser::{Serializer, SizeCounter};
use crate::types::{TypeArena, TypeId};

/// A typed D-Bus value.
///
/// `PartialEq` compares doubles by bit pattern, so values holding NaN
/// compare equal to their own round-trip through the wire.
#[derive(Clone, Debug)]
pub enum DValue {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    /// Index into the out-of-band file-descriptor array, never a
    /// descriptor number.
    UnixFd(u32),
    Str(String),
    Path(String),
    Signature(String),
    Variant(Box<Variant>),
    Array(Array),
    Struct(Vec<DValue>),
    DictEntry(Box<DictEntry>),
}

/// A self-describing container: one nested value plus the cached
/// signature of its type.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    value: DValue,
    signature: String,
}

impl Variant {
    pub fn new(value: DValue) -> Variant {
        let signature = value.signature();
        Variant { value, signature }
    }

    pub fn value(&self) -> &DValue {
        &self.value
    }

    pub fn into_value(self) -> DValue {
        self.value
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// An ordered sequence of elements of one type. The element type lives
/// in an arena owned by the array itself, which is what keeps it alive
/// for empty arrays.
#[derive(Clone, Debug)]
pub struct Array {
    types: TypeArena,
    elem: TypeId,
    elements: Vec<DValue>,
}

impl Array {
    /// Build an array of elements of the type `elem` denotes in `src`.
    /// The type is cloned into a private arena.
    pub fn new(src: &TypeArena, elem: TypeId, elements: Vec<DValue>) -> Array {
        let mut types = TypeArena::new();
        let elem = types.clone_type(src, elem);
        let array = Array {
            types,
            elem,
            elements,
        };
        debug_assert!(
            array
                .elements
                .iter()
                .all(|e| e.signature() == array.elem_signature()),
            "array elements must all have the element type"
        );
        array
    }

    /// Build a non-empty array, deducing the element type from the first
    /// element.
    pub fn from_elements(elements: Vec<DValue>) -> Array {
        let mut types = TypeArena::new();
        let elem = elements
            .first()
            .expect("from_elements requires at least one element")
            .make_type(&mut types);
        let array = Array {
            types,
            elem,
            elements,
        };
        debug_assert!(
            array
                .elements
                .iter()
                .all(|e| e.signature() == array.elem_signature()),
            "array elements must all have the element type"
        );
        array
    }

    pub fn elements(&self) -> &[DValue] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elem_alignment(&self) -> usize {
        self.types.alignment(self.elem)
    }

    pub fn elem_signature(&self) -> String {
        self.types.signature(self.elem)
    }

    pub fn write_elem_signature(&self, out: &mut String) {
        self.types.write_signature(self.elem, out);
    }

    /// The arena and handle of the element type.
    pub fn elem_type(&self) -> (&TypeArena, TypeId) {
        (&self.types, self.elem)
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Array) -> bool {
        self.elem_signature() == other.elem_signature() && self.elements == other.elements
    }
}

/// A key/value pair. The key must be a basic type.
#[derive(Clone, Debug, PartialEq)]
pub struct DictEntry {
    key: DValue,
    value: DValue,
}

impl DictEntry {
    pub fn new(key: DValue, value: DValue) -> DictEntry {
        debug_assert!(key.is_basic(), "dict entry key must be a basic type");
        DictEntry { key, value }
    }

    pub fn key(&self) -> &DValue {
        &self.key
    }

    pub fn value(&self) -> &DValue {
        &self.value
    }
}

impl DValue {
    /// Wire alignment of the value's type.
    pub fn alignment(&self) -> usize {
        match self {
            DValue::Byte(_) | DValue::Signature(_) | DValue::Variant(_) => 1,
            DValue::Int16(_) | DValue::Uint16(_) => 2,
            DValue::Bool(_)
            | DValue::Int32(_)
            | DValue::Uint32(_)
            | DValue::UnixFd(_)
            | DValue::Str(_)
            | DValue::Path(_)
            | DValue::Array(_) => 4,
            DValue::Int64(_) | DValue::Uint64(_) | DValue::Double(_) => 8,
            DValue::Struct(_) | DValue::DictEntry(_) => 8,
        }
    }

    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            DValue::Variant(_) | DValue::Array(_) | DValue::Struct(_) | DValue::DictEntry(_)
        )
    }

    pub fn write_signature(&self, out: &mut String) {
        match self {
            DValue::Byte(_) => out.push('y'),
            DValue::Bool(_) => out.push('b'),
            DValue::Int16(_) => out.push('n'),
            DValue::Uint16(_) => out.push('q'),
            DValue::Int32(_) => out.push('i'),
            DValue::Uint32(_) => out.push('u'),
            DValue::Int64(_) => out.push('x'),
            DValue::Uint64(_) => out.push('t'),
            DValue::Double(_) => out.push('d'),
            DValue::UnixFd(_) => out.push('h'),
            DValue::Str(_) => out.push('s'),
            DValue::Path(_) => out.push('o'),
            DValue::Signature(_) => out.push('g'),
            DValue::Variant(_) => out.push('v'),
            DValue::Array(arr) => {
                out.push('a');
                arr.write_elem_signature(out);
            }
            DValue::Struct(fields) => {
                out.push('(');
                for f in fields {
                    f.write_signature(out);
                }
                out.push(')');
            }
            DValue::DictEntry(e) => {
                out.push('{');
                e.key.write_signature(out);
                e.value.write_signature(out);
                out.push('}');
            }
        }
    }

    /// Signature of the value's type.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.write_signature(&mut out);
        out
    }

    /// Materialise the value's full type into `arena`.
    pub fn make_type(&self, arena: &mut TypeArena) -> TypeId {
        match self {
            DValue::Byte(_) => TypeArena::BYTE,
            DValue::Bool(_) => TypeArena::BOOL,
            DValue::Int16(_) => TypeArena::INT16,
            DValue::Uint16(_) => TypeArena::UINT16,
            DValue::Int32(_) => TypeArena::INT32,
            DValue::Uint32(_) => TypeArena::UINT32,
            DValue::Int64(_) => TypeArena::INT64,
            DValue::Uint64(_) => TypeArena::UINT64,
            DValue::Double(_) => TypeArena::DOUBLE,
            DValue::UnixFd(_) => TypeArena::UNIX_FD,
            DValue::Str(_) => TypeArena::STRING,
            DValue::Path(_) => TypeArena::PATH,
            DValue::Signature(_) => TypeArena::SIGNATURE,
            DValue::Variant(_) => TypeArena::VARIANT,
            DValue::Array(arr) => {
                let (src, elem) = arr.elem_type();
                let elem = arena.clone_type(src, elem);
                arena.alloc_array(elem)
            }
            DValue::Struct(fields) => {
                let fields = fields.iter().map(|f| f.make_type(arena)).collect();
                arena.alloc_struct(fields)
            }
            DValue::DictEntry(e) => {
                let key = e.key.make_type(arena);
                let value = e.value.make_type(arena);
                arena.alloc_dict_entry(key, value)
            }
        }
    }

    /// Serialize the value: padding up to the type's alignment, then the
    /// type-specific body.
    pub fn serialize(&self, s: &mut dyn Serializer) {
        s.insert_padding(self.alignment());
        self.serialize_after_padding(s);
    }

    /// Write the type-specific body. The cursor must already be aligned.
    pub fn serialize_after_padding(&self, s: &mut dyn Serializer) {
        match self {
            DValue::Byte(x) => s.write_byte(*x),
            DValue::Bool(b) => s.write_u32(*b as u32),
            DValue::Int16(x) => s.write_u16(*x as u16),
            DValue::Uint16(x) => s.write_u16(*x),
            DValue::Int32(x) => s.write_u32(*x as u32),
            DValue::Uint32(x) => s.write_u32(*x),
            DValue::Int64(x) => s.write_u64(*x as u64),
            DValue::Uint64(x) => s.write_u64(*x),
            DValue::Double(d) => s.write_f64(*d),
            DValue::UnixFd(i) => s.write_u32(*i),
            DValue::Str(x) | DValue::Path(x) => {
                debug_assert!(x.len() <= u32::MAX as usize, "string length must fit in u32");
                s.write_u32(x.len() as u32);
                s.write_bytes(x.as_bytes());
                s.write_byte(0);
            }
            DValue::Signature(x) => {
                debug_assert!(x.len() <= u8::MAX as usize, "signature length must fit in u8");
                s.write_byte(x.len() as u8);
                s.write_bytes(x.as_bytes());
                s.write_byte(0);
            }
            DValue::Variant(v) => {
                let sig = v.signature();
                debug_assert!(sig.len() <= u8::MAX as usize);
                s.write_byte(sig.len() as u8);
                s.write_bytes(sig.as_bytes());
                s.write_byte(0);
                v.value().serialize(s);
            }
            DValue::Array(arr) => {
                let elem_alignment = arr.elem_alignment();
                s.record_array_size(&mut |s, size| {
                    s.write_u32(size);
                    s.insert_padding(elem_alignment);
                    let before = s.pos();
                    for e in arr.elements() {
                        e.serialize(s);
                    }
                    (s.pos() - before) as u32
                });
            }
            DValue::Struct(fields) => {
                for f in fields {
                    f.serialize(s);
                }
            }
            DValue::DictEntry(e) => {
                e.key.serialize(s);
                e.value.serialize(s);
            }
        }
    }

    /// Number of bytes the value serializes to from offset zero.
    pub fn serialized_size(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.serialize(&mut counter);
        counter.pos()
    }

    pub fn as_byte(&self) -> Option<u8> {
        match self {
            DValue::Byte(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            DValue::Int16(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            DValue::Uint16(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            DValue::Int32(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            DValue::Uint32(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DValue::Int64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DValue::Uint64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_unix_fd(&self) -> Option<u32> {
        match self {
            DValue::UnixFd(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DValue::Str(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            DValue::Path(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_signature(&self) -> Option<&str> {
        match self {
            DValue::Signature(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<&Variant> {
        match self {
            DValue::Variant(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            DValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[DValue]> {
        match self {
            DValue::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_dict_entry(&self) -> Option<&DictEntry> {
        match self {
            DValue::DictEntry(e) => Some(e),
            _ => None,
        }
    }
}

impl PartialEq for DValue {
    fn eq(&self, other: &DValue) -> bool {
        use DValue::*;
        match (self, other) {
            (Byte(a), Byte(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Int16(a), Int16(b)) => a == b,
            (Uint16(a), Uint16(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Uint32(a), Uint32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Uint64(a), Uint64(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (UnixFd(a), UnixFd(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Path(a), Path(b)) => a == b,
            (Signature(a), Signature(b)) => a == b,
            (Variant(a), Variant(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Struct(a), Struct(b)) => a == b,
            (DictEntry(a), DictEntry(b)) => a == b,
            _ => false,
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[DValue], open: char, close: char) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

impl fmt::Display for DValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DValue::Byte(x) => write!(f, "0x{:02x}", x),
            DValue::Bool(b) => write!(f, "{}", b),
            DValue::Int16(x) => write!(f, "{}", x),
            DValue::Uint16(x) => write!(f, "{}", x),
            DValue::Int32(x) => write!(f, "{}", x),
            DValue::Uint32(x) => write!(f, "{}", x),
            DValue::Int64(x) => write!(f, "{}", x),
            DValue::Uint64(x) => write!(f, "{}", x),
            DValue::Double(d) => write!(f, "{}", d),
            DValue::UnixFd(i) => write!(f, "fd#{}", i),
            DValue::Str(x) | DValue::Path(x) | DValue::Signature(x) => write!(f, "{:?}", x),
            DValue::Variant(v) => write!(f, "<{} {}>", v.signature(), v.value()),
            DValue::Array(arr) => write_seq(f, arr.elements(), '[', ']'),
            DValue::Struct(fields) => write_seq(f, fields, '(', ')'),
            DValue::DictEntry(e) => write!(f, "{{{}: {}}}", e.key(), e.value()),
        }
    }
}
