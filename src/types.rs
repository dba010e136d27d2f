//! The D-Bus type model.
//!
//! Types form trees: composite types (array, struct, dict entry) refer
//! to their sub-types, and those sub-types must outlive them. A
//! [`TypeArena`] owns every composite node and hands out stable
//! [`TypeId`] handles into itself; the 14 leaf types are pre-seeded at
//! fixed well-known ids, identical in every arena, so a leaf handle is
//! meaningful everywhere. Arenas are append-only and never intern:
//! two struct types are only identical if their field handles are
//! pointwise identical, which separate allocations cannot guarantee.

use crate::error::{ParseError, Result};

/// Opaque handle to a type node inside a [`TypeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

/// One node of a D-Bus type tree. Composite variants hold handles into
/// the arena that owns the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DType {
    Byte,
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    UnixFd,
    String,
    Path,
    Signature,
    Variant,
    Array(TypeId),
    Struct(Vec<TypeId>),
    DictEntry(TypeId, TypeId),
}

const LEAVES: [DType; 14] = [
    DType::Byte,
    DType::Bool,
    DType::Int16,
    DType::Uint16,
    DType::Int32,
    DType::Uint32,
    DType::Int64,
    DType::Uint64,
    DType::Double,
    DType::UnixFd,
    DType::String,
    DType::Path,
    DType::Signature,
    DType::Variant,
];

/// Append-only arena owning runtime-allocated composite types.
#[derive(Clone, Debug)]
pub struct TypeArena {
    nodes: Vec<DType>,
}

impl Default for TypeArena {
    fn default() -> Self {
        TypeArena::new()
    }
}

impl TypeArena {
    pub const BYTE: TypeId = TypeId(0);
    pub const BOOL: TypeId = TypeId(1);
    pub const INT16: TypeId = TypeId(2);
    pub const UINT16: TypeId = TypeId(3);
    pub const INT32: TypeId = TypeId(4);
    pub const UINT32: TypeId = TypeId(5);
    pub const INT64: TypeId = TypeId(6);
    pub const UINT64: TypeId = TypeId(7);
    pub const DOUBLE: TypeId = TypeId(8);
    pub const UNIX_FD: TypeId = TypeId(9);
    pub const STRING: TypeId = TypeId(10);
    pub const PATH: TypeId = TypeId(11);
    pub const SIGNATURE: TypeId = TypeId(12);
    pub const VARIANT: TypeId = TypeId(13);

    pub fn new() -> TypeArena {
        TypeArena {
            nodes: LEAVES.to_vec(),
        }
    }

    pub fn get(&self, id: TypeId) -> &DType {
        &self.nodes[id.0 as usize]
    }

    fn alloc(&mut self, t: DType) -> TypeId {
        let id = TypeId(u32::try_from(self.nodes.len()).expect("type arena full"));
        self.nodes.push(t);
        id
    }

    pub fn alloc_array(&mut self, elem: TypeId) -> TypeId {
        self.alloc(DType::Array(elem))
    }

    pub fn alloc_struct(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.alloc(DType::Struct(fields))
    }

    pub fn alloc_dict_entry(&mut self, key: TypeId, value: TypeId) -> TypeId {
        debug_assert!(self.is_basic(key), "dict entry key must be a basic type");
        self.alloc(DType::DictEntry(key, value))
    }

    /// A basic type is anything other than array, struct, dict entry and
    /// variant. Only basic types may key a dict entry.
    pub fn is_basic(&self, id: TypeId) -> bool {
        !matches!(
            self.get(id),
            DType::Variant | DType::Array(_) | DType::Struct(_) | DType::DictEntry(..)
        )
    }

    /// Wire alignment of the type, a power of two measured from the
    /// start of the message.
    pub fn alignment(&self, id: TypeId) -> usize {
        match self.get(id) {
            DType::Byte | DType::Signature | DType::Variant => 1,
            DType::Int16 | DType::Uint16 => 2,
            DType::Bool
            | DType::Int32
            | DType::Uint32
            | DType::UnixFd
            | DType::String
            | DType::Path
            | DType::Array(_) => 4,
            DType::Int64 | DType::Uint64 | DType::Double | DType::Struct(_) | DType::DictEntry(..) => 8,
        }
    }

    pub fn write_signature(&self, id: TypeId, out: &mut String) {
        match self.get(id) {
            DType::Byte => out.push('y'),
            DType::Bool => out.push('b'),
            DType::Int16 => out.push('n'),
            DType::Uint16 => out.push('q'),
            DType::Int32 => out.push('i'),
            DType::Uint32 => out.push('u'),
            DType::Int64 => out.push('x'),
            DType::Uint64 => out.push('t'),
            DType::Double => out.push('d'),
            DType::UnixFd => out.push('h'),
            DType::String => out.push('s'),
            DType::Path => out.push('o'),
            DType::Signature => out.push('g'),
            DType::Variant => out.push('v'),
            DType::Array(elem) => {
                out.push('a');
                self.write_signature(*elem, out);
            }
            DType::Struct(fields) => {
                out.push('(');
                for f in fields {
                    self.write_signature(*f, out);
                }
                out.push(')');
            }
            DType::DictEntry(key, value) => {
                out.push('{');
                self.write_signature(*key, out);
                self.write_signature(*value, out);
                out.push('}');
            }
        }
    }

    /// Textual signature of the type. Parsing the result yields an equal
    /// type back.
    pub fn signature(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.write_signature(id, &mut out);
        out
    }

    /// Deep-copy a type from `src` into this arena. Leaf handles are
    /// shared well-known ids and map to themselves.
    pub fn clone_type(&mut self, src: &TypeArena, id: TypeId) -> TypeId {
        match src.get(id) {
            DType::Array(elem) => {
                let elem = self.clone_type(src, *elem);
                self.alloc_array(elem)
            }
            DType::Struct(fields) => {
                let fields = fields.clone();
                let fields = fields
                    .into_iter()
                    .map(|f| self.clone_type(src, f))
                    .collect();
                self.alloc_struct(fields)
            }
            DType::DictEntry(key, value) => {
                let key = self.clone_type(src, *key);
                let value = self.clone_type(src, *value);
                self.alloc_dict_entry(key, value)
            }
            _ => id,
        }
    }

    /// Parse a signature byte sequence into the types it denotes,
    /// allocating composite nodes in this arena. Accepts any number of
    /// top-level types back-to-back; error positions are relative to the
    /// start of `bytes`.
    pub fn parse_signature(&mut self, bytes: &[u8]) -> Result<Vec<TypeId>> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut result = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            let pos = i as u64;
            match b {
                b'a' => stack.push(Frame::Array),
                b'(' => stack.push(Frame::Struct(Vec::new())),
                b'{' => stack.push(Frame::DictKey),
                b')' => match stack.pop() {
                    Some(Frame::Struct(fields)) => {
                        let t = self.alloc_struct(fields);
                        self.reduce(t, &mut stack, &mut result, pos)?;
                    }
                    _ => {
                        return Err(ParseError::new(pos, "unexpected close paren in signature"));
                    }
                },
                b'}' => match stack.pop() {
                    Some(Frame::DictValue(key, Some(value))) => {
                        let t = self.alloc_dict_entry(key, value);
                        self.reduce(t, &mut stack, &mut result, pos)?;
                    }
                    _ => {
                        return Err(ParseError::new(pos, "unexpected close brace in signature"));
                    }
                },
                other => match leaf_for(other) {
                    Some(t) => self.reduce(t, &mut stack, &mut result, pos)?,
                    None => {
                        return Err(ParseError::new(
                            pos,
                            format!("invalid type character: 0x{:02x}", other),
                        ));
                    }
                },
            }
        }
        if !stack.is_empty() {
            return Err(ParseError::new(
                bytes.len() as u64,
                "incomplete type in signature",
            ));
        }
        Ok(result)
    }

    // A complete type has been produced; fold it into whatever container
    // is open, wrapping through any pending arrays.
    fn reduce(
        &mut self,
        mut t: TypeId,
        stack: &mut Vec<Frame>,
        result: &mut Vec<TypeId>,
        pos: u64,
    ) -> Result<()> {
        loop {
            match stack.pop() {
                None => {
                    result.push(t);
                    return Ok(());
                }
                Some(Frame::Array) => {
                    t = self.alloc_array(t);
                }
                Some(Frame::Struct(mut fields)) => {
                    fields.push(t);
                    stack.push(Frame::Struct(fields));
                    return Ok(());
                }
                Some(Frame::DictKey) => {
                    if !self.is_basic(t) {
                        return Err(ParseError::new(pos, "dict entry key must be a basic type"));
                    }
                    stack.push(Frame::DictValue(t, None));
                    return Ok(());
                }
                Some(Frame::DictValue(key, None)) => {
                    stack.push(Frame::DictValue(key, Some(t)));
                    return Ok(());
                }
                Some(Frame::DictValue(..)) => {
                    return Err(ParseError::new(pos, "expected close brace in dict entry"));
                }
            }
        }
    }
}

enum Frame {
    Array,
    Struct(Vec<TypeId>),
    DictKey,
    DictValue(TypeId, Option<TypeId>),
}

fn leaf_for(c: u8) -> Option<TypeId> {
    match c {
        b'y' => Some(TypeArena::BYTE),
        b'b' => Some(TypeArena::BOOL),
        b'n' => Some(TypeArena::INT16),
        b'q' => Some(TypeArena::UINT16),
        b'i' => Some(TypeArena::INT32),
        b'u' => Some(TypeArena::UINT32),
        b'x' => Some(TypeArena::INT64),
        b't' => Some(TypeArena::UINT64),
        b'd' => Some(TypeArena::DOUBLE),
        b'h' => Some(TypeArena::UNIX_FD),
        b's' => Some(TypeArena::STRING),
        b'o' => Some(TypeArena::PATH),
        b'g' => Some(TypeArena::SIGNATURE),
        b'v' => Some(TypeArena::VARIANT),
        _ => None,
    }
}
