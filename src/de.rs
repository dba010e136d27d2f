//! Per-type value parsers and the whole-message parser.
//!
//! Every parser here is a continuation over the kernel in [`crate::parse`]:
//! it first consumes the zero padding that brings the cursor up to the
//! type's alignment, then the type-specific body, then hands the value to
//! the next continuation. Composite types chain element parsers through
//! boxed continuations, so nesting depth costs heap, not host stack.
//!
//! The byte order is a type parameter `E`, selected once per message from
//! the endianness byte.

use byteorder::{ByteOrder, BE, LE};
use log::trace;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::align::padding_for;
use crate::error::{ParseError, Result};
use crate::message::{self, Message};
use crate::parse::{
    read_byte, read_n_bytes, read_u16, read_u32, read_u64, read_zeros, Cont, Parse, State,
};
use crate::types::{DType, TypeArena, TypeId};
use crate::value::{Array, DValue, DictEntry, Variant};

type ValueCont<T> = Box<dyn FnOnce(&State, DValue) -> Result<Cont<T>> + Send>;
type SeqCont<T> = Box<dyn FnOnce(&State, Vec<DValue>) -> Result<Cont<T>> + Send>;

/// Parser for one value of the type `t` denotes in `types`: alignment
/// padding first, then the body.
fn value_cont<E, T>(
    types: Arc<TypeArena>,
    t: TypeId,
    state: &State,
    cont: ValueCont<T>,
) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    let pad = padding_for(state.pos(), types.alignment(t) as u64);
    read_zeros(state, pad, move |st: &State| {
        value_body::<E, T>(types, t, st, cont)
    })
}

fn value_body<E, T>(
    types: Arc<TypeArena>,
    t: TypeId,
    state: &State,
    cont: ValueCont<T>,
) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    let node = types.get(t).clone();
    match node {
        DType::Byte => Ok(read_byte(move |st: &State, c| cont(st, DValue::Byte(c)))),
        DType::Bool => Ok(read_u32::<E, _, _>(move |st: &State, x| match x {
            0 => cont(st, DValue::Bool(false)),
            1 => cont(st, DValue::Bool(true)),
            _ => Err(ParseError::new(st.pos(), "boolean value that is not 0 or 1")),
        })),
        DType::Int16 => Ok(read_u16::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Int16(x as i16))
        })),
        DType::Uint16 => Ok(read_u16::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Uint16(x))
        })),
        DType::Int32 => Ok(read_u32::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Int32(x as i32))
        })),
        DType::Uint32 => Ok(read_u32::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Uint32(x))
        })),
        DType::Int64 => Ok(read_u64::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Int64(x as i64))
        })),
        DType::Uint64 => Ok(read_u64::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Uint64(x))
        })),
        DType::Double => Ok(read_u64::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::Double(f64::from_bits(x)))
        })),
        DType::UnixFd => Ok(read_u32::<E, _, _>(move |st: &State, x| {
            cont(st, DValue::UnixFd(x))
        })),
        DType::String => string32_body::<E, T, _>(move |st: &State, s| cont(st, DValue::Str(s))),
        DType::Path => string32_body::<E, T, _>(move |st: &State, s| cont(st, DValue::Path(s))),
        DType::Signature => string8_body(move |st: &State, s| cont(st, DValue::Signature(s))),
        DType::Variant => variant_body::<E, T>(cont),
        DType::Array(elem) => array_body::<E, T>(types, elem, cont),
        DType::Struct(fields) => values_seq_start::<E, T>(
            types,
            fields,
            state,
            Box::new(move |st: &State, vals| cont(st, DValue::Struct(vals))),
        ),
        DType::DictEntry(k, v) => {
            let key_types = types.clone();
            value_cont::<E, T>(
                key_types,
                k,
                state,
                Box::new(move |st: &State, key| {
                    value_cont::<E, T>(
                        types,
                        v,
                        st,
                        Box::new(move |st: &State, value| {
                            cont(st, DValue::DictEntry(Box::new(DictEntry::new(key, value))))
                        }),
                    )
                }),
            )
        }
    }
}

/// Length-prefixed bytes plus the NUL terminator, delivered as a string.
fn string_tail<T, F>(state: &State, len: u64, f: F) -> Result<Cont<T>>
where
    F: FnOnce(&State, String) -> Result<Cont<T>> + Send + 'static,
    T: Send + 'static,
{
    read_n_bytes(state, len, move |_st: &State, bytes| {
        Ok(read_byte(move |st: &State, nul| {
            if nul != 0 {
                return Err(ParseError::new(st.pos(), "non-zero string terminator"));
            }
            let s = String::from_utf8(bytes)
                .map_err(|_| ParseError::new(st.pos(), "invalid UTF-8 in string"))?;
            f(st, s)
        }))
    })
}

fn string32_body<E, T, F>(f: F) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    F: FnOnce(&State, String) -> Result<Cont<T>> + Send + 'static,
    T: Send + 'static,
{
    Ok(read_u32::<E, _, _>(move |st: &State, len| {
        string_tail(st, u64::from(len), f)
    }))
}

fn string8_body<T, F>(f: F) -> Result<Cont<T>>
where
    F: FnOnce(&State, String) -> Result<Cont<T>> + Send + 'static,
    T: Send + 'static,
{
    Ok(read_byte(move |st: &State, len| {
        string_tail(st, u64::from(len), f)
    }))
}

fn variant_body<E, T>(cont: ValueCont<T>) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    Ok(read_byte(move |st: &State, len| {
        let len = u64::from(len);
        if st.pos().checked_add(len).is_none() {
            return Err(ParseError::new(st.pos(), "signature length integer overflow"));
        }
        read_n_bytes(st, len, move |st: &State, sig_bytes| {
            let sig_start = st.pos() - sig_bytes.len() as u64;
            // The arena built here is owned by the continuation chain
            // until the variant value has been constructed.
            let mut arena = TypeArena::new();
            let parsed = arena.parse_signature(&sig_bytes).map_err(|mut e| {
                e.pos += sig_start;
                e
            })?;
            let inner = match parsed.as_slice() {
                [] => return Err(ParseError::new(st.pos(), "empty variant signature")),
                [t] => *t,
                _ => {
                    return Err(ParseError::new(
                        st.pos(),
                        "incorrect variant signature length",
                    ));
                }
            };
            let types = Arc::new(arena);
            Ok(read_byte(move |st: &State, nul| {
                if nul != 0 {
                    return Err(ParseError::new(st.pos(), "non-zero string terminator"));
                }
                value_cont::<E, T>(
                    types,
                    inner,
                    st,
                    Box::new(move |st: &State, v| cont(st, DValue::Variant(Box::new(Variant::new(v))))),
                )
            }))
        })
    }))
}

fn array_body<E, T>(types: Arc<TypeArena>, elem: TypeId, cont: ValueCont<T>) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    Ok(read_u32::<E, _, _>(move |st: &State, len| {
        let pad = padding_for(st.pos(), types.alignment(elem) as u64);
        read_zeros(st, pad, move |st: &State| {
            let end = st
                .pos()
                .checked_add(u64::from(len))
                .ok_or_else(|| ParseError::new(st.pos(), "array length integer overflow"))?;
            array_elements::<E, T>(types, elem, end, Vec::new(), st, cont)
        })
    }))
}

// Elements are parsed until the cursor lands exactly on `end`; an element
// that carries the cursor past `end` means the declared byte length lied.
fn array_elements<E, T>(
    types: Arc<TypeArena>,
    elem: TypeId,
    end: u64,
    mut elements: Vec<DValue>,
    state: &State,
    cont: ValueCont<T>,
) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    match state.pos().cmp(&end) {
        Ordering::Less => {
            let start = state.pos();
            let elem_types = types.clone();
            value_cont::<E, T>(
                elem_types,
                elem,
                state,
                Box::new(move |st: &State, v| {
                    // A zero-sized element (an empty struct) would never
                    // close the gap to `end`; reject instead of looping.
                    if st.pos() == start {
                        return Err(ParseError::new(st.pos(), "array element consumed no bytes"));
                    }
                    elements.push(v);
                    array_elements::<E, T>(types, elem, end, elements, st, cont)
                }),
            )
        }
        Ordering::Equal => cont(state, DValue::Array(Array::new(&types, elem, elements))),
        Ordering::Greater => Err(ParseError::new(state.pos(), "incorrect array length")),
    }
}

fn values_seq_start<E, T>(
    types: Arc<TypeArena>,
    list: Vec<TypeId>,
    state: &State,
    cont: SeqCont<T>,
) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    values_seq::<E, T>(types, list, 0, Vec::new(), state, cont)
}

fn values_seq<E, T>(
    types: Arc<TypeArena>,
    list: Vec<TypeId>,
    i: usize,
    mut acc: Vec<DValue>,
    state: &State,
    cont: SeqCont<T>,
) -> Result<Cont<T>>
where
    E: ByteOrder + 'static,
    T: Send + 'static,
{
    if i < list.len() {
        let t = list[i];
        let item_types = types.clone();
        value_cont::<E, T>(
            item_types,
            t,
            state,
            Box::new(move |st: &State, v| {
                acc.push(v);
                values_seq::<E, T>(types, list, i + 1, acc, st, cont)
            }),
        )
    } else {
        cont(state, acc)
    }
}

fn message_cont<E>() -> Result<Cont<Message>>
where
    E: ByteOrder + 'static,
{
    let mut arena = TypeArena::new();
    let header = message::header_type(&mut arena);
    let types = Arc::new(arena);
    let state = State::new(0);
    value_cont::<E, Message>(
        types,
        header,
        &state,
        Box::new(|st: &State, header_val| {
            // The body is 8-byte aligned.
            let pad = padding_for(st.pos(), 8);
            read_zeros(st, pad, move |st: &State| {
                let body_size = message::header_body_size(&header_val);
                trace!("message header parsed, body size {}", body_size);
                if body_size == 0 {
                    return Ok(Cont::Done(Message::from_parts(header_val, Vec::new())));
                }
                let sig: String = match message::header_signature_field(&header_val) {
                    Some(s) => s.to_string(),
                    None => {
                        return Err(ParseError::new(st.pos(), "missing signature header field"));
                    }
                };
                trace!("message body signature {:?}", sig);
                let mut arena = TypeArena::new();
                let body_types = arena.parse_signature(sig.as_bytes())?;
                let types = Arc::new(arena);
                values_seq_start::<E, Message>(
                    types,
                    body_types,
                    st,
                    Box::new(move |_st: &State, body| {
                        Ok(Cont::Done(Message::from_parts(header_val, body)))
                    }),
                )
            })
        }),
    )
}

/// Incremental parser for a little-endian message.
pub fn message_parser_le() -> Result<Parse<Message>> {
    Ok(Parse::new(message_cont::<LE>()?))
}

/// Incremental parser for a big-endian message.
pub fn message_parser_be() -> Result<Parse<Message>> {
    Ok(Parse::new(message_cont::<BE>()?))
}

/// Incremental parser for one value of type `t`.
pub fn value_parser<E>(types: Arc<TypeArena>, t: TypeId) -> Result<Parse<DValue>>
where
    E: ByteOrder + 'static,
{
    let state = State::new(0);
    let cont = value_cont::<E, DValue>(types, t, &state, Box::new(|_st: &State, v| Ok(Cont::Done(v))))?;
    Ok(Parse::new(cont))
}

/// Parse one value of type `t` from a complete buffer.
pub fn parse_value_buf<E>(types: Arc<TypeArena>, t: TypeId, buf: &[u8]) -> Result<DValue>
where
    E: ByteOrder + 'static,
{
    drive(value_parser::<E>(types, t)?, buf)
}

pub fn parse_message_le(buf: &[u8]) -> Result<Message> {
    drive(message_parser_le()?, buf)
}

pub fn parse_message_be(buf: &[u8]) -> Result<Message> {
    drive(message_parser_be()?, buf)
}

/// Parse a complete message, selecting the byte order from the first
/// byte (`'l'` or `'B'`).
pub fn parse_message(buf: &[u8]) -> Result<Message> {
    match buf.first() {
        Some(b'l') => parse_message_le(buf),
        Some(b'B') => parse_message_be(buf),
        _ => Err(ParseError::new(0, "bad endianness byte at message start")),
    }
}

// Feed a complete buffer to a parser, always supplying as many bytes as
// it asks for.
fn drive<T>(mut p: Parse<T>, buf: &[u8]) -> Result<T> {
    loop {
        let required = p.max_required();
        let pos = p.pos();
        if required == 0 {
            if pos != buf.len() as u64 {
                return Err(ParseError::new(pos, "leftover data"));
            }
            return Ok(p.into_value());
        }
        let remaining = buf.len() as u64 - pos;
        if required > remaining {
            return Err(ParseError::new(pos, "not enough bytes"));
        }
        p.feed(&buf[pos as usize..(pos + required) as usize])?;
    }
}
