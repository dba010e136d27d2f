//! A codec for the D-Bus wire format.
//!
//! This crate parses a byte stream into a structured in-memory
//! representation of D-Bus messages and serializes such representations
//! back to the wire, byte-identically. It deliberately stops at the
//! codec boundary: there is no bus connection, no authentication
//! handshake and no socket handling here, so it can sit underneath any
//! transport that delivers bytes.
//!
//! The pieces fit together like this:
//!
//! - [`types`] models D-Bus type signatures as trees of [`DType`] nodes
//!   owned by a [`TypeArena`], and parses signature strings.
//! - [`value`] models typed values as [`DValue`] trees.
//! - [`parse`] is an incremental pull-parser kernel: a parse is a single
//!   continuation plus a byte position, fed arbitrary-sized chunks
//!   within bounds the parser advertises. This makes it easy to feed
//!   network data as it arrives, reject bad input early, and survive
//!   arbitrarily deep nesting without host-stack recursion.
//! - [`de`] composes the kernel into per-type value parsers and the
//!   whole-message parser; [`ser`] is the matching two-pass serializer
//!   (a dry run discovers array byte lengths, the emit pass writes
//!   them without backpatching).
//! - [`message`] is the message model: the fixed header shape, field
//!   codes, and constructors for the common message kinds.
//! - [`random`] generates well-typed (type, value) pairs for round-trip
//!   testing.
//!
//! Parsing a complete message:
//!
//! ```rust
//! use dbus_wire::{parse_message, serialize_message, Message, DValue};
//!
//! let msg = Message::method_call(1, "/obj", "com.example.Iface",
//!     "com.example", "Ping", vec![DValue::Uint32(7)]);
//! let bytes = serialize_message(&msg);
//! let parsed = parse_message(&bytes).unwrap();
//! assert_eq!(parsed.body(), msg.body());
//! ```
//!
//! Feeding a parser incrementally:
//!
//! ```rust
//! use dbus_wire::de::message_parser_le;
//! # use dbus_wire::{serialize_message, Message};
//! # let bytes = serialize_message(&Message::hello(1));
//!
//! let mut parser = message_parser_le().unwrap();
//! let mut offset = 0usize;
//! while parser.max_required() > 0 {
//!     let want = parser.max_required() as usize;
//!     let chunk = &bytes[offset..(offset + want).min(bytes.len())];
//!     parser.feed(chunk).unwrap();
//!     offset += chunk.len();
//! }
//! let msg = parser.into_value();
//! assert_eq!(msg.serial(), Some(1));
//! ```

mod align;
pub mod de;
pub mod error;
pub mod message;
pub mod parse;
pub mod random;
pub mod ser;
pub mod types;
pub mod value;

pub use de::{parse_message, parse_message_be, parse_message_le};
pub use error::{ParseError, Result};
pub use message::{flags, HeaderField, Message, MessageType};
pub use random::RandomGen;
pub use ser::{serialize_message, serialize_message_be, serialize_message_le, serialize_value};
pub use types::{DType, TypeArena, TypeId};
pub use value::{Array, DValue, DictEntry, Variant};
