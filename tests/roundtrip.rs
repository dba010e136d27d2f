//! Generator-driven consistency checks: every random well-typed value
//! must survive serialize → parse → serialize with byte-identical
//! output, under both byte orders, no matter how the input bytes are
//! chunked.

use std::sync::Arc;

use byteorder::{ByteOrder, BE, LE};
use dbus_wire::de::{message_parser_le, parse_value_buf, value_parser};
use dbus_wire::parse::Parse;
use dbus_wire::{
    serialize_message_le, serialize_value, DValue, Message, RandomGen, TypeArena,
};

const SEEDS: u64 = 300;
const MAX_DEPTH: usize = 20;
const BUDGET: usize = 1000;

// Byte equality of the re-serialization is the strong check here;
// structural equality cannot hold for every random value because arrays
// of zero-sized elements (empty structs) serialize to the same bytes
// regardless of their element count.
fn check_roundtrip<E: ByteOrder + 'static>(
    types: &Arc<TypeArena>,
    t: dbus_wire::TypeId,
    value: &DValue,
) {
    let bytes = serialize_value::<E>(value);
    let parsed = parse_value_buf::<E>(types.clone(), t, &bytes).expect("parse back");
    assert_eq!(parsed.signature(), value.signature());
    let rebytes = serialize_value::<E>(&parsed);
    assert_eq!(rebytes, bytes);
}

#[test]
fn random_values_roundtrip_in_both_byte_orders() {
    for seed in 0..SEEDS {
        let mut gen = RandomGen::new(seed, BUDGET);
        let mut arena = TypeArena::new();
        let t = gen.random_type(&mut arena, MAX_DEPTH);
        let value = gen.random_value(&arena, t, MAX_DEPTH);
        assert_eq!(value.signature(), arena.signature(t), "seed {}", seed);
        let types = Arc::new(arena);
        check_roundtrip::<LE>(&types, t, &value);
        check_roundtrip::<BE>(&types, t, &value);
    }
}

#[test]
fn random_type_signatures_roundtrip() {
    for seed in 0..SEEDS {
        let mut gen = RandomGen::new(seed, BUDGET);
        let mut arena = TypeArena::new();
        let t = gen.random_type(&mut arena, MAX_DEPTH);
        let sig = arena.signature(t);
        let mut fresh = TypeArena::new();
        let parsed = fresh.parse_signature(sig.as_bytes()).expect("signature parses");
        assert_eq!(parsed.len(), 1, "{}", sig);
        assert_eq!(fresh.signature(parsed[0]), sig);
    }
}

fn feed_chunked<T>(mut parser: Parse<T>, bytes: &[u8], chunk: usize) -> T {
    while parser.max_required() > 0 {
        let pos = parser.pos() as usize;
        let min = parser.min_required() as usize;
        let max = parser.max_required() as usize;
        let n = chunk.min(max).max(min);
        parser.feed(&bytes[pos..pos + n]).expect("chunked feed");
    }
    assert_eq!(parser.pos(), bytes.len() as u64);
    parser.into_value()
}

#[test]
fn chunked_parsing_matches_whole_buffer_parsing() {
    for seed in 0..40 {
        let mut gen = RandomGen::new(seed, 200);
        let mut arena = TypeArena::new();
        let t = gen.random_type(&mut arena, 8);
        let value = gen.random_value(&arena, t, 8);
        let types = Arc::new(arena);
        let bytes = serialize_value::<LE>(&value);

        let whole = parse_value_buf::<LE>(types.clone(), t, &bytes).unwrap();
        for chunk in [1usize, 3, 7] {
            let parser = value_parser::<LE>(types.clone(), t).unwrap();
            let chunked = feed_chunked(parser, &bytes, chunk);
            assert_eq!(chunked, whole, "seed {} chunk {}", seed, chunk);
        }
    }
}

#[test]
fn messages_roundtrip_with_generated_bodies() {
    for seed in 0..40 {
        let mut gen = RandomGen::new(seed, 200);
        let mut arena = TypeArena::new();
        let t = gen.random_type(&mut arena, 6);
        let body_value = gen.random_value(&arena, t, 6);
        let msg = Message::method_call(seed as u32 + 1, "/a/b", "x.y", "z.w", "M", vec![body_value]);

        let bytes = serialize_message_le(&msg);
        let parsed = dbus_wire::parse_message(&bytes).expect("message parses");
        assert_eq!(parsed.body_signature(), msg.body_signature());
        assert_eq!(serialize_message_le(&parsed), bytes);

        let parser = message_parser_le().unwrap();
        let chunked = feed_chunked(parser, &bytes, 1);
        assert_eq!(chunked.body(), parsed.body());
    }
}

#[test]
fn parsers_can_move_between_threads() {
    let msg = Message::hello(1);
    let bytes = serialize_message_le(&msg);
    let mut parser = message_parser_le().unwrap();
    let first = parser.max_required().min(4) as usize;
    parser.feed(&bytes[..first]).unwrap();

    // A suspended parse is self-contained and may be handed off.
    let handle = std::thread::spawn(move || {
        let mut pos = first;
        while parser.max_required() > 0 {
            let n = parser.max_required() as usize;
            parser.feed(&bytes[pos..pos + n]).unwrap();
            pos += n;
        }
        parser.into_value()
    });
    let parsed = handle.join().unwrap();
    assert_eq!(parsed.serial(), Some(1));
}
