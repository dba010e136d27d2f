//! Incremental byte-stream parsing kernel.
//!
//! The parser is a single continuation plus an absolute byte position.
//! Each continuation advertises the minimum number of bytes it needs to
//! make progress (bounded by a `u8`, so a 255-byte caller-side buffer is
//! always sufficient) and the maximum number it is prepared to consume.
//! Feeding bytes runs the continuation, which returns the next one.
//! There is no recursion anywhere in the kernel: the "parsing stack" is
//! the heap-linked chain of continuations, so arbitrarily deep input
//! cannot exhaust the host stack.
//!
//! Between [`Parse::feed`] calls the caller may block on I/O, persist the
//! parser, or hand it to another thread. Dropping a [`Parse`] cancels the
//! parse; all buffers and continuations are owned by it.

use byteorder::ByteOrder;
use std::marker::PhantomData;

use crate::error::{ParseError, Result};

/// Parsing state passed to every continuation. Currently just the number
/// of bytes consumed so far, which continuations use to compute
/// alignment padding.
pub struct State {
    pos: u64,
}

impl State {
    pub(crate) fn new(pos: u64) -> State {
        State { pos }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }
}

/// A parse continuation: either the finished result or the next step.
///
/// `Done` advertises byte bounds of zero, which is how the driver
/// signals completion to the caller.
pub enum Cont<T> {
    Done(T),
    More(Box<dyn Step<T>>),
}

/// One step of a parse. `feed` consumes between `min_required` and
/// `max_required` bytes and returns the continuation for the rest of the
/// input.
pub trait Step<T>: Send {
    fn min_required(&self) -> u8;
    fn max_required(&self) -> u64;
    fn feed(self: Box<Self>, state: &State, buf: &[u8]) -> Result<Cont<T>>;
}

/// Driver for an incremental parse producing a `T`.
pub struct Parse<T> {
    state: State,
    cont: Option<Cont<T>>,
}

impl<T> Parse<T> {
    pub fn new(cont: Cont<T>) -> Parse<T> {
        Parse {
            state: State::new(0),
            cont: Some(cont),
        }
    }

    /// Number of bytes consumed so far.
    pub fn pos(&self) -> u64 {
        self.state.pos
    }

    /// Minimum number of bytes the parser needs to make progress.
    pub fn min_required(&self) -> u8 {
        match self.cont.as_ref().expect("parse already failed") {
            Cont::Done(_) => 0,
            Cont::More(step) => step.min_required(),
        }
    }

    /// Maximum number of bytes the parser will accept right now. Zero
    /// means parsing is complete.
    pub fn max_required(&self) -> u64 {
        match self.cont.as_ref().expect("parse already failed") {
            Cont::Done(_) => 0,
            Cont::More(step) => step.max_required(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.cont, Some(Cont::Done(_)))
    }

    /// Feed the next chunk of input. The caller must respect the bounds:
    /// `min_required() <= buf.len() <= max_required()`.
    ///
    /// After an error the parser is unusable; further calls panic.
    pub fn feed(&mut self, buf: &[u8]) -> Result<()> {
        let cont = self.cont.take().expect("parse already failed");
        let step = match cont {
            Cont::More(step) => step,
            Cont::Done(_) => panic!("fed bytes to a completed parse"),
        };
        assert!(u64::from(step.min_required()) <= buf.len() as u64);
        assert!(buf.len() as u64 <= step.max_required());
        self.state.pos = match self.state.pos.checked_add(buf.len() as u64) {
            Some(pos) => pos,
            None => return Err(ParseError::new(self.state.pos, "parse position overflow")),
        };
        let next = step.feed(&self.state, buf)?;
        self.cont = Some(next);
        Ok(())
    }

    /// Extract the result of a completed parse.
    pub fn into_value(self) -> T {
        match self.cont {
            Some(Cont::Done(value)) => value,
            _ => panic!("parse is not complete"),
        }
    }
}

struct ReadByte<F> {
    cont: F,
}

impl<T, F> Step<T> for ReadByte<F>
where
    F: FnOnce(&State, u8) -> Result<Cont<T>> + Send,
{
    fn min_required(&self) -> u8 {
        1
    }

    fn max_required(&self) -> u64 {
        1
    }

    fn feed(self: Box<Self>, state: &State, buf: &[u8]) -> Result<Cont<T>> {
        (self.cont)(state, buf[0])
    }
}

/// Consume exactly one byte.
pub fn read_byte<T, F>(cont: F) -> Cont<T>
where
    T: 'static,
    F: FnOnce(&State, u8) -> Result<Cont<T>> + Send + 'static,
{
    Cont::More(Box::new(ReadByte { cont }))
}

macro_rules! fixed_width_step {
    ($step:ident, $reader:ident, $ty:ty, $decode:ident) => {
        struct $step<E, F> {
            cont: F,
            _endian: PhantomData<fn() -> E>,
        }

        impl<E, T, F> Step<T> for $step<E, F>
        where
            E: ByteOrder + 'static,
            F: FnOnce(&State, $ty) -> Result<Cont<T>> + Send,
        {
            fn min_required(&self) -> u8 {
                std::mem::size_of::<$ty>() as u8
            }

            fn max_required(&self) -> u64 {
                std::mem::size_of::<$ty>() as u64
            }

            fn feed(self: Box<Self>, state: &State, buf: &[u8]) -> Result<Cont<T>> {
                (self.cont)(state, E::$decode(buf))
            }
        }

        /// Consume the fixed width of the integer, decoded under `E`.
        pub fn $reader<E, T, F>(cont: F) -> Cont<T>
        where
            E: ByteOrder + 'static,
            T: 'static,
            F: FnOnce(&State, $ty) -> Result<Cont<T>> + Send + 'static,
        {
            Cont::More(Box::new($step::<E, F> {
                cont,
                _endian: PhantomData,
            }))
        }
    };
}

fixed_width_step!(ReadU16, read_u16, u16, read_u16);
fixed_width_step!(ReadU32, read_u32, u32, read_u32);
fixed_width_step!(ReadU64, read_u64, u64, read_u64);

struct ReadNBytes<F> {
    bytes: Vec<u8>,
    remaining: u64,
    cont: F,
}

impl<T, F> Step<T> for ReadNBytes<F>
where
    T: 'static,
    F: FnOnce(&State, Vec<u8>) -> Result<Cont<T>> + Send + 'static,
{
    fn min_required(&self) -> u8 {
        0
    }

    fn max_required(&self) -> u64 {
        self.remaining
    }

    fn feed(self: Box<Self>, state: &State, buf: &[u8]) -> Result<Cont<T>> {
        let ReadNBytes {
            mut bytes,
            remaining,
            cont,
        } = *self;
        bytes.extend_from_slice(buf);
        read_n_bytes_more(state, bytes, remaining - buf.len() as u64, cont)
    }
}

fn read_n_bytes_more<T, F>(state: &State, bytes: Vec<u8>, remaining: u64, cont: F) -> Result<Cont<T>>
where
    T: 'static,
    F: FnOnce(&State, Vec<u8>) -> Result<Cont<T>> + Send + 'static,
{
    if remaining == 0 {
        // Nothing left to read, so invoke the continuation immediately.
        return cont(state, bytes);
    }
    Ok(Cont::More(Box::new(ReadNBytes {
        bytes,
        remaining,
        cont,
    })))
}

/// Consume `n` bytes, accumulating them across chunks. The continuation
/// runs immediately when `n == 0`.
pub fn read_n_bytes<T, F>(state: &State, n: u64, cont: F) -> Result<Cont<T>>
where
    T: 'static,
    F: FnOnce(&State, Vec<u8>) -> Result<Cont<T>> + Send + 'static,
{
    read_n_bytes_more(state, Vec::new(), n, cont)
}

struct ReadZeros<F> {
    remaining: u64,
    cont: F,
}

impl<T, F> Step<T> for ReadZeros<F>
where
    T: 'static,
    F: FnOnce(&State) -> Result<Cont<T>> + Send + 'static,
{
    fn min_required(&self) -> u8 {
        0
    }

    fn max_required(&self) -> u64 {
        self.remaining
    }

    fn feed(self: Box<Self>, state: &State, buf: &[u8]) -> Result<Cont<T>> {
        let ReadZeros { remaining, cont } = *self;
        // `state.pos` is already past this chunk; report the offending
        // byte at its own position.
        let chunk_start = state.pos() - buf.len() as u64;
        for (i, b) in buf.iter().enumerate() {
            if *b != 0 {
                return Err(ParseError::new(
                    chunk_start + i as u64,
                    "non-zero padding byte",
                ));
            }
        }
        read_zeros_more(state, remaining - buf.len() as u64, cont)
    }
}

fn read_zeros_more<T, F>(state: &State, remaining: u64, cont: F) -> Result<Cont<T>>
where
    T: 'static,
    F: FnOnce(&State) -> Result<Cont<T>> + Send + 'static,
{
    if remaining == 0 {
        return cont(state);
    }
    Ok(Cont::More(Box::new(ReadZeros { remaining, cont })))
}

/// Consume `n` bytes, each of which must be `0x00`. The continuation
/// runs immediately when `n == 0`.
pub fn read_zeros<T, F>(state: &State, n: u64, cont: F) -> Result<Cont<T>>
where
    T: 'static,
    F: FnOnce(&State) -> Result<Cont<T>> + Send + 'static,
{
    read_zeros_more(state, n, cont)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BE, LE};

    #[test]
    fn read_byte_delivers_value() {
        let mut p = Parse::new(read_byte(|_st, b| Ok(Cont::Done(b))));
        assert_eq!(p.min_required(), 1);
        assert_eq!(p.max_required(), 1);
        p.feed(&[0x42]).unwrap();
        assert!(p.is_complete());
        assert_eq!(p.pos(), 1);
        assert_eq!(p.into_value(), 0x42);
    }

    #[test]
    fn fixed_width_endianness() {
        let mut p = Parse::new(read_u32::<LE, _, _>(|_st, x| Ok(Cont::Done(x))));
        p.feed(&[0x04, 0x03, 0x02, 0x01]).unwrap();
        assert_eq!(p.into_value(), 0x0102_0304);

        let mut p = Parse::new(read_u32::<BE, _, _>(|_st, x| Ok(Cont::Done(x))));
        p.feed(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(p.into_value(), 0x0102_0304);
    }

    #[test]
    fn n_bytes_accumulates_across_chunks() {
        let state = State::new(0);
        let mut p = Parse::new(
            read_n_bytes(&state, 5, |_st, bytes| Ok(Cont::Done(bytes))).unwrap(),
        );
        assert_eq!(p.min_required(), 0);
        assert_eq!(p.max_required(), 5);
        p.feed(b"he").unwrap();
        assert_eq!(p.max_required(), 3);
        p.feed(b"llo").unwrap();
        assert_eq!(p.into_value(), b"hello".to_vec());
    }

    #[test]
    fn zeros_rejects_nonzero_at_byte_position() {
        let state = State::new(0);
        let mut p =
            Parse::new(read_zeros(&state, 4, |_st| Ok(Cont::Done(()))).unwrap());
        p.feed(&[0, 0]).unwrap();
        let err = p.feed(&[0, 7]).unwrap_err();
        assert_eq!(err.pos, 3);
        assert!(err.msg.contains("non-zero padding"));
    }

    #[test]
    fn zero_length_reads_complete_immediately() {
        let state = State::new(0);
        let p = Parse::new(read_zeros(&state, 0, |_st| Ok(Cont::Done(()))).unwrap());
        assert_eq!(p.max_required(), 0);
        assert!(p.is_complete());
    }
}
