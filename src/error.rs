pub type Result<T> = std::result::Result<T, ParseError>;

/// Raised on any wire violation. `pos` is the absolute byte position at
/// which the violation was detected; `msg` identifies the kind of
/// violation. The codec never retries and never partially succeeds, so a
/// `ParseError` always aborts the parse that produced it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("parse error at byte {pos}: {msg}")]
pub struct ParseError {
    pub pos: u64,
    pub msg: String,
}

impl ParseError {
    pub fn new(pos: u64, msg: impl Into<String>) -> Self {
        ParseError {
            pos,
            msg: msg.into(),
        }
    }
}
