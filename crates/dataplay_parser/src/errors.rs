/// Error produced while tokenizing or parsing.
///
/// Line and column are 1-based and point at the offending token, or at the
/// end of input when the input ended early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{msg} (line {line}, column {col})")]
pub struct ParseError {
    pub msg: String,
    pub line: usize,
    pub col: usize,
}

impl ParseError {
    pub fn new(msg: impl Into<String>, line: usize, col: usize) -> Self {
        ParseError {
            msg: msg.into(),
            line,
            col,
        }
    }
}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;
