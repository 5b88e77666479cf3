use thiserror::Error;

/// Errors produced while parsing a document path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path segment at offset {0}")]
    EmptySegment(usize),

    #[error("unclosed bracket starting at offset {0}")]
    UnclosedBracket(usize),

    #[error("invalid sequence index: {0:?}")]
    InvalidIndex(String),

    #[error("index {index} is too far past the end of a sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}
