//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while reading packed data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before the value did.
    #[error("unexpected end of input at offset {offset}: need {needed} more bytes")]
    UnexpectedEof {
        /// Offset where the read started.
        offset: usize,
        /// Bytes still missing.
        needed: usize,
    },

    /// A varint is longer than 64 bits.
    #[error("varint at offset {offset} overflows 64 bits")]
    VarintOverflow {
        /// Offset where the varint started.
        offset: usize,
    },

    /// A string is not valid UTF-8.
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Offset where the string started.
        offset: usize,
    },
}
