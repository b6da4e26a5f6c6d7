//! Matcher error types

use thiserror::Error;

/// Errors raised while compiling a predicate
///
/// All variants carry the byte offset into the source text so config errors
/// can point at the problem.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Unexpected character in the source text
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    /// String or regex literal was not closed
    #[error("unterminated literal starting at offset {offset}")]
    UnterminatedLiteral { offset: usize },

    /// Numeric literal failed to parse
    #[error("bad number '{text}' at offset {offset}")]
    BadNumber { text: String, offset: usize },

    /// Token stream ended mid-expression
    #[error("unexpected end of predicate")]
    UnexpectedEnd,

    /// Parser found a token it cannot use here
    #[error("unexpected token at offset {offset}: {found}")]
    UnexpectedToken { found: String, offset: usize },

    /// A variable name that is not a known header
    #[error("unknown variable '{name}' at offset {offset}")]
    UnknownVariable { name: String, offset: usize },

    /// Regex operand failed to compile
    #[error("bad regex at offset {offset}: {source}")]
    BadRegex {
        offset: usize,
        #[source]
        source: regex::Error,
    },

    /// Input held more tokens after a complete expression
    #[error("trailing input at offset {offset}")]
    TrailingInput { offset: usize },
}
