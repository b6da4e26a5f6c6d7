//! Strom Matcher - compiled boolean predicates over messages
//!
//! Every filter and output declares a `message_matcher`, a small expression
//! language over message headers and fields. Predicates are compiled once at
//! config load and evaluated by the router for every message, so evaluation
//! is allocation-free and side-effect-free.
//!
//! # Grammar
//!
//! ```text
//! expr     := or
//! or       := and ("||" and)*
//! and      := unary ("&&" unary)*
//! unary    := "!" unary | "(" expr ")" | TRUE | FALSE | comparison
//! compare  := operand ("==" | "!=" | "<" | "<=" | ">" | ">=") operand
//!           | operand ("=~" | "!~") (string | /regex/)
//! operand  := Logger | Type | Hostname | Payload | EnvVersion
//!           | Severity | Pid | Timestamp
//!           | Fields[name] | Fields[name][index]
//!           | string | integer | float | TRUE | FALSE | NIL
//! ```
//!
//! # NIL semantics
//!
//! A reference to a missing field yields NIL. `== NIL` and `!= NIL` test
//! absence and presence; every other operator involving a NIL value
//! evaluates to false. Operand type mismatches also evaluate to false
//! rather than erroring.
//!
//! # Example
//!
//! ```
//! use strom_matcher::Matcher;
//! use strom_protocol::Message;
//!
//! let m = Matcher::parse("Type == 'report' && Severity < 5").unwrap();
//! let mut msg = Message::new("report");
//! msg.set_severity(3);
//! assert!(m.matches(&msg));
//! ```

mod error;
mod expr;
mod lexer;
mod parser;

pub use error::MatchError;

use std::fmt;
use std::str::FromStr;

use strom_protocol::Message;

use crate::expr::Expr;

/// Result type for matcher operations
pub type Result<T> = std::result::Result<T, MatchError>;

/// A compiled match predicate
///
/// Cheap to evaluate, immutable after parse. `Clone` is deep but matchers
/// are normally compiled once per consumer and shared by reference.
#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    expr: Expr,
}

impl Matcher {
    /// Compile a predicate from its source text
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(&tokens, source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate the predicate against a message
    ///
    /// Deterministic and side-effect-free; never fails at runtime.
    pub fn matches(&self, msg: &Message) -> bool {
        self.expr.eval(msg)
    }

    /// The original predicate text
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Matcher {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
