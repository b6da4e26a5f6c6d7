//! Predicate expression tree and evaluation

use regex::Regex;
use strom_protocol::{FieldValue, Message};

/// Message header addressable from a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Header {
    Logger,
    Type,
    Hostname,
    Payload,
    EnvVersion,
    Severity,
    Pid,
    Timestamp,
}

impl Header {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "Logger" => Some(Self::Logger),
            "Type" => Some(Self::Type),
            "Hostname" => Some(Self::Hostname),
            "Payload" => Some(Self::Payload),
            "EnvVersion" => Some(Self::EnvVersion),
            "Severity" => Some(Self::Severity),
            "Pid" => Some(Self::Pid),
            "Timestamp" => Some(Self::Timestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A value source: header, field reference, or constant
#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Header(Header),
    Field { name: String, index: usize },
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Const(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    Regex {
        lhs: Operand,
        re: Regex,
        negate: bool,
    },
}

/// Resolved operand value during one evaluation
#[derive(Debug, Clone, Copy)]
enum Value<'a> {
    Str(&'a str),
    Bytes(&'a [u8]),
    Int(i64),
    Double(f64),
    Bool(bool),
    Nil,
}

impl Value<'_> {
    fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl Expr {
    pub(crate) fn eval(&self, msg: &Message) -> bool {
        match self {
            Expr::Const(b) => *b,
            Expr::Not(inner) => !inner.eval(msg),
            Expr::And(l, r) => l.eval(msg) && r.eval(msg),
            Expr::Or(l, r) => l.eval(msg) || r.eval(msg),
            Expr::Cmp { lhs, op, rhs } => compare(*op, resolve(lhs, msg), resolve(rhs, msg)),
            Expr::Regex { lhs, re, negate } => match resolve(lhs, msg) {
                Value::Str(s) => re.is_match(s) != *negate,
                _ => false,
            },
        }
    }
}

fn resolve<'a>(op: &'a Operand, msg: &'a Message) -> Value<'a> {
    match op {
        Operand::Header(h) => match h {
            Header::Logger => Value::Str(msg.logger()),
            Header::Type => Value::Str(msg.msg_type()),
            Header::Hostname => Value::Str(msg.hostname()),
            Header::Payload => Value::Str(msg.payload()),
            Header::EnvVersion => Value::Str(msg.env_version()),
            Header::Severity => Value::Int(msg.severity() as i64),
            Header::Pid => Value::Int(msg.pid() as i64),
            Header::Timestamp => Value::Int(msg.timestamp),
        },
        Operand::Field { name, index } => match msg.field_value(name, *index) {
            Some(FieldValue::String(s)) => Value::Str(s),
            Some(FieldValue::Bytes(b)) => Value::Bytes(b),
            Some(FieldValue::Integer(i)) => Value::Int(i),
            Some(FieldValue::Double(d)) => Value::Double(d),
            Some(FieldValue::Bool(b)) => Value::Bool(b),
            None => Value::Nil,
        },
        Operand::Str(s) => Value::Str(s),
        Operand::Int(i) => Value::Int(*i),
        Operand::Float(f) => Value::Double(*f),
        Operand::Bool(b) => Value::Bool(*b),
        Operand::Nil => Value::Nil,
    }
}

/// Comparison with NIL and type-mismatch rules
///
/// NIL: `==` is true only when both sides are nil, `!=` only when exactly
/// one is. Every other operator involving nil is false. Operands of
/// incompatible kinds compare false rather than erroring.
fn compare(op: CmpOp, lhs: Value<'_>, rhs: Value<'_>) -> bool {
    if lhs.is_nil() || rhs.is_nil() {
        return match op {
            CmpOp::Eq => lhs.is_nil() && rhs.is_nil(),
            CmpOp::Ne => lhs.is_nil() != rhs.is_nil(),
            _ => false,
        };
    }

    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => cmp_ord(op, a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => cmp_ord(op, a.cmp(&b)),
        (Value::Int(a), Value::Double(b)) => cmp_f64(op, a as f64, b),
        (Value::Double(a), Value::Int(b)) => cmp_f64(op, a, b as f64),
        (Value::Double(a), Value::Double(b)) => cmp_f64(op, a, b),
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        },
        (Value::Bytes(a), Value::Bytes(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        },
        _ => false,
    }
}

fn cmp_ord(op: CmpOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
        CmpOp::Lt => ord == Less,
        CmpOp::Le => ord != Greater,
        CmpOp::Gt => ord == Greater,
        CmpOp::Ge => ord != Less,
    }
}

fn cmp_f64(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}
