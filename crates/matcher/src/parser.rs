//! Recursive-descent parser for match predicates

use regex::Regex;

use crate::expr::{CmpOp, Expr, Header, Operand};
use crate::lexer::{Spanned, Token};
use crate::{MatchError, Result};

pub(crate) fn parse(tokens: &[Spanned], _source: &str) -> Result<Expr> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if let Some(t) = parser.peek() {
        return Err(MatchError::TrailingInput { offset: t.offset });
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Spanned> {
        let t = self.tokens.get(self.pos).ok_or(MatchError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        let t = self.next()?;
        if &t.token == want {
            Ok(())
        } else {
            Err(unexpected(t))
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while matches!(self.peek().map(|t| &t.token), Some(Token::Or)) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while matches!(self.peek().map(|t| &t.token), Some(Token::And)) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek().map(|t| &t.token) {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => self.comparison(),
        }
    }

    /// A comparison, or a bare TRUE/FALSE constant
    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.operand()?;

        let op = match self.peek().map(|t| &t.token) {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::ReMatch) | Some(Token::ReNotMatch) => {
                return self.regex_comparison(lhs);
            }
            _ => {
                // Bare boolean constants stand alone as expressions.
                return match lhs {
                    Operand::Bool(b) => Ok(Expr::Const(b)),
                    _ => match self.peek() {
                        Some(t) => Err(unexpected(t)),
                        None => Err(MatchError::UnexpectedEnd),
                    },
                };
            }
        };
        self.pos += 1;

        let rhs = self.operand()?;
        Ok(Expr::Cmp { lhs, op, rhs })
    }

    fn regex_comparison(&mut self, lhs: Operand) -> Result<Expr> {
        let op_token = self.next()?;
        let negate = op_token.token == Token::ReNotMatch;

        let t = self.next()?;
        let (pattern, offset) = match &t.token {
            Token::Str(s) | Token::Regex(s) => (s.clone(), t.offset),
            _ => return Err(unexpected(t)),
        };
        let re = Regex::new(&pattern).map_err(|source| MatchError::BadRegex { offset, source })?;
        Ok(Expr::Regex { lhs, re, negate })
    }

    fn operand(&mut self) -> Result<Operand> {
        let t = self.next()?;
        let offset = t.offset;
        match &t.token {
            Token::Str(s) => Ok(Operand::Str(s.clone())),
            Token::Int(i) => Ok(Operand::Int(*i)),
            Token::Float(f) => Ok(Operand::Float(*f)),
            Token::True => Ok(Operand::Bool(true)),
            Token::False => Ok(Operand::Bool(false)),
            Token::Nil => Ok(Operand::Nil),
            Token::Ident(name) if name == "Fields" => self.field_ref(),
            Token::Ident(name) => Header::from_name(name)
                .map(Operand::Header)
                .ok_or_else(|| MatchError::UnknownVariable {
                    name: name.clone(),
                    offset,
                }),
            _ => Err(unexpected(t)),
        }
    }

    /// `Fields[name]` or `Fields[name][index]`
    fn field_ref(&mut self) -> Result<Operand> {
        self.expect(&Token::LBracket)?;
        let t = self.next()?;
        let name = match &t.token {
            Token::Ident(s) => s.clone(),
            Token::Str(s) => s.clone(),
            _ => return Err(unexpected(t)),
        };
        self.expect(&Token::RBracket)?;

        let mut index = 0;
        if matches!(self.peek().map(|t| &t.token), Some(Token::LBracket)) {
            self.pos += 1;
            let t = self.next()?;
            index = match &t.token {
                Token::Int(i) if *i >= 0 => *i as usize,
                _ => return Err(unexpected(t)),
            };
            self.expect(&Token::RBracket)?;
        }

        Ok(Operand::Field { name, index })
    }
}

fn unexpected(t: &Spanned) -> MatchError {
    MatchError::UnexpectedToken {
        found: format!("{:?}", t.token),
        offset: t.offset,
    }
}
