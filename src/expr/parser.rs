//! Recursive-descent parser producing the [`Expr`] tree.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparison / `in`, postfix
//! (`.member`, `[index]`, `.method(args)`), primary.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::CmlError;
use crate::expr::lexer::{tokenize, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    /// Function call. `a.f(b)` is parsed as `f(a, b)`.
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Root identifiers the expression reads, e.g. `{"_messageType"}`.
    pub fn roots(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_roots(&mut out);
        out
    }

    /// True if a call to `function` appears anywhere in the tree.
    pub fn calls(&self, function: &str) -> bool {
        match self {
            Expr::Literal(_) | Expr::Ident(_) => false,
            Expr::Call(name, args) => {
                name.eq_ignore_ascii_case(function) || args.iter().any(|a| a.calls(function))
            }
            Expr::List(items) => items.iter().any(|e| e.calls(function)),
            Expr::Member(base, _) | Expr::Not(base) => base.calls(function),
            Expr::Index(l, r) | Expr::Binary(_, l, r) => l.calls(function) || r.calls(function),
        }
    }

    fn collect_roots(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::List(items) | Expr::Call(_, items) => {
                items.iter().for_each(|e| e.collect_roots(out));
            }
            Expr::Member(base, _) | Expr::Not(base) => base.collect_roots(out),
            Expr::Index(base, index) | Expr::Binary(_, base, index) => {
                base.collect_roots(out);
                index.collect_roots(out);
            }
        }
    }

    /// `a.b.c` as `["a", "b", "c"]`; `None` for anything that is not a plain member chain.
    pub fn member_path(&self) -> Option<Vec<String>> {
        match self {
            Expr::Ident(name) => Some(vec![name.clone()]),
            Expr::Member(base, name) => {
                let mut path = base.member_path()?;
                path.push(name.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

pub fn parse(source: &str) -> Result<Expr, CmlError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(CmlError::Expression("empty expression".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'s str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) if name.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), CmlError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {expected:?}")))
        }
    }

    fn error(&self, message: &str) -> CmlError {
        CmlError::Expression(format!(
            "{} at token {} in '{}'",
            message, self.pos, self.source
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, CmlError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CmlError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, CmlError> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CmlError> {
        let left = self.parse_postfix()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Ident(name)) if name.eq_ignore_ascii_case("in") => BinaryOp::In,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_postfix()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, CmlError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    Some(Token::Int(n)) => n.to_string(),
                    _ => return Err(self.error("expected member name after '.'")),
                };
                if self.eat(&Token::LParen) {
                    let mut args = vec![expr];
                    args.extend(self.parse_args(&Token::RParen)?);
                    expr = Expr::Call(name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_or()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to and including `close`.
    fn parse_args(&mut self, close: &Token) -> Result<Vec<Expr>, CmlError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CmlError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(crate::types::record::float_value(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LBracket) => Ok(Expr::List(self.parse_args(&Token::RBracket)?)),
            Some(Token::LParen) => {
                let mut items = self.parse_args(&Token::RParen)?;
                match items.len() {
                    0 => Err(self.error("empty parentheses")),
                    1 => Ok(items.remove(0)),
                    _ => Ok(Expr::List(items)),
                }
            }
            Some(Token::Ident(name)) => {
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                if self.eat(&Token::LParen) {
                    let args = self.parse_args(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::Bang) => Ok(Expr::Not(Box::new(self.parse_postfix()?))),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected a value"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a == 1 || b && !c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Or,
                Box::new(Expr::Binary(BinaryOp::Eq, ident("a"), Box::new(Expr::Literal(json!(1))))),
                Box::new(Expr::Binary(
                    BinaryOp::And,
                    ident("b"),
                    Box::new(Expr::Not(ident("c")))
                )),
            )
        );
    }

    #[test]
    fn test_method_call_becomes_function() {
        let expr = parse("_messageType.in('A', 'B')").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "in".into(),
                vec![
                    Expr::Ident("_messageType".into()),
                    Expr::Literal(json!("A")),
                    Expr::Literal(json!("B"))
                ]
            )
        );
    }

    #[test]
    fn test_in_with_parenthesised_list() {
        let expr = parse("status in ('A', 'B')").unwrap();
        match expr {
            Expr::Binary(BinaryOp::In, _, right) => assert!(matches!(*right, Expr::List(ref l) if l.len() == 2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_roots_and_member_path() {
        let expr = parse("eval(concat('session.agents.', item.agentId)).name").unwrap();
        assert_eq!(expr.roots().into_iter().collect::<Vec<_>>(), vec!["item".to_string()]);
        assert_eq!(
            parse("item._header.1").unwrap().member_path(),
            Some(vec!["item".into(), "_header".into(), "1".into()])
        );
        assert_eq!(parse("a[0]").unwrap().member_path(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("a ==").is_err());
        assert!(parse("f(a,").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("(1, 2").is_err());
    }
}
