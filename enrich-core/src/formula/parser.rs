//! Recursive-descent parser producing the formula AST.
//!
//! Precedence, loosest first: `&`, then `+ -`, then `* /`, then unary minus.

use super::lexer::{Token, TokenKind};
use crate::FormulaError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Round,
    Abs,
    Min,
    Max,
    Len,
    Upper,
    Lower,
    Trim,
    Concat,
    Coalesce,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ROUND" => Some(Function::Round),
            "ABS" => Some(Function::Abs),
            "MIN" => Some(Function::Min),
            "MAX" => Some(Function::Max),
            "LEN" => Some(Function::Len),
            "UPPER" => Some(Function::Upper),
            "LOWER" => Some(Function::Lower),
            "TRIM" => Some(Function::Trim),
            "CONCAT" => Some(Function::Concat),
            "COALESCE" => Some(Function::Coalesce),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Round => "ROUND",
            Function::Abs => "ABS",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Len => "LEN",
            Function::Upper => "UPPER",
            Function::Lower => "LOWER",
            Function::Trim => "TRIM",
            Function::Concat => "CONCAT",
            Function::Coalesce => "COALESCE",
        }
    }

    /// Inclusive argument count bounds; `None` upper bound means variadic.
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Round => (1, Some(2)),
            Function::Abs | Function::Len | Function::Upper | Function::Lower | Function::Trim => {
                (1, Some(1))
            }
            Function::Min | Function::Max | Function::Coalesce => (1, None),
            Function::Concat => (0, None),
        }
    }

    fn check_arity(&self, got: usize) -> Result<(), FormulaError> {
        let (min, max) = self.arity();
        let ok = got >= min && max.map_or(true, |m| got <= m);
        if ok {
            return Ok(());
        }
        let expected = match max {
            Some(m) if m == min => min.to_string(),
            Some(m) => format!("{}..={}", min, m),
            None => format!("at least {}", min),
        };
        Err(FormulaError::Arity {
            name: self.name().to_string(),
            expected,
            got,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Text(String),
    /// Reference to another column of the same row, by placeholder key
    Ref(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Placeholder keys referenced anywhere in the expression, deduplicated
    /// in first-occurrence order.
    pub fn references(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.collect_refs(&mut keys);
        keys
    }

    fn collect_refs(&self, keys: &mut Vec<String>) {
        match self {
            Expr::Ref(key) => {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_refs(keys),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_refs(keys);
                rhs.collect_refs(keys);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_refs(keys)),
            Expr::Number(_) | Expr::Text(_) => {}
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Expr, FormulaError> {
        let expr = self.concat()?;
        match self.peek() {
            TokenKind::Eof => Ok(expr),
            _ => Err(self.unexpected()),
        }
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn unexpected(&self) -> FormulaError {
        match self.tokens.get(self.pos) {
            Some(Token {
                kind: TokenKind::Eof,
                ..
            })
            | None => FormulaError::UnexpectedEnd,
            Some(token) => FormulaError::UnexpectedToken {
                found: token.kind.to_string(),
                position: token.position,
            },
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), FormulaError> {
        if *self.peek() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn concat(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.additive()?;
        while *self.peek() == TokenKind::Amp {
            self.advance();
            let rhs = self.additive()?;
            lhs = binary(BinaryOp::Concat, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if *self.peek() == TokenKind::Minus {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Text(s))
            }
            TokenKind::Placeholder(key) => {
                self.advance();
                Ok(Expr::Ref(key))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.concat()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                let function = Function::from_name(&name)
                    .ok_or_else(|| FormulaError::UnknownFunction { name: name.clone() })?;
                self.advance();
                self.expect(TokenKind::LParen)?;
                let args = self.arguments()?;
                function.check_arity(args.len())?;
                Ok(Expr::Call { function, args })
            }
            _ => Err(self.unexpected()),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, FormulaError> {
        let mut args = Vec::new();
        if *self.peek() == TokenKind::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.concat()?);
            match self.advance() {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.unexpected());
                }
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Add,
                Expr::Number(1.0),
                binary(BinaryOp::Mul, Expr::Number(2.0), Expr::Number(3.0))
            )
        );
    }

    #[test]
    fn test_concat_binds_loosest() {
        let expr = parse("{a} & 1 + 1").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Concat, .. }));
    }

    #[test]
    fn test_function_call_and_references() {
        let expr = parse("ROUND({revenue} / {employees}, 2) & {revenue}").unwrap();
        assert_eq!(
            expr.references(),
            vec!["revenue".to_string(), "employees".to_string()]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("1 +"), Err(FormulaError::UnexpectedEnd));
        assert!(matches!(
            parse("FOO(1)"),
            Err(FormulaError::UnknownFunction { .. })
        ));
        assert!(matches!(parse("ABS(1, 2)"), Err(FormulaError::Arity { .. })));
        assert!(matches!(parse("(1 + 2"), Err(FormulaError::UnexpectedEnd)));
        assert!(matches!(
            parse("1 2"),
            Err(FormulaError::UnexpectedToken { position: 2, .. })
        ));
        assert!(matches!(parse("MIN()"), Err(FormulaError::Arity { .. })));
    }

    #[test]
    fn test_empty_concat_call_parses() {
        assert_eq!(
            parse("concat()").unwrap(),
            Expr::Call {
                function: Function::Concat,
                args: vec![]
            }
        );
    }
}
