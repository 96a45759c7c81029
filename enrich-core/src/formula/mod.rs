//! Formula column expressions.
//!
//! A small spreadsheet-style language over the values of one row:
//! `{key}` references, numbers, `"strings"`, `+ - * /`, `&` for text
//! concatenation and a handful of built-in functions. Evaluation is pure
//! and synchronous.

mod eval;
mod lexer;
mod parser;

pub use eval::evaluate;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{BinaryOp, Expr, Function, Parser};

use crate::{CellValue, FormulaError, RowValues};

/// Parse an expression into its AST.
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse()
}

/// Parse and evaluate in one step.
pub fn evaluate_str(source: &str, row: &RowValues) -> Result<CellValue, FormulaError> {
    evaluate(&parse(source)?, row)
}

/// Keys referenced by an expression; empty when it does not parse.
pub fn references(source: &str) -> Vec<String> {
    parse(source).map(|e| e.references()).unwrap_or_default()
}
