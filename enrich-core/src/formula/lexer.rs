//! Formula tokenizer

use crate::FormulaError;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    /// `{key}` reference, already normalized
    Placeholder(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    LParen,
    RParen,
    Comma,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::Str(s) => write!(f, "string \"{}\"", s),
            TokenKind::Placeholder(k) => write!(f, "{{{}}}", k),
            TokenKind::Ident(name) => write!(f, "'{}'", name),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Amp => write!(f, "'&'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Eof => write!(f, "end of expression"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            len: source.len(),
        }
    }

    /// Tokenize the whole source; the last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, FormulaError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, FormulaError> {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }

        let Some(&(position, c)) = self.chars.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: self.len,
            });
        };

        let kind = match c {
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '&' => self.single(TokenKind::Amp),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            ',' => self.single(TokenKind::Comma),
            '"' => self.string(position)?,
            '{' => self.placeholder(position)?,
            c if c.is_ascii_digit() || c == '.' => self.number(position)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.ident(),
            other => return Err(FormulaError::UnexpectedChar { ch: other, position }),
        };

        Ok(Token { kind, position })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.chars.next();
        kind
    }

    fn string(&mut self, start: usize) -> Result<TokenKind, FormulaError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                // "" inside a string is an escaped quote
                Some((_, '"')) => {
                    if matches!(self.chars.peek(), Some((_, '"'))) {
                        self.chars.next();
                        value.push('"');
                    } else {
                        return Ok(TokenKind::Str(value));
                    }
                }
                Some((_, c)) => value.push(c),
                None => return Err(FormulaError::UnterminatedString { position: start }),
            }
        }
    }

    fn placeholder(&mut self, start: usize) -> Result<TokenKind, FormulaError> {
        self.chars.next();
        let mut raw = String::new();
        loop {
            match self.chars.next() {
                Some((_, '}')) => return Ok(TokenKind::Placeholder(crate::column_key(&raw))),
                Some((_, '{')) | None => {
                    return Err(FormulaError::UnterminatedPlaceholder { position: start })
                }
                Some((_, c)) => raw.push(c),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<TokenKind, FormulaError> {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| FormulaError::UnexpectedToken {
                found: format!("number '{}'", text),
                position: start,
            })
    }

    fn ident(&mut self) -> TokenKind {
        let mut name = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        TokenKind::Ident(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_arithmetic() {
        assert_eq!(
            kinds("{employees} * 2.5"),
            vec![
                TokenKind::Placeholder("employees".into()),
                TokenKind::Star,
                TokenKind::Number(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_string_with_escaped_quote() {
        assert_eq!(
            kinds(r#""say ""hi""""#),
            vec![TokenKind::Str("say \"hi\"".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_placeholder_is_normalized() {
        assert_eq!(
            kinds("{Company Name}"),
            vec![TokenKind::Placeholder("company_name".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_lexer_errors() {
        assert!(matches!(
            Lexer::new("\"open").tokenize(),
            Err(FormulaError::UnterminatedString { position: 0 })
        ));
        assert!(matches!(
            Lexer::new("1 + {a").tokenize(),
            Err(FormulaError::UnterminatedPlaceholder { position: 4 })
        ));
        assert!(matches!(
            Lexer::new("1 # 2").tokenize(),
            Err(FormulaError::UnexpectedChar { ch: '#', position: 2 })
        ));
        assert!(Lexer::new("1.2.3").tokenize().is_err());
    }
}
