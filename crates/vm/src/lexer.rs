//! Tokenizer for the compiled-shader text format.
//!
//! The format is a flat, whitespace-delimited token stream: identifiers
//! (mnemonics, keywords, variable names), numbers, double-quoted string
//! literals with C-style escapes, array brackets, and the `:` label
//! marker. `#` starts a comment running to end of line.

use crate::error::{LoadError, LoadResult};
use logos::Logos;

fn unescape(raw: &str) -> String {
    // Strip the surrounding quotes, then process escapes.
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// One token of the bytecode text format.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(":")]
    Colon,

    /// Dotted version strings (`1.2.0`) would otherwise split into two
    /// numbers; the longer match wins.
    #[regex(r"\d+\.\d+\.\d+(-[A-Za-z0-9.]+)?", |lex| lex.slice().to_owned())]
    Version(String),

    #[regex(r"-?(\d+\.\d*|\.\d+|\d+)([eE][+-]?\d+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),
}

impl Token {
    /// Short rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::LBracket => "[".to_string(),
            Token::RBracket => "]".to_string(),
            Token::Colon => ":".to_string(),
            Token::Version(s) => s.clone(),
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("\"{s}\""),
            Token::Ident(s) => s.clone(),
        }
    }
}

/// A fully lexed token stream with one-token lookahead.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    /// Lex the whole source up front; any unrecognized byte sequence is a
    /// load error carrying the offending slice.
    pub fn lex(source: &str) -> LoadResult<Self> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(source);
        while let Some(result) = lexer.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(()) => return Err(LoadError::Lex(lexer.slice().to_string())),
            }
        }
        Ok(Self { tokens, pos: 0 })
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Next token, or an eof error naming what was expected.
    pub fn expect(&mut self, what: &str) -> LoadResult<Token> {
        self.next()
            .ok_or_else(|| LoadError::UnexpectedEof(what.to_string()))
    }

    /// Next token as an identifier.
    pub fn expect_ident(&mut self, what: &str) -> LoadResult<String> {
        match self.expect(what)? {
            Token::Ident(s) => Ok(s),
            other => Err(LoadError::Unexpected {
                expected: what.to_string(),
                found: other.describe(),
            }),
        }
    }

    /// Next token as a number.
    pub fn expect_number(&mut self, what: &str) -> LoadResult<f64> {
        match self.expect(what)? {
            Token::Number(n) => Ok(n),
            other => Err(LoadError::Unexpected {
                expected: what.to_string(),
                found: other.describe(),
            }),
        }
    }

    /// Next token as a string literal.
    pub fn expect_string(&mut self, what: &str) -> LoadResult<String> {
        match self.expect(what)? {
            Token::Str(s) => Ok(s),
            other => Err(LoadError::Unexpected {
                expected: what.to_string(),
                found: other.describe(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(source: &str) -> Vec<Token> {
        let mut stream = TokenStream::lex(source).unwrap();
        let mut out = Vec::new();
        while let Some(t) = stream.next() {
            out.push(t);
        }
        out
    }

    #[test]
    fn test_basic_stream() {
        let tokens = all("surface\npushif 0.8\npop Kd");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("surface".into()),
                Token::Ident("pushif".into()),
                Token::Number(0.8),
                Token::Ident("pop".into()),
                Token::Ident("Kd".into()),
            ]
        );
    }

    #[test]
    fn test_version_token_stays_whole() {
        let tokens = all("AQSIS_V 1.2.0");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("AQSIS_V".into()),
                Token::Version("1.2.0".into()),
            ]
        );
    }

    #[test]
    fn test_negative_and_exponent_numbers() {
        let tokens = all("-1.5 2e3 .25");
        assert_eq!(
            tokens,
            vec![Token::Number(-1.5), Token::Number(2000.0), Token::Number(0.25)]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = all(r#""hello\n\"world\"""#);
        assert_eq!(tokens, vec![Token::Str("hello\n\"world\"".into())]);
    }

    #[test]
    fn test_labels_and_arrays() {
        let tokens = all("jmp : 4 lights [ 3 ]");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("jmp".into()),
                Token::Colon,
                Token::Number(4.0),
                Token::Ident("lights".into()),
                Token::LBracket,
                Token::Number(3.0),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = all("pushif 1.0 # default value\npop Ka");
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_lex_error_carries_slice() {
        let err = TokenStream::lex("pushif @").unwrap_err();
        assert!(matches!(err, LoadError::Lex(s) if s == "@"));
    }
}
