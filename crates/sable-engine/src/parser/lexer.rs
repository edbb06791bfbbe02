//! Lexer for the Sable language.
//!
//! Tokenization is done with logos; the raw logos tokens are converted to the
//! main [`Token`] enum with full [`Span`] information (byte range plus 1-based
//! line and column).

use crate::parser::token::{Span, Token};
use crate::parser::Diagnostic;
use logos::Logos;

/// Logos-based token enum used internally for tokenization.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
enum RawToken {
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("=>")]
    Arrow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Bang,
}

/// Process escape sequences in a quoted string literal slice.
fn unescape(slice: &str) -> Option<String> {
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '0' => out.push('\0'),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

/// Byte-offset → line/column index, built once per source unit.
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// 1-based (line, column) of a byte offset.
    pub fn position(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = offset - self.line_starts[line];
        (line as u32 + 1, column as u32 + 1)
    }
}

/// Tokenize a source unit into `(Token, Span)` pairs, terminated by `Eof`.
///
/// Returns all lexical errors at once; on error no token stream is produced.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>, Vec<Diagnostic>> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in RawToken::lexer(source).spanned() {
        let (line, column) = index.position(range.start);
        let span = Span::new(range.start, range.end, line, column);
        match result {
            Ok(raw) => tokens.push((convert(raw), span)),
            Err(()) => errors.push(Diagnostic::new(
                format!("unexpected character '{}'", &source[range.clone()]),
                span,
            )),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let end = source.len();
    let (line, column) = index.position(end.saturating_sub(usize::from(end > 0)));
    tokens.push((Token::Eof, Span::new(end, end, line, column)));
    Ok(tokens)
}

fn convert(raw: RawToken) -> Token {
    match raw {
        RawToken::Ident(name) => Token::keyword(&name).unwrap_or(Token::Ident(name)),
        RawToken::Int(v) => Token::Int(v),
        RawToken::Float(v) => Token::Float(v),
        RawToken::Str(s) => Token::Str(s),
        RawToken::LParen => Token::LParen,
        RawToken::RParen => Token::RParen,
        RawToken::LBrace => Token::LBrace,
        RawToken::RBrace => Token::RBrace,
        RawToken::LBracket => Token::LBracket,
        RawToken::RBracket => Token::RBracket,
        RawToken::Comma => Token::Comma,
        RawToken::Semicolon => Token::Semicolon,
        RawToken::Colon => Token::Colon,
        RawToken::Dot => Token::Dot,
        RawToken::Arrow => Token::Arrow,
        RawToken::EqEq => Token::EqEq,
        RawToken::NotEq => Token::NotEq,
        RawToken::Le => Token::Le,
        RawToken::Ge => Token::Ge,
        RawToken::AndAnd => Token::AndAnd,
        RawToken::OrOr => Token::OrOr,
        RawToken::Assign => Token::Assign,
        RawToken::Plus => Token::Plus,
        RawToken::Minus => Token::Minus,
        RawToken::Star => Token::Star,
        RawToken::Slash => Token::Slash,
        RawToken::Percent => Token::Percent,
        RawToken::Lt => Token::Lt,
        RawToken::Gt => Token::Gt,
        RawToken::Bang => Token::Bang,
    }
}
