use std::collections::{BTreeMap, VecDeque};
use std::str::Chars;

use itertools::{peek_nth, PeekNth};
use once_cell::sync::Lazy;
use strum::EnumString;

use crate::frontend::SourceFile;
use crate::{Error, Result};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
    /// Newlines are statement separators, but only outside of brackets. It is
    /// perfectly valid (and common) to be several brackets deep, so this is a
    /// counter rather than a flag.
    bracket_depth: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // endif
    Identifier,       // meson

    /* Literals */
    BooleanLiteral,     // true
    IntegerLiteral,     // 0x10
    StringLiteral,      // 'hello'
    TripleStringLiteral, // '''hello'''
    FStringLiteral,     // f'@var@'

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Comma,        // ,
    Colon,        // :
    Dot,          // .
    QuestionMark, // ?

    /* Operators */
    Plus,                 // +
    Minus,                // -
    Asterisk,             // *
    Divide,               // /
    Modulus,              // %
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals,     // =
    PlusEquals, // +=

    /* Statement separator (suppressed inside brackets) */
    Newline,
}

impl TokenKind {
    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::DoubleEquals
                | Self::NotEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }

    pub fn is_string_literal(&self) -> bool {
        matches!(self, Self::StringLiteral | Self::TripleStringLiteral)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    If,
    Elif,
    Else,
    Endif,
    Foreach,
    Endforeach,
    Break,
    Continue,
    And,
    Or,
    Not,
    In,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('.', TokenKind::Dot),
        ('?', TokenKind::QuestionMark),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
        ('*', TokenKind::Asterisk),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('=', TokenKind::Equals),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            peek_buffer: VecDeque::new(),
            bracket_depth: 0,
        }
    }

    pub fn source(&self) -> &SourceFile {
        self.source
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            file: self.source.origin.to_string(),
            line: self.source.row_for_position(self.position),
            column: self.source.column_for_position(self.position),
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    /// Read a quoted string. The span covers the quotes; escape sequences are
    /// resolved later by the parser.
    fn read_string(&mut self) -> Result<Token> {
        let start_position = self.position;

        if self.chars.peek_nth(1).copied() == Some('\'')
            && self.chars.peek_nth(2).copied() == Some('\'')
        {
            return self.read_triple_string();
        }

        // Consume the opening quote
        self.bump();

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                return Err(self.error("unterminated string literal"));
            }

            self.bump();

            if c == '\\' && self.chars.peek().is_some() {
                self.bump();
                continue;
            }

            if c == '\'' {
                return Ok(Token {
                    kind: TokenKind::StringLiteral,
                    span: self.new_span(start_position),
                });
            }
        }

        Err(self.error("unterminated string literal"))
    }

    fn read_triple_string(&mut self) -> Result<Token> {
        let start_position = self.position;

        for _ in 0..3 {
            self.bump();
        }

        while self.chars.peek().is_some() {
            if self.chars.peek().copied() == Some('\'')
                && self.chars.peek_nth(1).copied() == Some('\'')
                && self.chars.peek_nth(2).copied() == Some('\'')
            {
                for _ in 0..3 {
                    self.bump();
                }
                return Ok(Token {
                    kind: TokenKind::TripleStringLiteral,
                    span: self.new_span(start_position),
                });
            }
            self.bump();
        }

        Err(self.error("unterminated triple-quoted string literal"))
    }

    // Keyword, identifier, or boolean literal
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            self.bump();
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            match value {
                "true" | "false" => TokenKind::BooleanLiteral,
                _ => TokenKind::Identifier,
            }
        };

        Token { kind, span }
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;

        // Consume a radix prefix (0x, 0o, 0b) together with the digits; the
        // parser sorts out the value.
        if self.chars.peek().copied() == Some('0')
            && self
                .chars
                .peek_nth(1)
                .is_some_and(|c| matches!(c, 'x' | 'X' | 'o' | 'O' | 'b' | 'B'))
        {
            self.bump();
            self.bump();
        }

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_alphanumeric() {
                break;
            }
            self.bump();
        }

        Token {
            kind: TokenKind::IntegerLiteral,
            span: self.new_span(start_position),
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        self.bump();
        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Result<Option<Token>> {
        if let Some(token) = self.peek_buffer.front() {
            return Ok(Some(*token));
        }

        if let Some(token) = self.next()? {
            self.peek_buffer.push_back(token);
        }

        Ok(self.peek_buffer.front().copied())
    }

    pub fn peek_nth(&mut self, n: usize) -> Result<Option<Token>> {
        while self.peek_buffer.len() <= n {
            let buffered = self.peek_buffer.len();
            match self.scan()? {
                Some(token) => self.peek_buffer.push_back(token),
                None => return Ok(None),
            }
            debug_assert_eq!(self.peek_buffer.len(), buffered + 1);
        }

        Ok(self.peek_buffer.get(n).copied())
    }

    pub fn next(&mut self) -> Result<Option<Token>> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Ok(Some(token));
        }
        self.scan()
    }

    fn scan(&mut self) -> Result<Option<Token>> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                '\n' => {
                    let token = self.read_single(TokenKind::Newline);
                    if self.bracket_depth > 0 {
                        continue;
                    }
                    token
                }
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                // Comments run to the end of the line
                '#' => {
                    self.ignore_line();
                    continue;
                }

                '\'' => self.read_string()?,
                // f-strings: an `f` immediately followed by a quote
                'f' if self.chars.peek_nth(1).copied() == Some('\'') => {
                    let start_position = self.position;
                    self.bump();
                    self.read_string()?;
                    Token {
                        kind: TokenKind::FStringLiteral,
                        span: self.new_span(start_position),
                    }
                }

                n if n.is_ascii_digit() => self.read_number(),

                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                '=' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }
                '!' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::NotEquals)
                }
                '<' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::LessThanOrEqualTo)
                }
                '>' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }
                '+' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::PlusEquals)
                }

                s if SINGLE_TOKENS.contains_key(&s) => {
                    let kind = SINGLE_TOKENS[&s];
                    match kind {
                        TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenBrace => {
                            self.bracket_depth += 1
                        }
                        TokenKind::CloseParen
                        | TokenKind::CloseBracket
                        | TokenKind::CloseBrace => {
                            self.bracket_depth = self.bracket_depth.saturating_sub(1)
                        }
                        _ => {}
                    }
                    self.read_single(kind)
                }
                c => return Err(self.error(format!("unexpected character in stream: `{c}`"))),
            };

            return Ok(Some(token));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let source = SourceFile::from_string(input);
        let mut lexer = Lexer::new(&source);
        let mut out = Vec::new();
        while let Some(token) = lexer.next().unwrap() {
            out.push(token.kind);
        }
        out
    }

    #[test]
    fn words_and_literals() {
        assert_eq!(
            kinds("x = files('foo.c')"),
            vec![
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::Identifier,
                TokenKind::OpenParen,
                TokenKind::StringLiteral,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn keywords() {
        assert_eq!(
            kinds("if not true\nendif"),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::Not),
                TokenKind::BooleanLiteral,
                TokenKind::Newline,
                TokenKind::Keyword(Keyword::Endif),
            ]
        );
    }

    #[test]
    fn newlines_suppressed_in_brackets() {
        assert_eq!(
            kinds("f(\n'a',\n'b',\n)"),
            vec![
                TokenKind::Identifier,
                TokenKind::OpenParen,
                TokenKind::StringLiteral,
                TokenKind::Comma,
                TokenKind::StringLiteral,
                TokenKind::Comma,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn comments_ignored() {
        assert_eq!(
            kinds("x = 7 # seven\ny = 8"),
            vec![
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::IntegerLiteral,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::IntegerLiteral,
            ]
        );
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e"),
            vec![
                TokenKind::Identifier,
                TokenKind::DoubleEquals,
                TokenKind::Identifier,
                TokenKind::NotEquals,
                TokenKind::Identifier,
                TokenKind::LessThanOrEqualTo,
                TokenKind::Identifier,
                TokenKind::GreaterThanOrEqualTo,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn triple_string() {
        let source = SourceFile::from_string("x = '''a\nb'''");
        let mut lexer = Lexer::new(&source);
        lexer.next().unwrap();
        lexer.next().unwrap();
        let token = lexer.next().unwrap().unwrap();
        assert_eq!(token.kind, TokenKind::TripleStringLiteral);
        assert_eq!(source.value_of_span(token.span), "'''a\nb'''");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let source = SourceFile::from_string("x = 'oops\n");
        let mut lexer = Lexer::new(&source);
        lexer.next().unwrap();
        lexer.next().unwrap();
        assert!(lexer.next().is_err());
    }
}
