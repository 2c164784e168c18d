//! Lexical analysis (tokenization).
//!
//! The scanner produces one [`Token`] at a time on demand: the compiler
//! drives it directly instead of collecting a token vector up front, which is
//! what lets the compiler stay single-pass. Whitespace, comments, and newline
//! tracking are handled internally.

use crate::token::{Token, TokenKind};

/// Lazily tokenizes a source buffer.
///
/// Holds the source as raw bytes rather than `&str` so indexing is O(1).
/// String and identifier lexemes are later recovered with `str::from_utf8`
/// over byte ranges that are always on character boundaries because the
/// language's own syntax is ASCII.
pub struct Scanner<'src> {
    source: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    /// Scan and return the next token.
    ///
    /// Once this returns `Eof`, every subsequent call keeps returning `Eof`,
    /// because `is_at_end` short-circuits before `current` can move past the
    /// end of the buffer.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();

        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.match_byte(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.source[self.current + 1]
        }
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.current += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.current += 1;
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.current += 1;
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        // Consume the closing quote.
        self.current += 1;
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.current += 1;
        }
        // A trailing '.' with no following digits is still consumed, since
        // the compiler's `f64` parse of the lexeme accepts "1.".
        if self.peek() == b'.' {
            self.current += 1;
            while self.peek().is_ascii_digit() {
                self.current += 1;
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || self.peek().is_ascii_digit() {
            self.current += 1;
        }
        let kind = self.identifier_kind();
        self.make_token(kind)
    }

    /// Hand-written keyword trie: dispatch on the first byte, then confirm
    /// the remaining tail with a single comparison. Avoids a full hash-map
    /// lookup for keyword recognition.
    fn identifier_kind(&self) -> TokenKind {
        let text = &self.source[self.start..self.current];
        match text.first() {
            Some(b'a') => self.check_keyword(1, "nd", TokenKind::And),
            Some(b'c') => self.check_keyword(1, "lass", TokenKind::Class),
            Some(b'e') => self.check_keyword(1, "lse", TokenKind::Else),
            Some(b'f') if text.len() > 1 => match text[1] {
                b'a' => self.check_keyword(2, "lse", TokenKind::False),
                b'o' => self.check_keyword(2, "r", TokenKind::For),
                b'u' => self.check_keyword(2, "n", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            Some(b'i') => self.check_keyword(1, "f", TokenKind::If),
            Some(b'n') => self.check_keyword(1, "il", TokenKind::Nil),
            Some(b'o') => self.check_keyword(1, "r", TokenKind::Or),
            Some(b'p') => self.check_keyword(1, "rint", TokenKind::Print),
            Some(b'r') => self.check_keyword(1, "eturn", TokenKind::Return),
            Some(b's') => self.check_keyword(1, "uper", TokenKind::Super),
            Some(b't') if text.len() > 1 => match text[1] {
                b'h' => self.check_keyword(2, "is", TokenKind::This),
                b'r' => self.check_keyword(2, "ue", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            Some(b'v') => self.check_keyword(1, "ar", TokenKind::Var),
            Some(b'w') => self.check_keyword(1, "hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn check_keyword(&self, start: usize, rest: &str, kind: TokenKind) -> TokenKind {
        let text = &self.source[self.start..self.current];
        if text.len() == start + rest.len() && &text[start..] == rest.as_bytes() {
            kind
        } else {
            TokenKind::Identifier
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        let lexeme = std::str::from_utf8(&self.source[self.start..self.current])
            .expect("lexeme is always a valid ASCII substring of the source");
        Token::new(kind, lexeme, self.line)
    }

    /// Errors carry a `'static` message rather than source text, since the
    /// "lexeme" of an error token is never used by the compiler beyond
    /// reporting the message itself.
    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token::new(TokenKind::Error, message, self.line)
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}
