//! Integration tests for the scanner, driven purely through its public API.

use ember_runtime::scanner::Scanner;
use ember_runtime::token::TokenKind;

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut scanner = Scanner::new(source);
    let mut out = Vec::new();
    loop {
        let token = scanner.scan_token();
        let kind = token.kind;
        out.push(kind);
        if kind == TokenKind::Eof {
            break;
        }
    }
    out
}

#[test]
fn scans_a_full_statement() {
    let got = kinds("var x = 1 + 2;");
    assert_eq!(
        got,
        vec![
            TokenKind::Var,
            TokenKind::Identifier,
            TokenKind::Equal,
            TokenKind::Number,
            TokenKind::Plus,
            TokenKind::Number,
            TokenKind::Semicolon,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn distinguishes_one_and_two_character_operators() {
    let got = kinds("< <= > >= == = ! !=");
    assert_eq!(
        got,
        vec![
            TokenKind::Less,
            TokenKind::LessEqual,
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::EqualEqual,
            TokenKind::Equal,
            TokenKind::Bang,
            TokenKind::BangEqual,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn recognizes_every_keyword_and_not_their_prefixes() {
    let got = kinds("and class else false for fun if nil or print return super this true var while andrew");
    let mut expected = vec![
        TokenKind::And,
        TokenKind::Class,
        TokenKind::Else,
        TokenKind::False,
        TokenKind::For,
        TokenKind::Fun,
        TokenKind::If,
        TokenKind::Nil,
        TokenKind::Or,
        TokenKind::Print,
        TokenKind::Return,
        TokenKind::Super,
        TokenKind::This,
        TokenKind::True,
        TokenKind::Var,
        TokenKind::While,
        TokenKind::Identifier, // "andrew" is not the keyword "and"
    ];
    expected.push(TokenKind::Eof);
    assert_eq!(got, expected);
}

#[test]
fn line_comments_are_skipped_but_lines_still_advance() {
    let mut scanner = Scanner::new("1 // a comment\n2");
    let first = scanner.scan_token();
    assert_eq!(first.kind, TokenKind::Number);
    assert_eq!(first.line, 1);
    let second = scanner.scan_token();
    assert_eq!(second.kind, TokenKind::Number);
    assert_eq!(second.line, 2);
}

#[test]
fn unterminated_string_is_an_error_token() {
    let mut scanner = Scanner::new("\"never closed");
    let token = scanner.scan_token();
    assert_eq!(token.kind, TokenKind::Error);
}

#[test]
fn scanning_past_eof_keeps_returning_eof() {
    let mut scanner = Scanner::new("");
    assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
    assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
}
