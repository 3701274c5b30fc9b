use super::span::Span;
use super::token::{Keyword, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("Unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("'*/' expected")]
    UnterminatedComment { span: Span },

    #[error("Invalid character '{ch}'")]
    UnexpectedCharacter { ch: char, span: Span },

    #[error("Invalid number literal '{text}'")]
    InvalidNumber { text: String, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnterminatedString { span }
            | LexError::UnterminatedComment { span }
            | LexError::UnexpectedCharacter { span, .. }
            | LexError::InvalidNumber { span, .. } => *span,
        }
    }
}

/// Punctuation, longest first so that the first match wins.
const PUNCTUATION: &[(&str, TokenKind)] = &[
    ("...", TokenKind::Ellipsis),
    ("===", TokenKind::EqEqEq),
    ("!==", TokenKind::NotEqEq),
    ("=>", TokenKind::Arrow),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("<=", TokenKind::LtEq),
    (">=", TokenKind::GtEq),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("??", TokenKind::QuestionQuestion),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
    ("=", TokenKind::Assign),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("!", TokenKind::Bang),
    ("|", TokenKind::Pipe),
    ("&", TokenKind::Amp),
];

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: u32,
    column: u32,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
}

/// Splits guest source into tokens. All lexical errors are collected so a
/// single pass reports every problem; the token stream always ends in `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Vec<LexError>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        tokens: Vec::new(),
        errors: Vec::new(),
    };
    lexer.skip_shebang();
    lexer.run();
    if lexer.errors.is_empty() {
        Ok(lexer.tokens)
    } else {
        Err(lexer.errors)
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn span_from(&self, mark: Mark) -> Span {
        Span::new(mark.pos, self.pos, mark.line, mark.column)
    }

    fn push(&mut self, kind: TokenKind, mark: Mark) {
        let span = self.span_from(mark);
        self.tokens.push(Token::new(kind, span));
    }

    fn skip_shebang(&mut self) {
        if self.peek() == Some('#') && self.peek_at(1) == Some('!') {
            while let Some(ch) = self.peek() {
                if ch == '\n' {
                    break;
                }
                self.bump();
            }
        }
    }

    fn run(&mut self) {
        loop {
            self.skip_trivia();
            let mark = self.mark();
            let Some(ch) = self.peek() else {
                self.push(TokenKind::Eof, mark);
                break;
            };

            if is_ident_start(ch) {
                self.ident(mark);
            } else if ch.is_ascii_digit()
                || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
            {
                self.number(mark);
            } else if ch == '"' || ch == '\'' || ch == '`' {
                self.string(mark, ch);
            } else {
                self.punct(mark, ch);
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let mark = self.mark();
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(ch) = self.bump() {
                        if ch == '*' && self.peek() == Some('/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        let span = self.span_from(mark);
                        self.errors.push(LexError::UnterminatedComment { span });
                    }
                }
                _ => break,
            }
        }
    }

    fn ident(&mut self, mark: Mark) {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if !is_ident_continue(ch) {
                break;
            }
            text.push(ch);
            self.bump();
        }
        let kind = match Keyword::lookup(&text) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(text),
        };
        self.push(kind, mark);
    }

    fn number(&mut self, mark: Mark) {
        let mut text = String::new();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            while let Some(ch) = self.peek() {
                if !ch.is_ascii_hexdigit() && ch != '_' {
                    break;
                }
                if ch != '_' {
                    text.push(ch);
                }
                self.bump();
            }
            match u64::from_str_radix(&text, 16) {
                Ok(value) => self.push(TokenKind::Number(value as f64), mark),
                Err(_) => {
                    let span = self.span_from(mark);
                    self.errors.push(LexError::InvalidNumber {
                        text: format!("0x{}", text),
                        span,
                    });
                }
            }
            return;
        }

        self.digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let has_exponent = match sign {
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if has_exponent {
                text.push('e');
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
                self.digits(&mut text);
            }
        }

        match text.parse::<f64>() {
            Ok(value) => self.push(TokenKind::Number(value), mark),
            Err(_) => {
                let span = self.span_from(mark);
                self.errors.push(LexError::InvalidNumber { text, span });
            }
        }
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(ch) = self.peek() {
            if ch == '_' {
                self.bump();
                continue;
            }
            if !ch.is_ascii_digit() {
                break;
            }
            text.push(ch);
            self.bump();
        }
    }

    fn string(&mut self, mark: Mark, quote: char) {
        self.bump();
        let mut value = String::new();
        loop {
            let Some(ch) = self.peek() else {
                let span = self.span_from(mark);
                self.errors.push(LexError::UnterminatedString { span });
                return;
            };
            if ch == quote {
                self.bump();
                break;
            }
            if ch == '\n' && quote != '`' {
                let span = self.span_from(mark);
                self.errors.push(LexError::UnterminatedString { span });
                return;
            }
            self.bump();
            if ch != '\\' {
                value.push(ch);
                continue;
            }
            match self.bump() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some('0') => value.push('\0'),
                Some('b') => value.push('\u{8}'),
                Some('f') => value.push('\u{c}'),
                Some('v') => value.push('\u{b}'),
                Some('u') => {
                    let mut hex = String::new();
                    for _ in 0..4 {
                        match self.peek() {
                            Some(c) if c.is_ascii_hexdigit() => {
                                hex.push(c);
                                self.bump();
                            }
                            _ => break,
                        }
                    }
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => value.push(decoded),
                        None => {
                            value.push('u');
                            value.push_str(&hex);
                        }
                    }
                }
                Some('\n') => {}
                Some(other) => value.push(other),
                None => {
                    let span = self.span_from(mark);
                    self.errors.push(LexError::UnterminatedString { span });
                    return;
                }
            }
        }
        self.push(TokenKind::Str(value), mark);
    }

    fn punct(&mut self, mark: Mark, ch: char) {
        for (text, kind) in PUNCTUATION {
            let matches = text
                .chars()
                .enumerate()
                .all(|(offset, expected)| self.peek_at(offset) == Some(expected));
            if matches {
                for _ in 0..text.chars().count() {
                    self.bump();
                }
                self.push(kind.clone(), mark);
                return;
            }
        }
        self.bump();
        let span = self.span_from(mark);
        self.errors.push(LexError::UnexpectedCharacter { ch, span });
    }
}
