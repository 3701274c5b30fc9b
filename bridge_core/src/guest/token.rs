use super::span::Span;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;

/// Reserved words of the guest language.
///
/// Contextual words (`from`, `as`, `type`, `interface`, `declare`) are lexed
/// as identifiers and recognised by the parser where they are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Function,
    Async,
    Await,
    Return,
    Let,
    Const,
    Var,
    If,
    Else,
    While,
    For,
    Of,
    Break,
    Continue,
    Export,
    Default,
    Import,
    True,
    False,
    Null,
    Undefined,
    Typeof,
    Throw,
    Try,
    Catch,
    Finally,
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, Keyword> = {
        let mut map = HashMap::new();
        for keyword in Keyword::ALL {
            map.insert(keyword.as_str(), keyword);
        }
        map
    };
}

impl Keyword {
    const ALL: [Keyword; 26] = [
        Keyword::Function,
        Keyword::Async,
        Keyword::Await,
        Keyword::Return,
        Keyword::Let,
        Keyword::Const,
        Keyword::Var,
        Keyword::If,
        Keyword::Else,
        Keyword::While,
        Keyword::For,
        Keyword::Of,
        Keyword::Break,
        Keyword::Continue,
        Keyword::Export,
        Keyword::Default,
        Keyword::Import,
        Keyword::True,
        Keyword::False,
        Keyword::Null,
        Keyword::Undefined,
        Keyword::Typeof,
        Keyword::Throw,
        Keyword::Try,
        Keyword::Catch,
        Keyword::Finally,
    ];

    pub fn lookup(word: &str) -> Option<Keyword> {
        KEYWORDS.get(word).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Function => "function",
            Keyword::Async => "async",
            Keyword::Await => "await",
            Keyword::Return => "return",
            Keyword::Let => "let",
            Keyword::Const => "const",
            Keyword::Var => "var",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::Of => "of",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Export => "export",
            Keyword::Default => "default",
            Keyword::Import => "import",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
            Keyword::Undefined => "undefined",
            Keyword::Typeof => "typeof",
            Keyword::Throw => "throw",
            Keyword::Try => "try",
            Keyword::Catch => "catch",
            Keyword::Finally => "finally",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Words and literals
    Ident(String),
    Keyword(Keyword),
    Number(f64),
    Str(String),

    // Structural
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Ellipsis,
    Question,
    Arrow,

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    // Comparison
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Arithmetic and logic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,
    AndAnd,
    OrOr,
    QuestionQuestion,
    Pipe,
    Amp,

    Eof,
}

impl TokenKind {
    /// Human readable rendering used in syntax error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Keyword(keyword) => format!("'{}'", keyword.as_str()),
            TokenKind::Number(value) => format!("number '{}'", value),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Ident(name) => return write!(f, "{}", name),
            TokenKind::Keyword(keyword) => keyword.as_str(),
            TokenKind::Number(value) => return write!(f, "{}", value),
            TokenKind::Str(value) => return write!(f, "{:?}", value),
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Ellipsis => "...",
            TokenKind::Question => "?",
            TokenKind::Arrow => "=>",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::EqEq => "==",
            TokenKind::EqEqEq => "===",
            TokenKind::NotEq => "!=",
            TokenKind::NotEqEq => "!==",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::QuestionQuestion => "??",
            TokenKind::Pipe => "|",
            TokenKind::Amp => "&",
            TokenKind::Eof => "<eof>",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(Keyword::lookup("function"), Some(Keyword::Function));
        assert_eq!(Keyword::lookup("async"), Some(Keyword::Async));
        assert_eq!(Keyword::lookup("from"), None);
        for keyword in Keyword::ALL {
            assert_eq!(Keyword::lookup(keyword.as_str()), Some(keyword));
        }
    }
}
