use std::fmt;

/// Lexical token kinds. The keyword set is closed; `max_attempts`,
/// `backoff`, and `base_delay` are deliberately plain identifiers so that
/// retry blocks parse their fields uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Illegal,
    Eof,
    Comment,

    // Literals
    Ident,
    Number,
    Str,
    /// Digit run immediately followed by a unit suffix, e.g. `5m`, `100ms`.
    Duration,
    /// `${name}`; the literal is the bare name.
    VarRef,

    // Keywords
    Var,
    Request,
    Scenario,
    Load,
    Run,
    If,
    Else,
    Assert,
    Extract,
    Retry,
    Curl,
    Vus,
    Rps,
    For,
    Iterations,
    With,
    In,
    Status,
    Latency,
    Body,
    Think,
    True,
    False,

    // Operators
    Assign,
    Eq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    Arrow,
    Dollar,
    Dot,
    Comma,
    Colon,
    Backslash,
    Pipe,

    // Delimiters
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,

    Newline,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Comment => "COMMENT",
            TokenKind::Ident => "IDENT",
            TokenKind::Number => "NUMBER",
            TokenKind::Str => "STRING",
            TokenKind::Duration => "DURATION",
            TokenKind::VarRef => "VAR_REF",
            TokenKind::Var => "var",
            TokenKind::Request => "request",
            TokenKind::Scenario => "scenario",
            TokenKind::Load => "load",
            TokenKind::Run => "run",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Assert => "assert",
            TokenKind::Extract => "extract",
            TokenKind::Retry => "retry",
            TokenKind::Curl => "curl",
            TokenKind::Vus => "vus",
            TokenKind::Rps => "rps",
            TokenKind::For => "for",
            TokenKind::Iterations => "iterations",
            TokenKind::With => "with",
            TokenKind::In => "in",
            TokenKind::Status => "status",
            TokenKind::Latency => "latency",
            TokenKind::Body => "body",
            TokenKind::Think => "think",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Lte => "<=",
            TokenKind::Gte => ">=",
            TokenKind::Arrow => "->",
            TokenKind::Dollar => "$",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Backslash => "\\",
            TokenKind::Pipe => "|",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Newline => "NEWLINE",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source location, 1-based line, column of the token's first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub pos: Position,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, pos: Position) -> Self {
        Self {
            kind,
            literal: literal.into(),
            pos,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "EOF"),
            TokenKind::Newline => write!(f, "NEWLINE"),
            TokenKind::Comment
            | TokenKind::Ident
            | TokenKind::Number
            | TokenKind::Str
            | TokenKind::Duration
            | TokenKind::VarRef => write!(f, "{}({})", self.kind.name(), self.literal),
            _ => f.write_str(self.kind.name()),
        }
    }
}

/// Keyword lookup for a lexed identifier.
pub fn lookup_ident(ident: &str) -> TokenKind {
    match ident {
        "var" => TokenKind::Var,
        "request" => TokenKind::Request,
        "scenario" => TokenKind::Scenario,
        "load" => TokenKind::Load,
        "run" => TokenKind::Run,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "assert" => TokenKind::Assert,
        "extract" => TokenKind::Extract,
        "retry" => TokenKind::Retry,
        "curl" => TokenKind::Curl,
        "vus" => TokenKind::Vus,
        "rps" => TokenKind::Rps,
        "for" => TokenKind::For,
        "iterations" => TokenKind::Iterations,
        "with" => TokenKind::With,
        "in" => TokenKind::In,
        "status" => TokenKind::Status,
        "latency" => TokenKind::Latency,
        "body" => TokenKind::Body,
        "think" => TokenKind::Think,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => TokenKind::Ident,
    }
}
